//! Token registry: theme scales, tokens and the property-to-scale theme map.

use crate::error::StyleError;
use crate::generator::{content_hash, escape_selector, to_base36};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

/// Scale name → (token name → raw value).
pub type ScaleMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    scale: String,
    name: String,
    value: String,
    prefix: String,
}

impl Token {
    pub fn new(
        prefix: impl Into<String>,
        scale: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            scale: scale.into(),
            name: name.into(),
            value: value.into(),
            prefix: prefix.into(),
        }
    }

    pub fn scale(&self) -> &str {
        &self.scale
    }

    pub fn token(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Custom property name, e.g. `--colors-foreground`.
    pub fn variable(&self) -> String {
        custom_property(&self.prefix, &format!("{}-{}", self.scale, self.name))
    }

    /// `var(--colors-foreground)`.
    pub fn computed_value(&self) -> String {
        format!("var({})", self.variable())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.computed_value())
    }
}

/// `--{prefix-}{name}`.
pub fn custom_property(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        format!("--{}", name)
    } else {
        format!("--{}-{}", prefix, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scale {
    name: String,
    tokens: BTreeMap<String, Token>,
}

impl Scale {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, token: &str) -> Option<&Token> {
        self.tokens.get(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Index<&str> for Scale {
    type Output = Token;

    fn index(&self, token: &str) -> &Self::Output {
        self.tokens
            .get(token)
            .unwrap_or_else(|| panic!("no token '{}' in scale '{}'", token, self.name))
    }
}

/// A registered theme.
///
/// The default theme applies to `:root` and to its own class; a created theme only
/// scopes the tokens it overrides and sees every other token of the default theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    name: String,
    class_name: String,
    selector: String,
    scales: BTreeMap<String, Scale>,
    declared: Vec<Token>,
}

impl Theme {
    /// Registers the default theme of a configuration.
    pub fn register(scales: &ScaleMap, prefix: &str) -> Theme {
        let class_name = theme_class_name(prefix, "default", scales);
        let mut registered = BTreeMap::new();
        let mut declared = Vec::new();
        for (scale_name, tokens) in scales {
            let mut scale = Scale {
                name: scale_name.clone(),
                tokens: BTreeMap::new(),
            };
            for (token_name, value) in tokens {
                let token = Token::new(prefix, scale_name, token_name, value);
                declared.push(token.clone());
                scale.tokens.insert(token_name.clone(), token);
            }
            registered.insert(scale_name.clone(), scale);
        }
        Theme {
            name: "default".to_string(),
            selector: format!(":root,.{}", class_name),
            class_name,
            scales: registered,
            declared,
        }
    }

    /// Creates a theme overriding tokens of `self`, which must be the default theme.
    pub fn derive(
        &self,
        name: Option<&str>,
        overrides: &ScaleMap,
        prefix: &str,
    ) -> Result<Theme, StyleError> {
        let mut scales = self.scales.clone();
        let mut declared = Vec::new();
        for (scale_name, tokens) in overrides {
            for (token_name, value) in tokens {
                let Some(scale) = scales.get_mut(scale_name) else {
                    return Err(StyleError::UnknownToken {
                        scale: scale_name.clone(),
                        token: token_name.clone(),
                    });
                };
                if !scale.tokens.contains_key(token_name) {
                    return Err(StyleError::UnknownToken {
                        scale: scale_name.clone(),
                        token: token_name.clone(),
                    });
                }
                let token = Token::new(prefix, scale_name, token_name, value);
                declared.push(token.clone());
                scale.tokens.insert(token_name.clone(), token);
            }
        }

        let class_name = match name {
            Some(name) if name.is_empty() || name.contains(char::is_whitespace) => {
                return Err(StyleError::invalid(
                    "createTheme",
                    format!("theme name '{}' must be a single non-empty class name", name),
                ));
            }
            Some(name) => name.to_string(),
            None => theme_class_name(prefix, "theme", overrides),
        };
        Ok(Theme {
            name: name.unwrap_or(&class_name).to_string(),
            selector: format!(".{}", escape_selector(&class_name)),
            class_name,
            scales,
            declared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Selector the theme's custom properties are declared on.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn scale(&self, scale: &str) -> Option<&Scale> {
        self.scales.get(scale)
    }

    pub fn get(&self, scale: &str, token: &str) -> Option<&Token> {
        self.scales.get(scale)?.get(token)
    }

    pub fn resolve_token(&self, scale: &str, token: &str) -> Result<&Token, StyleError> {
        self.get(scale, token).ok_or_else(|| StyleError::UnknownToken {
            scale: scale.to_string(),
            token: token.to_string(),
        })
    }

    /// Tokens this theme writes custom properties for.
    pub fn declared_tokens(&self) -> &[Token] {
        &self.declared
    }

    pub fn is_empty(&self) -> bool {
        self.scales.values().all(Scale::is_empty)
    }
}

impl Index<&str> for Theme {
    type Output = Scale;

    fn index(&self, scale: &str) -> &Self::Output {
        self.scales
            .get(scale)
            .unwrap_or_else(|| panic!("no scale '{}' in theme '{}'", scale, self.name))
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.class_name)
    }
}

fn theme_class_name(prefix: &str, kind: &str, scales: &ScaleMap) -> String {
    let mut parts = vec![kind.to_string()];
    for (scale, tokens) in scales {
        for (token, value) in tokens {
            parts.push(format!("{}.{}={}", scale, token, value));
        }
    }
    let refs = parts.iter().map(String::as_str).collect::<Vec<_>>();
    let hash = to_base36(content_hash(&refs));
    if prefix.is_empty() {
        format!("t-{}", hash)
    } else {
        format!("{}-t-{}", prefix, hash)
    }
}

const DEFAULT_THEME_MAP: &[(&str, &str)] = &[
    ("gap", "space"),
    ("grid-gap", "space"),
    ("column-gap", "space"),
    ("grid-column-gap", "space"),
    ("row-gap", "space"),
    ("grid-row-gap", "space"),
    ("inset", "space"),
    ("inset-block", "space"),
    ("inset-block-end", "space"),
    ("inset-block-start", "space"),
    ("inset-inline", "space"),
    ("inset-inline-end", "space"),
    ("inset-inline-start", "space"),
    ("margin", "space"),
    ("margin-top", "space"),
    ("margin-right", "space"),
    ("margin-bottom", "space"),
    ("margin-left", "space"),
    ("margin-block", "space"),
    ("margin-block-end", "space"),
    ("margin-block-start", "space"),
    ("margin-inline", "space"),
    ("margin-inline-end", "space"),
    ("margin-inline-start", "space"),
    ("padding", "space"),
    ("padding-top", "space"),
    ("padding-right", "space"),
    ("padding-bottom", "space"),
    ("padding-left", "space"),
    ("padding-block", "space"),
    ("padding-block-end", "space"),
    ("padding-block-start", "space"),
    ("padding-inline", "space"),
    ("padding-inline-end", "space"),
    ("padding-inline-start", "space"),
    ("scroll-margin", "space"),
    ("scroll-padding", "space"),
    ("top", "space"),
    ("right", "space"),
    ("bottom", "space"),
    ("left", "space"),
    ("font-size", "fontSizes"),
    ("background", "colors"),
    ("background-color", "colors"),
    ("background-image", "colors"),
    ("border-image", "colors"),
    ("border", "colors"),
    ("border-block", "colors"),
    ("border-block-end", "colors"),
    ("border-block-start", "colors"),
    ("border-bottom", "colors"),
    ("border-bottom-color", "colors"),
    ("border-color", "colors"),
    ("border-inline", "colors"),
    ("border-inline-end", "colors"),
    ("border-inline-start", "colors"),
    ("border-left", "colors"),
    ("border-left-color", "colors"),
    ("border-right", "colors"),
    ("border-right-color", "colors"),
    ("border-top", "colors"),
    ("border-top-color", "colors"),
    ("caret-color", "colors"),
    ("color", "colors"),
    ("column-rule-color", "colors"),
    ("fill", "colors"),
    ("outline", "colors"),
    ("outline-color", "colors"),
    ("stroke", "colors"),
    ("text-decoration-color", "colors"),
    ("font-family", "fonts"),
    ("font-weight", "fontWeights"),
    ("line-height", "lineHeights"),
    ("letter-spacing", "letterSpacings"),
    ("block-size", "sizes"),
    ("min-block-size", "sizes"),
    ("max-block-size", "sizes"),
    ("inline-size", "sizes"),
    ("min-inline-size", "sizes"),
    ("max-inline-size", "sizes"),
    ("width", "sizes"),
    ("min-width", "sizes"),
    ("max-width", "sizes"),
    ("height", "sizes"),
    ("min-height", "sizes"),
    ("max-height", "sizes"),
    ("flex-basis", "sizes"),
    ("grid-template-columns", "sizes"),
    ("grid-template-rows", "sizes"),
    ("border-width", "borderWidths"),
    ("border-top-width", "borderWidths"),
    ("border-right-width", "borderWidths"),
    ("border-bottom-width", "borderWidths"),
    ("border-left-width", "borderWidths"),
    ("border-style", "borderStyles"),
    ("border-top-style", "borderStyles"),
    ("border-right-style", "borderStyles"),
    ("border-bottom-style", "borderStyles"),
    ("border-left-style", "borderStyles"),
    ("border-radius", "radii"),
    ("border-top-left-radius", "radii"),
    ("border-top-right-radius", "radii"),
    ("border-bottom-right-radius", "radii"),
    ("border-bottom-left-radius", "radii"),
    ("box-shadow", "shadows"),
    ("text-shadow", "shadows"),
    ("transition", "transitions"),
    ("z-index", "zIndices"),
];

/// Built-in CSS property (kebab-case) → scale bindings.
pub fn default_theme_map() -> BTreeMap<String, String> {
    DEFAULT_THEME_MAP
        .iter()
        .map(|(property, scale)| (property.to_string(), scale.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ScaleMap, Theme, default_theme_map};
    use crate::error::StyleError;
    use std::collections::BTreeMap;

    fn scales() -> ScaleMap {
        let mut scales = ScaleMap::new();
        scales.insert(
            "colors".to_string(),
            BTreeMap::from([
                ("foreground".to_string(), "black".to_string()),
                ("background".to_string(), "white".to_string()),
            ]),
        );
        scales.insert(
            "space".to_string(),
            BTreeMap::from([("1".to_string(), "4px".to_string())]),
        );
        scales
    }

    #[test]
    fn exposes_documented_token_shape() {
        let theme = Theme::register(&scales(), "");
        let token = &theme["colors"]["foreground"];
        assert_eq!(token.value(), "black");
        assert_eq!(token.token(), "foreground");
        assert_eq!(token.scale(), "colors");
        assert_eq!(token.variable(), "--colors-foreground");
        assert_eq!(token.computed_value(), "var(--colors-foreground)");
    }

    #[test]
    fn prefixes_variables() {
        let theme = Theme::register(&scales(), "app");
        assert_eq!(
            theme["space"]["1"].computed_value(),
            "var(--app-space-1)"
        );
        assert!(theme.class_name().starts_with("app-t-"));
    }

    #[test]
    fn resolve_token_reports_unknown_tokens() {
        let theme = Theme::register(&scales(), "");
        assert!(theme.resolve_token("colors", "foreground").is_ok());
        assert_eq!(
            theme.resolve_token("colors", "brand"),
            Err(StyleError::UnknownToken {
                scale: "colors".to_string(),
                token: "brand".to_string(),
            })
        );
        assert!(theme.get("radii", "sm").is_none());
    }

    #[test]
    fn derived_theme_overrides_and_falls_back() {
        let default = Theme::register(&scales(), "");
        let mut overrides = ScaleMap::new();
        overrides.insert(
            "colors".to_string(),
            BTreeMap::from([("foreground".to_string(), "white".to_string())]),
        );
        let dark = default
            .derive(Some("dark-theme"), &overrides, "")
            .expect("override of known token");

        assert_eq!(dark.class_name(), "dark-theme");
        assert_eq!(dark.selector(), ".dark-theme");
        assert_eq!(dark["colors"]["foreground"].value(), "white");
        assert_eq!(dark["colors"]["background"].value(), "white");
        assert_eq!(dark["space"]["1"].value(), "4px");
        assert_eq!(dark.declared_tokens().len(), 1);
        assert_eq!(dark.to_string(), "dark-theme");
    }

    #[test]
    fn derived_theme_rejects_new_tokens() {
        let default = Theme::register(&scales(), "");
        let mut overrides = ScaleMap::new();
        overrides.insert(
            "colors".to_string(),
            BTreeMap::from([("brand".to_string(), "purple".to_string())]),
        );
        let err = default.derive(None, &overrides, "").expect_err("brand is not declared");
        assert!(matches!(err, StyleError::UnknownToken { .. }));

        let mut overrides = ScaleMap::new();
        overrides.insert(
            "fonts".to_string(),
            BTreeMap::from([("body".to_string(), "serif".to_string())]),
        );
        assert!(default.derive(None, &overrides, "").is_err());
    }

    #[test]
    fn theme_names_are_single_escaped_classes() {
        let default = Theme::register(&scales(), "");
        let overrides = ScaleMap::new();
        let err = default
            .derive(Some("my theme"), &overrides, "")
            .expect_err("names with spaces are two classes");
        assert!(matches!(err, StyleError::InvalidStyleValue { .. }));
        assert!(default.derive(Some(""), &overrides, "").is_err());

        let dotted = default.derive(Some("dark.v2"), &overrides, "").unwrap();
        assert_eq!(dotted.class_name(), "dark.v2");
        assert_eq!(dotted.selector(), ".dark\\.v2");
    }

    #[test]
    fn generated_theme_names_are_deterministic() {
        let default = Theme::register(&scales(), "");
        let mut overrides = ScaleMap::new();
        overrides.insert(
            "colors".to_string(),
            BTreeMap::from([("foreground".to_string(), "white".to_string())]),
        );
        let first = default.derive(None, &overrides, "").unwrap();
        let second = default.derive(None, &overrides, "").unwrap();
        assert_eq!(first.class_name(), second.class_name());
        assert_ne!(first.class_name(), default.class_name());
    }

    #[test]
    fn default_theme_map_binds_property_families() {
        let map = default_theme_map();
        assert_eq!(map.get("color").map(String::as_str), Some("colors"));
        assert_eq!(map.get("margin-top").map(String::as_str), Some("space"));
        assert_eq!(map.get("width").map(String::as_str), Some("sizes"));
        assert_eq!(map.get("z-index").map(String::as_str), Some("zIndices"));
        assert!(map.get("display").is_none());
    }
}
