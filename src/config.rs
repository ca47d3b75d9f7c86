use crate::style::{StyleNode, StyleValue, format_number};
use crate::theme::{ScaleMap, default_theme_map};
use crate::utils::{Utility, UtilityRegistry};
use crate::value::property_name;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Compiler configuration: token scales, breakpoints, theme map and utilities.
#[derive(Debug, Clone)]
pub struct Config {
    prefix: String,
    theme: ScaleMap,
    media: Vec<(String, String)>,
    theme_map: BTreeMap<String, String>,
    utils: UtilityRegistry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            theme: ScaleMap::new(),
            media: Vec::new(),
            theme_map: default_theme_map(),
            utils: UtilityRegistry::new(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        load(path)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn theme(&self) -> &ScaleMap {
        &self.theme
    }

    /// Breakpoints in declaration order.
    pub fn media(&self) -> &[(String, String)] {
        &self.media
    }

    pub fn breakpoints(&self) -> Vec<String> {
        self.media.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn breakpoint_query(&self, name: &str) -> Option<&str> {
        self.media
            .iter()
            .find(|(breakpoint, _)| breakpoint == name)
            .map(|(_, query)| query.as_str())
    }

    pub fn theme_map(&self) -> &BTreeMap<String, String> {
        &self.theme_map
    }

    pub fn utils(&self) -> &UtilityRegistry {
        &self.utils
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self
            .prefix
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "prefix '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.prefix
            )));
        }
        for (scale, tokens) in &self.theme {
            check_name("scale", scale)?;
            for token in tokens.keys() {
                check_name("token", token)?;
            }
        }
        for (idx, (name, query)) in self.media.iter().enumerate() {
            check_name("breakpoint", name)?;
            if name == "initial" {
                return Err(ConfigError::Invalid(
                    "breakpoint name 'initial' is reserved".to_string(),
                ));
            }
            if query.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "breakpoint '{}' has an empty media query",
                    name
                )));
            }
            if self.media[..idx].iter().any(|(earlier, _)| earlier == name) {
                return Err(ConfigError::Invalid(format!("breakpoint '{}' is declared twice", name)));
            }
        }
        for name in self.utils.names() {
            if name.is_empty() || name.starts_with(['@', '&', '$', ':']) || name.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "utility name '{}' collides with selector, at-rule or token syntax",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn check_name(kind: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains('$') {
        return Err(ConfigError::Invalid(format!(
            "{} name '{}' must be non-empty and free of whitespace and '$'",
            kind, name
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn theme_scale<K, V>(mut self, scale: impl Into<String>, tokens: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let entry = self.config.theme.entry(scale.into()).or_default();
        for (name, value) in tokens {
            entry.insert(name.into(), value.into());
        }
        self
    }

    pub fn theme_token(
        mut self,
        scale: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config
            .theme
            .entry(scale.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Declares a breakpoint usable as `@name` and in responsive variant values.
    pub fn media(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.config.media.push((name.into(), query.into()));
        self
    }

    pub fn theme_map(mut self, property: &str, scale: impl Into<String>) -> Self {
        self.config.theme_map.insert(property_name(property), scale.into());
        self
    }

    pub fn utility<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StyleValue) -> StyleNode + Send + Sync + 'static,
    {
        self.config.utils.register(name, Utility::function(f));
        self
    }

    pub fn template_utility(mut self, name: impl Into<String>, template: StyleNode) -> Self {
        self.config.utils.register(name, Utility::Template(template));
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    theme: BTreeMap<String, BTreeMap<String, TokenValue>>,
    #[serde(default)]
    media: toml::Table,
    #[serde(default)]
    theme_map: BTreeMap<String, String>,
    #[serde(default)]
    utils: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl TokenValue {
    fn into_text(self) -> String {
        match self {
            TokenValue::Text(text) => text,
            TokenValue::Integer(value) => value.to_string(),
            TokenValue::Float(value) => format_number(value),
        }
    }
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    from_file(file)
}

pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;
    from_file(file)
}

fn from_file(file: ConfigFile) -> Result<Config, ConfigError> {
    let mut builder = Config::builder().prefix(file.prefix);
    for (scale, tokens) in file.theme {
        builder = builder.theme_scale(
            scale,
            tokens.into_iter().map(|(name, value)| (name, value.into_text())),
        );
    }
    for (name, query) in file.media {
        let toml::Value::String(query) = query else {
            return Err(ConfigError::Invalid(format!(
                "media query for breakpoint '{}' must be a string",
                name
            )));
        };
        builder = builder.media(name, query);
    }
    for (property, scale) in file.theme_map {
        builder = builder.theme_map(&property, scale);
    }
    for (name, template) in file.utils {
        let path = format!("utils.{}", name);
        let toml::Value::Table(table) = template else {
            return Err(ConfigError::Invalid(format!("{} must be a table", path)));
        };
        builder = builder.template_utility(name, node_from_toml(table, &path)?);
    }
    builder.build()
}

fn node_from_toml(table: toml::Table, path: &str) -> Result<StyleNode, ConfigError> {
    let mut node = StyleNode::new();
    for (key, value) in table {
        let child = format!("{}.{}", path, key);
        let value = value_from_toml(value, &child)?;
        node.insert(key, value);
    }
    Ok(node)
}

fn value_from_toml(value: toml::Value, path: &str) -> Result<StyleValue, ConfigError> {
    match value {
        toml::Value::String(text) => Ok(StyleValue::Str(text)),
        toml::Value::Integer(number) => Ok(StyleValue::Number(number as f64)),
        toml::Value::Float(number) => Ok(StyleValue::Number(number)),
        toml::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| value_from_toml(item, &format!("{}[{}]", path, idx)))
            .collect::<Result<Vec<_>, _>>()
            .map(StyleValue::List),
        toml::Value::Table(table) => node_from_toml(table, path).map(StyleValue::Node),
        toml::Value::Boolean(_) | toml::Value::Datetime(_) => Err(ConfigError::Invalid(format!(
            "{} holds a value that is not valid CSS",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, from_toml_str, load};
    use crate::style::{StyleNode, StyleValue};
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn loads_toml_config() {
        let path = temp_path("ironstyle_config");
        let _ = fs::write(
            &path,
            r##"
prefix = "app"

[theme.colors]
gray100 = "#f3f4f6"
blue500 = "#3b82f6"

[theme.zIndices]
modal = 100

[media]
bp2 = "(min-width: 768px)"
bp1 = "(min-width: 640px)"

[theme_map]
caretColor = "colors"

[utils.px]
paddingLeft = "--value()"
paddingRight = "--value()"
"##,
        );
        let config = load(&path).expect("config should parse");
        assert_eq!(config.prefix(), "app");
        assert_eq!(config.theme()["colors"]["blue500"], "#3b82f6");
        assert_eq!(config.theme()["zIndices"]["modal"], "100");
        assert_eq!(config.breakpoints(), vec!["bp2".to_string(), "bp1".to_string()]);
        assert_eq!(config.breakpoint_query("bp1"), Some("(min-width: 640px)"));
        assert_eq!(config.theme_map()["caret-color"], "colors");
        assert_eq!(config.theme_map()["color"], "colors");

        let expanded = config
            .utils()
            .expand_utility("px", &StyleValue::from("$2"))
            .expect("px is declared");
        assert_eq!(expanded.get("paddingLeft"), Some(&StyleValue::from("$2")));
    }

    #[test]
    fn defaults_when_empty() {
        let path = temp_path("ironstyle_config_default");
        let _ = fs::write(&path, "");
        let config = load(&path).expect("config should parse");
        assert_eq!(config.prefix(), "");
        assert!(config.theme().is_empty());
        assert!(config.media().is_empty());
        assert!(config.utils().is_empty());
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let missing = temp_path("ironstyle_config_missing");
        assert!(matches!(load(&missing), Err(ConfigError::Io { .. })));

        let err = from_toml_str("prefix = [").expect_err("broken toml must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn validates_builder_input() {
        let err = Config::builder().prefix("my app").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::builder().media("bp1", " ").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::builder()
            .theme_token("colors", "brand red", "red")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::builder()
            .utility("&hover", |_| StyleNode::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = from_toml_str("[utils.flag]\nenabled = true").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        assert!(
            Config::builder()
                .prefix("app")
                .media("bp1", "(min-width: 640px)")
                .utility("size", |value| StyleNode::new()
                    .with("width", value.clone())
                    .with("height", value.clone()))
                .build()
                .is_ok()
        );
    }

    fn temp_path(prefix: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}.toml", prefix, nanos))
    }
}
