//! Selector/at-rule composer.
//!
//! Flattens a nested [`StyleNode`] into [`FlatRule`] tuples. Traversal is depth-first in
//! document order and runs on an explicit frame stack; utility outputs are pushed as new
//! frames, so utility recursion is bounded by a depth counter instead of the call stack.

use crate::error::StyleError;
use crate::style::{StyleNode, StyleValue};
use crate::utils::{MAX_UTILITY_DEPTH, UtilityRegistry};
use crate::value::{ResolveContext, local_token_property, property_name, resolve_scalar, resolve_value};
use tracing::trace;

/// One declaration with the selector and at-rules it applies under.
///
/// `selector` uses `&` for the owning class in scoped styles; global and keyframe
/// selectors are literal, and descriptor blocks such as `@font-face` have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRule {
    pub at_rules: Vec<String>,
    pub selector: String,
    pub property: String,
    pub value: String,
    /// Style entry the declaration came from; fallback lists share one origin.
    pub origin: u32,
    /// Style block the declaration was written in.
    pub block: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeMode {
    /// `css`/`styled`: declarations belong to `&`.
    Scoped,
    /// `globalCss`: root keys are selectors or at-rule statements.
    Global,
    /// `keyframes`: root keys are keyframe selectors.
    Keyframes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Property,
    Utility,
    PseudoSelector,
    DescendantSelector,
    AtRule,
    AtStatement,
    LocalToken,
}

pub fn classify_key(key: &str, value: &StyleValue, utils: &UtilityRegistry) -> KeyKind {
    if key.starts_with("$$") {
        return KeyKind::LocalToken;
    }
    if utils.contains(key) {
        return KeyKind::Utility;
    }
    let block_value = is_block_value(value);
    if key.starts_with('@') {
        return if block_value {
            KeyKind::AtRule
        } else {
            KeyKind::AtStatement
        };
    }
    if !block_value {
        return KeyKind::Property;
    }
    if key.contains('&') {
        KeyKind::PseudoSelector
    } else {
        KeyKind::DescendantSelector
    }
}

fn is_block_value(value: &StyleValue) -> bool {
    match value {
        StyleValue::Node(_) => true,
        StyleValue::List(items) => {
            !items.is_empty() && items.iter().all(|item| matches!(item, StyleValue::Node(_)))
        }
        StyleValue::Str(_) | StyleValue::Number(_) => false,
    }
}

pub struct Composer<'a> {
    pub resolve: ResolveContext<'a>,
    pub utils: &'a UtilityRegistry,
    /// Breakpoint name → media query.
    pub media: &'a [(String, String)],
}

struct Frame {
    node: StyleNode,
    cursor: usize,
    selectors: Vec<String>,
    at_rules: Vec<String>,
    utility_depth: usize,
    block: u32,
    /// Declarations are allowed without a selector (descriptor at-rules at the global root).
    bare_declarations: bool,
    path: String,
}

impl<'a> Composer<'a> {
    pub fn flatten(&self, node: &StyleNode, mode: ComposeMode) -> Result<Vec<FlatRule>, StyleError> {
        let root_selectors = match mode {
            ComposeMode::Scoped => vec!["&".to_string()],
            ComposeMode::Global | ComposeMode::Keyframes => Vec::new(),
        };
        let mut stack = vec![Frame {
            node: node.clone(),
            cursor: 0,
            selectors: root_selectors,
            at_rules: Vec::new(),
            utility_depth: 0,
            block: 0,
            bare_declarations: false,
            path: String::new(),
        }];
        let mut rules = Vec::new();
        let mut next_origin = 0u32;
        let mut next_block = 1u32;

        while let Some(frame) = stack.last_mut() {
            let Some((key, value)) = frame.node.entries().get(frame.cursor).cloned() else {
                stack.pop();
                continue;
            };
            frame.cursor += 1;
            let path = join_path(&frame.path, &key);
            let selectors = frame.selectors.clone();
            let at_rules = frame.at_rules.clone();
            let utility_depth = frame.utility_depth;
            let block = frame.block;
            let bare_declarations = frame.bare_declarations;

            if key.trim().is_empty() {
                return Err(StyleError::invalid(path, "empty keys are not allowed"));
            }

            match classify_key(&key, &value, self.utils) {
                KeyKind::Property | KeyKind::LocalToken => {
                    if is_selector_key(&key) {
                        return Err(StyleError::invalid(path, "selector keys need a style object"));
                    }
                    if selectors.is_empty() && !bare_declarations {
                        return Err(StyleError::invalid(path, "declaration outside of a selector"));
                    }
                    let (property, local) = match key.strip_prefix("$$") {
                        Some(name) => (local_token_property(name, self.resolve.prefix), true),
                        None => (property_name(&key), false),
                    };
                    let values = self.declaration_values(&property, &value, local, &path)?;
                    let origin = next_origin;
                    next_origin += 1;
                    for value in values {
                        let rule = FlatRule {
                            at_rules: at_rules.clone(),
                            selector: selectors.join(", "),
                            property: property.clone(),
                            value,
                            origin,
                            block,
                        };
                        trace!(?rule, "flattened declaration");
                        rules.push(rule);
                    }
                }
                KeyKind::Utility => {
                    let Some(utility) = self.utils.get(&key) else {
                        continue;
                    };
                    if !utility.accepts(&value) {
                        return Err(StyleError::invalid(
                            path,
                            format!("utility '{}' does not accept nested objects", key),
                        ));
                    }
                    if utility_depth + 1 > MAX_UTILITY_DEPTH {
                        return Err(StyleError::UtilityCycle {
                            name: key,
                            depth: MAX_UTILITY_DEPTH,
                        });
                    }
                    stack.push(Frame {
                        node: utility.expand(&value),
                        cursor: 0,
                        selectors,
                        at_rules,
                        utility_depth: utility_depth + 1,
                        block,
                        bare_declarations,
                        path,
                    });
                }
                KeyKind::PseudoSelector | KeyKind::DescendantSelector => {
                    let nested = nest_selectors(&selectors, &key, &path)?;
                    push_blocks(&mut stack, &value, &mut next_block, |node, block| Frame {
                        node,
                        cursor: 0,
                        selectors: nested.clone(),
                        at_rules: at_rules.clone(),
                        utility_depth,
                        block,
                        bare_declarations: false,
                        path: path.clone(),
                    });
                }
                KeyKind::AtRule => {
                    let mut nested_at_rules = at_rules.clone();
                    nested_at_rules.push(self.resolve_at_rule(&key));
                    let bare = mode == ComposeMode::Global && selectors.is_empty() && is_descriptor_at_rule(&key);
                    push_blocks(&mut stack, &value, &mut next_block, |node, block| Frame {
                        node,
                        cursor: 0,
                        selectors: selectors.clone(),
                        at_rules: nested_at_rules.clone(),
                        utility_depth,
                        block,
                        bare_declarations: bare,
                        path: path.clone(),
                    });
                }
                KeyKind::AtStatement => {
                    if mode != ComposeMode::Global || !selectors.is_empty() || !at_rules.is_empty() {
                        return Err(StyleError::invalid(
                            path,
                            "at-rule statements are only allowed at the root of global styles",
                        ));
                    }
                    let items = match &value {
                        StyleValue::List(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    let origin = next_origin;
                    next_origin += 1;
                    for item in items {
                        check_finite(&item, &path)?;
                        let Some(text) = item.as_css_text() else {
                            return Err(StyleError::invalid(path, "mixed lists are not allowed"));
                        };
                        let statement_block = next_block;
                        next_block += 1;
                        rules.push(FlatRule {
                            at_rules: Vec::new(),
                            selector: String::new(),
                            property: key.clone(),
                            value: resolve_value(&key, &text, &self.resolve),
                            origin,
                            block: statement_block,
                        });
                    }
                }
            }
        }

        Ok(rules)
    }

    fn declaration_values(
        &self,
        property: &str,
        value: &StyleValue,
        local: bool,
        path: &str,
    ) -> Result<Vec<String>, StyleError> {
        let items = match value {
            StyleValue::List(items) if items.is_empty() => {
                return Err(StyleError::invalid(path, "empty value list"));
            }
            StyleValue::List(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            check_finite(item, path)?;
            // Local token values never get the unit/bare-token treatment of a real property.
            let resolved = match (local, item) {
                (true, StyleValue::Str(raw)) => Some(resolve_value(property, raw, &self.resolve)),
                (true, StyleValue::Number(_)) => item.as_css_text(),
                _ => resolve_scalar(property, item, &self.resolve),
            };
            match resolved {
                Some(text) => values.push(text),
                None => return Err(StyleError::invalid(path, "mixed lists are not allowed")),
            }
        }
        Ok(values)
    }

    /// `@bp1` expands to the configured media query; other at-rules are kept verbatim.
    pub fn resolve_at_rule(&self, key: &str) -> String {
        let name = key.trim_start_matches('@');
        if let Some((_, query)) = self.media.iter().find(|(breakpoint, _)| breakpoint == name) {
            return format!("@media {}", query);
        }
        collapse_whitespace(key)
    }
}

/// Keys that can only name a nested selector (`&:hover`, `> span`, `.active`).
fn is_selector_key(key: &str) -> bool {
    key.contains('&') || key.starts_with(['>', '+', '~', '.', ':', '#', '[', '*'])
}

/// At-rules whose blocks hold descriptors rather than rules, so they may carry
/// declarations at the root of global styles.
fn is_descriptor_at_rule(key: &str) -> bool {
    let name = key.split_whitespace().next().unwrap_or(key);
    matches!(
        name,
        "@font-face" | "@page" | "@property" | "@counter-style" | "@font-palette-values"
    )
}

fn check_finite(value: &StyleValue, path: &str) -> Result<(), StyleError> {
    match value {
        StyleValue::Number(number) if !number.is_finite() => {
            Err(StyleError::invalid(path, "numbers must be finite"))
        }
        _ => Ok(()),
    }
}

fn push_blocks<F>(stack: &mut Vec<Frame>, value: &StyleValue, next_block: &mut u32, make: F)
where
    F: Fn(StyleNode, u32) -> Frame,
{
    let nodes = match value {
        StyleValue::Node(node) => vec![node.clone()],
        StyleValue::List(items) => items
            .iter()
            .filter_map(StyleValue::as_node)
            .cloned()
            .collect(),
        StyleValue::Str(_) | StyleValue::Number(_) => Vec::new(),
    };
    let first_block = *next_block;
    *next_block += nodes.len() as u32;
    // Reverse so the first block is processed first.
    for (idx, node) in nodes.into_iter().enumerate().rev() {
        stack.push(make(node, first_block + idx as u32));
    }
}

/// Combines every comma-separated part of `key` with every owner selector.
fn nest_selectors(owners: &[String], key: &str, path: &str) -> Result<Vec<String>, StyleError> {
    let parts = split_top_level_commas(key);
    let mut out = Vec::with_capacity(parts.len() * owners.len().max(1));
    if owners.is_empty() {
        for part in parts {
            if part.contains('&') {
                return Err(StyleError::invalid(path, "'&' needs an enclosing selector"));
            }
            out.push(collapse_whitespace(part));
        }
        return Ok(out);
    }
    for part in &parts {
        let part = part.trim();
        for owner in owners {
            let combined = if part.contains('&') {
                part.replace('&', owner)
            } else {
                format!("{} {}", owner, part)
            };
            out.push(collapse_whitespace(&combined));
        }
    }
    Ok(out)
}

fn split_top_level_commas(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in value.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts.retain(|part| !part.is_empty());
    parts
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

#[cfg(test)]
mod tests {
    use super::{ComposeMode, Composer, FlatRule, KeyKind, classify_key};
    use crate::error::StyleError;
    use crate::style::{StyleNode, StyleValue};
    use crate::theme::{ScaleMap, Theme, default_theme_map};
    use crate::utils::{Utility, UtilityRegistry};
    use crate::value::ResolveContext;
    use std::collections::BTreeMap;

    struct Fixture {
        theme: Theme,
        theme_map: BTreeMap<String, String>,
        utils: UtilityRegistry,
        media: Vec<(String, String)>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scales = ScaleMap::new();
            scales.insert(
                "space".to_string(),
                BTreeMap::from([("1".to_string(), "4px".to_string())]),
            );
            let mut utils = UtilityRegistry::new();
            utils.register(
                "mx",
                Utility::function(|value| {
                    StyleNode::new()
                        .with("marginLeft", value.clone())
                        .with("marginRight", value.clone())
                }),
            );
            Self {
                theme: Theme::register(&scales, ""),
                theme_map: default_theme_map(),
                utils,
                media: vec![("bp1".to_string(), "(min-width: 640px)".to_string())],
            }
        }

        fn composer(&self) -> Composer<'_> {
            Composer {
                resolve: ResolveContext {
                    theme: &self.theme,
                    theme_map: &self.theme_map,
                    prefix: "",
                },
                utils: &self.utils,
                media: &self.media,
            }
        }

        fn flatten(&self, json: &str, mode: ComposeMode) -> Result<Vec<FlatRule>, StyleError> {
            let node = StyleNode::from_json_str(json).expect("fixture should parse");
            self.composer().flatten(&node, mode)
        }
    }

    fn summary(rules: &[FlatRule]) -> Vec<(String, String, String, String)> {
        rules
            .iter()
            .map(|rule| {
                (
                    rule.at_rules.join(" | "),
                    rule.selector.clone(),
                    rule.property.clone(),
                    rule.value.clone(),
                )
            })
            .collect()
    }

    fn row(at: &str, selector: &str, property: &str, value: &str) -> (String, String, String, String) {
        (
            at.to_string(),
            selector.to_string(),
            property.to_string(),
            value.to_string(),
        )
    }

    #[test]
    fn classifies_keys() {
        let fixture = Fixture::new();
        let node = StyleValue::Node(StyleNode::new());
        let text = StyleValue::from("red");
        assert_eq!(classify_key("color", &text, &fixture.utils), KeyKind::Property);
        assert_eq!(classify_key("mx", &text, &fixture.utils), KeyKind::Utility);
        assert_eq!(classify_key("&:hover", &node, &fixture.utils), KeyKind::PseudoSelector);
        assert_eq!(classify_key("> span", &node, &fixture.utils), KeyKind::DescendantSelector);
        assert_eq!(classify_key("@media print", &node, &fixture.utils), KeyKind::AtRule);
        assert_eq!(classify_key("@import", &text, &fixture.utils), KeyKind::AtStatement);
        assert_eq!(classify_key("$$shadow", &text, &fixture.utils), KeyKind::LocalToken);
        assert_eq!(classify_key("WebkitFoo", &text, &fixture.utils), KeyKind::Property);
    }

    #[test]
    fn flattens_in_document_order() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(
                r#"{
                    "color": "red",
                    "&:hover": { "color": "black", "> span": { "opacity": 0.5 } },
                    "@bp1": { "color": "blue", "&:focus, &:active": { "outline": "none" } },
                    "backgroundColor": "white"
                }"#,
                ComposeMode::Scoped,
            )
            .expect("style should flatten");

        assert_eq!(
            summary(&rules),
            vec![
                row("", "&", "color", "red"),
                row("", "&:hover", "color", "black"),
                row("", "&:hover > span", "opacity", "0.5"),
                row("@media (min-width: 640px)", "&", "color", "blue"),
                row("@media (min-width: 640px)", "&:focus, &:active", "outline", "none"),
                row("", "&", "background-color", "white"),
            ]
        );
    }

    #[test]
    fn sibling_at_rules_are_independent() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(
                r#"{
                    "@media print": { "color": "black" },
                    "@supports (display: grid)": { "@media (hover: hover)": { "display": "grid" } }
                }"#,
                ComposeMode::Scoped,
            )
            .unwrap();
        assert_eq!(rules[0].at_rules, vec!["@media print".to_string()]);
        assert_eq!(
            rules[1].at_rules,
            vec![
                "@supports (display: grid)".to_string(),
                "@media (hover: hover)".to_string()
            ]
        );
    }

    #[test]
    fn expands_utilities_and_local_tokens() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(
                r#"{ "mx": "$1", "$$shadowColor": "red", "boxShadow": "0 0 0 15px $$shadowColor" }"#,
                ComposeMode::Scoped,
            )
            .unwrap();
        assert_eq!(
            summary(&rules),
            vec![
                row("", "&", "margin-left", "var(--space-1)"),
                row("", "&", "margin-right", "var(--space-1)"),
                row("", "&", "--shadowColor", "red"),
                row("", "&", "box-shadow", "0 0 0 15px var(--shadowColor)"),
            ]
        );
    }

    #[test]
    fn fallback_lists_share_an_origin() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(r#"{ "display": ["-webkit-box", "flex"], "color": "red" }"#, ComposeMode::Scoped)
            .unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].origin, rules[1].origin);
        assert_ne!(rules[1].origin, rules[2].origin);
    }

    #[test]
    fn trips_utility_cycle_guard() {
        let mut fixture = Fixture::new();
        fixture.utils.register(
            "ping",
            Utility::function(|value| StyleNode::new().with("pong", value.clone())),
        );
        fixture.utils.register(
            "pong",
            Utility::function(|value| StyleNode::new().with("ping", value.clone())),
        );
        let err = fixture
            .flatten(r#"{ "ping": 1 }"#, ComposeMode::Scoped)
            .expect_err("mutually recursive utilities must fail");
        assert!(matches!(err, StyleError::UtilityCycle { depth: 16, .. }));
    }

    #[test]
    fn global_mode_uses_literal_selectors() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(
                r#"{
                    "@import": "url(https://fonts.example/inter.css)",
                    "body": { "margin": 0, "a": { "color": "inherit" } },
                    "@font-face": [{ "fontFamily": "Inter" }, { "fontFamily": "Mono" }]
                }"#,
                ComposeMode::Global,
            )
            .unwrap();
        assert_eq!(
            summary(&rules),
            vec![
                row("", "", "@import", "url(https://fonts.example/inter.css)"),
                row("", "body", "margin", "0"),
                row("", "body a", "color", "inherit"),
                row("@font-face", "", "font-family", "Inter"),
                row("@font-face", "", "font-family", "Mono"),
            ]
        );
        assert_ne!(rules[3].block, rules[4].block);
    }

    #[test]
    fn rejects_misplaced_declarations() {
        let fixture = Fixture::new();
        let err = fixture
            .flatten(r#"{ "color": "red" }"#, ComposeMode::Global)
            .expect_err("global declarations need a selector");
        assert!(matches!(err, StyleError::InvalidStyleValue { .. }));

        let err = fixture
            .flatten(r#"{ "@import": "url(x.css)" }"#, ComposeMode::Scoped)
            .expect_err("statements only belong to global styles");
        assert!(matches!(err, StyleError::InvalidStyleValue { .. }));

        let err = fixture
            .flatten(r#"{ "display": ["flex", { "color": "red" }] }"#, ComposeMode::Scoped)
            .expect_err("mixed lists are invalid");
        assert!(matches!(err, StyleError::InvalidStyleValue { ref path, .. } if path == "display"));
    }

    #[test]
    fn rejects_scalar_values_under_selector_keys() {
        let fixture = Fixture::new();
        for json in [
            r#"{ "&:hover": "red" }"#,
            r#"{ "> span": 4 }"#,
            r#"{ ".active": "blue" }"#,
            r#"{ "&:focus": { "~ label": "red" } }"#,
        ] {
            let err = fixture
                .flatten(json, ComposeMode::Scoped)
                .expect_err("selector keys need a style object");
            assert!(matches!(err, StyleError::InvalidStyleValue { .. }), "{}", json);
        }
    }

    #[test]
    fn rejects_non_finite_numbers() {
        let fixture = Fixture::new();
        let composer = fixture.composer();
        for node in [
            StyleNode::new().with("width", f64::NAN),
            StyleNode::new().with("height", f64::INFINITY),
            StyleNode::new().with("mx", f64::NEG_INFINITY),
            StyleNode::new().with("$$gap", f64::NAN),
        ] {
            let err = composer
                .flatten(&node, ComposeMode::Scoped)
                .expect_err("non-finite numbers are not CSS");
            assert!(matches!(err, StyleError::InvalidStyleValue { .. }));
        }
    }

    #[test]
    fn only_descriptor_at_rules_take_root_declarations() {
        let fixture = Fixture::new();
        let err = fixture
            .flatten(r#"{ "@media print": { "margin": 0 } }"#, ComposeMode::Global)
            .expect_err("media blocks need a selector in global styles");
        assert!(matches!(err, StyleError::InvalidStyleValue { .. }));

        let rules = fixture
            .flatten(
                r#"{ "@media print": { "body": { "margin": 0 } }, "@page :first": { "margin": "1in" } }"#,
                ComposeMode::Global,
            )
            .unwrap();
        assert_eq!(
            summary(&rules),
            vec![
                row("@media print", "body", "margin", "0"),
                row("@page :first", "", "margin", "1in"),
            ]
        );
    }

    #[test]
    fn keyframes_mode_keeps_frame_selectors() {
        let fixture = Fixture::new();
        let rules = fixture
            .flatten(
                r#"{ "0%": { "opacity": 0 }, "100%": { "opacity": 1 } }"#,
                ComposeMode::Keyframes,
            )
            .unwrap();
        assert_eq!(
            summary(&rules),
            vec![row("", "0%", "opacity", "0"), row("", "100%", "opacity", "1")]
        );
    }
}
