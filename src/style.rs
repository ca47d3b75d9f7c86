//! Style object model.
//!
//! A [`StyleNode`] is an ordered mapping from keys to [`StyleValue`]s. Keys are CSS
//! properties, selector fragments (`&:hover`, `> span`), at-rules (`@media …`,
//! `@bp1`), utility names or locally-scoped tokens (`$$name`). Document order of
//! the keys is preserved; it decides emission order.

use crate::error::StyleError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    Str(String),
    Number(f64),
    /// Fallback declarations when the items are scalars, repeated blocks when they are nodes.
    List(Vec<StyleValue>),
    Node(StyleNode),
}

impl StyleValue {
    pub fn as_node(&self) -> Option<&StyleNode> {
        match self {
            StyleValue::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, StyleValue::Str(_) | StyleValue::Number(_))
    }

    /// CSS text of a scalar value. Lists and nodes have none.
    pub fn as_css_text(&self) -> Option<String> {
        match self {
            StyleValue::Str(value) => Some(value.clone()),
            StyleValue::Number(value) => Some(format_number(*value)),
            StyleValue::List(_) | StyleValue::Node(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            StyleValue::Str(value) => Value::String(value.clone()),
            StyleValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StyleValue::List(items) => Value::Array(items.iter().map(StyleValue::to_json).collect()),
            StyleValue::Node(node) => node.to_json(),
        }
    }
}

/// Renders a number the way it would be written in a stylesheet: no trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let text = format!("{}", value);
        if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            text
        }
    }
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_css_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str(&self.to_json().to_string()),
        }
    }
}

impl From<&str> for StyleValue {
    fn from(value: &str) -> Self {
        StyleValue::Str(value.to_string())
    }
}

impl From<String> for StyleValue {
    fn from(value: String) -> Self {
        StyleValue::Str(value)
    }
}

impl From<f64> for StyleValue {
    fn from(value: f64) -> Self {
        StyleValue::Number(value)
    }
}

impl From<i32> for StyleValue {
    fn from(value: i32) -> Self {
        StyleValue::Number(f64::from(value))
    }
}

impl From<u32> for StyleValue {
    fn from(value: u32) -> Self {
        StyleValue::Number(f64::from(value))
    }
}

impl From<StyleNode> for StyleValue {
    fn from(value: StyleNode) -> Self {
        StyleValue::Node(value)
    }
}

impl From<Vec<StyleValue>> for StyleValue {
    fn from(value: Vec<StyleValue>) -> Self {
        StyleValue::List(value)
    }
}

/// Ordered style object. Cloning shares the entry storage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleNode {
    entries: Arc<Vec<(String, StyleValue)>>,
}

impl StyleNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`StyleNode::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StyleValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, replacing an existing entry in place or appending a new one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StyleValue>) {
        let key = key.into();
        let value = value.into();
        let entries = Arc::make_mut(&mut self.entries);
        if let Some(slot) = entries.iter_mut().find(|(existing, _)| *existing == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&StyleValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, key: &str) -> Option<StyleValue> {
        let idx = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(Arc::make_mut(&mut self.entries).remove(idx).1)
    }

    pub fn entries(&self) -> &[(String, StyleValue)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StyleValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep merge: nested nodes merge key by key. Any other overridden entry moves to the
    /// end, so it also wins over earlier keys that expand to the same property (`mx` over
    /// `marginLeft`).
    pub fn merge(&mut self, other: &StyleNode) {
        for (key, value) in other.entries.iter() {
            let entries = Arc::make_mut(&mut self.entries);
            let position = entries.iter().position(|(existing, _)| existing == key);
            match (position, value) {
                (Some(idx), StyleValue::Node(incoming)) if matches!(entries[idx].1, StyleValue::Node(_)) => {
                    if let StyleValue::Node(current) = &mut entries[idx].1 {
                        current.merge(incoming);
                    }
                }
                (Some(idx), _) => {
                    entries.remove(idx);
                    entries.push((key.clone(), value.clone()));
                }
                (None, _) => entries.push((key.clone(), value.clone())),
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, StyleError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| StyleError::invalid("<root>", format!("malformed JSON: {}", err)))?;
        StyleNode::try_from(value)
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in self.entries.iter() {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

impl TryFrom<Value> for StyleNode {
    type Error = StyleError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => node_from_json(map, "", true),
            other => Err(StyleError::invalid(
                "<root>",
                format!("expected an object, found {}", json_kind(&other)),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonContext {
    Style,
    /// Variant flags may be booleans (`defaultVariants`, compound predicates).
    VariantFlags,
}

fn node_from_json(
    map: serde_json::Map<String, Value>,
    path: &str,
    top_level: bool,
) -> Result<StyleNode, StyleError> {
    let mut entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let child_path = join_path(path, &key);
        let converted = match (top_level, key.as_str(), value) {
            (true, "defaultVariants", Value::Object(flags)) => {
                let mut node = Vec::with_capacity(flags.len());
                for (group, flag) in flags {
                    let flag_path = join_path(&child_path, &group);
                    node.push((group, value_from_json(flag, &flag_path, JsonContext::VariantFlags)?));
                }
                StyleValue::Node(StyleNode {
                    entries: Arc::new(node),
                })
            }
            (true, "compoundVariants", Value::Array(items)) => {
                let mut list = Vec::with_capacity(items.len());
                for (idx, item) in items.into_iter().enumerate() {
                    let item_path = format!("{}[{}]", child_path, idx);
                    list.push(compound_from_json(item, &item_path)?);
                }
                StyleValue::List(list)
            }
            (_, _, value) => value_from_json(value, &child_path, JsonContext::Style)?,
        };
        entries.push((key, converted));
    }
    Ok(StyleNode {
        entries: Arc::new(entries),
    })
}

fn compound_from_json(item: Value, path: &str) -> Result<StyleValue, StyleError> {
    let Value::Object(map) = item else {
        return Err(StyleError::invalid(
            path,
            format!("compound variant must be an object, found {}", json_kind(&item)),
        ));
    };
    let mut entries = Vec::with_capacity(map.len());
    for (key, value) in map {
        let child_path = join_path(path, &key);
        let context = if key == "css" {
            JsonContext::Style
        } else {
            JsonContext::VariantFlags
        };
        entries.push((key, value_from_json(value, &child_path, context)?));
    }
    Ok(StyleValue::Node(StyleNode {
        entries: Arc::new(entries),
    }))
}

fn value_from_json(value: Value, path: &str, context: JsonContext) -> Result<StyleValue, StyleError> {
    match value {
        Value::String(text) => Ok(StyleValue::Str(text)),
        Value::Number(number) => number
            .as_f64()
            .map(StyleValue::Number)
            .ok_or_else(|| StyleError::invalid(path, "number is out of range")),
        Value::Bool(flag) if context == JsonContext::VariantFlags => {
            Ok(StyleValue::Str(flag.to_string()))
        }
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                list.push(value_from_json(item, &format!("{}[{}]", path, idx), context)?);
            }
            Ok(StyleValue::List(list))
        }
        Value::Object(map) => Ok(StyleValue::Node(node_from_json(map, path, false)?)),
        other => Err(StyleError::invalid(
            path,
            format!("{} is not a CSS value", json_kind(&other)),
        )),
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::{StyleNode, StyleValue, format_number};
    use crate::error::StyleError;

    #[test]
    fn preserves_document_order() {
        let node = StyleNode::from_json_str(
            r#"{ "zIndex": 1, "color": "red", "&:hover": { "color": "black" }, "alignItems": "center" }"#,
        )
        .expect("style should parse");
        let keys = node.iter().map(|(key, _)| key).collect::<Vec<_>>();
        assert_eq!(keys, vec!["zIndex", "color", "&:hover", "alignItems"]);
    }

    #[test]
    fn rejects_booleans_and_null_in_styles() {
        let err = StyleNode::from_json_str(r#"{ "button": { "color": true } }"#)
            .expect_err("booleans are not style values");
        assert!(matches!(
            err,
            StyleError::InvalidStyleValue { ref path, .. } if path == "button.color"
        ));

        let err = StyleNode::from_json_str(r#"{ "margin": null }"#).expect_err("null is invalid");
        assert!(matches!(err, StyleError::InvalidStyleValue { .. }));

        let err = StyleNode::from_json_str("[1, 2]").expect_err("root must be an object");
        assert!(matches!(err, StyleError::InvalidStyleValue { ref path, .. } if path == "<root>"));
    }

    #[test]
    fn accepts_boolean_variant_flags() {
        let node = StyleNode::from_json_str(
            r#"{
                "defaultVariants": { "outlined": true },
                "compoundVariants": [{ "outlined": false, "css": { "color": "red" } }]
            }"#,
        )
        .expect("variant flags may be booleans");
        let defaults = node.get("defaultVariants").and_then(StyleValue::as_node).unwrap();
        assert_eq!(defaults.get("outlined"), Some(&StyleValue::from("true")));
    }

    #[test]
    fn merges_nested_nodes_in_place_and_moves_overrides_last() {
        let mut base = StyleNode::new()
            .with("color", "red")
            .with("&:hover", StyleNode::new().with("color", "black").with("opacity", 1))
            .with("padding", 4);
        let overlay = StyleNode::new()
            .with("&:hover", StyleNode::new().with("color", "white"))
            .with("color", "blue")
            .with("margin", 2);
        base.merge(&overlay);

        assert_eq!(
            base.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            vec!["&:hover", "padding", "color", "margin"]
        );
        assert_eq!(base.get("color"), Some(&StyleValue::from("blue")));
        let hover = base.get("&:hover").and_then(StyleValue::as_node).unwrap();
        assert_eq!(hover.get("color"), Some(&StyleValue::from("white")));
        assert_eq!(hover.get("opacity"), Some(&StyleValue::from(1)));
    }

    #[test]
    fn merge_does_not_touch_shared_clones() {
        let original = StyleNode::new().with("color", "red");
        let mut copy = original.clone();
        copy.insert("color", "blue");
        assert_eq!(original.get("color"), Some(&StyleValue::from("red")));
        assert_eq!(copy.get("color"), Some(&StyleValue::from("blue")));
    }

    #[test]
    fn formats_numbers_without_trailing_zeroes() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(1.25), "1.25");
    }
}
