//! Variant resolution.
//!
//! A [`StyleDefinition`] splits a `css` input into its base style, variant groups,
//! compound variants and default variants. [`resolve_variants`] merges the layers that
//! apply to one [`VariantSelection`] into a single style node, in cascade order:
//! base, variants (declaration order), compound variants, then the `css` override.

use crate::error::StyleError;
use crate::style::{StyleNode, StyleValue, format_number};
use serde_json::Value;
use std::fmt;

/// Breakpoint key for the unconditional branch of a responsive variant value.
pub const INITIAL_BREAKPOINT: &str = "@initial";

#[derive(Debug, Clone, PartialEq)]
pub struct VariantGroup {
    name: String,
    values: Vec<(String, StyleNode)>,
}

impl VariantGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self, value: &str) -> Option<&StyleNode> {
        self.values
            .iter()
            .find(|(name, _)| name == value)
            .map(|(_, node)| node)
    }

    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundVariant {
    predicates: Vec<(String, String)>,
    css: StyleNode,
}

impl CompoundVariant {
    pub fn predicates(&self) -> &[(String, String)] {
        &self.predicates
    }

    pub fn css(&self) -> &StyleNode {
        &self.css
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleDefinition {
    base: StyleNode,
    variants: Vec<VariantGroup>,
    compound_variants: Vec<CompoundVariant>,
    default_variants: Vec<(String, String)>,
}

impl StyleDefinition {
    /// Splits the reserved keys `variants`, `compoundVariants` and `defaultVariants` off a
    /// style node; everything else is the base style.
    pub fn parse(node: &StyleNode) -> Result<Self, StyleError> {
        let mut definition = StyleDefinition::default();
        for (key, value) in node.iter() {
            match key {
                "variants" => definition.variants = parse_groups(value)?,
                "compoundVariants" => definition.compound_variants = parse_compounds(value)?,
                "defaultVariants" => definition.default_variants = parse_defaults(value)?,
                _ => definition.base.insert(key, value.clone()),
            }
        }
        Ok(definition)
    }

    /// Composes several definitions, later parts winning: bases deep-merge in order,
    /// variant groups merge per group and value, compound variants concatenate and
    /// default variants override.
    pub fn compose<'a>(parts: impl IntoIterator<Item = &'a StyleDefinition>) -> StyleDefinition {
        let mut composed = StyleDefinition::default();
        for part in parts {
            composed.base.merge(&part.base);
            for group in &part.variants {
                match composed.variants.iter_mut().find(|g| g.name == group.name) {
                    Some(existing) => {
                        for (value, node) in &group.values {
                            match existing.values.iter_mut().find(|(name, _)| name == value) {
                                Some((_, current)) => current.merge(node),
                                None => existing.values.push((value.clone(), node.clone())),
                            }
                        }
                    }
                    None => composed.variants.push(group.clone()),
                }
            }
            composed
                .compound_variants
                .extend(part.compound_variants.iter().cloned());
            for (group, value) in &part.default_variants {
                match composed.default_variants.iter_mut().find(|(g, _)| g == group) {
                    Some(slot) => slot.1 = value.clone(),
                    None => composed.default_variants.push((group.clone(), value.clone())),
                }
            }
        }
        composed
    }

    pub fn base(&self) -> &StyleNode {
        &self.base
    }

    pub fn variants(&self) -> &[VariantGroup] {
        &self.variants
    }

    pub fn group(&self, name: &str) -> Option<&VariantGroup> {
        self.variants.iter().find(|group| group.name == name)
    }

    pub fn compound_variants(&self) -> &[CompoundVariant] {
        &self.compound_variants
    }

    pub fn default_variant(&self, group: &str) -> Option<&str> {
        self.default_variants
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, value)| value.as_str())
    }

    /// Every default naming a declared group must name one of its values.
    pub fn validate_defaults(&self) -> Result<(), StyleError> {
        for (group, value) in &self.default_variants {
            let Some(declared) = self.group(group) else {
                continue;
            };
            if declared.value(value).is_none() {
                return Err(StyleError::UnknownVariantValue {
                    group: group.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every style node the definition can contribute, with its key path.
    pub fn layers(&self) -> Vec<(String, &StyleNode)> {
        let mut layers = vec![(String::new(), &self.base)];
        for group in &self.variants {
            for (value, node) in &group.values {
                layers.push((format!("variants.{}.{}", group.name, value), node));
            }
        }
        for (idx, compound) in self.compound_variants.iter().enumerate() {
            layers.push((format!("compoundVariants[{}].css", idx), &compound.css));
        }
        layers
    }

    /// Keeps only the entries of `selection` that name declared groups.
    pub fn normalize(&self, selection: &VariantSelection) -> VariantSelection {
        VariantSelection {
            entries: selection
                .entries
                .iter()
                .filter(|(group, _)| self.group(group).is_some())
                .cloned()
                .collect(),
        }
    }

    fn variant_node<'a>(&'a self, group: &'a VariantGroup, value: &str) -> Result<(&'a str, &'a StyleNode), StyleError> {
        if let Some((name, node)) = group.values.iter().find(|(name, _)| name == value) {
            return Ok((name.as_str(), node));
        }
        let fallback = self
            .default_variant(&group.name)
            .and_then(|default| group.values.iter().find(|(name, _)| name == default));
        match fallback {
            Some((name, node)) => Ok((name.as_str(), node)),
            None => Err(StyleError::UnknownVariantValue {
                group: group.name.clone(),
                value: value.to_string(),
            }),
        }
    }
}

fn parse_groups(value: &StyleValue) -> Result<Vec<VariantGroup>, StyleError> {
    let Some(node) = value.as_node() else {
        return Err(StyleError::invalid("variants", "expected an object of variant groups"));
    };
    let mut groups = Vec::with_capacity(node.len());
    for (group, values) in node.iter() {
        let path = format!("variants.{}", group);
        let Some(values) = values.as_node() else {
            return Err(StyleError::invalid(path, "expected an object of variant values"));
        };
        let mut parsed = Vec::with_capacity(values.len());
        for (name, style) in values.iter() {
            let Some(style) = style.as_node() else {
                return Err(StyleError::invalid(
                    format!("{}.{}", path, name),
                    "variant value must be a style object",
                ));
            };
            parsed.push((name.to_string(), style.clone()));
        }
        groups.push(VariantGroup {
            name: group.to_string(),
            values: parsed,
        });
    }
    Ok(groups)
}

fn parse_compounds(value: &StyleValue) -> Result<Vec<CompoundVariant>, StyleError> {
    let items = match value {
        StyleValue::List(items) => items.as_slice(),
        StyleValue::Node(_) => std::slice::from_ref(value),
        _ => {
            return Err(StyleError::invalid(
                "compoundVariants",
                "expected a list of compound variants",
            ));
        }
    };
    let mut compounds = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let path = format!("compoundVariants[{}]", idx);
        let Some(node) = item.as_node() else {
            return Err(StyleError::invalid(path, "compound variant must be an object"));
        };
        let mut compound = CompoundVariant {
            predicates: Vec::new(),
            css: StyleNode::new(),
        };
        for (key, value) in node.iter() {
            if key == "css" {
                let Some(css) = value.as_node() else {
                    return Err(StyleError::invalid(
                        format!("{}.css", path),
                        "expected a style object",
                    ));
                };
                compound.css = css.clone();
                continue;
            }
            let Some(text) = value.as_css_text() else {
                return Err(StyleError::invalid(
                    format!("{}.{}", path, key),
                    "compound predicates must be scalar values",
                ));
            };
            compound.predicates.push((key.to_string(), text));
        }
        compounds.push(compound);
    }
    Ok(compounds)
}

fn parse_defaults(value: &StyleValue) -> Result<Vec<(String, String)>, StyleError> {
    let Some(node) = value.as_node() else {
        return Err(StyleError::invalid("defaultVariants", "expected an object"));
    };
    let mut defaults = Vec::with_capacity(node.len());
    for (group, value) in node.iter() {
        let Some(text) = value.as_css_text() else {
            return Err(StyleError::invalid(
                format!("defaultVariants.{}", group),
                "default variant must be a scalar value",
            ));
        };
        defaults.push((group.to_string(), text));
    }
    Ok(defaults)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantValue {
    Single(String),
    /// `(breakpoint key, value)` pairs, e.g. `("@initial", "sm")`, `("@bp2", "lg")`.
    Responsive(Vec<(String, String)>),
}

impl VariantValue {
    /// Value compound variants compare against.
    fn initial(&self) -> Option<&str> {
        match self {
            VariantValue::Single(value) => Some(value),
            VariantValue::Responsive(entries) => entries
                .iter()
                .find(|(breakpoint, _)| breakpoint == INITIAL_BREAKPOINT)
                .map(|(_, value)| value.as_str()),
        }
    }
}

impl From<&str> for VariantValue {
    fn from(value: &str) -> Self {
        VariantValue::Single(value.to_string())
    }
}

impl From<String> for VariantValue {
    fn from(value: String) -> Self {
        VariantValue::Single(value)
    }
}

impl From<bool> for VariantValue {
    fn from(value: bool) -> Self {
        VariantValue::Single(value.to_string())
    }
}

impl From<i32> for VariantValue {
    fn from(value: i32) -> Self {
        VariantValue::Single(value.to_string())
    }
}

impl<K, V> From<Vec<(K, V)>> for VariantValue
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(entries: Vec<(K, V)>) -> Self {
        VariantValue::Responsive(
            entries
                .into_iter()
                .map(|(breakpoint, value)| (breakpoint.into(), value.into()))
                .collect(),
        )
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantValue::Single(value) => f.write_str(value),
            VariantValue::Responsive(entries) => {
                f.write_str("{")?;
                for (idx, (breakpoint, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", breakpoint, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Variant props passed when a style is used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariantSelection {
    entries: Vec<(String, VariantValue)>,
}

impl VariantSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: impl Into<String>, value: impl Into<VariantValue>) -> Self {
        self.set(group, value);
        self
    }

    pub fn set(&mut self, group: impl Into<String>, value: impl Into<VariantValue>) {
        let group = group.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == group) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((group, value)),
        }
    }

    pub fn get(&self, group: &str) -> Option<&VariantValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariantValue)> {
        self.entries.iter().map(|(group, value)| (group.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads props such as `{"size": "sm", "ghost": true, "tone": {"@initial": "a", "@bp2": "b"}}`.
    pub fn from_json(props: &serde_json::Map<String, Value>) -> Result<Self, StyleError> {
        let mut selection = VariantSelection::new();
        for (group, value) in props {
            selection.set(group.clone(), variant_value_from_json(value, group)?);
        }
        Ok(selection)
    }

    /// Order-independent key for memoizing compiled class names.
    pub fn cache_key(&self) -> SelectionKey {
        let mut entries = self
            .entries
            .iter()
            .map(|(group, value)| {
                let value = match value {
                    VariantValue::Responsive(branches) => {
                        let mut branches = branches.clone();
                        branches.sort();
                        VariantValue::Responsive(branches)
                    }
                    single => single.clone(),
                };
                (group.clone(), value)
            })
            .collect::<Vec<_>>();
        entries.sort();
        entries
    }
}

/// Normalized, sorted `(group, value)` pairs of a selection.
pub type SelectionKey = Vec<(String, VariantValue)>;

pub(crate) fn variant_value_from_json(value: &Value, path: &str) -> Result<VariantValue, StyleError> {
    match value {
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (breakpoint, value) in map {
                let Some(text) = scalar_text(value) else {
                    return Err(StyleError::invalid(
                        format!("{}.{}", path, breakpoint),
                        "responsive variant values must be scalars",
                    ));
                };
                entries.push((breakpoint.clone(), text));
            }
            Ok(VariantValue::Responsive(entries))
        }
        other => scalar_text(other)
            .map(VariantValue::Single)
            .ok_or_else(|| StyleError::invalid(path, "variant values must be scalars")),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => number.as_f64().map(format_number),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Merges every layer of `definition` that applies to `selection`.
///
/// `breakpoints` lists configured breakpoint names in rank order; responsive branches are
/// emitted in that order after the `@initial` branch.
pub fn resolve_variants(
    definition: &StyleDefinition,
    selection: &VariantSelection,
    breakpoints: &[String],
    css_override: Option<&StyleNode>,
) -> Result<StyleNode, StyleError> {
    let mut merged = definition.base.clone();
    let mut effective: Vec<(&str, String)> = Vec::with_capacity(definition.variants.len());

    for group in &definition.variants {
        match selection.get(&group.name) {
            None => {
                let Some(default) = definition.default_variant(&group.name) else {
                    continue;
                };
                let (name, node) = definition.variant_node(group, default)?;
                merged.merge(node);
                effective.push((group.name.as_str(), name.to_string()));
            }
            Some(VariantValue::Single(value)) => {
                let (name, node) = definition.variant_node(group, value)?;
                merged.merge(node);
                effective.push((group.name.as_str(), name.to_string()));
            }
            Some(VariantValue::Responsive(entries)) => {
                let mut branches = Vec::with_capacity(entries.len());
                for (breakpoint, value) in entries {
                    let rank = breakpoint_rank(breakpoint, breakpoints).ok_or_else(|| {
                        StyleError::invalid(
                            format!("{}.{}", group.name, breakpoint),
                            "unknown breakpoint",
                        )
                    })?;
                    let (name, node) = definition.variant_node(group, value)?;
                    branches.push((rank, breakpoint.as_str(), name, node));
                }
                branches.sort_by_key(|(rank, ..)| *rank);
                for (rank, breakpoint, name, node) in branches {
                    if rank == 0 {
                        merged.merge(node);
                        effective.push((group.name.as_str(), name.to_string()));
                    } else {
                        merged.merge(&StyleNode::new().with(breakpoint, node.clone()));
                    }
                }
            }
        }
    }

    for compound in &definition.compound_variants {
        let matches = compound.predicates.iter().all(|(group, expected)| {
            let actual = effective
                .iter()
                .find(|(name, _)| name == group)
                .map(|(_, value)| value.as_str())
                .or_else(|| selection.get(group).and_then(VariantValue::initial));
            actual == Some(expected.as_str())
        });
        if matches {
            merged.merge(&compound.css);
        }
    }

    if let Some(css) = css_override {
        merged.merge(css);
    }
    Ok(merged)
}

/// `@initial` ranks first; `@bpN` ranks after it in configuration order.
fn breakpoint_rank(key: &str, breakpoints: &[String]) -> Option<usize> {
    if key == INITIAL_BREAKPOINT {
        return Some(0);
    }
    let name = key.strip_prefix('@')?;
    breakpoints
        .iter()
        .position(|breakpoint| breakpoint == name)
        .map(|idx| idx + 1)
}
