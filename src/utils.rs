//! User-registered shorthand utilities.
//!
//! A utility maps one input value to a partial style object. The composer feeds the
//! output back through flattening, so a utility may use selectors, at-rules and other
//! utilities. Expansion depth is bounded by [`MAX_UTILITY_DEPTH`].

use crate::style::{StyleNode, StyleValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Nested utility expansions allowed before the composer reports a cycle.
pub const MAX_UTILITY_DEPTH: usize = 16;

/// Placeholder replaced by the input value in template utilities.
pub const VALUE_PLACEHOLDER: &str = "--value()";

pub type UtilityFn = dyn Fn(&StyleValue) -> StyleNode + Send + Sync;

#[derive(Clone)]
pub enum Utility {
    Function(Arc<UtilityFn>),
    /// Declared in configuration files; string leaves may contain [`VALUE_PLACEHOLDER`].
    Template(StyleNode),
}

impl Utility {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&StyleValue) -> StyleNode + Send + Sync + 'static,
    {
        Utility::Function(Arc::new(f))
    }

    /// Whether the utility can expand `value`. Templates only take scalars and lists.
    pub fn accepts(&self, value: &StyleValue) -> bool {
        match self {
            Utility::Function(_) => true,
            Utility::Template(_) => !matches!(value, StyleValue::Node(_)),
        }
    }

    pub fn expand(&self, value: &StyleValue) -> StyleNode {
        match self {
            Utility::Function(f) => f(value),
            Utility::Template(template) => substitute_template(template, &template_text(value)),
        }
    }
}

impl fmt::Debug for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utility::Function(_) => f.write_str("Utility::Function(..)"),
            Utility::Template(template) => f.debug_tuple("Utility::Template").field(template).finish(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UtilityRegistry {
    utilities: BTreeMap<String, Utility>,
}

impl UtilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, utility: Utility) {
        self.utilities.insert(name.into(), utility);
    }

    pub fn get(&self, name: &str) -> Option<&Utility> {
        self.utilities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.utilities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.utilities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.utilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utilities.is_empty()
    }

    /// Expands `name` with `value`, or `None` when no such utility is registered.
    pub fn expand_utility(&self, name: &str, value: &StyleValue) -> Option<StyleNode> {
        self.utilities.get(name).map(|utility| utility.expand(value))
    }
}

fn template_text(value: &StyleValue) -> String {
    match value {
        StyleValue::List(items) => items
            .iter()
            .filter_map(StyleValue::as_css_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.as_css_text().unwrap_or_default(),
    }
}

fn substitute_template(template: &StyleNode, text: &str) -> StyleNode {
    let mut out = StyleNode::new();
    for (key, value) in template.iter() {
        out.insert(key, substitute_value(value, text));
    }
    out
}

fn substitute_value(value: &StyleValue, text: &str) -> StyleValue {
    match value {
        StyleValue::Str(raw) if raw.contains(VALUE_PLACEHOLDER) => {
            StyleValue::Str(raw.replace(VALUE_PLACEHOLDER, text))
        }
        StyleValue::List(items) => {
            StyleValue::List(items.iter().map(|item| substitute_value(item, text)).collect())
        }
        StyleValue::Node(node) => StyleValue::Node(substitute_template(node, text)),
        other => other.clone(),
    }
}
