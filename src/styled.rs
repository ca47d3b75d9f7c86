use crate::engine::CompiledStyle;
use crate::error::StyleError;
use crate::style::StyleNode;
use crate::variants::{VariantSelection, variant_value_from_json};
use serde_json::{Map, Value};

/// A compiled style bound to an element name.
///
/// Rendering is left to the caller: [`StyledComponent::render`] only resolves which
/// element to create, its class string and the props to forward.
#[derive(Debug, Clone)]
pub struct StyledComponent {
    element: String,
    style: CompiledStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedElement {
    pub element: String,
    pub class_name: String,
    pub props: Map<String, Value>,
}

impl StyledComponent {
    pub(crate) fn new(element: String, style: CompiledStyle) -> Self {
        Self { element, style }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn style(&self) -> &CompiledStyle {
        &self.style
    }

    /// A new component on the same element whose style composes `node` over this one.
    pub fn extend(&self, node: StyleNode) -> Result<StyledComponent, StyleError> {
        let style = self.style.engine().css_composed(&[&self.style], node)?;
        Ok(Self::new(self.element.clone(), style))
    }

    /// Consumes `as`, `css`, `className` and variant props; everything else is forwarded.
    pub fn render(&self, props: &Map<String, Value>) -> Result<RenderedElement, StyleError> {
        let mut element = self.element.clone();
        let mut selection = VariantSelection::new();
        let mut css_override = None;
        let mut extra_class = None;
        let mut forwarded = Map::new();

        for (key, value) in props {
            match key.as_str() {
                "as" => {
                    let Value::String(tag) = value else {
                        return Err(StyleError::invalid("as", "expected an element name"));
                    };
                    element = tag.clone();
                }
                "css" => css_override = Some(StyleNode::try_from(value.clone())?),
                "className" => {
                    let Value::String(class_name) = value else {
                        return Err(StyleError::invalid("className", "expected a string"));
                    };
                    extra_class = Some(class_name.trim().to_string());
                }
                _ if self.style.definition().group(key).is_some() => {
                    selection.set(key.clone(), variant_value_from_json(value, key)?);
                }
                _ => {
                    forwarded.insert(key.clone(), value.clone());
                }
            }
        }

        let mut class_name = self.style.class_name_with(&selection, css_override.as_ref())?;
        if let Some(extra) = extra_class.filter(|extra| !extra.is_empty()) {
            if !class_name.is_empty() {
                class_name.push(' ');
            }
            class_name.push_str(&extra);
        }

        Ok(RenderedElement {
            element,
            class_name,
            props: forwarded,
        })
    }
}
