//! Style manifests: JSON documents the build CLI compiles.
//!
//! ```json
//! {
//!   "themes": { "dark": { "colors": { "background": "black" } } },
//!   "global": [{ "body": { "margin": 0 } }],
//!   "keyframes": { "fadeIn": { "from": { "opacity": 0 }, "to": { "opacity": 1 } } },
//!   "styles": {
//!     "button": {
//!       "element": "button",
//!       "style": { "color": "$text", "variants": { "size": { "sm": { "fontSize": 12 } } } },
//!       "renders": [{}, { "size": "sm" }]
//!     }
//!   }
//! }
//! ```

use crate::engine::StyleEngine;
use crate::error::StyleError;
use crate::style::{StyleNode, format_number};
use crate::theme::ScaleMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct StyleManifest {
    #[serde(default)]
    pub themes: Map<String, Value>,
    #[serde(default)]
    pub global: Vec<Value>,
    #[serde(default)]
    pub keyframes: Map<String, Value>,
    #[serde(default)]
    pub styles: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StyleEntry {
    style: Value,
    #[serde(default)]
    element: Option<String>,
    #[serde(default)]
    renders: Vec<Map<String, Value>>,
}

/// Generated names, written next to the stylesheet for the consuming app.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ClassMap {
    pub themes: BTreeMap<String, String>,
    pub keyframes: BTreeMap<String, String>,
    pub styles: BTreeMap<String, Vec<RenderedClass>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedClass {
    pub element: String,
    pub class_name: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManifestStats {
    pub styles: usize,
    pub renders: usize,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {section}: {source}", .path.display())]
    Style {
        path: PathBuf,
        section: String,
        #[source]
        source: StyleError,
    },
}

pub fn compile_manifest(
    engine: &StyleEngine,
    path: &Path,
    class_map: &mut ClassMap,
) -> Result<ManifestStats, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: StyleManifest = serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    compile_document(engine, manifest, path, class_map)
}

/// Compiles themes, then global styles, keyframes and every listed render of each style.
pub fn compile_document(
    engine: &StyleEngine,
    manifest: StyleManifest,
    path: &Path,
    class_map: &mut ClassMap,
) -> Result<ManifestStats, ManifestError> {
    let style_error = |section: String| {
        let path = path.to_path_buf();
        move |source: StyleError| ManifestError::Style {
            path,
            section,
            source,
        }
    };
    let mut stats = ManifestStats::default();

    for (name, scales) in manifest.themes {
        let section = format!("themes.{}", name);
        let overrides = scale_map(&scales, &section).map_err(style_error(section.clone()))?;
        let theme = engine
            .create_theme(Some(&name), &overrides)
            .map_err(style_error(section))?;
        class_map.themes.insert(name, theme.class_name().to_string());
    }

    for (idx, global) in manifest.global.into_iter().enumerate() {
        let section = format!("global[{}]", idx);
        let node = StyleNode::try_from(global).map_err(style_error(section.clone()))?;
        engine
            .global_css(node)
            .map_err(style_error(section))?
            .apply();
    }

    for (name, frames) in manifest.keyframes {
        let section = format!("keyframes.{}", name);
        let node = StyleNode::try_from(frames).map_err(style_error(section.clone()))?;
        let keyframes = engine.keyframes(node).map_err(style_error(section))?;
        class_map.keyframes.insert(name, keyframes.name().to_string());
    }

    for (name, entry) in manifest.styles {
        let section = format!("styles.{}", name);
        let entry: StyleEntry = serde_json::from_value(entry).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let node = StyleNode::try_from(entry.style).map_err(style_error(section.clone()))?;
        let component = engine
            .styled(entry.element.as_deref().unwrap_or("div"), node)
            .map_err(style_error(section.clone()))?;

        let renders = if entry.renders.is_empty() {
            vec![Map::new()]
        } else {
            entry.renders
        };
        let mut rendered_classes = Vec::with_capacity(renders.len());
        for (idx, props) in renders.iter().enumerate() {
            let rendered = component
                .render(props)
                .map_err(style_error(format!("{}.renders[{}]", section, idx)))?;
            debug!(style = %name, class = %rendered.class_name, "compiled render");
            rendered_classes.push(RenderedClass {
                element: rendered.element,
                class_name: rendered.class_name,
            });
            stats.renders += 1;
        }
        class_map.styles.insert(name, rendered_classes);
        stats.styles += 1;
    }

    Ok(stats)
}

fn scale_map(value: &Value, section: &str) -> Result<ScaleMap, StyleError> {
    let Value::Object(scales) = value else {
        return Err(StyleError::invalid(section, "expected an object of scales"));
    };
    let mut map = ScaleMap::new();
    for (scale, tokens) in scales {
        let Value::Object(tokens) = tokens else {
            return Err(StyleError::invalid(
                format!("{}.{}", section, scale),
                "expected an object of tokens",
            ));
        };
        let entry = map.entry(scale.clone()).or_default();
        for (token, value) in tokens {
            let text = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.as_f64().map(format_number).unwrap_or_default(),
                _ => {
                    return Err(StyleError::invalid(
                        format!("{}.{}.{}", section, scale, token),
                        "token values must be strings or numbers",
                    ));
                }
            };
            entry.insert(token.clone(), text);
        }
    }
    Ok(map)
}
