//! Value resolver: rewrites token references inside declaration values.
//!
//! `$$name` becomes `var(--name)`, `$scale$token` and `$token` (scale implied by the
//! theme map) become `var(--scale-token)`. Unknown references stay literal.

use crate::style::{StyleValue, format_number};
use crate::theme::{Theme, custom_property};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything the resolver needs from a configuration.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub theme: &'a Theme,
    pub theme_map: &'a BTreeMap<String, String>,
    pub prefix: &'a str,
}

impl<'a> ResolveContext<'a> {
    fn implied_scale(&self, property: &str) -> Option<&'a str> {
        self.theme_map.get(property).map(String::as_str)
    }
}

/// Converts a style key to a CSS property name: `backgroundColor` → `background-color`,
/// `WebkitLineClamp` → `-webkit-line-clamp`, `msFlex` → `-ms-flex`.
pub fn property_name(key: &str) -> String {
    if key.starts_with("--") || !key.chars().any(|ch| ch.is_ascii_uppercase()) {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len() + 4);
    if key.starts_with("ms") && key[2..].starts_with(|ch: char| ch.is_ascii_uppercase()) {
        out.push('-');
    }
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Property name declared by a `$$name` key.
pub fn local_token_property(name: &str, prefix: &str) -> String {
    custom_property(prefix, name)
}

/// Resolves a scalar style value for `property` (already kebab-case).
pub fn resolve_scalar(property: &str, value: &StyleValue, ctx: &ResolveContext<'_>) -> Option<String> {
    match value {
        StyleValue::Str(raw) => Some(resolve_value(property, raw, ctx)),
        StyleValue::Number(number) => {
            let text = format_number(*number);
            if let Some(token) = bare_token(property, &text, ctx) {
                return Some(token);
            }
            if *number != 0.0 && requires_unit(property) {
                Some(format!("{}px", text))
            } else {
                Some(text)
            }
        }
        StyleValue::List(_) | StyleValue::Node(_) => None,
    }
}

pub fn resolve_value(property: &str, raw: &str, ctx: &ResolveContext<'_>) -> String {
    if let Some(token) = bare_token(property, raw.trim(), ctx) {
        return token;
    }
    if !raw.contains('$') {
        return raw.to_string();
    }

    let chars = raw.char_indices().collect::<Vec<_>>();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut idx = 0usize;
    while idx < chars.len() {
        let (start, ch) = chars[idx];
        if ch != '$' {
            out.push(ch);
            idx += 1;
            continue;
        }

        let negated = out.ends_with('-')
            && out[..out.len() - 1]
                .chars()
                .next_back()
                .is_none_or(|prev| prev.is_whitespace() || prev == '(' || prev == ',');

        if chars.get(idx + 1).map(|(_, next)| *next) == Some('$') {
            let (name, next_idx) = read_ident(&chars, idx + 2, raw);
            if name.is_empty() {
                out.push_str("$$");
                idx += 2;
                continue;
            }
            push_reference(&mut out, &format!("var({})", custom_property(ctx.prefix, name)), negated);
            idx = next_idx;
            continue;
        }

        let (first, after_first) = read_ident(&chars, idx + 1, raw);
        if first.is_empty() {
            out.push('$');
            idx += 1;
            continue;
        }
        let (scale, token, next_idx) = if chars.get(after_first).map(|(_, c)| *c) == Some('$') {
            let (second, after_second) = read_ident(&chars, after_first + 1, raw);
            if second.is_empty() {
                (ctx.implied_scale(property), first, after_first)
            } else {
                (Some(first), second, after_second)
            }
        } else {
            (ctx.implied_scale(property), first, after_first)
        };

        let end = chars.get(next_idx).map(|(pos, _)| *pos).unwrap_or(raw.len());
        let original = &raw[start..end];
        match scale.map(|scale| ctx.theme.resolve_token(scale, token)) {
            Some(Ok(resolved)) => push_reference(&mut out, &resolved.computed_value(), negated),
            Some(Err(err)) => {
                debug!(property, value = raw, error = %err, "keeping unresolved token literal");
                out.push_str(original);
            }
            None => {
                debug!(property, value = raw, "no scale for token reference; keeping literal");
                out.push_str(original);
            }
        }
        idx = next_idx;
    }
    out
}

fn push_reference(out: &mut String, reference: &str, negated: bool) {
    if negated {
        out.pop();
        out.push_str(&format!("calc({} * -1)", reference));
    } else {
        out.push_str(reference);
    }
}

fn read_ident<'r>(chars: &[(usize, char)], from: usize, raw: &'r str) -> (&'r str, usize) {
    let mut idx = from;
    while idx < chars.len() {
        let ch = chars[idx].1;
        let dotted_digit = ch == '.'
            && chars
                .get(idx + 1)
                .is_some_and(|(_, next)| next.is_ascii_digit());
        if ch.is_alphanumeric() || ch == '-' || ch == '_' || dotted_digit {
            idx += 1;
        } else {
            break;
        }
    }
    let start = chars.get(from).map(|(pos, _)| *pos).unwrap_or(raw.len());
    let end = chars.get(idx).map(|(pos, _)| *pos).unwrap_or(raw.len());
    (&raw[start..end], idx)
}

fn bare_token(property: &str, value: &str, ctx: &ResolveContext<'_>) -> Option<String> {
    if value.is_empty() || value.starts_with('$') || value.contains(char::is_whitespace) {
        return None;
    }
    let scale = ctx.implied_scale(property)?;
    ctx.theme.get(scale, value).map(|token| token.computed_value())
}

fn requires_unit(property: &str) -> bool {
    const LENGTH_SUFFIXES: [&str; 4] = ["-width", "-height", "-size", "-radius"];
    // Unitless numbers mean a character count or a multiplier here.
    const UNITLESS: [&str; 3] = ["tab-size", "-moz-tab-size", "border-image-width"];
    if property.starts_with("--") || UNITLESS.contains(&property) {
        return false;
    }
    if property.starts_with("margin")
        || property.starts_with("padding")
        || property.starts_with("inset")
        || property.starts_with("scroll-margin")
        || property.starts_with("scroll-padding")
    {
        return true;
    }
    if matches!(
        property,
        "width"
            | "height"
            | "top"
            | "right"
            | "bottom"
            | "left"
            | "gap"
            | "row-gap"
            | "column-gap"
            | "grid-gap"
            | "font-size"
            | "letter-spacing"
            | "border-radius"
            | "border-width"
            | "flex-basis"
            | "outline-offset"
            | "text-indent"
            | "border-spacing"
            | "perspective"
            | "block-size"
            | "inline-size"
    ) {
        return true;
    }
    LENGTH_SUFFIXES
        .iter()
        .any(|suffix| property.ends_with(suffix))
        && !property.starts_with("line-")
}
