use crate::compose::FlatRule;
use crate::sheet::SheetGroup;
use std::collections::HashMap;
use tracing::debug;

/// 64-bit content hash over length-prefixed parts.
pub fn content_hash(parts: &[&str]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ironstyle:");
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// One atomic declaration set: a property (with its fallback values) under one selector
/// and one at-rule path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicDeclaration {
    pub at_rules: Vec<String>,
    pub selector: String,
    pub property: String,
    pub values: Vec<String>,
}

impl AtomicDeclaration {
    pub fn content_hash(&self) -> u64 {
        let mut parts = Vec::with_capacity(self.at_rules.len() + self.values.len() + 3);
        parts.extend(self.at_rules.iter().map(String::as_str));
        parts.push("|");
        parts.push(self.selector.as_str());
        parts.push(self.property.as_str());
        parts.extend(self.values.iter().map(String::as_str));
        content_hash(&parts)
    }

    pub fn sheet_group(&self) -> SheetGroup {
        if !self.at_rules.is_empty() {
            SheetGroup::Conditional
        } else if self.selector == "&" {
            SheetGroup::Atomic
        } else {
            SheetGroup::Nested
        }
    }

    fn declarations(&self) -> String {
        self.values
            .iter()
            .map(|value| format!("{}:{}", self.property, value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Collapses flattened rules into atomic declarations.
///
/// Rules sharing `(at_rules, selector, property)` collapse into one declaration: a later
/// origin replaces the earlier values, values of the same origin append as fallbacks.
pub fn collapse(rules: &[FlatRule]) -> Vec<AtomicDeclaration> {
    let mut out: Vec<(AtomicDeclaration, u32)> = Vec::with_capacity(rules.len());
    let mut positions: HashMap<(&[String], &str, &str), usize> = HashMap::new();

    for rule in rules {
        let key = (rule.at_rules.as_slice(), rule.selector.as_str(), rule.property.as_str());
        match positions.get(&key) {
            Some(&idx) => {
                let (declaration, origin) = &mut out[idx];
                if *origin != rule.origin {
                    declaration.values.clear();
                    *origin = rule.origin;
                }
                declaration.values.push(rule.value.clone());
            }
            None => {
                positions.insert(key, out.len());
                out.push((
                    AtomicDeclaration {
                        at_rules: rule.at_rules.clone(),
                        selector: rule.selector.clone(),
                        property: rule.property.clone(),
                        values: vec![rule.value.clone()],
                    },
                    rule.origin,
                ));
            }
        }
    }

    out.into_iter().map(|(declaration, _)| declaration).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicRule {
    pub hash: u64,
    pub class_name: String,
    pub declaration: AtomicDeclaration,
    pub css_text: String,
}

/// Content-addressed store of every atomic rule emitted by one configuration.
#[derive(Debug, Default)]
pub struct AtomicIndex {
    prefix: String,
    rules: HashMap<u64, AtomicRule>,
    counter: u64,
}

impl AtomicIndex {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            rules: HashMap::new(),
            counter: 0,
        }
    }

    /// Returns the class name for `declaration`, plus the rule to insert when the
    /// declaration is new.
    pub fn emit(&mut self, declaration: &AtomicDeclaration) -> (String, Option<AtomicRule>) {
        let mut hash = declaration.content_hash();
        loop {
            match self.rules.get(&hash) {
                Some(existing) if existing.declaration == *declaration => {
                    debug!(class = %existing.class_name, "atomic rule already emitted");
                    return (existing.class_name.clone(), None);
                }
                Some(existing) => {
                    debug!(class = %existing.class_name, hash, "content hash collision; probing");
                    hash = hash.wrapping_add(1);
                }
                None => break,
            }
        }

        let class_name = prefixed(&self.prefix, &format!("c-{}", to_base36(self.counter)));
        self.counter += 1;
        let selector = declaration
            .selector
            .replace('&', &format!(".{}", escape_selector(&class_name)));
        let css_text = wrap_at_rules(
            &declaration.at_rules,
            &rule(&selector, &declaration.declarations()),
        );
        let atomic = AtomicRule {
            hash,
            class_name: class_name.clone(),
            declaration: declaration.clone(),
            css_text,
        };
        self.rules.insert(hash, atomic.clone());
        (class_name, Some(atomic))
    }

    pub fn get(&self, hash: u64) -> Option<&AtomicRule> {
        self.rules.get(&hash)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}-{}", prefix, name)
    }
}

/// Position of a conditional rule among the configured breakpoints: 0 for at-rules that
/// are not breakpoints, `n + 1` for the n-th breakpoint (the widest one used wins).
pub fn conditional_rank(at_rules: &[String], media: &[(String, String)]) -> usize {
    at_rules
        .iter()
        .filter_map(|at_rule| {
            let query = at_rule.strip_prefix("@media ")?;
            media
                .iter()
                .position(|(_, configured)| configured == query)
                .map(|idx| idx + 1)
        })
        .max()
        .unwrap_or(0)
}

/// Rule text for global and keyframe styles, in block order.
///
/// Declarations written in the same block under the same selector share one rule;
/// root at-rule statements (`@import`) become their own statements.
pub fn global_rules(rules: &[FlatRule]) -> Vec<(SheetGroup, String)> {
    struct Block<'r> {
        at_rules: &'r [String],
        selector: &'r str,
        declarations: Vec<String>,
        statement: bool,
    }

    let mut blocks: Vec<Block<'_>> = Vec::new();
    let mut positions: HashMap<(u32, &[String], &str), usize> = HashMap::new();

    for rule in rules {
        if rule.property.starts_with('@') && rule.selector.is_empty() && rule.at_rules.is_empty() {
            blocks.push(Block {
                at_rules: &rule.at_rules,
                selector: "",
                declarations: vec![format!("{} {};", rule.property, rule.value)],
                statement: true,
            });
            continue;
        }
        let key = (rule.block, rule.at_rules.as_slice(), rule.selector.as_str());
        let declaration = format!("{}:{}", rule.property, rule.value);
        match positions.get(&key) {
            Some(&idx) => blocks[idx].declarations.push(declaration),
            None => {
                positions.insert(key, blocks.len());
                blocks.push(Block {
                    at_rules: &rule.at_rules,
                    selector: &rule.selector,
                    declarations: vec![declaration],
                    statement: false,
                });
            }
        }
    }

    blocks
        .into_iter()
        .map(|block| {
            if block.statement {
                return (SheetGroup::Import, block.declarations.concat());
            }
            let body = block.declarations.join(";");
            let inner = if block.selector.is_empty() {
                body
            } else {
                rule(block.selector, &body)
            };
            (SheetGroup::Global, wrap_at_rules(block.at_rules, &inner))
        })
        .collect()
}

pub fn rule(selector: &str, declarations: &str) -> String {
    format!("{}{{{}}}", selector, declarations)
}

/// Wraps `rule` in `at_rules`, the first entry outermost.
pub fn wrap_at_rules(at_rules: &[String], rule: &str) -> String {
    at_rules
        .iter()
        .rev()
        .fold(rule.to_string(), |inner, at_rule| {
            wrap_rule(&RuleWrapper::parse(at_rule), &inner)
        })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleWrapper {
    Media(String),
    Supports(String),
    Container { name: Option<String>, query: String },
    Other(String),
}

impl RuleWrapper {
    pub fn parse(at_rule: &str) -> RuleWrapper {
        let at_rule = at_rule.trim();
        if let Some(query) = at_rule.strip_prefix("@media ") {
            return RuleWrapper::Media(query.trim().to_string());
        }
        if let Some(query) = at_rule.strip_prefix("@supports ") {
            return RuleWrapper::Supports(query.trim().to_string());
        }
        if let Some(rest) = at_rule.strip_prefix("@container ") {
            let rest = rest.trim();
            return match rest.split_once(' ') {
                Some((name, query)) if !name.starts_with('(') => RuleWrapper::Container {
                    name: Some(name.to_string()),
                    query: query.trim().to_string(),
                },
                _ => RuleWrapper::Container {
                    name: None,
                    query: rest.to_string(),
                },
            };
        }
        RuleWrapper::Other(at_rule.to_string())
    }
}

fn wrap_rule(wrapper: &RuleWrapper, rule: &str) -> String {
    match wrapper {
        RuleWrapper::Media(query) => format!("@media {}{{{}}}", query, rule),
        RuleWrapper::Supports(query) => {
            format!("@supports {}{{{}}}", normalize_supports_query(query), rule)
        }
        RuleWrapper::Container { name, query } => match name {
            Some(name) => format!("@container {} {}{{{}}}", name, query, rule),
            None => format!("@container {}{{{}}}", query, rule),
        },
        RuleWrapper::Other(at_rule) => format!("{}{{{}}}", at_rule, rule),
    }
}

fn normalize_supports_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return "()".to_string();
    }
    if (trimmed.starts_with('(') && trimmed.ends_with(')')) || trimmed.starts_with("not ") {
        return trimmed.to_string();
    }
    format!("({})", trimmed)
}

/// Escapes a class name for use in a selector: ASCII characters outside `[A-Za-z0-9_-]`
/// are backslash-escaped, a leading digit becomes a hex escape.
pub fn escape_selector(class: &str) -> String {
    let mut escaped = String::with_capacity(class.len() * 2);

    for (idx, ch) in class.chars().enumerate() {
        let leading_digit = ch.is_ascii_digit()
            && (idx == 0 || (idx == 1 && class.starts_with('-')));
        if leading_digit {
            escaped.push_str(&format!("\\{:x} ", ch as u32));
        } else if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || !ch.is_ascii() {
            escaped.push(ch);
        } else {
            escaped.push('\\');
            escaped.push(ch);
        }
    }

    escaped
}

/// Expands minified sheet text into indented, one-declaration-per-line CSS.
pub fn pretty_css(css: &str) -> String {
    let mut out = String::new();
    let mut token = String::new();
    let mut depth = 0usize;
    let mut parens = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for ch in css.chars() {
        if let Some(quote) = in_string {
            token.push(ch);
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == quote {
                in_string = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => {
                token.push(ch);
                in_string = Some(ch);
            }
            '(' => {
                parens += 1;
                token.push(ch);
            }
            ')' => {
                parens = parens.saturating_sub(1);
                token.push(ch);
            }
            _ if parens > 0 => token.push(ch),
            '{' => {
                let header = token.trim();
                if !header.is_empty() {
                    push_line_with_indent(&mut out, depth, &format!("{} {{", header));
                }
                token.clear();
                depth += 1;
            }
            ';' => {
                let decl = token.trim();
                if !decl.is_empty() {
                    push_line_with_indent(&mut out, depth, &format!("{};", format_declaration(decl)));
                }
                token.clear();
                if depth == 0 {
                    out.push('\n');
                }
            }
            '}' => {
                let tail = token.trim();
                if !tail.is_empty() {
                    push_line_with_indent(&mut out, depth, &format!("{};", format_declaration(tail)));
                }
                token.clear();
                depth = depth.saturating_sub(1);
                push_line_with_indent(&mut out, depth, "}");
                if depth == 0 {
                    out.push('\n');
                }
            }
            _ => token.push(ch),
        }
    }

    let tail = token.trim();
    if !tail.is_empty() {
        push_line_with_indent(&mut out, depth, &format!("{};", format_declaration(tail)));
    }

    let mut text = out.trim_end().to_string();
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn push_line_with_indent(out: &mut String, depth: usize, line: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&"  ".repeat(depth));
    out.push_str(line);
}

fn format_declaration(raw: &str) -> String {
    if raw.starts_with('@') {
        return raw.trim().to_string();
    }
    let Some((name, value)) = raw.split_once(':') else {
        return raw.trim().to_string();
    };
    format!("{}: {}", name.trim(), value.trim())
}

#[cfg(test)]
mod tests {
    use super::{
        AtomicDeclaration, AtomicIndex, RuleWrapper, collapse, conditional_rank, content_hash,
        escape_selector, global_rules, pretty_css, to_base36, wrap_at_rules,
    };
    use crate::compose::FlatRule;
    use crate::sheet::SheetGroup;
    use pretty_assertions::assert_eq;

    fn flat(at: &[&str], selector: &str, property: &str, value: &str, origin: u32, block: u32) -> FlatRule {
        FlatRule {
            at_rules: at.iter().map(|item| item.to_string()).collect(),
            selector: selector.to_string(),
            property: property.to_string(),
            value: value.to_string(),
            origin,
            block,
        }
    }

    fn declaration(selector: &str, property: &str, values: &[&str]) -> AtomicDeclaration {
        AtomicDeclaration {
            at_rules: Vec::new(),
            selector: selector.to_string(),
            property: property.to_string(),
            values: values.iter().map(|value| value.to_string()).collect(),
        }
    }

    #[test]
    fn hashes_are_stable_and_length_prefixed() {
        assert_eq!(content_hash(&["a", "bc"]), content_hash(&["a", "bc"]));
        assert_ne!(content_hash(&["ab", "c"]), content_hash(&["a", "bc"]));
    }

    #[test]
    fn encodes_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1295), "zz");
    }

    #[test]
    fn later_origins_replace_and_fallbacks_append() {
        let rules = vec![
            flat(&[], "&", "color", "red", 0, 0),
            flat(&[], "&", "display", "-webkit-box", 1, 0),
            flat(&[], "&", "display", "flex", 1, 0),
            flat(&[], "&", "color", "blue", 2, 0),
            flat(&["@media print"], "&", "color", "black", 3, 1),
        ];
        let collapsed = collapse(&rules);
        assert_eq!(
            collapsed,
            vec![
                declaration("&", "color", &["blue"]),
                declaration("&", "display", &["-webkit-box", "flex"]),
                AtomicDeclaration {
                    at_rules: vec!["@media print".to_string()],
                    ..declaration("&", "color", &["black"])
                },
            ]
        );
    }

    #[test]
    fn emits_each_declaration_once() {
        let mut index = AtomicIndex::new("");
        let (first, rule) = index.emit(&declaration("&", "color", &["red"]));
        assert_eq!(first, "c-0");
        assert_eq!(rule.unwrap().css_text, ".c-0{color:red}");

        let (again, rule) = index.emit(&declaration("&", "color", &["red"]));
        assert_eq!(again, "c-0");
        assert!(rule.is_none());

        let (hover, rule) = index.emit(&declaration("&:hover > span", "color", &["red"]));
        assert_eq!(hover, "c-1");
        assert_eq!(rule.unwrap().css_text, ".c-1:hover > span{color:red}");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn prefixes_class_names_and_wraps_at_rules() {
        let mut index = AtomicIndex::new("app");
        let declaration = AtomicDeclaration {
            at_rules: vec![
                "@supports display: grid".to_string(),
                "@media (min-width: 640px)".to_string(),
            ],
            ..declaration("&", "display", &["grid"])
        };
        let (class_name, rule) = index.emit(&declaration);
        assert_eq!(class_name, "app-c-0");
        assert_eq!(
            rule.unwrap().css_text,
            "@supports (display: grid){@media (min-width: 640px){.app-c-0{display:grid}}}"
        );
        assert_eq!(declaration.sheet_group(), SheetGroup::Conditional);
    }

    #[test]
    fn ranks_conditional_rules_by_breakpoint() {
        let media = vec![
            ("bp1".to_string(), "(min-width: 640px)".to_string()),
            ("bp2".to_string(), "(min-width: 768px)".to_string()),
        ];
        assert_eq!(conditional_rank(&["@media (min-width: 768px)".to_string()], &media), 2);
        assert_eq!(conditional_rank(&["@media print".to_string()], &media), 0);
    }

    #[test]
    fn parses_container_wrappers() {
        assert_eq!(
            RuleWrapper::parse("@container sidebar (min-width: 400px)"),
            RuleWrapper::Container {
                name: Some("sidebar".to_string()),
                query: "(min-width: 400px)".to_string()
            }
        );
        assert_eq!(
            wrap_at_rules(&["@layer base".to_string()], "a{b:c}"),
            "@layer base{a{b:c}}"
        );
    }

    #[test]
    fn groups_global_blocks() {
        let rules = vec![
            flat(&[], "", "@import", "url(a.css)", 0, 1),
            flat(&[], "body", "margin", "0", 1, 2),
            flat(&[], "body a", "color", "inherit", 2, 3),
            flat(&[], "body", "padding", "0", 3, 2),
            flat(&["@font-face"], "", "font-family", "Inter", 4, 4),
        ];
        assert_eq!(
            global_rules(&rules),
            vec![
                (SheetGroup::Import, "@import url(a.css);".to_string()),
                (SheetGroup::Global, "body{margin:0;padding:0}".to_string()),
                (SheetGroup::Global, "body a{color:inherit}".to_string()),
                (SheetGroup::Global, "@font-face{font-family:Inter}".to_string()),
            ]
        );
    }

    #[test]
    fn escapes_selectors() {
        assert_eq!(escape_selector("a:b/c"), "a\\:b\\/c");
        assert_eq!(escape_selector("c-0"), "c-0");
        assert_eq!(escape_selector("dark.mode"), "dark\\.mode");
        assert_eq!(escape_selector("1up"), "\\31 up");
    }

    #[test]
    fn pretty_prints_sheet_text() {
        let css = "@import url(https://x.test/a.css);.c-0{color:red}@media (min-width: 640px){.c-1{background:url(data:image/png;base64,AA)}}";
        assert_eq!(
            pretty_css(css),
            "@import url(https://x.test/a.css);\n\n.c-0 {\n  color: red;\n}\n\n@media (min-width: 640px) {\n  .c-1 {\n    background: url(data:image/png;base64,AA);\n  }\n}\n"
        );
    }
}
