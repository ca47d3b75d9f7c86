//! Public factories of one configured style engine.
//!
//! A [`StyleEngine`] owns its token theme and its sheet. Cloning shares both; two
//! engines built from the same configuration keep separate sheets.

use crate::compose::{ComposeMode, Composer};
use crate::config::Config;
use crate::error::StyleError;
use crate::generator::{
    AtomicDeclaration, AtomicIndex, collapse, conditional_rank, content_hash, global_rules,
    prefixed, rule, to_base36,
};
use crate::sheet::{Sheet, SheetGroup, SheetInjector};
use crate::style::StyleNode;
use crate::styled::StyledComponent;
use crate::theme::{ScaleMap, Theme};
use crate::value::{ResolveContext, resolve_value};
use crate::variants::{SelectionKey, StyleDefinition, VariantSelection, resolve_variants};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct StyleEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    theme: Theme,
    breakpoints: Vec<String>,
    state: Mutex<SheetState>,
    injector: Option<Mutex<Box<dyn SheetInjector>>>,
}

struct SheetState {
    sheet: Sheet,
    atomic: AtomicIndex,
}

impl StyleEngine {
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Like [`StyleEngine::new`], mirroring every new rule into `injector`.
    pub fn with_injector(config: Config, injector: Box<dyn SheetInjector>) -> Self {
        Self::build(config, Some(injector))
    }

    fn build(config: Config, injector: Option<Box<dyn SheetInjector>>) -> Self {
        let theme = Theme::register(config.theme(), config.prefix());
        let sheet = if injector.is_some() {
            Sheet::mirrored()
        } else {
            Sheet::new()
        };
        let engine = Self {
            inner: Arc::new(EngineInner {
                breakpoints: config.breakpoints(),
                state: Mutex::new(SheetState {
                    sheet,
                    atomic: AtomicIndex::new(config.prefix()),
                }),
                injector: injector.map(Mutex::new),
                theme,
                config,
            }),
        };
        if !engine.inner.theme.is_empty() {
            let css = engine.theme_css(&engine.inner.theme);
            engine.insert_text(SheetGroup::Themed, css);
        }
        engine
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The default theme, applied to `:root`.
    pub fn theme(&self) -> &Theme {
        &self.inner.theme
    }

    /// Compiles a style definition. Every layer is validated here; rules are only
    /// emitted once a variant selection asks for a class name.
    pub fn css(&self, node: StyleNode) -> Result<CompiledStyle, StyleError> {
        self.compile(StyleDefinition::parse(&node)?)
    }

    /// Composes earlier styles with `node`, later parts winning.
    pub fn css_composed(&self, parts: &[&CompiledStyle], node: StyleNode) -> Result<CompiledStyle, StyleError> {
        let own = StyleDefinition::parse(&node)?;
        let definitions = parts
            .iter()
            .map(|part| part.definition())
            .chain(std::iter::once(&own));
        self.compile(StyleDefinition::compose(definitions))
    }

    pub fn styled(&self, element: impl Into<String>, node: StyleNode) -> Result<StyledComponent, StyleError> {
        Ok(StyledComponent::new(element.into(), self.css(node)?))
    }

    pub fn global_css(&self, node: StyleNode) -> Result<GlobalStyle, StyleError> {
        let rules = self.composer().flatten(&node, ComposeMode::Global)?;
        Ok(GlobalStyle {
            engine: self.clone(),
            rules: global_rules(&rules),
        })
    }

    /// Registers an `@keyframes` block and returns its generated name.
    pub fn keyframes(&self, node: StyleNode) -> Result<Keyframes, StyleError> {
        let rules = self.composer().flatten(&node, ComposeMode::Keyframes)?;
        let body = global_rules(&rules)
            .into_iter()
            .map(|(_, css)| css)
            .collect::<String>();
        let name = prefixed(
            self.inner.config.prefix(),
            &format!("k-{}", to_base36(content_hash(&["keyframes", &body]))),
        );
        let css_text = format!("@keyframes {}{{{}}}", name, body);
        self.insert_text(SheetGroup::Global, css_text.clone());
        Ok(Keyframes { name, css_text })
    }

    /// Creates a theme overriding tokens of the default theme and registers its class.
    pub fn create_theme(&self, name: Option<&str>, overrides: &ScaleMap) -> Result<Theme, StyleError> {
        let theme = self
            .inner
            .theme
            .derive(name, overrides, self.inner.config.prefix())?;
        if !theme.declared_tokens().is_empty() {
            let css = self.theme_css(&theme);
            self.insert_text(SheetGroup::Themed, css);
        }
        Ok(theme)
    }

    /// Every rule compiled so far, in cascade order.
    pub fn get_css_text(&self) -> String {
        self.inner.state.lock().sheet.get_text()
    }

    pub fn rule_count(&self) -> usize {
        self.inner.state.lock().sheet.len()
    }

    fn compile(&self, definition: StyleDefinition) -> Result<CompiledStyle, StyleError> {
        definition.validate_defaults()?;
        let composer = self.composer();
        for (path, layer) in definition.layers() {
            composer.flatten(layer, ComposeMode::Scoped)?;
            debug!(layer = %path, "validated style layer");
        }
        Ok(CompiledStyle {
            engine: self.clone(),
            definition: Arc::new(definition),
            memo: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn resolve_context<'a>(&'a self, theme: &'a Theme) -> ResolveContext<'a> {
        ResolveContext {
            theme,
            theme_map: self.inner.config.theme_map(),
            prefix: self.inner.config.prefix(),
        }
    }

    fn composer(&self) -> Composer<'_> {
        Composer {
            resolve: self.resolve_context(&self.inner.theme),
            utils: self.inner.config.utils(),
            media: self.inner.config.media(),
        }
    }

    fn theme_css(&self, theme: &Theme) -> String {
        let ctx = self.resolve_context(theme);
        let declarations = theme
            .declared_tokens()
            .iter()
            .map(|token| {
                let variable = token.variable();
                let value = resolve_value(&variable, token.value(), &ctx);
                format!("{}:{}", variable, value)
            })
            .collect::<Vec<_>>()
            .join(";");
        rule(theme.selector(), &declarations)
    }

    fn insert_text(&self, group: SheetGroup, css: String) -> bool {
        let hash = content_hash(&["sheet", &format!("{:?}", group), &css]);
        let inserted = self
            .inner
            .state
            .lock()
            .sheet
            .insert(group, 0, hash, css)
            .is_some();
        self.flush_injector();
        inserted
    }

    /// Hands queued rules to the injector with the sheet lock released. Whoever holds the
    /// injector drains the whole queue, including rules queued by other threads or by the
    /// injector itself.
    fn flush_injector(&self) {
        let Some(injector) = self.inner.injector.as_ref() else {
            return;
        };
        loop {
            let Some(mut injector) = injector.try_lock() else {
                return;
            };
            loop {
                let next = self.inner.state.lock().sheet.next_pending();
                let Some((css, index)) = next else {
                    break;
                };
                injector.insert_rule(&css, index);
            }
            drop(injector);
            if !self.inner.state.lock().sheet.has_pending() {
                return;
            }
        }
    }

    fn emit(&self, declarations: &[AtomicDeclaration]) -> Vec<String> {
        let classes = self.emit_locked(declarations);
        self.flush_injector();
        classes
    }

    /// Emits one batch of declarations under a single lock, so concurrent callers never
    /// insert the same rule twice.
    fn emit_locked(&self, declarations: &[AtomicDeclaration]) -> Vec<String> {
        let mut state = self.inner.state.lock();
        let SheetState { sheet, atomic } = &mut *state;
        let mut classes: Vec<String> = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            let (class_name, new_rule) = atomic.emit(declaration);
            if let Some(new_rule) = new_rule {
                let group = declaration.sheet_group();
                let rank = match group {
                    SheetGroup::Conditional => {
                        conditional_rank(&declaration.at_rules, self.inner.config.media())
                    }
                    _ => 0,
                };
                sheet.insert(group, rank, new_rule.hash, new_rule.css_text);
            }
            if !classes.contains(&class_name) {
                classes.push(class_name);
            }
        }
        classes
    }
}

impl fmt::Debug for StyleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleEngine")
            .field("prefix", &self.inner.config.prefix())
            .field("theme", &self.inner.theme.class_name())
            .field("rules", &self.rule_count())
            .finish()
    }
}

/// A compiled `css` definition. Class names are produced per variant selection and
/// memoized.
#[derive(Clone)]
pub struct CompiledStyle {
    engine: StyleEngine,
    definition: Arc<StyleDefinition>,
    memo: Arc<Mutex<HashMap<SelectionKey, String>>>,
}

impl CompiledStyle {
    pub fn definition(&self) -> &StyleDefinition {
        &self.definition
    }

    pub fn engine(&self) -> &StyleEngine {
        &self.engine
    }

    pub fn class_name(&self, selection: &VariantSelection) -> Result<String, StyleError> {
        self.class_name_with(selection, None)
    }

    pub fn default_class_name(&self) -> Result<String, StyleError> {
        self.class_name(&VariantSelection::new())
    }

    pub fn class_names(&self, selection: &VariantSelection) -> Result<Vec<String>, StyleError> {
        Ok(self
            .class_name(selection)?
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Space-separated atomic classes for `selection`, with `css_override` (the `css`
    /// prop) applied after every variant layer.
    pub fn class_name_with(
        &self,
        selection: &VariantSelection,
        css_override: Option<&StyleNode>,
    ) -> Result<String, StyleError> {
        let selection = self.definition.normalize(selection);
        let key = css_override.is_none().then(|| selection.cache_key());
        if let Some(key) = &key {
            if let Some(hit) = self.memo.lock().get(key) {
                return Ok(hit.clone());
            }
        }

        let merged = resolve_variants(
            &self.definition,
            &selection,
            &self.engine.inner.breakpoints,
            css_override,
        )?;
        let rules = self.engine.composer().flatten(&merged, ComposeMode::Scoped)?;
        let class_name = self.engine.emit(&collapse(&rules)).join(" ");

        if let Some(key) = key {
            self.memo.lock().insert(key, class_name.clone());
        }
        Ok(class_name)
    }
}

impl fmt::Debug for CompiledStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledStyle")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Global rules waiting to be applied.
#[derive(Clone)]
pub struct GlobalStyle {
    engine: StyleEngine,
    rules: Vec<(SheetGroup, String)>,
}

impl GlobalStyle {
    /// Inserts the rules into the sheet. Applying twice adds nothing.
    pub fn apply(&self) {
        for (group, css) in &self.rules {
            self.engine.insert_text(*group, css.clone());
        }
    }

    pub fn css_text(&self) -> String {
        self.rules.iter().map(|(_, css)| css.as_str()).collect()
    }
}

impl fmt::Debug for GlobalStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStyle").field("rules", &self.rules).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyframes {
    name: String,
    css_text: String,
}

impl Keyframes {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn css_text(&self) -> &str {
        &self.css_text
    }
}

impl fmt::Display for Keyframes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
