//! The script context: configuration phase and initialization pipeline.
//!
//! A [`ScriptContext`] collects everything that shapes a runtime (config,
//! file provider, plugins, method bundles, blocks, component types and
//! catalogs) and turns it into an immutable [`ScriptRuntime`] with
//! [`init`](ScriptContext::init).
//!
//! # Pipeline
//!
//! `init()` runs these steps on a private [`ContextSetup`]:
//!
//! 1. create the page registry; register it and the [`ContextHandle`] as
//!    container singletons
//! 2. plugin `before_register` hooks
//! 3. plugin `register` hooks
//! 4. the `after_plugins` callback
//! 5. classify and register component types, then every catalog's types
//! 6. bind [`ContextRef`](crate::ContextRef) back-references
//! 7. index blocks (last registration wins) and methods (first wins)
//! 8. plugin `after_register` hooks
//!
//! Initialization is transactional. If any step fails, nothing of the staged
//! state survives, the context returns to [`ContextState::Uninitialized`] and
//! `init()` may be called again. Once it succeeds, further calls return the
//! same runtime.
//!
//! ```rust
//! use std::sync::Arc;
//! use quill::ScriptContext;
//! use quill_vfs::MemoryFiles;
//!
//! let files = MemoryFiles::new().with_file("docs/index.html", "<h1>Docs</h1>");
//! let mut context = ScriptContext::new(Arc::new(files)).with_arg("site", "Quill");
//!
//! let runtime = context.init().unwrap();
//! assert!(runtime.get_page("docs/").is_ok());
//! assert!(Arc::ptr_eq(&runtime, &context.init().unwrap()));
//! ```

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use minijinja::Value;
use once_cell::sync::OnceCell;
use quill_vfs::{path, VirtualFiles};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::component::{Capability, ComponentCatalog, ComponentType};
use crate::config::ScriptConfig;
use crate::container::Container;
use crate::defaults::{DefaultBlocksPlugin, DefaultScripts};
use crate::error::{InitStage, ScriptError};
use crate::methods::{Registered, ScriptBlock, ScriptMethods};
use crate::page::{CodePage, CodePageEntry, CodePageFactory, PageFormat, PageRegistry, PageSettings};
use crate::plugin::ScriptPlugin;
use crate::runtime::ScriptRuntime;

/// Callback run after all plugins registered.
pub type AfterPluginsFn = Arc<dyn Fn(&mut ContextSetup) -> anyhow::Result<()> + Send + Sync>;

/// Supplies a value for a template variable nothing else defines.
///
/// Returning `None` leaves the variable undefined.
pub type UnhandledExpressionFn = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Initialization state of a [`ScriptContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// `init()` has not run or the last run failed.
    Uninitialized,
    /// `init()` is running.
    Initializing,
    /// `init()` succeeded.
    Ready,
}

enum State {
    Uninitialized,
    Initializing,
    Ready(Arc<ScriptRuntime>),
}

/// A late-bound handle to the runtime, resolvable from the container.
///
/// Components created during initialization can hold it and reach the
/// runtime once it exists.
#[derive(Clone, Default)]
pub struct ContextHandle(Arc<OnceCell<Weak<ScriptRuntime>>>);

impl ContextHandle {
    /// The runtime, once built and while alive.
    pub fn runtime(&self) -> Option<Arc<ScriptRuntime>> {
        self.0.get().and_then(Weak::upgrade)
    }

    /// Binds the handle unless already bound. Returns true if it was bound.
    pub(crate) fn bind(&self, runtime: Weak<ScriptRuntime>) -> bool {
        let bound = self.0.set(runtime).is_ok();
        if !bound {
            tracing::trace!("context handle already bound; keeping the first runtime");
        }
        bound
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextHandle").field(&self.0.get().is_some()).finish()
    }
}

/// Builder and owner of a [`ScriptRuntime`].
pub struct ScriptContext {
    config: ScriptConfig,
    files: Arc<dyn VirtualFiles>,
    plugins: Vec<Registered<dyn ScriptPlugin>>,
    methods: Vec<Registered<dyn ScriptMethods>>,
    blocks: Vec<Registered<dyn ScriptBlock>>,
    component_types: Vec<ComponentType>,
    catalogs: Vec<Arc<dyn ComponentCatalog>>,
    after_plugins: Option<AfterPluginsFn>,
    on_unhandled_expression: Option<UnhandledExpressionFn>,
    state: State,
}

impl ScriptContext {
    /// Creates a context with the default methods and blocks.
    pub fn new(files: Arc<dyn VirtualFiles>) -> Self {
        Self::bare(files)
            .with_methods(DefaultScripts::default())
            .with_plugin(DefaultBlocksPlugin)
    }

    /// Creates a context without default methods, blocks or plugins.
    pub fn bare(files: Arc<dyn VirtualFiles>) -> Self {
        Self {
            config: ScriptConfig::default(),
            files,
            plugins: Vec::new(),
            methods: Vec::new(),
            blocks: Vec::new(),
            component_types: Vec::new(),
            catalogs: Vec::new(),
            after_plugins: None,
            on_unhandled_expression: None,
            state: State::Uninitialized,
        }
    }

    /// Creates a context with defaults and the given configuration.
    pub fn from_config(files: Arc<dyn VirtualFiles>, config: ScriptConfig) -> Self {
        Self::new(files).with_config(config)
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: ScriptConfig) -> Self {
        self.warn_if_ready("with_config");
        self.config = config;
        self
    }

    /// Turns debug mode on or off.
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.warn_if_ready("with_debug_mode");
        self.config.debug_mode = debug_mode;
        self
    }

    /// Appends a page format. An existing format with the same extension is
    /// replaced in place.
    pub fn with_page_format(mut self, format: PageFormat) -> Self {
        self.warn_if_ready("with_page_format");
        let formats = &mut self.config.page_formats;
        match formats.iter_mut().find(|f| f.extension == format.extension) {
            Some(existing) => *existing = format,
            None => formats.push(format),
        }
        self
    }

    /// Sets a global argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.warn_if_ready("with_arg");
        self.config.args.insert(name.into(), value.into());
        self
    }

    /// Appends a plugin.
    pub fn with_plugin<P: ScriptPlugin>(mut self, plugin: P) -> Self {
        self.warn_if_ready("with_plugin");
        self.plugins.push(Registered::plugin(Arc::new(plugin)));
        self
    }

    /// Removes every plugin of type `P`.
    pub fn without_plugin<P: ScriptPlugin>(mut self) -> Self {
        self.warn_if_ready("without_plugin");
        self.plugins.retain(|p| p.type_id() != TypeId::of::<P>());
        self
    }

    /// Appends a method bundle.
    pub fn with_methods<M: ScriptMethods>(self, methods: M) -> Self {
        self.with_shared_methods(Arc::new(methods))
    }

    /// Appends a method bundle the caller keeps a handle to.
    pub fn with_shared_methods<M: ScriptMethods>(mut self, methods: Arc<M>) -> Self {
        self.warn_if_ready("with_methods");
        self.methods.push(Registered::methods(methods));
        self
    }

    /// Removes every method bundle of type `M`.
    pub fn without_methods<M: ScriptMethods>(mut self) -> Self {
        self.warn_if_ready("without_methods");
        self.methods.retain(|m| m.type_id() != TypeId::of::<M>());
        self
    }

    /// Appends a block.
    pub fn with_block<B: ScriptBlock>(mut self, block: B) -> Self {
        self.warn_if_ready("with_block");
        self.blocks.push(Registered::block(Arc::new(block)));
        self
    }

    /// Appends a component type to classify during `init()`.
    pub fn with_component(mut self, component: ComponentType) -> Self {
        self.warn_if_ready("with_component");
        self.component_types.push(component);
        self
    }

    /// Appends a catalog to scan during `init()`.
    pub fn with_catalog(mut self, catalog: impl ComponentCatalog + 'static) -> Self {
        self.warn_if_ready("with_catalog");
        self.catalogs.push(Arc::new(catalog));
        self
    }

    /// Sets the callback run after all plugins registered.
    pub fn on_after_plugins<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut ContextSetup) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.warn_if_ready("on_after_plugins");
        self.after_plugins = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for template variables nothing else defines.
    pub fn on_unhandled_expression<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.warn_if_ready("on_unhandled_expression");
        self.on_unhandled_expression = Some(Arc::new(callback));
        self
    }

    /// The configuration.
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Current initialization state.
    pub fn state(&self) -> ContextState {
        match self.state {
            State::Uninitialized => ContextState::Uninitialized,
            State::Initializing => ContextState::Initializing,
            State::Ready(_) => ContextState::Ready,
        }
    }

    /// The runtime, if `init()` succeeded.
    pub fn runtime(&self) -> Option<Arc<ScriptRuntime>> {
        match &self.state {
            State::Ready(runtime) => Some(runtime.clone()),
            _ => None,
        }
    }

    /// Builds the runtime. Returns the existing runtime if already built.
    pub fn init(&mut self) -> Result<Arc<ScriptRuntime>, ScriptError> {
        match &self.state {
            State::Ready(runtime) => return Ok(runtime.clone()),
            State::Initializing => return Err(ScriptError::AlreadyInitializing),
            State::Uninitialized => {}
        }

        self.state = State::Initializing;
        match self.run_pipeline() {
            Ok(runtime) => {
                self.state = State::Ready(runtime.clone());
                Ok(runtime)
            }
            Err(err) => {
                tracing::warn!(error = %err, "context initialization failed");
                self.state = State::Uninitialized;
                Err(err)
            }
        }
    }

    fn run_pipeline(&self) -> Result<Arc<ScriptRuntime>, ScriptError> {
        tracing::debug!(
            plugins = self.plugins.len(),
            debug_mode = self.config.debug_mode,
            "initializing script context"
        );

        let mut setup = ContextSetup::new(self)?;

        let plugins = setup.plugins.clone();
        for plugin in &plugins {
            let plugin = plugin.instance();
            tracing::debug!(plugin = plugin.name(), "before_register");
            plugin
                .before_register(&mut setup)
                .map_err(|e| ScriptError::init(InitStage::BeforeRegister, plugin.name(), e))?;
        }

        let plugins = setup.plugins.clone();
        for plugin in &plugins {
            let plugin = plugin.instance();
            tracing::debug!(plugin = plugin.name(), "register");
            plugin
                .register(&mut setup)
                .map_err(|e| ScriptError::init(InitStage::Register, plugin.name(), e))?;
        }

        if let Some(callback) = &self.after_plugins {
            tracing::debug!("after_plugins callback");
            callback(&mut setup)
                .map_err(|e| ScriptError::init(InitStage::AfterPlugins, "after_plugins", e))?;
        }

        setup.scan_components()?;

        let runtime = ScriptRuntime::build(setup, self.on_unhandled_expression.clone());

        for plugin in runtime.plugins() {
            let plugin = plugin.instance();
            tracing::debug!(plugin = plugin.name(), "after_register");
            if let Err(e) = plugin.after_register(&runtime) {
                runtime.dispose();
                return Err(ScriptError::init(InitStage::AfterRegister, plugin.name(), e));
            }
        }

        tracing::debug!(
            methods = runtime.method_names().count(),
            blocks = runtime.blocks().len(),
            code_pages = runtime.code_page_paths().count(),
            "script context ready"
        );
        Ok(runtime)
    }

    fn warn_if_ready(&self, operation: &str) {
        if matches!(self.state, State::Ready(_)) {
            tracing::warn!(operation, "context already initialized; change ignored by the running runtime");
        }
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("state", &self.state())
            .field("plugins", &self.plugins)
            .field("methods", &self.methods)
            .field("blocks", &self.blocks)
            .field("component_types", &self.component_types.len())
            .field("catalogs", &self.catalogs.len())
            .finish_non_exhaustive()
    }
}

/// Staged state handed to plugins during `init()`.
///
/// Everything registered here ends up in the runtime if initialization
/// succeeds and is discarded otherwise.
pub struct ContextSetup {
    pub(crate) config: ScriptConfig,
    pub(crate) pages: Arc<PageRegistry>,
    pub(crate) container: Container,
    pub(crate) handle: ContextHandle,
    pub(crate) plugins: Vec<Registered<dyn ScriptPlugin>>,
    pub(crate) methods: Vec<Registered<dyn ScriptMethods>>,
    pub(crate) blocks: Vec<Registered<dyn ScriptBlock>>,
    pub(crate) code_pages: FxHashMap<String, CodePageEntry>,
    component_types: Vec<ComponentType>,
    catalogs: Vec<Arc<dyn ComponentCatalog>>,
    scanned: FxHashSet<TypeId>,
}

impl ContextSetup {
    fn new(context: &ScriptContext) -> Result<Self, ScriptError> {
        let settings = PageSettings::from(&context.config);
        let pages = Arc::new(PageRegistry::new(context.files.clone(), settings)?);
        let handle = ContextHandle::default();

        let mut container = Container::new();
        container.register_singleton(pages.clone());
        container.register_singleton(Arc::new(handle.clone()));
        container.register_singleton(Arc::new(context.config.clone()));
        tracing::debug!("registered page registry and context handle");

        let mut setup = Self {
            config: context.config.clone(),
            pages,
            container,
            handle,
            plugins: context.plugins.clone(),
            methods: Vec::new(),
            blocks: Vec::new(),
            code_pages: FxHashMap::default(),
            component_types: context.component_types.clone(),
            catalogs: context.catalogs.clone(),
            scanned: FxHashSet::default(),
        };
        for methods in &context.methods {
            setup.push_methods(methods.clone(), false);
        }
        for block in &context.blocks {
            setup.push_block(block.clone());
        }
        Ok(setup)
    }

    /// The configuration being initialized.
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Returns true in debug mode.
    pub fn debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    /// Page formats. Fixed before `init()`.
    pub fn page_formats(&self) -> &[PageFormat] {
        &self.config.page_formats
    }

    /// The page registry the runtime will use.
    pub fn pages(&self) -> &Arc<PageRegistry> {
        &self.pages
    }

    /// Handle that resolves to the runtime once it is built.
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// The container, for resolving services.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The container, for registering services.
    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    /// Sets a global argument.
    pub fn set_arg(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.config.args.insert(name.into(), value.into());
    }

    /// Global arguments registered so far.
    pub fn args(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.config.args
    }

    /// Appends a method bundle.
    pub fn add_methods<M: ScriptMethods>(&mut self, methods: M) {
        self.push_methods(Registered::methods(Arc::new(methods)), false);
    }

    /// Inserts a method bundle ahead of all others, so its functions win
    /// name collisions.
    pub fn insert_methods<M: ScriptMethods>(&mut self, methods: M) {
        self.push_methods(Registered::methods(Arc::new(methods)), true);
    }

    /// Returns true if a method bundle of type `M` is registered.
    pub fn has_methods<M: ScriptMethods>(&self) -> bool {
        self.has_methods_id(TypeId::of::<M>())
    }

    /// Removes every method bundle of type `M`. Returns true if any was removed.
    pub fn remove_methods<M: ScriptMethods>(&mut self) -> bool {
        let before = self.methods.len();
        self.methods.retain(|m| m.type_id() != TypeId::of::<M>());
        before != self.methods.len()
    }

    /// Registered method bundles in lookup order.
    pub fn methods(&self) -> &[Registered<dyn ScriptMethods>] {
        &self.methods
    }

    /// Appends a block.
    pub fn add_block<B: ScriptBlock>(&mut self, block: B) {
        self.push_block(Registered::block(Arc::new(block)));
    }

    /// Returns true if a block of type `B` is registered.
    pub fn has_block<B: ScriptBlock>(&self) -> bool {
        self.has_block_id(TypeId::of::<B>())
    }

    /// Removes every block of type `B`. Returns true if any was removed.
    pub fn remove_block<B: ScriptBlock>(&mut self) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.type_id() != TypeId::of::<B>());
        before != self.blocks.len()
    }

    /// Registered blocks in registration order.
    pub fn blocks(&self) -> &[Registered<dyn ScriptBlock>] {
        &self.blocks
    }

    /// Returns true if a plugin of type `P` is registered.
    pub fn has_plugin<P: ScriptPlugin>(&self) -> bool {
        self.plugins.iter().any(|p| p.type_id() == TypeId::of::<P>())
    }

    /// Queues a component type for the component scan.
    pub fn add_component_type(&mut self, component: ComponentType) {
        self.component_types.push(component);
    }

    /// Queues a catalog for the component scan.
    pub fn add_catalog(&mut self, catalog: impl ComponentCatalog + 'static) {
        self.catalogs.push(Arc::new(catalog));
    }

    /// Registers a code page served at `path`.
    pub fn add_code_page<T: CodePage + Default + 'static>(&mut self, path: &str) -> bool {
        self.scan_type(ComponentType::code_page::<T>(path))
    }

    /// Classifies and registers a component type now.
    ///
    /// Returns false if the type is abstract, has no capability or is
    /// already registered.
    pub fn scan_type(&mut self, component: ComponentType) -> bool {
        let type_id = component.type_id();
        if component.is_abstract() {
            tracing::trace!(type_name = component.type_name(), "skipping abstract type");
            return false;
        }

        let registered = match component.capability() {
            Capability::MethodBundle(factory) => {
                if self.has_methods_id(type_id) {
                    false
                } else {
                    let methods = factory(&self.container);
                    self.push_methods(methods, false);
                    true
                }
            }
            Capability::Block(factory) => {
                if self.has_block_id(type_id) {
                    false
                } else {
                    let block = factory(&self.container);
                    self.push_block(block);
                    true
                }
            }
            Capability::CodePage { path, factory } => {
                if self.scanned.contains(&type_id) {
                    false
                } else {
                    self.push_code_page(path, type_id, component.type_name(), factory.clone());
                    true
                }
            }
            Capability::None => false,
        };

        if registered {
            self.scanned.insert(type_id);
            tracing::debug!(
                type_name = component.type_name(),
                kind = ?component.kind(),
                "registered component"
            );
        }
        registered
    }

    fn scan_components(&mut self) -> Result<(), ScriptError> {
        let types = std::mem::take(&mut self.component_types);
        for component in types {
            self.scan_type(component);
        }

        let catalogs = std::mem::take(&mut self.catalogs);
        for catalog in &catalogs {
            tracing::debug!(catalog = catalog.name(), "scanning catalog");
            let types = catalog
                .component_types()
                .map_err(|e| ScriptError::init(InitStage::ComponentScan, catalog.name(), e))?;
            for component in types {
                self.scan_type(component);
            }
        }
        Ok(())
    }

    fn has_methods_id(&self, type_id: TypeId) -> bool {
        self.methods.iter().any(|m| m.type_id() == type_id)
    }

    fn has_block_id(&self, type_id: TypeId) -> bool {
        self.blocks.iter().any(|b| b.type_id() == type_id)
    }

    fn push_methods(&mut self, methods: Registered<dyn ScriptMethods>, first: bool) {
        self.container.insert_singleton(methods.type_id(), methods.as_any());
        if first {
            self.methods.insert(0, methods);
        } else {
            self.methods.push(methods);
        }
    }

    fn push_block(&mut self, block: Registered<dyn ScriptBlock>) {
        self.container.insert_singleton(block.type_id(), block.as_any());
        self.blocks.push(block);
    }

    fn push_code_page(
        &mut self,
        virtual_path: &str,
        type_id: TypeId,
        type_name: &'static str,
        factory: CodePageFactory,
    ) {
        let lookup_path = code_page_key(virtual_path, &self.config.index_page);
        self.container
            .register_transient_keyed(type_id, move |c: &Container| -> Box<dyn CodePage> { factory(c) });

        let entry = CodePageEntry {
            lookup_path: lookup_path.clone(),
            type_id,
            type_name,
        };
        if let Some(previous) = self.code_pages.insert(lookup_path, entry) {
            tracing::debug!(
                path = %previous.lookup_path,
                replaced = previous.type_name,
                by = type_name,
                "code page path registered twice"
            );
        }
    }
}

impl fmt::Debug for ContextSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSetup")
            .field("plugins", &self.plugins)
            .field("methods", &self.methods)
            .field("blocks", &self.blocks)
            .field("code_pages", &self.code_pages.len())
            .finish_non_exhaustive()
    }
}

/// Normalized lookup key of a code page: no extension, index fallback applied.
pub(crate) fn code_page_key(virtual_path: &str, index_page: &str) -> String {
    let normalized = path::normalize(virtual_path);
    let with_index = if normalized.is_empty() || normalized.ends_with('/') {
        format!("{}{}", normalized, index_page)
    } else {
        normalized
    };
    path::strip_extension(&with_index).to_string()
}
