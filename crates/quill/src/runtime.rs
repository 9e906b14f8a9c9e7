//! The serving half of a context.
//!
//! A [`ScriptRuntime`] is built once by [`ScriptContext::init`](crate::ScriptContext::init)
//! and shared as `Arc`. Its registries never change after construction; its
//! caches and path mappings are concurrent maps, so every method takes `&self`
//! and is safe to call from any number of threads.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minijinja::Value;
use quill_vfs::path;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::assign::{compile_cached, CompiledAssign};
use crate::cache::{ConcurrentMap, ScriptCaches};
use crate::config::ScriptConfig;
use crate::container::Container;
use crate::context::{code_page_key, ContextSetup, UnhandledExpressionFn};
use crate::error::ScriptError;
use crate::methods::{MethodTable, Registered, ScriptBlock, ScriptFn, ScriptMethods};
use crate::page::{CodePage, CodePageEntry, Page, PageRegistry};
use crate::plugin::ScriptPlugin;

/// Path-mapping prefix used by page resolution.
const RESOLVE_PREFIX: &str = "resolve";

/// The outcome of a successful resolution.
pub enum ResolvedPage {
    /// A page loaded from the file provider.
    Page(Arc<Page>),
    /// A fresh code page instance.
    Code {
        /// Lookup path the code page is registered under.
        virtual_path: String,
        /// The instance.
        page: Box<dyn CodePage>,
    },
}

impl ResolvedPage {
    /// Virtual path of the resolved page.
    pub fn virtual_path(&self) -> &str {
        match self {
            ResolvedPage::Page(page) => page.virtual_path(),
            ResolvedPage::Code { virtual_path, .. } => virtual_path,
        }
    }

    /// The static page, if this is one.
    pub fn as_page(&self) -> Option<&Arc<Page>> {
        match self {
            ResolvedPage::Page(page) => Some(page),
            ResolvedPage::Code { .. } => None,
        }
    }

    /// Returns true for code pages.
    pub fn is_code(&self) -> bool {
        matches!(self, ResolvedPage::Code { .. })
    }
}

impl fmt::Debug for ResolvedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedPage::Page(page) => f.debug_tuple("Page").field(&page.virtual_path()).finish(),
            ResolvedPage::Code { virtual_path, .. } => {
                f.debug_struct("Code").field("virtual_path", virtual_path).finish_non_exhaustive()
            }
        }
    }
}

/// An initialized, immutable script runtime.
pub struct ScriptRuntime {
    config: ScriptConfig,
    pages: Arc<PageRegistry>,
    plugins: Vec<Registered<dyn ScriptPlugin>>,
    method_bundles: Vec<Registered<dyn ScriptMethods>>,
    methods: BTreeMap<String, ScriptFn>,
    blocks: Vec<Registered<dyn ScriptBlock>>,
    block_index: FxHashMap<String, Arc<dyn ScriptBlock>>,
    code_pages: FxHashMap<String, CodePageEntry>,
    container: Container,
    caches: ScriptCaches,
    path_mappings: ConcurrentMap<String, String>,
    on_unhandled_expression: Option<UnhandledExpressionFn>,
}

impl ScriptRuntime {
    pub(crate) fn build(
        setup: ContextSetup,
        on_unhandled_expression: Option<UnhandledExpressionFn>,
    ) -> Arc<Self> {
        let ContextSetup {
            config,
            pages,
            container,
            handle,
            plugins,
            methods: method_bundles,
            blocks,
            code_pages,
            ..
        } = setup;

        Arc::new_cyclic(|weak| {
            let handle_bound = handle.bind(weak.clone());

            let mut bound = 0;
            for bundle in &method_bundles {
                if let Some(context) = bundle.instance().context_ref() {
                    bound += usize::from(context.bind(weak.clone(), pages.clone()));
                }
            }
            for block in &blocks {
                if let Some(context) = block.instance().context_ref() {
                    bound += usize::from(context.bind(weak.clone(), pages.clone()));
                }
            }
            tracing::debug!(bound, handle_bound, "bound context references");

            let mut block_index: FxHashMap<String, Arc<dyn ScriptBlock>> = FxHashMap::default();
            for block in &blocks {
                let instance = block.instance().clone();
                let name = instance.name().to_string();
                if let Some(previous) = block_index.insert(name.clone(), instance) {
                    tracing::debug!(
                        block = %name,
                        replaced = previous.name(),
                        by = block.type_name(),
                        "block name registered twice; last registration wins"
                    );
                }
            }

            let mut methods = BTreeMap::new();
            for bundle in &method_bundles {
                let mut table = MethodTable::new();
                bundle.instance().clone().register(&mut table);
                for (name, f) in table.into_entries() {
                    if methods.contains_key(&name) {
                        tracing::debug!(
                            method = %name,
                            bundle = bundle.type_name(),
                            "method name registered twice; first registration wins"
                        );
                    } else {
                        methods.insert(name, f);
                    }
                }
            }

            ScriptRuntime {
                config,
                pages,
                plugins,
                method_bundles,
                methods,
                blocks,
                block_index,
                code_pages,
                container,
                caches: ScriptCaches::new(),
                path_mappings: ConcurrentMap::default(),
                on_unhandled_expression,
            }
        })
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Returns true in debug mode.
    pub fn debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    /// Global arguments.
    pub fn args(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.config.args
    }

    /// The page registry.
    pub fn pages(&self) -> &Arc<PageRegistry> {
        &self.pages
    }

    /// The container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The shared caches.
    pub fn caches(&self) -> &ScriptCaches {
        &self.caches
    }

    /// Plugins in registration order.
    pub fn plugins(&self) -> &[Registered<dyn ScriptPlugin>] {
        &self.plugins
    }

    /// Method bundles in lookup order.
    pub fn method_bundles(&self) -> &[Registered<dyn ScriptMethods>] {
        &self.method_bundles
    }

    /// A template function by name.
    pub fn method(&self, name: &str) -> Option<&ScriptFn> {
        self.methods.get(name)
    }

    /// All template functions, sorted by name.
    pub fn methods(&self) -> impl Iterator<Item = (&str, &ScriptFn)> {
        self.methods.iter().map(|(name, f)| (name.as_str(), f))
    }

    /// All template function names, sorted.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// A block by name.
    pub fn block(&self, name: &str) -> Option<&Arc<dyn ScriptBlock>> {
        self.block_index.get(name)
    }

    /// Registered blocks, including ones shadowed by a later block of the
    /// same name.
    pub fn blocks(&self) -> &[Registered<dyn ScriptBlock>] {
        &self.blocks
    }

    /// Blocks reachable by name.
    pub fn indexed_blocks(&self) -> impl Iterator<Item = (&str, &Arc<dyn ScriptBlock>)> {
        self.block_index.iter().map(|(name, block)| (name.as_str(), block))
    }

    /// Lookup paths of all code pages.
    pub fn code_page_paths(&self) -> impl Iterator<Item = &str> {
        self.code_pages.keys().map(String::as_str)
    }

    /// The callback for undefined template variables.
    pub fn unhandled_expression(&self) -> Option<&UnhandledExpressionFn> {
        self.on_unhandled_expression.as_ref()
    }

    /// Loads a page by exact path.
    pub fn get_page(&self, virtual_path: &str) -> Result<Arc<Page>, ScriptError> {
        self.pages.expect_page(virtual_path)
    }

    /// Parses a page that is not backed by a file.
    pub fn one_time_page(&self, source: &str, extension: &str) -> Result<Page, ScriptError> {
        self.pages.one_time_page(source, extension)
    }

    /// Creates the code page registered at `virtual_path`, if any.
    pub fn code_page(&self, virtual_path: &str) -> Option<Box<dyn CodePage>> {
        let key = code_page_key(virtual_path, &self.config.index_page);
        let entry = self.code_pages.get(&key)?;
        let page = self.container.create_keyed::<Box<dyn CodePage>>(entry.type_id);
        if page.is_none() {
            tracing::warn!(path = %key, type_name = entry.type_name, "code page factory missing");
        }
        page
    }

    /// Resolves `requested` relative to the page at `from`.
    ///
    /// Cached mappings are tried first. A request containing a separator
    /// (`/` or `\`, including a leading one) is tried exactly first, then
    /// every ancestor directory of `from` (starting at its parent) is
    /// combined with `requested`. At each candidate a code page wins over a
    /// static page.
    pub fn try_resolve(&self, from: &str, requested: &str) -> Result<Option<ResolvedPage>, ScriptError> {
        let try_exact = requested.contains(['/', '\\']);
        let from = path::normalize(from);
        let requested = path::normalize(requested);
        let prefix = format!("{}>{}", RESOLVE_PREFIX, from);
        // "/page" and "page" resolve differently, so they map separately.
        let map_path = if try_exact && !requested.contains('/') {
            format!("/{}", requested)
        } else {
            requested.clone()
        };

        if let Some(mapped) = self.get_path_mapping(&prefix, &map_path) {
            if let Some(page) = self.pages.get_page(&mapped)? {
                if self.pages.files().file_exists(page.virtual_path()) {
                    tracing::trace!(from = %from, requested = %requested, mapped = %mapped, "path mapping hit");
                    return Ok(Some(ResolvedPage::Page(page)));
                }
                self.pages.evict(&mapped);
            }
            tracing::debug!(from = %from, requested = %requested, mapped = %mapped, "evicting stale path mapping");
            self.remove_path_mapping(&prefix, &map_path);
        }

        if try_exact {
            if let Some(found) = self.resolve_exact(&requested)? {
                return Ok(Some(found));
            }
        }

        for dir in path::ancestors(path::parent(&from)) {
            let candidate = path::combine(dir, &requested);
            if let Some(found) = self.resolve_exact(&candidate)? {
                if !found.is_code() {
                    self.set_path_mapping(&prefix, &map_path, &candidate);
                }
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Like [`try_resolve`](Self::try_resolve) but a miss is
    /// [`ScriptError::PageNotFound`].
    pub fn resolve(&self, from: &str, requested: &str) -> Result<ResolvedPage, ScriptError> {
        self.try_resolve(from, requested)?
            .ok_or_else(|| ScriptError::page_not_found(requested))
    }

    fn resolve_exact(&self, virtual_path: &str) -> Result<Option<ResolvedPage>, ScriptError> {
        if let Some(page) = self.code_page(virtual_path) {
            return Ok(Some(ResolvedPage::Code {
                virtual_path: code_page_key(virtual_path, &self.config.index_page),
                page,
            }));
        }
        Ok(self.pages.get_page(virtual_path)?.map(ResolvedPage::Page))
    }

    /// Returns the mapped path for `map_path` under `prefix`. Always `None`
    /// in debug mode.
    pub fn get_path_mapping(&self, prefix: &str, map_path: &str) -> Option<String> {
        if self.debug_mode() {
            return None;
        }
        self.path_mappings
            .get(&mapping_key(prefix, map_path))
            .map(|entry| entry.value().clone())
    }

    /// Records a mapping. Ignored in debug mode and when `mapped` equals
    /// `map_path`.
    pub fn set_path_mapping(&self, prefix: &str, map_path: &str, mapped: &str) {
        if self.debug_mode() || map_path == mapped {
            return;
        }
        self.path_mappings
            .insert(mapping_key(prefix, map_path), mapped.to_string());
    }

    /// Removes a mapping.
    pub fn remove_path_mapping(&self, prefix: &str, map_path: &str) {
        self.path_mappings.remove(&mapping_key(prefix, map_path));
    }

    /// Number of recorded path mappings.
    pub fn path_mapping_count(&self) -> usize {
        self.path_mappings.len()
    }

    /// The compiled setter for `(type_name, expression)`, cached per key.
    pub fn compile_assign(
        &self,
        type_name: &str,
        expression: &str,
    ) -> Result<Arc<CompiledAssign>, ScriptError> {
        compile_cached(&self.caches, type_name, expression)
    }

    /// Assigns `value` at `expression` inside `target`.
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use quill::ScriptContext;
    /// # use quill_vfs::MemoryFiles;
    /// #[derive(serde::Serialize, serde::Deserialize, Default)]
    /// struct Order { customer: Customer }
    /// #[derive(serde::Serialize, serde::Deserialize, Default)]
    /// struct Customer { name: String }
    ///
    /// let runtime = ScriptContext::new(Arc::new(MemoryFiles::new())).init().unwrap();
    /// let mut order = Order::default();
    /// runtime.assign(&mut order, "customer.name", "Ada").unwrap();
    /// assert_eq!(order.customer.name, "Ada");
    /// ```
    pub fn assign<T, V>(&self, target: &mut T, expression: &str, value: V) -> Result<(), ScriptError>
    where
        T: Serialize + DeserializeOwned,
        V: Serialize,
    {
        let compiled = self.compile_assign(type_name::<T>(), expression)?;
        let assign_error = |message: String| ScriptError::Assign {
            expression: expression.to_string(),
            message,
        };

        let mut json = serde_json::to_value(&*target).map_err(|e| assign_error(e.to_string()))?;
        let value = serde_json::to_value(value).map_err(|e| assign_error(e.to_string()))?;
        compiled.apply(&mut json, value)?;
        *target = serde_json::from_value(json).map_err(|e| assign_error(e.to_string()))?;
        Ok(())
    }

    /// Reads a memoized value from the object cache, computing it on a miss.
    ///
    /// `make` runs without any lock held. Two callers racing on one key may
    /// both compute it; the later insert wins.
    pub fn cached(&self, key: &str, make: impl FnOnce() -> Value) -> Value {
        if let Some(value) = self.caches.object(key) {
            return value;
        }
        let value = make();
        self.caches.objects().insert(key.to_string(), value.clone());
        value
    }

    /// Drops container singletons and runs dispose callbacks.
    pub fn dispose(&self) {
        self.container.dispose();
        self.caches.clear();
        self.path_mappings.clear();
    }
}

fn mapping_key(prefix: &str, map_path: &str) -> String {
    format!("{}>{}", prefix, map_path)
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("debug_mode", &self.config.debug_mode)
            .field("pages", &self.pages)
            .field("plugins", &self.plugins)
            .field("methods", &self.methods.len())
            .field("blocks", &self.block_index.len())
            .field("code_pages", &self.code_pages.len())
            .finish_non_exhaustive()
    }
}
