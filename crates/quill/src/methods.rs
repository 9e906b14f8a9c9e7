//! Method bundles and blocks: the names templates can call.
//!
//! A [`ScriptMethods`] bundle contributes named functions to a
//! [`MethodTable`]. A [`ScriptBlock`] is a named construct that wraps a
//! rendered body. Both are singletons shared by every request and may carry a
//! [`ContextRef`] that the runtime binds once during initialization.
//!
//! ```rust
//! use std::sync::Arc;
//! use minijinja::Value;
//! use quill::{MethodTable, ScriptMethods};
//!
//! struct MathScripts;
//!
//! impl ScriptMethods for MathScripts {
//!     fn register(self: Arc<Self>, table: &mut MethodTable) {
//!         table.add("double", |args| {
//!             let n = args.first().and_then(|v| i64::try_from(v.clone()).ok()).unwrap_or(0);
//!             Ok(Value::from(n * 2))
//!         });
//!     }
//! }
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use minijinja::{Error, Value};
use once_cell::sync::OnceCell;

use crate::page::PageRegistry;
use crate::plugin::ScriptPlugin;
use crate::runtime::ScriptRuntime;

/// A callable exposed to templates.
pub type ScriptFn = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

/// Collects the functions a bundle contributes.
#[derive(Default)]
pub struct MethodTable {
    entries: Vec<(String, ScriptFn)>,
}

impl MethodTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function under `name`.
    pub fn add<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(f)));
        self
    }

    /// Function names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Number of functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no function was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, ScriptFn)> {
        self.entries
    }
}

/// A bundle of template functions.
pub trait ScriptMethods: Send + Sync + 'static {
    /// Adds this bundle's functions to `table`.
    fn register(self: Arc<Self>, table: &mut MethodTable);

    /// Back-reference bound by the runtime, if the bundle wants one.
    fn context_ref(&self) -> Option<&ContextRef> {
        None
    }
}

/// A named construct that transforms a rendered body.
///
/// In templates a block is applied as a filter section:
///
/// ```text
/// {% filter wrap("section", "intro") %}Hello{% endfilter %}
/// ```
pub trait ScriptBlock: Send + Sync + 'static {
    /// Name templates use to invoke the block.
    fn name(&self) -> &str;

    /// Produces the block output from its rendered `body` and arguments.
    fn write(&self, body: &str, args: &[Value]) -> Result<String, Error>;

    /// Back-reference bound by the runtime, if the block wants one.
    fn context_ref(&self) -> Option<&ContextRef> {
        None
    }
}

/// Back-references from a method bundle or block to the runtime serving it.
///
/// Each half is written at most once. Whatever is bound first, by the runtime
/// or by the caller before `init()`, stays.
#[derive(Default)]
pub struct ContextRef {
    runtime: OnceCell<Weak<ScriptRuntime>>,
    pages: OnceCell<Arc<PageRegistry>>,
}

impl ContextRef {
    /// Creates an unbound reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds both halves that are still empty. Returns true if anything was
    /// bound.
    pub fn bind(&self, runtime: Weak<ScriptRuntime>, pages: Arc<PageRegistry>) -> bool {
        let runtime_bound = self.runtime.set(runtime).is_ok();
        let pages_bound = self.pages.set(pages).is_ok();
        runtime_bound || pages_bound
    }

    /// Binds the page registry if not already bound.
    pub fn bind_pages(&self, pages: Arc<PageRegistry>) -> bool {
        self.pages.set(pages).is_ok()
    }

    /// The runtime, while it is alive.
    pub fn runtime(&self) -> Option<Arc<ScriptRuntime>> {
        self.runtime.get().and_then(Weak::upgrade)
    }

    /// The page registry.
    pub fn pages(&self) -> Option<&Arc<PageRegistry>> {
        self.pages.get()
    }

    /// Returns true once both halves are bound.
    pub fn is_bound(&self) -> bool {
        self.runtime.get().is_some() && self.pages.get().is_some()
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("runtime", &self.runtime.get().is_some())
            .field("pages", &self.pages.get().is_some())
            .finish()
    }
}

/// A registered instance together with its concrete type.
///
/// Type identity is what makes registration idempotent: the same concrete
/// type is never registered twice by a scan.
pub struct Registered<T: ?Sized> {
    type_id: TypeId,
    type_name: &'static str,
    instance: Arc<T>,
    any: Arc<dyn Any + Send + Sync>,
}

impl<T: ?Sized> Registered<T> {
    /// Concrete type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The shared instance.
    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    pub(crate) fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.any.clone()
    }
}

impl Registered<dyn ScriptMethods> {
    /// Wraps a method bundle.
    pub fn methods<M: ScriptMethods>(instance: Arc<M>) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            any: instance.clone(),
            instance,
        }
    }
}

impl Registered<dyn ScriptBlock> {
    /// Wraps a block.
    pub fn block<B: ScriptBlock>(instance: Arc<B>) -> Self {
        Self {
            type_id: TypeId::of::<B>(),
            type_name: type_name::<B>(),
            any: instance.clone(),
            instance,
        }
    }
}

impl Registered<dyn ScriptPlugin> {
    /// Wraps a plugin.
    pub fn plugin<P: ScriptPlugin>(instance: Arc<P>) -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: type_name::<P>(),
            any: instance.clone(),
            instance,
        }
    }
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            instance: self.instance.clone(),
            any: self.any.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registered").field(&self.type_name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageSettings;
    use crate::ScriptConfig;
    use quill_vfs::MemoryFiles;

    struct Greetings;

    impl ScriptMethods for Greetings {
        fn register(self: Arc<Self>, table: &mut MethodTable) {
            table
                .add("hello", |_| Ok(Value::from("hello")))
                .add("bye", |_| Ok(Value::from("bye")));
        }
    }

    fn registry() -> Arc<PageRegistry> {
        let settings = PageSettings::from(&ScriptConfig::default());
        Arc::new(PageRegistry::new(Arc::new(MemoryFiles::new()), settings).unwrap())
    }

    #[test]
    fn table_keeps_insertion_order() {
        let mut table = MethodTable::new();
        Arc::new(Greetings).register(&mut table);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["hello", "bye"]);
    }

    #[test]
    fn context_ref_first_write_wins() {
        let context = ContextRef::new();
        let first = registry();
        let second = registry();

        assert!(context.bind_pages(first.clone()));
        assert!(context.bind(Weak::new(), second));
        assert!(Arc::ptr_eq(context.pages().unwrap(), &first));
        assert!(!context.bind(Weak::new(), registry()));
        assert!(context.is_bound());
        assert!(context.runtime().is_none());
    }

    #[test]
    fn registered_tracks_concrete_type() {
        let registered = Registered::methods(Arc::new(Greetings));
        assert_eq!(registered.type_id(), TypeId::of::<Greetings>());
        assert!(registered.type_name().ends_with("Greetings"));
        assert!(registered.as_any().downcast::<Greetings>().is_ok());
    }
}
