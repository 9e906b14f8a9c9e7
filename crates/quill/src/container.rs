//! A small type-keyed dependency container.
//!
//! Components discovered during initialization can ask the container for the
//! runtime's shared services (the page registry, the [`ContextHandle`](crate::ContextHandle))
//! or for anything a plugin registered.
//!
//! - Singletons are stored as `Arc<T>` and shared.
//! - Transients are factories invoked on every [`create`](Container::create).
//!   Code pages are registered as transients keyed by their concrete type.
//!
//! Registration needs `&mut self` and only happens during initialization.
//! Resolution is `&self` and safe from any thread.
//!
//! ```rust
//! use std::sync::Arc;
//! use quill::Container;
//!
//! struct Database { url: String }
//! struct RequestId(u64);
//!
//! let mut container = Container::new();
//! container.register_singleton(Arc::new(Database { url: "sqlite::memory:".into() }));
//! container.register_transient(|_| RequestId(7));
//!
//! assert_eq!(container.resolve::<Database>().unwrap().url, "sqlite::memory:");
//! assert_eq!(container.create::<RequestId>().unwrap().0, 7);
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxBuildHasher;

type Singleton = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Box<dyn Any + Send> + Send + Sync>;
type Disposer = Box<dyn FnOnce() + Send>;

/// Type-keyed registry of singletons and transient factories.
#[derive(Default)]
pub struct Container {
    singletons: RwLock<HashMap<TypeId, Singleton, FxBuildHasher>>,
    transients: HashMap<TypeId, Factory, FxBuildHasher>,
    disposers: Mutex<Vec<Disposer>>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance. Replaces any previous singleton of the same type.
    pub fn register_singleton<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.singletons.get_mut().insert(TypeId::of::<T>(), value);
    }

    pub(crate) fn insert_singleton(&mut self, key: TypeId, value: Singleton) {
        self.singletons.get_mut().insert(key, value);
    }

    /// Registers a singleton built from services already in the container.
    pub fn register_singleton_with<T, F>(&mut self, factory: F)
    where
        T: Any + Send + Sync,
        F: FnOnce(&Container) -> T,
    {
        let value = Arc::new(factory(self));
        self.register_singleton(value);
    }

    /// Registers a factory invoked on every [`create`](Self::create).
    pub fn register_transient<T, F>(&mut self, factory: F)
    where
        T: Any + Send,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        self.register_transient_keyed(TypeId::of::<T>(), factory);
    }

    /// Registers a transient factory under an explicit key.
    ///
    /// Used when many implementations share one output type, e.g. several
    /// code pages all producing `Box<dyn CodePage>`.
    pub fn register_transient_keyed<T, F>(&mut self, key: TypeId, factory: F)
    where
        T: Any + Send,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |c: &Container| -> Box<dyn Any + Send> { Box::new(factory(c)) });
        self.transients.insert(key, factory);
    }

    /// Registers a callback run once by [`dispose`](Self::dispose).
    pub fn on_dispose(&mut self, disposer: impl FnOnce() + Send + 'static) {
        self.disposers.get_mut().push(Box::new(disposer));
    }

    /// Returns the singleton of type `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let singleton = self.singletons.read().get(&TypeId::of::<T>())?.clone();
        singleton.downcast::<T>().ok()
    }

    /// Returns the singleton of type `T` or an error naming the missing type.
    pub fn resolve_required<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.resolve::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "service missing: type {} not registered in container",
                type_name::<T>()
            )
        })
    }

    /// Builds a new `T` from its transient factory.
    pub fn create<T: Any + Send>(&self) -> Option<T> {
        self.create_keyed(TypeId::of::<T>())
    }

    /// Builds a value from the transient factory registered under `key`.
    ///
    /// Returns `None` if no factory exists or it produces a different type.
    pub fn create_keyed<T: Any + Send>(&self, key: TypeId) -> Option<T> {
        let factory = self.transients.get(&key)?;
        factory(self).downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Returns true if a singleton of type `T` is registered.
    pub fn contains<T: Any>(&self) -> bool {
        self.singletons.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns true if a transient factory is registered under `key`.
    pub fn has_transient(&self, key: TypeId) -> bool {
        self.transients.contains_key(&key)
    }

    /// Drops all singletons and runs dispose callbacks. Safe to call twice.
    ///
    /// Transient factories stay registered, but anything they resolve from
    /// the container is gone.
    pub fn dispose(&self) {
        let disposers: Vec<Disposer> = std::mem::take(&mut *self.disposers.lock());
        let count = disposers.len();
        for disposer in disposers {
            disposer();
        }
        self.singletons.write().clear();
        tracing::debug!(disposers = count, "container disposed");
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("singletons", &self.singletons.read().len())
            .field("transients", &self.transients.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Config {
        name: &'static str,
    }

    #[derive(Debug, PartialEq)]
    struct Greeting(String);

    #[test]
    fn resolve_returns_same_instance() {
        let mut container = Container::new();
        container.register_singleton(Arc::new(Config { name: "site" }));

        let a = container.resolve::<Config>().unwrap();
        let b = container.resolve::<Config>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "site");
    }

    #[test]
    fn resolve_required_names_missing_type() {
        let container = Container::new();
        let err = container.resolve_required::<Config>().unwrap_err();
        assert!(err.to_string().contains("Config"));
    }

    #[test]
    fn transients_can_depend_on_singletons() {
        let mut container = Container::new();
        container.register_singleton(Arc::new(Config { name: "site" }));
        container.register_transient(|c: &Container| {
            let config = c.resolve::<Config>().unwrap();
            Greeting(format!("hello from {}", config.name))
        });

        assert_eq!(
            container.create::<Greeting>(),
            Some(Greeting("hello from site".into()))
        );
    }

    #[test]
    fn keyed_transients_share_output_type() {
        struct A;
        struct B;
        let mut container = Container::new();
        container.register_transient_keyed(TypeId::of::<A>(), |_| Greeting("a".into()));
        container.register_transient_keyed(TypeId::of::<B>(), |_| Greeting("b".into()));

        assert_eq!(
            container.create_keyed::<Greeting>(TypeId::of::<B>()),
            Some(Greeting("b".into()))
        );
        assert_eq!(container.create_keyed::<String>(TypeId::of::<A>()), None);
    }

    #[test]
    fn dispose_runs_callbacks_once_and_drops_singletons() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut container = Container::new();
        container.register_singleton(Arc::new(Config { name: "site" }));
        let counter = calls.clone();
        container.on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        container.dispose();
        container.dispose();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!container.contains::<Config>());
    }
}
