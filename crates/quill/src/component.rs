//! Component types and catalogs.
//!
//! Components are described explicitly instead of being discovered by
//! reflection. A [`ComponentType`] names a concrete Rust type and what it can
//! do; a [`ComponentCatalog`] enumerates component types, for example all
//! pages of a feature module.
//!
//! During `init()` every registered component type and every type listed by a
//! catalog is classified by its [`Capability`]. Method bundles and blocks are
//! instantiated once and registered as container singletons; code pages are
//! registered as transient factories. Abstract types and types without a
//! capability are skipped.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::methods::{Registered, ScriptBlock, ScriptMethods};
use crate::page::{CodePage, CodePageFactory};

/// Builds a method bundle instance.
pub type MethodsFactory = Arc<dyn Fn(&Container) -> Registered<dyn ScriptMethods> + Send + Sync>;

/// Builds a block instance.
pub type BlockFactory = Arc<dyn Fn(&Container) -> Registered<dyn ScriptBlock> + Send + Sync>;

/// What a component type contributes.
#[derive(Clone)]
pub enum Capability {
    /// A bundle of template functions.
    MethodBundle(MethodsFactory),
    /// A template block.
    Block(BlockFactory),
    /// A page implemented in code, served at `path`.
    CodePage {
        /// Virtual path the page answers to. The extension is ignored.
        path: String,
        /// Builds a fresh instance per request.
        factory: CodePageFactory,
    },
    /// Nothing the runtime registers.
    None,
}

/// Classification of a [`Capability`], without its factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// See [`Capability::MethodBundle`].
    MethodBundle,
    /// See [`Capability::Block`].
    Block,
    /// See [`Capability::CodePage`].
    CodePage,
    /// See [`Capability::None`].
    None,
}

/// A concrete type offered for registration.
#[derive(Clone)]
pub struct ComponentType {
    type_id: TypeId,
    type_name: &'static str,
    is_abstract: bool,
    capability: Capability,
}

impl ComponentType {
    /// A method bundle built with `Default`.
    pub fn method_bundle<T: ScriptMethods + Default>() -> Self {
        Self::method_bundle_with(|_| T::default())
    }

    /// A method bundle built from container services.
    pub fn method_bundle_with<T, F>(factory: F) -> Self
    where
        T: ScriptMethods,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        let build: MethodsFactory =
            Arc::new(move |c: &Container| Registered::methods(Arc::new(factory(c))));
        Self::new::<T>(Capability::MethodBundle(build))
    }

    /// A block built with `Default`.
    pub fn block<T: ScriptBlock + Default>() -> Self {
        Self::block_with(|_| T::default())
    }

    /// A block built from container services.
    pub fn block_with<T, F>(factory: F) -> Self
    where
        T: ScriptBlock,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        let build: BlockFactory =
            Arc::new(move |c: &Container| Registered::block(Arc::new(factory(c))));
        Self::new::<T>(Capability::Block(build))
    }

    /// A code page built with `Default`, served at `path`.
    pub fn code_page<T: CodePage + Default + 'static>(path: impl Into<String>) -> Self {
        Self::code_page_with(path, |_| T::default())
    }

    /// A code page built from container services, served at `path`.
    pub fn code_page_with<T, F>(path: impl Into<String>, factory: F) -> Self
    where
        T: CodePage + 'static,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        let build: CodePageFactory =
            Arc::new(move |c: &Container| -> Box<dyn CodePage> { Box::new(factory(c)) });
        Self::new::<T>(Capability::CodePage {
            path: path.into(),
            factory: build,
        })
    }

    /// A type with no capability. Scanning it registers nothing.
    pub fn other<T: Any>() -> Self {
        Self::new::<T>(Capability::None)
    }

    fn new<T: Any>(capability: Capability) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            is_abstract: false,
            capability,
        }
    }

    /// Marks the type abstract: it is listed but never instantiated.
    pub fn into_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Concrete type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true for abstract types.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// What the type contributes.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// The capability's classification.
    pub fn kind(&self) -> ComponentKind {
        match self.capability {
            Capability::MethodBundle(_) => ComponentKind::MethodBundle,
            Capability::Block(_) => ComponentKind::Block,
            Capability::CodePage { .. } => ComponentKind::CodePage,
            Capability::None => ComponentKind::None,
        }
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind())
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}

/// A source of component types scanned during `init()`.
pub trait ComponentCatalog: Send + Sync {
    /// Name used in logs and initialization errors.
    fn name(&self) -> &str;

    /// Enumerates the catalog's component types.
    fn component_types(&self) -> anyhow::Result<Vec<ComponentType>>;
}

/// A catalog over a fixed list of component types.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    name: String,
    types: Vec<ComponentType>,
}

impl StaticCatalog {
    /// Creates an empty catalog.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// Adds a component type.
    pub fn with(mut self, component: ComponentType) -> Self {
        self.types.push(component);
        self
    }
}

impl ComponentCatalog for StaticCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn component_types(&self) -> anyhow::Result<Vec<ComponentType>> {
        Ok(self.types.clone())
    }
}
