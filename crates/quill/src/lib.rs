//! Page runtime for server-side scripting.
//!
//! `quill` locates pages, wires up the functions and blocks templates can
//! call, and hands pages to a renderer. It is built in two phases:
//!
//! - **Configuration**: a [`ScriptContext`] collects config, a file provider,
//!   plugins, method bundles, blocks and component types.
//! - **Serving**: [`ScriptContext::init`] runs the plugin pipeline once and
//!   produces an immutable, thread-safe [`ScriptRuntime`].
//!
//! # Features
//!
//! - **Page resolution**: nearest-ancestor lookup with index fallback, code
//!   pages ahead of static pages, and cached path mappings outside debug mode
//! - **Plugins**: `before_register` / `register` / `after_register` phases
//! - **Components**: explicit method bundle, block and code page types,
//!   optionally grouped in catalogs, registered once per concrete type
//! - **Container**: singletons and per-request transients keyed by type
//! - **Caches**: `DashMap`-backed concurrent maps for memoized values, parsed
//!   expressions, expiring entries and compiled assignments
//! - **Rendering**: a MiniJinja renderer with layouts and front matter
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use quill::{MiniJinjaRenderer, ScriptContext};
//! use quill_vfs::MemoryFiles;
//! use serde_json::json;
//!
//! let files = MemoryFiles::new()
//!     .with_file("blog/_layout.html", "<article>{{ page }}</article>")
//!     .with_file("blog/post.html", "---\ntitle: First\n---\n<h1>{{ title }}</h1>")
//!     .with_file("blog/2024/index.html", "{{ pad_left(7, 3, '0') }}");
//!
//! let runtime = ScriptContext::new(Arc::new(files)).init().unwrap();
//! let renderer = MiniJinjaRenderer::new(runtime.clone());
//!
//! // "post" is found by walking up from blog/2024/.
//! let html = renderer.render_path("blog/2024/", "post", &json!(null)).unwrap();
//! assert_eq!(html, "<article><h1>First</h1></article>");
//! ```

pub mod assign;
pub mod cache;
mod component;
mod config;
mod container;
mod context;
mod defaults;
mod error;
mod methods;
pub mod page;
mod plugin;
mod render;
mod runtime;

pub use component::{
    BlockFactory, Capability, ComponentCatalog, ComponentKind, ComponentType, MethodsFactory,
    StaticCatalog,
};
pub use config::{ConfigError, ScriptConfig};
pub use container::Container;
pub use context::{
    AfterPluginsFn, ContextHandle, ContextSetup, ContextState, ScriptContext, UnhandledExpressionFn,
};
pub use defaults::{CollapseBlock, DefaultBlocksPlugin, DefaultScripts, WrapBlock};
pub use error::{InitStage, ScriptError};
pub use methods::{ContextRef, MethodTable, Registered, ScriptBlock, ScriptFn, ScriptMethods};
pub use page::{
    CodePage, CodePageEntry, CodePageFactory, CodePageRequest, Page, PageFormat, PageRegistry,
    PageSettings,
};
pub use plugin::ScriptPlugin;
pub use render::{register_methods, MiniJinjaRenderer, PageRenderer, PAGE_VAR};
pub use runtime::{ResolvedPage, ScriptRuntime};

// Re-export so downstream crates can build providers without a direct dependency.
pub use quill_vfs;
