//! Code pages: pages rendered by Rust code.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::runtime::ScriptRuntime;

/// What a code page receives when rendered.
pub struct CodePageRequest<'a> {
    /// Lookup path the code page was found under.
    pub virtual_path: &'a str,
    /// Arguments passed by the caller.
    pub args: &'a serde_json::Value,
    /// The runtime serving the request.
    pub runtime: &'a ScriptRuntime,
}

/// A page implemented in code.
///
/// A fresh instance is created from the container for every resolution, so
/// implementations may keep per-request state in `&mut self`.
///
/// ```rust
/// use quill::{CodePage, CodePageRequest};
///
/// #[derive(Default)]
/// struct Health;
///
/// impl CodePage for Health {
///     fn render(&mut self, _req: &CodePageRequest<'_>) -> anyhow::Result<String> {
///         Ok("ok".to_string())
///     }
/// }
/// ```
pub trait CodePage: Send {
    /// Renders the page.
    fn render(&mut self, request: &CodePageRequest<'_>) -> anyhow::Result<String>;
}

/// Factory producing a code page instance.
pub type CodePageFactory = Arc<dyn Fn(&Container) -> Box<dyn CodePage> + Send + Sync>;

/// A code page known to the runtime.
#[derive(Clone, PartialEq, Eq)]
pub struct CodePageEntry {
    /// Normalized lookup path (no extension).
    pub lookup_path: String,
    /// Concrete type, used as the container key.
    pub type_id: TypeId,
    /// Concrete type name, for diagnostics.
    pub type_name: &'static str,
}

impl fmt::Debug for CodePageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodePageEntry")
            .field("lookup_path", &self.lookup_path)
            .field("type_name", &self.type_name)
            .finish()
    }
}
