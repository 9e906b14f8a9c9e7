//! Page rendering.
//!
//! The runtime only locates pages; a [`PageRenderer`] turns them into output.
//! [`MiniJinjaRenderer`] is the default:
//!
//! - every runtime method becomes a MiniJinja function and a filter
//! - every block becomes a filter, applied with `{% filter name(...) %}`
//! - global args, then page front matter, then call args form the context
//! - non-partial pages are wrapped in their layout, which receives the page
//!   output as `page`
//! - `.html` pages auto-escape
//! - variables nothing defines are offered to the runtime's
//!   unhandled-expression callback

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::value::Rest;
use minijinja::{Environment, Error, Value};

use crate::error::ScriptError;
use crate::page::{CodePageRequest, Page, LAYOUT_ARG};
use crate::runtime::{ResolvedPage, ScriptRuntime};
use crate::UnhandledExpressionFn;

/// Name under which a layout receives the rendered page.
pub const PAGE_VAR: &str = "page";

const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "debug", "namespace", "loop", "self"];

/// Renders resolved pages.
pub trait PageRenderer: Send + Sync {
    /// Renders `page` with call arguments `args` (a JSON object or null).
    fn render(&self, page: ResolvedPage, args: &serde_json::Value) -> Result<String, ScriptError>;
}

/// MiniJinja-backed [`PageRenderer`].
///
/// ```rust
/// use std::sync::Arc;
/// use quill::{MiniJinjaRenderer, ScriptContext};
/// use quill_vfs::MemoryFiles;
/// use serde_json::json;
///
/// let files = MemoryFiles::new()
///     .with_file("_layout.html", "<main>{{ page }}</main>")
///     .with_file("hello.html", "Hi {{ name }}");
/// let runtime = ScriptContext::new(Arc::new(files)).init().unwrap();
/// let renderer = MiniJinjaRenderer::new(runtime);
///
/// let html = renderer.render_path("", "hello", &json!({"name": "Ada"})).unwrap();
/// assert_eq!(html, "<main>Hi Ada</main>");
/// ```
pub struct MiniJinjaRenderer {
    runtime: Arc<ScriptRuntime>,
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    /// Creates a renderer exposing the runtime's methods and blocks.
    pub fn new(runtime: Arc<ScriptRuntime>) -> Self {
        let mut env = Environment::new();
        register_methods(&mut env, &runtime);
        Self { runtime, env }
    }

    /// The runtime pages are resolved from.
    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    /// The underlying MiniJinja environment.
    pub fn environment(&self) -> &Environment<'static> {
        &self.env
    }

    /// Mutable access to the environment, for registering extra filters.
    pub fn environment_mut(&mut self) -> &mut Environment<'static> {
        &mut self.env
    }

    /// Resolves `path` relative to `from` and renders it.
    pub fn render_path(
        &self,
        from: &str,
        path: &str,
        args: &serde_json::Value,
    ) -> Result<String, ScriptError> {
        let page = self.runtime.resolve(from, path)?;
        self.render(page, args)
    }

    /// Renders page source that is not backed by a file.
    pub fn render_source(
        &self,
        source: &str,
        extension: &str,
        args: &serde_json::Value,
    ) -> Result<String, ScriptError> {
        let page = self.runtime.one_time_page(source, extension)?;
        self.render_page(&page, args)
    }

    /// Renders a static page, wrapped in its layout.
    pub fn render_page(&self, page: &Page, args: &serde_json::Value) -> Result<String, ScriptError> {
        let mut ctx = self.context(page, args);
        let body = self.render_template(page, page.body(), &ctx)?;
        if page.is_one_time() || page.is_partial() {
            return Ok(body);
        }

        let layout_name = args.get(LAYOUT_ARG).and_then(|v| v.as_str());
        let Some(layout) = self.runtime.pages().resolve_layout(page, layout_name)? else {
            return Ok(body);
        };
        tracing::trace!(page = page.virtual_path(), layout = layout.virtual_path(), "applying layout");

        for (key, value) in layout.args() {
            ctx.entry(key.clone())
                .or_insert_with(|| Value::from_serialize(value));
        }
        ctx.insert(PAGE_VAR.to_string(), Value::from_safe_string(body));
        self.render_template(&layout, layout.body(), &ctx)
    }

    fn context(&self, page: &Page, args: &serde_json::Value) -> BTreeMap<String, Value> {
        let mut ctx = BTreeMap::new();
        for (key, value) in self.runtime.args() {
            ctx.insert(key.clone(), Value::from_serialize(value));
        }
        for (key, value) in page.args() {
            ctx.insert(key.clone(), Value::from_serialize(value));
        }
        match args {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    ctx.insert(key.clone(), Value::from_serialize(value));
                }
            }
            serde_json::Value::Null => {}
            other => {
                tracing::debug!(args = %other, "ignoring non-object render args");
            }
        }
        ctx
    }

    fn render_template(
        &self,
        page: &Page,
        source: &str,
        ctx: &BTreeMap<String, Value>,
    ) -> Result<String, ScriptError> {
        let name = page.template_name();
        let render_error = |source: Error| ScriptError::Render {
            path: name.clone(),
            source,
        };

        if let Some(callback) = self.runtime.unhandled_expression() {
            let supplied = self
                .unhandled_values(&name, source, ctx, callback)
                .map_err(render_error)?;
            if !supplied.is_empty() {
                let mut merged = ctx.clone();
                merged.extend(supplied);
                return self
                    .env
                    .render_named_str(&name, source, &merged)
                    .map_err(render_error);
            }
        }

        self.env
            .render_named_str(&name, source, ctx)
            .map_err(render_error)
    }

    fn unhandled_values(
        &self,
        name: &str,
        source: &str,
        ctx: &BTreeMap<String, Value>,
        callback: &UnhandledExpressionFn,
    ) -> Result<BTreeMap<String, Value>, Error> {
        let probe = Environment::new();
        let template = probe.template_from_named_str(name, source)?;

        let mut supplied = BTreeMap::new();
        for variable in template.undeclared_variables(false) {
            if ctx.contains_key(&variable)
                || self.runtime.method(&variable).is_some()
                || BUILTIN_GLOBALS.contains(&variable.as_str())
            {
                continue;
            }
            if let Some(value) = callback(&variable) {
                tracing::trace!(variable = %variable, "unhandled expression supplied");
                supplied.insert(variable, value);
            }
        }
        Ok(supplied)
    }
}

impl PageRenderer for MiniJinjaRenderer {
    fn render(&self, page: ResolvedPage, args: &serde_json::Value) -> Result<String, ScriptError> {
        match page {
            ResolvedPage::Page(page) => self.render_page(&page, args),
            ResolvedPage::Code {
                virtual_path,
                mut page,
            } => {
                let request = CodePageRequest {
                    virtual_path: &virtual_path,
                    args,
                    runtime: &self.runtime,
                };
                page.render(&request).map_err(|source| ScriptError::CodePage {
                    path: virtual_path.clone(),
                    source,
                })
            }
        }
    }
}

/// Registers a runtime's methods and blocks with a MiniJinja environment.
///
/// Called by [`MiniJinjaRenderer::new`]. Blocks are registered after
/// methods, so a block wins a filter name collision.
pub fn register_methods(env: &mut Environment<'static>, runtime: &ScriptRuntime) {
    for (name, method) in runtime.methods() {
        let function = method.clone();
        env.add_function(name.to_string(), move |args: Rest<Value>| -> Result<Value, Error> {
            function(args.0.as_slice())
        });
        let filter = method.clone();
        env.add_filter(name.to_string(), move |args: Rest<Value>| -> Result<Value, Error> {
            filter(args.0.as_slice())
        });
    }

    for (name, block) in runtime.indexed_blocks() {
        let block = block.clone();
        env.add_filter(
            name.to_string(),
            move |body: String, args: Rest<Value>| -> Result<Value, Error> {
                block
                    .write(&body, args.0.as_slice())
                    .map(Value::from_safe_string)
            },
        );
    }
}
