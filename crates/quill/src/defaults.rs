//! Methods and blocks every context starts with.
//!
//! [`DefaultScripts`] functions:
//!
//! | Function | Purpose |
//! |----------|---------|
//! | `to_json(value)` | serializes a value as JSON |
//! | `page_exists(path)` | true if a page exists at `path` |
//! | `cache_get(key)` | fresh expiring value, else memoized object, else undefined |
//! | `cache_set(key, value, ttl_secs?)` | stores a value, expiring if a TTL is given |
//! | `pad_left(value, width, fill?)` | left-pads to `width` characters |
//! | `join_path(a, b, ...)` | joins and normalizes virtual path segments |
//! | `is_debug()` | true in debug mode |
//!
//! Blocks, registered by [`DefaultBlocksPlugin`]:
//!
//! - `collapse`: collapses whitespace runs to single spaces and trims
//! - `wrap(tag="div", class?)`: wraps the body in an element

use std::sync::Arc;

use minijinja::{Error, ErrorKind, Value};
use quill_vfs::path;

use crate::context::ContextSetup;
use crate::methods::{ContextRef, MethodTable, ScriptBlock, ScriptMethods};
use crate::plugin::ScriptPlugin;
use crate::runtime::ScriptRuntime;

/// The default method bundle.
#[derive(Debug, Default)]
pub struct DefaultScripts {
    context: ContextRef,
}

impl DefaultScripts {
    fn runtime(&self) -> Result<Arc<ScriptRuntime>, Error> {
        self.context
            .runtime()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "script runtime is not available"))
    }

    fn page_exists(&self, args: &[Value]) -> Result<Value, Error> {
        let virtual_path = str_arg(args, 0, "path")?;
        let pages = self
            .context
            .pages()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "page registry is not available"))?;
        let found = pages
            .get_page(virtual_path)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        Ok(Value::from(found.is_some()))
    }

    fn cache_get(&self, args: &[Value]) -> Result<Value, Error> {
        let key = str_arg(args, 0, "key")?;
        let runtime = self.runtime()?;
        let caches = runtime.caches();
        Ok(caches
            .get_fresh(key)
            .or_else(|| caches.object(key))
            .unwrap_or(Value::UNDEFINED))
    }

    fn cache_set(&self, args: &[Value]) -> Result<Value, Error> {
        let key = str_arg(args, 0, "key")?;
        let value = arg(args, 1, "value")?.clone();
        let runtime = self.runtime()?;
        match args.get(2) {
            Some(ttl) if !ttl.is_undefined() && !ttl.is_none() => {
                let secs = i64::try_from(ttl.clone())?;
                runtime
                    .caches()
                    .set_expiring(key, value, chrono::Duration::seconds(secs));
            }
            _ => {
                runtime.caches().objects().insert(key.to_string(), value);
            }
        }
        Ok(Value::UNDEFINED)
    }
}

impl ScriptMethods for DefaultScripts {
    fn register(self: Arc<Self>, table: &mut MethodTable) {
        table.add("to_json", |args| {
            let value = arg(args, 0, "value")?;
            serde_json::to_string(value)
                .map(Value::from)
                .map_err(|e| Error::new(ErrorKind::BadSerialization, e.to_string()))
        });
        table.add("pad_left", |args| {
            let text = arg(args, 0, "value")?.to_string();
            let width = usize::try_from(arg(args, 1, "width")?.clone())?;
            let fill = match args.get(2).and_then(|v| v.as_str()) {
                Some(fill) => fill.chars().next().unwrap_or(' '),
                None => ' ',
            };
            Ok(Value::from(pad_left(&text, width, fill)))
        });
        table.add("join_path", |args| {
            let mut joined = String::new();
            for idx in 0..args.len() {
                joined = path::combine(&joined, str_arg(args, idx, "segment")?);
            }
            Ok(Value::from(path::normalize(&joined)))
        });

        let this = self.clone();
        table.add("page_exists", move |args| this.page_exists(args));
        let this = self.clone();
        table.add("cache_get", move |args| this.cache_get(args));
        let this = self.clone();
        table.add("cache_set", move |args| this.cache_set(args));
        let this = self;
        table.add("is_debug", move |_| Ok(Value::from(this.runtime()?.debug_mode())));
    }

    fn context_ref(&self) -> Option<&ContextRef> {
        Some(&self.context)
    }
}

fn arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a Value, Error> {
    args.get(idx)
        .filter(|v| !v.is_undefined())
        .ok_or_else(|| Error::new(ErrorKind::MissingArgument, format!("missing argument `{}`", name)))
}

fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str, Error> {
    arg(args, idx, name)?.as_str().ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("argument `{}` must be a string", name),
        )
    })
}

fn pad_left(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let mut padded: String = std::iter::repeat(fill).take(width - len).collect();
    padded.push_str(text);
    padded
}

/// Collapses whitespace runs into single spaces and trims the result.
#[derive(Debug, Default)]
pub struct CollapseBlock;

impl ScriptBlock for CollapseBlock {
    fn name(&self) -> &str {
        "collapse"
    }

    fn write(&self, body: &str, _args: &[Value]) -> Result<String, Error> {
        Ok(body.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

/// Wraps the body in an element: `wrap(tag="div", class?)`.
#[derive(Debug, Default)]
pub struct WrapBlock;

impl ScriptBlock for WrapBlock {
    fn name(&self) -> &str {
        "wrap"
    }

    fn write(&self, body: &str, args: &[Value]) -> Result<String, Error> {
        let tag = match args.first() {
            Some(tag) if !tag.is_undefined() => str_arg(args, 0, "tag")?,
            _ => "div",
        };
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid tag name `{}`", tag),
            ));
        }

        match args.get(1).and_then(|v| v.as_str()) {
            Some(class) => Ok(format!(
                "<{tag} class=\"{}\">{body}</{tag}>",
                escape_attr(class)
            )),
            None => Ok(format!("<{tag}>{body}</{tag}>")),
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Registers [`CollapseBlock`] and [`WrapBlock`] unless already present.
#[derive(Debug, Default)]
pub struct DefaultBlocksPlugin;

impl ScriptPlugin for DefaultBlocksPlugin {
    fn name(&self) -> &str {
        "default-blocks"
    }

    fn register(&self, setup: &mut ContextSetup) -> anyhow::Result<()> {
        if !setup.has_block::<CollapseBlock>() {
            setup.add_block(CollapseBlock);
        }
        if !setup.has_block::<WrapBlock>() {
            setup.add_block(WrapBlock);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_left_counts_chars() {
        assert_eq!(pad_left("7", 3, '0'), "007");
        assert_eq!(pad_left("ünï", 4, '.'), ".ünï");
        assert_eq!(pad_left("long", 2, ' '), "long");
    }

    #[test]
    fn collapse_block() {
        let out = CollapseBlock.write("  a \n\n  b\tc  ", &[]).unwrap();
        assert_eq!(out, "a b c");
    }

    #[test]
    fn wrap_block_defaults_and_escapes() {
        assert_eq!(WrapBlock.write("x", &[]).unwrap(), "<div>x</div>");
        let out = WrapBlock
            .write("x", &[Value::from("p"), Value::from("a\"b")])
            .unwrap();
        assert_eq!(out, "<p class=\"a&quot;b\">x</p>");
    }

    #[test]
    fn wrap_block_rejects_bad_tags() {
        let err = WrapBlock.write("x", &[Value::from("script onload=x")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn unbound_scripts_fail_cleanly() {
        let scripts = DefaultScripts::default();
        assert!(scripts.runtime().is_err());
        assert!(scripts.page_exists(&[Value::from("index")]).is_err());
    }
}
