//! Pages, code pages and the page registry.
//!
//! A [`Page`] is an immutable, parsed page source: its body plus any args
//! declared in a leading YAML front-matter block.
//!
//! ```text
//! ---
//! title: Release notes
//! layout: _wide
//! ---
//! <h1>{{ title }}</h1>
//! ```
//!
//! Pages are obtained from the [`PageRegistry`], which maps virtual paths to
//! cached pages. A [`CodePage`] is a page implemented in Rust instead of markup.

mod code;
mod format;
mod registry;

use std::collections::BTreeMap;
use std::time::SystemTime;

use quill_vfs::path;

use crate::error::ScriptError;

pub use code::{CodePage, CodePageEntry, CodePageFactory, CodePageRequest};
pub use format::{default_formats, PageFormat};
pub use registry::{PageRegistry, PageSettings};

/// Arg that selects a page's layout. `none` disables layouts.
pub const LAYOUT_ARG: &str = "layout";

/// A parsed page.
#[derive(Debug, Clone)]
pub struct Page {
    virtual_path: String,
    format: PageFormat,
    args: BTreeMap<String, serde_json::Value>,
    body: String,
    last_modified: Option<SystemTime>,
}

impl Page {
    /// Parses page source loaded from `virtual_path`.
    pub fn parse(
        virtual_path: impl Into<String>,
        format: PageFormat,
        source: &str,
        last_modified: Option<SystemTime>,
    ) -> Result<Self, ScriptError> {
        let virtual_path = virtual_path.into();
        let (args, body) = match split_front_matter(source) {
            Some((yaml, body)) => {
                let args = if yaml.trim().is_empty() {
                    BTreeMap::new()
                } else {
                    serde_yaml::from_str(yaml).map_err(|source| ScriptError::FrontMatter {
                        path: virtual_path.clone(),
                        source,
                    })?
                };
                (args, body)
            }
            None => (BTreeMap::new(), source),
        };

        Ok(Self {
            virtual_path,
            format,
            args,
            body: body.to_string(),
            last_modified,
        })
    }

    /// Parses an anonymous page that is never cached.
    pub fn one_time(source: &str, format: PageFormat) -> Result<Self, ScriptError> {
        Self::parse(String::new(), format, source, None)
    }

    /// Virtual path including extension; empty for one-time pages.
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    /// Returns true for anonymous pages created with [`Page::one_time`].
    pub fn is_one_time(&self) -> bool {
        self.virtual_path.is_empty()
    }

    /// The page's format.
    pub fn format(&self) -> &PageFormat {
        &self.format
    }

    /// Front-matter args.
    pub fn args(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.args
    }

    /// A single front-matter arg.
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.args.get(name)
    }

    /// Page body without front matter.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Modification stamp of the source file at load time.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Directory containing the page.
    pub fn directory(&self) -> &str {
        path::parent(&self.virtual_path)
    }

    /// File name without extension.
    pub fn name(&self) -> &str {
        path::strip_extension(path::file_name(&self.virtual_path))
    }

    /// Pages whose name starts with `_` (layouts, partials) never get a layout.
    pub fn is_partial(&self) -> bool {
        self.name().starts_with('_')
    }

    /// Layout named in front matter, if any.
    pub fn layout(&self) -> Option<&str> {
        self.args.get(LAYOUT_ARG).and_then(|v| v.as_str())
    }

    /// Name handed to the template engine. Carries the extension so engines
    /// can pick an escaping mode.
    pub fn template_name(&self) -> String {
        if self.is_one_time() {
            format!("one-time.{}", self.format.extension)
        } else {
            self.virtual_path.clone()
        }
    }
}

/// Splits `---`-delimited front matter from the body.
///
/// Returns `None` when the source has no complete front-matter block.
fn split_front_matter(source: &str) -> Option<(&str, &str)> {
    let rest = source
        .strip_prefix("---\n")
        .or_else(|| source.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_without_front_matter() {
        let page = Page::parse("a/page.html", PageFormat::html(), "<p>hi</p>", None).unwrap();
        assert!(page.args().is_empty());
        assert_eq!(page.body(), "<p>hi</p>");
        assert_eq!(page.directory(), "a");
        assert_eq!(page.name(), "page");
    }

    #[test]
    fn front_matter_becomes_args() {
        let source = "---\ntitle: Hello\ntags: [a, b]\nlayout: _wide\n---\n<h1>{{ title }}</h1>";
        let page = Page::parse("post.html", PageFormat::html(), source, None).unwrap();

        assert_eq!(page.arg("title"), Some(&json!("Hello")));
        assert_eq!(page.arg("tags"), Some(&json!(["a", "b"])));
        assert_eq!(page.layout(), Some("_wide"));
        assert_eq!(page.body(), "<h1>{{ title }}</h1>");
    }

    #[test]
    fn crlf_front_matter() {
        let source = "---\r\ntitle: Win\r\n---\r\nbody";
        let page = Page::parse("p.txt", PageFormat::text(), source, None).unwrap();
        assert_eq!(page.arg("title"), Some(&json!("Win")));
        assert_eq!(page.body(), "body");
    }

    #[test]
    fn unterminated_front_matter_is_body() {
        let source = "---\ntitle: x\nno closing line";
        let page = Page::parse("p.txt", PageFormat::text(), source, None).unwrap();
        assert!(page.args().is_empty());
        assert_eq!(page.body(), source);
    }

    #[test]
    fn empty_front_matter() {
        let page = Page::parse("p.txt", PageFormat::text(), "---\n---\nbody", None).unwrap();
        assert!(page.args().is_empty());
        assert_eq!(page.body(), "body");
    }

    #[test]
    fn invalid_front_matter_names_page() {
        let err = Page::parse("bad.html", PageFormat::html(), "---\n: [\n---\n", None).unwrap_err();
        assert!(matches!(err, ScriptError::FrontMatter { ref path, .. } if path == "bad.html"));
    }

    #[test]
    fn one_time_pages() {
        let page = Page::one_time("{{ x }}", PageFormat::html()).unwrap();
        assert!(page.is_one_time());
        assert_eq!(page.template_name(), "one-time.html");
    }

    #[test]
    fn partials_start_with_underscore() {
        let layout = Page::parse("_layout.html", PageFormat::html(), "", None).unwrap();
        assert!(layout.is_partial());
    }
}
