//! Page formats.

use serde::{Deserialize, Serialize};

/// A file extension recognized as a page, in lookup priority order.
///
/// When a page is requested without an extension, the registry tries each
/// configured format in order and the first existing file wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFormat {
    /// Extension without the dot, e.g. `"html"`.
    pub extension: String,
    /// MIME type reported for rendered output.
    pub content_type: String,
}

impl PageFormat {
    /// Creates a format.
    pub fn new(extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_string(),
            content_type: content_type.into(),
        }
    }

    /// HTML pages. Rendered with HTML auto-escaping.
    pub fn html() -> Self {
        Self::new("html", "text/html")
    }

    /// Plain-text pages.
    pub fn text() -> Self {
        Self::new("txt", "text/plain")
    }
}

/// The formats a context starts with: HTML first, then plain text.
pub fn default_formats() -> Vec<PageFormat> {
    vec![PageFormat::html(), PageFormat::text()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_strips_leading_dot() {
        assert_eq!(PageFormat::new(".md", "text/markdown").extension, "md");
    }

    #[test]
    fn html_comes_first() {
        let formats = default_formats();
        assert_eq!(formats[0], PageFormat::html());
        assert_eq!(formats.len(), 2);
    }
}
