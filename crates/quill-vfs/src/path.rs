//! Virtual path helpers.
//!
//! Virtual paths are always `/`-separated, relative to the provider root and
//! never start with a separator. A trailing separator is kept because it is
//! meaningful to page lookups (it selects the directory's index page).

/// Normalizes a virtual path.
///
/// - `\` becomes `/`
/// - leading separators, empty segments and `.` segments are dropped
/// - `..` pops the previous segment and never escapes the root
/// - a trailing separator is preserved when at least one segment remains
///
/// ```
/// use quill_vfs::path::normalize;
///
/// assert_eq!(normalize("/docs//guide/"), "docs/guide/");
/// assert_eq!(normalize("a\\b\\..\\c"), "a/c");
/// assert_eq!(normalize("../../etc"), "etc");
/// ```
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trailing = unified.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = segments.join("/");
    if trailing && !normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Returns the directory part of a path, or `""` for top-level entries.
///
/// ```
/// use quill_vfs::path::parent;
///
/// assert_eq!(parent("a/b/c"), "a/b");
/// assert_eq!(parent("page"), "");
/// ```
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Joins a directory and a relative path with a single separator.
pub fn combine(dir: &str, path: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if dir.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        format!("{}/", dir)
    } else {
        format!("{}/{}", dir, path)
    }
}

/// Returns the last segment of a path.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Returns the extension of the last path segment, without the dot.
///
/// Dot-files (`.env`) have no extension.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Strips the extension from the last path segment only.
///
/// ```
/// use quill_vfs::path::strip_extension;
///
/// assert_eq!(strip_extension("blog/post.html"), "blog/post");
/// assert_eq!(strip_extension("v1.2/page"), "v1.2/page");
/// ```
pub fn strip_extension(path: &str) -> &str {
    match extension(path) {
        Some(ext) => &path[..path.len() - ext.len() - 1],
        None => path,
    }
}

/// Iterates a directory and each of its ancestors, ending with the root (`""`).
///
/// ```
/// use quill_vfs::path::ancestors;
///
/// let dirs: Vec<&str> = ancestors("a/b").collect();
/// assert_eq!(dirs, vec!["a/b", "a", ""]);
/// ```
pub fn ancestors(dir: &str) -> Ancestors<'_> {
    Ancestors {
        next: Some(dir.trim_end_matches('/')),
    }
}

/// Iterator returned by [`ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current.is_empty() {
            None
        } else {
            Some(parent(current))
        };
        Some(current)
    }
}
