//! Page registry: virtual path → cached [`Page`].
//!
//! # Lookup
//!
//! A lookup path is normalized first:
//!
//! 1. `\` becomes `/`, leading separators are dropped
//! 2. an empty path or one ending in `/` gets the index page name appended
//! 3. a trailing extension naming a known format selects that format only;
//!    otherwise every format is tried in configured order
//!
//! # Freshness
//!
//! Loaded pages are cached. Outside debug mode a cached page is trusted until
//! the optional `check_modified_after` interval passes; in debug mode it is
//! checked against the file provider on every lookup. A check reloads changed
//! files and evicts deleted ones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quill_vfs::{path, VirtualFile, VirtualFiles};

use super::{Page, PageFormat};
use crate::cache::ConcurrentMap;
use crate::config::ScriptConfig;
use crate::error::ScriptError;

/// Settings the registry needs from the context configuration.
#[derive(Debug, Clone)]
pub struct PageSettings {
    /// Formats in lookup priority order. Never empty.
    pub formats: Vec<PageFormat>,
    /// Index page name.
    pub index_page: String,
    /// Default layout page name.
    pub default_layout: String,
    /// Check cached pages on every lookup.
    pub debug_mode: bool,
    /// Check cached pages after this interval outside debug mode.
    pub check_modified_after: Option<Duration>,
}

impl From<&ScriptConfig> for PageSettings {
    fn from(config: &ScriptConfig) -> Self {
        Self {
            formats: config.page_formats.clone(),
            index_page: config.index_page.clone(),
            default_layout: config.default_layout.clone(),
            debug_mode: config.debug_mode,
            check_modified_after: config.check_modified_after(),
        }
    }
}

struct PageEntry {
    page: Arc<Page>,
    checked_at: Mutex<Instant>,
}

/// Resolves virtual paths to pages, caching what it loads.
pub struct PageRegistry {
    files: Arc<dyn VirtualFiles>,
    settings: PageSettings,
    pages: ConcurrentMap<String, Arc<PageEntry>>,
    lookups: AtomicUsize,
    loads: AtomicUsize,
}

impl PageRegistry {
    /// Creates a registry over `files`.
    ///
    /// Fails with [`ScriptError::NoPageFormats`] if `settings.formats` is empty.
    pub fn new(files: Arc<dyn VirtualFiles>, settings: PageSettings) -> Result<Self, ScriptError> {
        if settings.formats.is_empty() {
            return Err(ScriptError::NoPageFormats);
        }
        Ok(Self {
            files,
            settings,
            pages: ConcurrentMap::default(),
            lookups: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        })
    }

    /// The underlying file provider.
    pub fn files(&self) -> &Arc<dyn VirtualFiles> {
        &self.files
    }

    /// Registry settings.
    pub fn settings(&self) -> &PageSettings {
        &self.settings
    }

    /// Configured formats.
    pub fn formats(&self) -> &[PageFormat] {
        &self.settings.formats
    }

    /// Finds the format registered for an extension.
    pub fn format_for_extension(&self, extension: &str) -> Option<&PageFormat> {
        let extension = extension.trim_start_matches('.');
        self.settings
            .formats
            .iter()
            .find(|f| f.extension.eq_ignore_ascii_case(extension))
    }

    /// Normalizes a path and applies the index-page fallback.
    ///
    /// The extension, if any, is kept.
    pub fn lookup_path(&self, virtual_path: &str) -> String {
        let normalized = path::normalize(virtual_path);
        if normalized.is_empty() || normalized.ends_with('/') {
            format!("{}{}", normalized, self.settings.index_page)
        } else {
            normalized
        }
    }

    /// Number of [`get_page`](Self::get_page) calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of pages read and parsed from the file provider so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of cached pages.
    pub fn cached_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the page at `virtual_path`, loading it on first use.
    ///
    /// `Ok(None)` means no file exists for any candidate format.
    pub fn get_page(&self, virtual_path: &str) -> Result<Option<Arc<Page>>, ScriptError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let key = self.lookup_path(virtual_path);

        let cached = self.pages.get(&key).map(|entry| entry.value().clone());
        if let Some(entry) = cached {
            if !self.needs_check(&entry) {
                return Ok(Some(entry.page.clone()));
            }
            match self.files.get_file(entry.page.virtual_path()) {
                Some(file) if Some(file.last_modified) == entry.page.last_modified() => {
                    *entry.checked_at.lock() = Instant::now();
                    return Ok(Some(entry.page.clone()));
                }
                Some(file) => {
                    tracing::debug!(path = %file.virtual_path, "page modified, reloading");
                    let format = entry.page.format().clone();
                    return self.load(key, file, format).map(Some);
                }
                None => {
                    tracing::debug!(path = %entry.page.virtual_path(), "page removed, evicting");
                    self.pages.remove(&key);
                }
            }
        }

        let explicit = path::extension(&key).and_then(|ext| self.format_for_extension(ext));
        match explicit {
            Some(format) => {
                if let Some(file) = self.files.get_file(&key) {
                    return self.load(key, file, format.clone()).map(Some);
                }
            }
            None => {
                for format in &self.settings.formats {
                    let candidate = format!("{}.{}", key, format.extension);
                    if let Some(file) = self.files.get_file(&candidate) {
                        return self.load(key, file, format.clone()).map(Some);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Like [`get_page`](Self::get_page) but missing pages are an error.
    pub fn expect_page(&self, virtual_path: &str) -> Result<Arc<Page>, ScriptError> {
        self.get_page(virtual_path)?
            .ok_or_else(|| ScriptError::page_not_found(virtual_path))
    }

    /// Parses page source that is not backed by a file and never cached.
    pub fn one_time_page(&self, source: &str, extension: &str) -> Result<Page, ScriptError> {
        let format = self.format_for_extension(extension).ok_or_else(|| {
            ScriptError::invalid_argument("extension", format!("unknown page format `{}`", extension))
        })?;
        Page::one_time(source, format.clone())
    }

    /// Finds the layout for `page`, searching the page's directory and then
    /// each ancestor directory.
    ///
    /// The layout name is `name`, else the page's `layout` arg, else the
    /// configured default. A name of `none` disables layouts. A layout never
    /// resolves to the page itself.
    pub fn resolve_layout(
        &self,
        page: &Page,
        name: Option<&str>,
    ) -> Result<Option<Arc<Page>>, ScriptError> {
        let name = name
            .or_else(|| page.layout())
            .unwrap_or(&self.settings.default_layout);
        if name.is_empty() || name == "none" {
            return Ok(None);
        }

        for dir in path::ancestors(page.directory()) {
            let candidate = path::combine(dir, name);
            if let Some(layout) = self.get_page(&candidate)? {
                if layout.virtual_path() != page.virtual_path() {
                    return Ok(Some(layout));
                }
            }
        }
        Ok(None)
    }

    /// Drops cached entries for a path. Returns the number removed.
    pub fn evict(&self, virtual_path: &str) -> usize {
        let key = self.lookup_path(virtual_path);
        let before = self.pages.len();
        self.pages
            .retain(|k, entry| k != &key && entry.page.virtual_path() != key);
        let removed = before.saturating_sub(self.pages.len());
        if removed > 0 {
            tracing::debug!(path = %key, removed, "evicted cached pages");
        }
        removed
    }

    /// Drops every cached page.
    pub fn clear(&self) {
        self.pages.clear();
    }

    fn needs_check(&self, entry: &PageEntry) -> bool {
        if self.settings.debug_mode {
            return true;
        }
        match self.settings.check_modified_after {
            Some(interval) => entry.checked_at.lock().elapsed() >= interval,
            None => false,
        }
    }

    fn load(
        &self,
        key: String,
        file: VirtualFile,
        format: PageFormat,
    ) -> Result<Arc<Page>, ScriptError> {
        let source = self.files.read_to_string(&file)?;
        let page = Arc::new(Page::parse(
            file.virtual_path.clone(),
            format,
            &source,
            Some(file.last_modified),
        )?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(path = %file.virtual_path, "page loaded");

        self.pages.insert(
            key,
            Arc::new(PageEntry {
                page: page.clone(),
                checked_at: Mutex::new(Instant::now()),
            }),
        );
        Ok(page)
    }
}

impl std::fmt::Debug for PageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRegistry")
            .field("settings", &self.settings)
            .field("cached", &self.pages.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_vfs::MemoryFiles;

    fn settings() -> PageSettings {
        PageSettings::from(&ScriptConfig::default())
    }

    fn registry(files: Arc<MemoryFiles>) -> PageRegistry {
        PageRegistry::new(files, settings()).unwrap()
    }

    #[test]
    fn empty_formats_rejected() {
        let mut settings = settings();
        settings.formats.clear();
        let result = PageRegistry::new(Arc::new(MemoryFiles::new()), settings);
        assert!(matches!(result, Err(ScriptError::NoPageFormats)));
    }

    #[test]
    fn formats_tried_in_order() {
        let files = Arc::new(
            MemoryFiles::new()
                .with_file("about.txt", "text")
                .with_file("about.html", "html"),
        );
        let pages = registry(files);

        let page = pages.get_page("about").unwrap().unwrap();
        assert_eq!(page.virtual_path(), "about.html");

        let text = pages.get_page("about.txt").unwrap().unwrap();
        assert_eq!(text.body(), "text");
    }

    #[test]
    fn unknown_extension_is_part_of_name() {
        let files = Arc::new(MemoryFiles::new().with_file("v1.2.html", "versioned"));
        let pages = registry(files);
        assert_eq!(pages.get_page("v1.2").unwrap().unwrap().body(), "versioned");
    }

    #[test]
    fn index_page_fallback() {
        let files = Arc::new(
            MemoryFiles::new()
                .with_file("index.html", "root")
                .with_file("docs/index.html", "docs"),
        );
        let pages = registry(files);

        assert_eq!(pages.get_page("").unwrap().unwrap().body(), "root");
        assert_eq!(pages.get_page("/").unwrap().unwrap().body(), "root");
        assert_eq!(pages.get_page("docs/").unwrap().unwrap().body(), "docs");
        assert!(pages.get_page("docs").unwrap().is_none());
    }

    #[test]
    fn pages_are_cached_outside_debug_mode() {
        let files = Arc::new(MemoryFiles::new().with_file("a.html", "one"));
        let pages = registry(files.clone());

        pages.get_page("a").unwrap();
        files.write_file("a.html", "two");
        let page = pages.get_page("a").unwrap().unwrap();

        assert_eq!(page.body(), "one");
        assert_eq!(pages.load_count(), 1);
        assert_eq!(pages.lookup_count(), 2);
    }

    #[test]
    fn debug_mode_reloads_modified_and_drops_deleted() {
        let files = Arc::new(MemoryFiles::new().with_file("a.html", "one"));
        let mut settings = settings();
        settings.debug_mode = true;
        let pages = PageRegistry::new(files.clone(), settings).unwrap();

        assert_eq!(pages.get_page("a").unwrap().unwrap().body(), "one");
        files.write_file("a.html", "two");
        assert_eq!(pages.get_page("a").unwrap().unwrap().body(), "two");

        files.delete_file("a.html");
        assert!(pages.get_page("a").unwrap().is_none());
        assert_eq!(pages.cached_count(), 0);
    }

    #[test]
    fn zero_interval_checks_every_lookup() {
        let files = Arc::new(MemoryFiles::new().with_file("a.html", "one"));
        let mut settings = settings();
        settings.check_modified_after = Some(Duration::ZERO);
        let pages = PageRegistry::new(files.clone(), settings).unwrap();

        pages.get_page("a").unwrap();
        files.write_file("a.html", "two");
        assert_eq!(pages.get_page("a").unwrap().unwrap().body(), "two");
        assert_eq!(pages.load_count(), 2);
    }

    #[test]
    fn evict_forces_reload() {
        let files = Arc::new(MemoryFiles::new().with_file("a.html", "one"));
        let pages = registry(files.clone());

        pages.get_page("a").unwrap();
        pages.get_page("a.html").unwrap();
        files.write_file("a.html", "two");

        assert_eq!(pages.evict("a.html"), 2);
        assert_eq!(pages.get_page("a").unwrap().unwrap().body(), "two");
    }

    #[test]
    fn expect_page_fails_fast() {
        let pages = registry(Arc::new(MemoryFiles::new()));
        let err = pages.expect_page("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn one_time_pages_are_not_cached() {
        let pages = registry(Arc::new(MemoryFiles::new()));
        let page = pages.one_time_page("hello", "txt").unwrap();
        assert!(page.is_one_time());
        assert_eq!(pages.cached_count(), 0);

        assert!(matches!(
            pages.one_time_page("hello", "docx"),
            Err(ScriptError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn layout_found_in_nearest_ancestor() {
        let files = Arc::new(
            MemoryFiles::new()
                .with_file("_layout.html", "root layout")
                .with_file("blog/_layout.html", "blog layout")
                .with_file("blog/2024/post.html", "post")
                .with_file("about.html", "about"),
        );
        let pages = registry(files);

        let post = pages.expect_page("blog/2024/post").unwrap();
        let layout = pages.resolve_layout(&post, None).unwrap().unwrap();
        assert_eq!(layout.virtual_path(), "blog/_layout.html");

        let about = pages.expect_page("about").unwrap();
        let layout = pages.resolve_layout(&about, None).unwrap().unwrap();
        assert_eq!(layout.virtual_path(), "_layout.html");
    }

    #[test]
    fn layout_none_and_self_reference() {
        let files = Arc::new(
            MemoryFiles::new()
                .with_file("_layout.html", "layout")
                .with_file("bare.html", "---\nlayout: none\n---\nbare"),
        );
        let pages = registry(files);

        let bare = pages.expect_page("bare").unwrap();
        assert!(pages.resolve_layout(&bare, None).unwrap().is_none());

        let layout = pages.expect_page("_layout").unwrap();
        assert!(pages.resolve_layout(&layout, None).unwrap().is_none());
    }
}
