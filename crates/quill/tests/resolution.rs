//! Integration tests for page resolution.
//!
//! These cover the nearest-ancestor walk, exact matches for nested paths,
//! code page precedence and the path-mapping cache.

use std::sync::Arc;

use quill::{
    CodePage, CodePageRequest, ComponentType, ResolvedPage, ScriptConfig, ScriptContext,
    ScriptError, ScriptRuntime,
};
use quill_vfs::MemoryFiles;

fn runtime(files: &Arc<MemoryFiles>) -> Arc<ScriptRuntime> {
    ScriptContext::new(files.clone()).init().unwrap()
}

fn debug_runtime(files: &Arc<MemoryFiles>) -> Arc<ScriptRuntime> {
    ScriptContext::new(files.clone())
        .with_debug_mode(true)
        .init()
        .unwrap()
}

fn page_path(resolved: ResolvedPage) -> String {
    match resolved {
        ResolvedPage::Page(page) => page.virtual_path().to_string(),
        ResolvedPage::Code { virtual_path, .. } => format!("code:{}", virtual_path),
    }
}

#[derive(Default)]
struct StatusPage;

impl CodePage for StatusPage {
    fn render(&mut self, _request: &CodePageRequest<'_>) -> anyhow::Result<String> {
        Ok("ok".into())
    }
}

// ============================================================================
// Ancestor walk
// ============================================================================

#[test]
fn nearest_ancestor_wins() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("page.html", "root")
            .with_file("a/page.html", "a")
            .with_file("a/b/page.html", "a/b"),
    );
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/c/d", "page").unwrap()), "a/b/page.html");
    assert_eq!(page_path(rt.resolve("a/x/y", "page").unwrap()), "a/page.html");
    assert_eq!(page_path(rt.resolve("z/y", "page").unwrap()), "page.html");
}

#[test]
fn walk_counts_one_lookup_per_level_then_uses_mapping() {
    let files = Arc::new(MemoryFiles::new().with_file("a/page.html", "a"));
    let rt = runtime(&files);
    let pages = rt.pages();

    let before = pages.lookup_count();
    assert_eq!(page_path(rt.resolve("a/b/c/d", "page").unwrap()), "a/page.html");
    // a/b/c/page, a/b/page, a/page
    assert_eq!(pages.lookup_count() - before, 3);
    assert_eq!(rt.path_mapping_count(), 1);

    let before = pages.lookup_count();
    assert_eq!(page_path(rt.resolve("a/b/c/d", "page").unwrap()), "a/page.html");
    assert_eq!(pages.lookup_count() - before, 1);
}

#[test]
fn exact_hits_are_not_mapped() {
    let files = Arc::new(MemoryFiles::new().with_file("page.html", "root"));
    let rt = runtime(&files);

    rt.resolve("", "page").unwrap();
    assert_eq!(rt.path_mapping_count(), 0);
}

#[test]
fn nested_request_walks_when_exact_match_missing() {
    let files = Arc::new(MemoryFiles::new().with_file("x/sub/page.html", "x"));
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("x/y", "sub/page").unwrap()), "x/sub/page.html");
}

#[test]
fn nested_request_prefers_exact_match() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("sub/page.html", "exact")
            .with_file("a/b/sub/page.html", "ancestor"),
    );
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/c", "sub/page").unwrap()), "sub/page.html");
}

#[test]
fn leading_separator_tries_root_page_first() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("page.html", "root")
            .with_file("a/b/page.html", "nearest"),
    );
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/x", "/page").unwrap()), "page.html");
    assert_eq!(page_path(rt.resolve("a/b/x", "page").unwrap()), "a/b/page.html");
    // Both spellings keep answering the same way once mappings exist.
    assert_eq!(page_path(rt.resolve("a/b/x", "/page").unwrap()), "page.html");
    assert_eq!(page_path(rt.resolve("a/b/x", "page").unwrap()), "a/b/page.html");
}

#[test]
fn backslash_request_is_an_exact_reference() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("sub/page.html", "exact")
            .with_file("a/b/sub/page.html", "ancestor"),
    );
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/c", "\\sub\\page").unwrap()), "sub/page.html");
}

#[test]
fn parent_segments_normalize_before_exact_match() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("page.html", "root")
            .with_file("a/b/page.html", "nearest"),
    );
    let rt = runtime(&files);

    // "../page" cannot climb above the root, so it names the root page.
    assert_eq!(page_path(rt.resolve("a/b/x", "../page").unwrap()), "page.html");
}

#[test]
fn leading_separator_falls_back_to_walk() {
    let files = Arc::new(MemoryFiles::new().with_file("a/page.html", "a"));
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/x", "/page").unwrap()), "a/page.html");
}

#[test]
fn missing_pages() {
    let files = Arc::new(MemoryFiles::new().with_file("a/other.html", ""));
    let rt = runtime(&files);

    assert!(rt.try_resolve("a/b", "page").unwrap().is_none());
    let err = rt.resolve("a/b", "page").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn index_page_fallback() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("docs/index.html", "docs")
            .with_file("home.html", "home"),
    );
    let rt = runtime(&files);
    assert_eq!(page_path(rt.resolve("", "docs/").unwrap()), "docs/index.html");

    let mut config = ScriptConfig::default();
    config.index_page = "home".into();
    let rt = ScriptContext::from_config(files.clone(), config).init().unwrap();
    assert_eq!(page_path(rt.resolve("", "/").unwrap()), "home.html");
}

// ============================================================================
// Code pages
// ============================================================================

#[test]
fn code_pages_take_precedence_at_each_level() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("api/status.html", "static")
            .with_file("status.html", "root static"),
    );
    let rt = ScriptContext::new(files)
        .with_component(ComponentType::code_page::<StatusPage>("api/status"))
        .init()
        .unwrap();

    let resolved = rt.resolve("api/v1", "status").unwrap();
    assert_eq!(page_path(resolved), "code:api/status");
    assert_eq!(rt.path_mapping_count(), 0);
}

#[test]
fn code_pages_are_fresh_per_request() {
    #[derive(Default)]
    struct Counter(usize);

    impl CodePage for Counter {
        fn render(&mut self, _request: &CodePageRequest<'_>) -> anyhow::Result<String> {
            self.0 += 1;
            Ok(self.0.to_string())
        }
    }

    let rt = ScriptContext::new(Arc::new(MemoryFiles::new()))
        .with_component(ComponentType::code_page::<Counter>("count.html"))
        .init()
        .unwrap();
    let args = serde_json::Value::Null;

    for _ in 0..2 {
        let mut page = rt.code_page("count").unwrap();
        let request = CodePageRequest {
            virtual_path: "count",
            args: &args,
            runtime: &rt,
        };
        assert_eq!(page.render(&request).unwrap(), "1");
    }
}

// ============================================================================
// Path mappings
// ============================================================================

#[test]
fn stale_mapping_is_evicted_and_walk_repeats() {
    let files = Arc::new(
        MemoryFiles::new()
            .with_file("a/page.html", "a")
            .with_file("page.html", "root"),
    );
    let rt = runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b/c", "page").unwrap()), "a/page.html");

    files.delete_file("a/page.html");
    assert_eq!(page_path(rt.resolve("a/b/c", "page").unwrap()), "page.html");
    assert_eq!(rt.path_mapping_count(), 0);

    files.delete_file("page.html");
    rt.pages().evict("page");
    assert!(rt.try_resolve("a/b/c", "page").unwrap().is_none());
}

#[test]
fn debug_mode_never_maps() {
    let files = Arc::new(MemoryFiles::new().with_file("a/page.html", "a"));
    let rt = debug_runtime(&files);
    let pages = rt.pages();

    rt.resolve("a/b/c", "page").unwrap();
    let before = pages.lookup_count();
    rt.resolve("a/b/c", "page").unwrap();

    assert_eq!(rt.path_mapping_count(), 0);
    assert_eq!(pages.lookup_count() - before, 2);
}

#[test]
fn debug_mode_sees_new_closer_pages() {
    let files = Arc::new(MemoryFiles::new().with_file("page.html", "root"));
    let rt = debug_runtime(&files);

    assert_eq!(page_path(rt.resolve("a/b", "page").unwrap()), "page.html");
    files.write_file("a/page.html", "closer");
    assert_eq!(page_path(rt.resolve("a/b", "page").unwrap()), "a/page.html");
}

#[test]
fn resolution_is_safe_across_threads() {
    let files = Arc::new(MemoryFiles::new().with_file("shared/page.html", "shared"));
    let rt = runtime(&files);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let rt = rt.clone();
            std::thread::spawn(move || {
                let from = format!("shared/t{}/deep", i);
                for _ in 0..50 {
                    let resolved = rt.resolve(&from, "page").unwrap();
                    assert_eq!(resolved.virtual_path(), "shared/page.html");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(rt.path_mapping_count(), 8);
}

#[test]
fn not_found_error_names_request() {
    let rt = runtime(&Arc::new(MemoryFiles::new()));
    match rt.resolve("a", "nope") {
        Err(ScriptError::PageNotFound { path }) => assert_eq!(path, "nope"),
        other => panic!("expected PageNotFound, got {:?}", other),
    }
}
