//! Integration tests for the MiniJinja renderer.

use std::sync::Arc;

use minijinja::Value;
use quill::{
    CodePage, CodePageRequest, ComponentType, MiniJinjaRenderer, PageRenderer, ScriptContext,
    ScriptError,
};
use quill_vfs::MemoryFiles;
use serde_json::json;

fn renderer(files: MemoryFiles) -> MiniJinjaRenderer {
    let runtime = ScriptContext::new(Arc::new(files))
        .with_arg("site", "Quill")
        .init()
        .unwrap();
    MiniJinjaRenderer::new(runtime)
}

#[derive(Default)]
struct Echo;

impl CodePage for Echo {
    fn render(&mut self, request: &CodePageRequest<'_>) -> anyhow::Result<String> {
        let name = request.args.get("name").and_then(|v| v.as_str()).unwrap_or("nobody");
        Ok(format!("{} on {}", name, request.runtime.args()["site"].as_str().unwrap_or("")))
    }
}

#[derive(Default)]
struct Failing;

impl CodePage for Failing {
    fn render(&mut self, _request: &CodePageRequest<'_>) -> anyhow::Result<String> {
        anyhow::bail!("database offline")
    }
}

// ============================================================================
// Layouts and args
// ============================================================================

#[test]
fn layout_wraps_page_and_sees_args() {
    let r = renderer(
        MemoryFiles::new()
            .with_file("_layout.html", "<title>{{ title }} | {{ site }}</title>{{ page }}")
            .with_file("about.html", "---\ntitle: About\n---\n<p>{{ site }}</p>"),
    );

    let html = r.render_path("", "about", &json!(null)).unwrap();
    assert_eq!(html, "<title>About | Quill</title><p>Quill</p>");
}

#[test]
fn layout_can_be_named_or_disabled() {
    let files = MemoryFiles::new()
        .with_file("_layout.html", "[default]{{ page }}")
        .with_file("_print.html", "[print]{{ page }}")
        .with_file("a.txt", "---\nlayout: _print\n---\na")
        .with_file("b.txt", "---\nlayout: none\n---\nb")
        .with_file("c.txt", "c");
    let r = renderer(files);

    assert_eq!(r.render_path("", "a", &json!(null)).unwrap(), "[print]a");
    assert_eq!(r.render_path("", "b", &json!(null)).unwrap(), "b");
    assert_eq!(r.render_path("", "c", &json!(null)).unwrap(), "[default]c");
    assert_eq!(r.render_path("", "c", &json!({"layout": "none"})).unwrap(), "c");
}

#[test]
fn partials_render_without_layout() {
    let r = renderer(
        MemoryFiles::new()
            .with_file("_layout.html", "[layout]{{ page }}")
            .with_file("_nav.html", "nav"),
    );
    assert_eq!(r.render_path("", "_nav", &json!(null)).unwrap(), "nav");
}

#[test]
fn one_time_pages_render_with_global_args() {
    let r = renderer(MemoryFiles::new().with_file("_layout.html", "[layout]{{ page }}"));
    let out = r.render_source("Hello {{ site }}", "txt", &json!(null)).unwrap();
    assert_eq!(out, "Hello Quill");
}

// ============================================================================
// Methods and blocks
// ============================================================================

#[test]
fn default_methods_are_functions_and_filters() {
    let r = renderer(MemoryFiles::new().with_file("x.html", "x"));
    let out = r
        .render_source(
            "{{ pad_left(7, 3, '0') }} {{ 42 | pad_left(4) }} {{ join_path('a/', '/b', 'c') }} {{ page_exists('x') }} {{ page_exists('y') }}",
            "txt",
            &json!(null),
        )
        .unwrap();
    assert_eq!(out, "007   42 a/b/c true false");
}

#[test]
fn to_json_method() {
    let r = renderer(MemoryFiles::new());
    let out = r
        .render_source("{{ to_json(data) }}", "txt", &json!({"data": {"a": [1, 2]}}))
        .unwrap();
    assert_eq!(out, r#"{"a":[1,2]}"#);
}

#[test]
fn cache_methods_share_runtime_caches() {
    let r = renderer(MemoryFiles::new());
    r.render_source("{{ cache_set('greeting', 'hi') }}", "txt", &json!(null)).unwrap();
    let out = r.render_source("{{ cache_get('greeting') }}", "txt", &json!(null)).unwrap();
    assert_eq!(out, "hi");
    assert_eq!(
        r.runtime().caches().object("greeting"),
        Some(Value::from("hi"))
    );
}

#[test]
fn blocks_apply_as_filter_sections() {
    let r = renderer(MemoryFiles::new());
    let out = r
        .render_source(
            "{% filter wrap('section', 'intro') %}{% filter collapse %}  Hello\n   world  {% endfilter %}{% endfilter %}",
            "html",
            &json!(null),
        )
        .unwrap();
    assert_eq!(out, "<section class=\"intro\">Hello world</section>");
}

#[test]
fn block_errors_surface_as_render_errors() {
    let r = renderer(MemoryFiles::new().with_file("bad.html", "{% filter wrap('a b') %}x{% endfilter %}"));
    let err = r.render_path("", "bad", &json!(null)).unwrap_err();
    assert!(matches!(err, ScriptError::Render { .. }));
}

// ============================================================================
// Code pages and callbacks
// ============================================================================

#[test]
fn code_pages_render_through_the_renderer() {
    let runtime = ScriptContext::new(Arc::new(MemoryFiles::new()))
        .with_arg("site", "Quill")
        .with_component(ComponentType::code_page::<Echo>("api/echo"))
        .with_component(ComponentType::code_page::<Failing>("api/fail"))
        .init()
        .unwrap();
    let r = MiniJinjaRenderer::new(runtime.clone());

    let page = runtime.resolve("api/v2/x", "echo").unwrap();
    assert_eq!(r.render(page, &json!({"name": "Ada"})).unwrap(), "Ada on Quill");

    let err = r.render_path("api/x", "fail", &json!(null)).unwrap_err();
    match err {
        ScriptError::CodePage { path, source } => {
            assert_eq!(path, "api/fail");
            assert!(source.to_string().contains("database offline"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn unhandled_expressions_use_the_callback() {
    let runtime = ScriptContext::new(Arc::new(MemoryFiles::new()))
        .on_unhandled_expression(|name| match name {
            "version" => Some(Value::from("1.2.3")),
            _ => None,
        })
        .init()
        .unwrap();
    let r = MiniJinjaRenderer::new(runtime);

    let out = r
        .render_source("v{{ version }}{{ missing }}{{ known }}", "txt", &json!({"known": "!"}))
        .unwrap();
    assert_eq!(out, "v1.2.3!");
}
