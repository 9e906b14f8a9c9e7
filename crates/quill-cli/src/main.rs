//! quill - render and inspect page trees from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quill::{MiniJinjaRenderer, PageRenderer, ScriptConfig, ScriptContext, ScriptRuntime};
use quill_vfs::{path, FileSystemFiles, VirtualEntry, VirtualFiles};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// quill - page runtime tools
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the pages
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Check pages for changes on every lookup and never cache resolutions
    #[arg(long)]
    debug: bool,

    /// Global argument, as key=value (value parsed as JSON when possible)
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,

    /// Log filter, overridden by QUILL_LOG
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a page to stdout
    Render {
        /// Requested virtual path
        path: String,

        /// Directory the request is made from
        #[arg(long, default_value = "")]
        from: String,
    },

    /// Print the page a request resolves to
    Resolve {
        /// Directory the request is made from
        from: String,

        /// Requested virtual path
        path: String,
    },

    /// List pages, code pages and registered methods
    Pages,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("QUILL_LOG")
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let runtime = build_runtime(&cli)?;
    match &cli.command {
        Commands::Render { path, from } => {
            let renderer = MiniJinjaRenderer::new(runtime.clone());
            let page = runtime.resolve(&origin(from), path)?;
            let output = renderer.render(page, &serde_json::Value::Null)?;
            print!("{}", output);
        }
        Commands::Resolve { from, path } => match runtime.try_resolve(&origin(from), path)? {
            Some(page) if page.is_code() => println!("{} (code)", page.virtual_path()),
            Some(page) => println!("{}", page.virtual_path()),
            None => bail!("no page found for `{}` from `{}`", path, from),
        },
        Commands::Pages => list_pages(&runtime),
    }

    runtime.dispose();
    Ok(())
}

fn build_runtime(cli: &Cli) -> Result<Arc<ScriptRuntime>> {
    let config = match &cli.config {
        Some(path) => ScriptConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScriptConfig::default(),
    };
    let files = FileSystemFiles::new(&cli.root)
        .with_context(|| format!("opening page root {}", cli.root.display()))?;

    let mut context = ScriptContext::from_config(Arc::new(files), config);
    if cli.debug {
        context = context.with_debug_mode(true);
    }
    for arg in &cli.args {
        let (key, value) = parse_arg(arg)?;
        context = context.with_arg(key, value);
    }

    let runtime = context.init()?;
    tracing::debug!(root = %cli.root.display(), "runtime ready");
    Ok(runtime)
}

/// Page path standing for a request made from inside `dir`.
///
/// Resolution starts at the parent of the requesting page, so the request
/// is attributed to a placeholder page within the directory.
fn origin(dir: &str) -> String {
    path::combine(&path::normalize(dir), "_")
}

fn parse_arg(arg: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, raw)) = arg.split_once('=') else {
        bail!("argument `{}` is not KEY=VALUE", arg);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("argument `{}` has an empty key", arg);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
    Ok((key.to_string(), value))
}

fn list_pages(runtime: &ScriptRuntime) {
    let files = runtime.pages().files();
    let mut pending = vec![String::new()];
    let mut found = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in files.list_dir(&dir) {
            match entry {
                VirtualEntry::Directory(sub) => pending.push(sub),
                VirtualEntry::File(file) => {
                    let known = file
                        .extension()
                        .is_some_and(|ext| runtime.pages().format_for_extension(ext).is_some());
                    if known {
                        found.push(file.virtual_path);
                    }
                }
            }
        }
    }
    found.sort();

    for page in found {
        println!("{}", page);
    }
    for path in runtime.code_page_paths() {
        println!("{} (code)", path);
    }
    let methods: Vec<&str> = runtime.method_names().collect();
    if !methods.is_empty() {
        println!("methods: {}", methods.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_as_json_or_string() {
        assert_eq!(parse_arg("n=3").unwrap(), ("n".into(), serde_json::json!(3)));
        assert_eq!(parse_arg("site=Quill").unwrap(), ("site".into(), serde_json::json!("Quill")));
        assert_eq!(parse_arg("e=").unwrap(), ("e".into(), serde_json::json!("")));
        assert!(parse_arg("novalue").is_err());
        assert!(parse_arg("=x").is_err());
    }

    #[test]
    fn origin_searches_the_directory_itself() {
        assert_eq!(origin("blog"), "blog/_");
        assert_eq!(origin("blog/"), "blog/_");
        assert_eq!(origin(""), "_");
    }

    #[test]
    fn directory_requests_find_pages_in_that_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog/2024")).unwrap();
        std::fs::write(dir.path().join("blog/post.html"), "post").unwrap();
        std::fs::write(dir.path().join("top.html"), "top").unwrap();

        let cli = Cli::parse_from([
            "quill",
            "--root",
            dir.path().to_str().unwrap(),
            "--arg",
            "site=Quill",
            "resolve",
            "blog",
            "post",
        ]);
        let runtime = build_runtime(&cli).unwrap();
        assert_eq!(runtime.args()["site"], serde_json::json!("Quill"));

        let Commands::Resolve { from, path } = &cli.command else {
            panic!("expected resolve command");
        };
        let found = runtime.try_resolve(&origin(from), path).unwrap().unwrap();
        assert_eq!(found.virtual_path(), "blog/post.html");

        let nested = runtime.try_resolve(&origin("blog/2024"), "post").unwrap().unwrap();
        assert_eq!(nested.virtual_path(), "blog/post.html");
        let root = runtime.try_resolve(&origin(""), "top").unwrap().unwrap();
        assert_eq!(root.virtual_path(), "top.html");
    }
}
