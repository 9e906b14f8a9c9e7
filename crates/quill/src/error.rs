//! Error types for the page runtime.
//!
//! [`ScriptError`] is the single error type surfaced by context initialization,
//! page resolution, assignment compilation and rendering. Plugin hooks and code
//! pages return `anyhow::Result`; their failures are wrapped with the stage and
//! component that raised them.

use std::fmt;

use quill_vfs::VfsError;
use thiserror::Error;

use crate::config::ConfigError;

/// The initialization step during which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Page registry construction and container setup
    Setup,
    /// Plugin `before_register` hooks
    BeforeRegister,
    /// Plugin `register` hooks
    Register,
    /// The post-plugins callback
    AfterPlugins,
    /// Component type classification and catalog scanning
    ComponentScan,
    /// Plugin `after_register` hooks
    AfterRegister,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStage::Setup => write!(f, "setup"),
            InitStage::BeforeRegister => write!(f, "before-register"),
            InitStage::Register => write!(f, "register"),
            InitStage::AfterPlugins => write!(f, "after-plugins"),
            InitStage::ComponentScan => write!(f, "component-scan"),
            InitStage::AfterRegister => write!(f, "after-register"),
        }
    }
}

/// Error type for all runtime operations.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// No page or code page exists anywhere along the search path.
    #[error("page not found: {path}")]
    PageNotFound {
        /// The requested virtual path.
        path: String,
    },

    /// A required argument was blank or malformed.
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// An assignment expression could not be parsed.
    #[error("invalid expression `{expression}`: {message}")]
    InvalidExpression {
        /// The expression text.
        expression: String,
        /// Parser message.
        message: String,
    },

    /// A compiled assignment could not be applied to its target.
    #[error("cannot assign `{expression}`: {message}")]
    Assign {
        /// The expression text.
        expression: String,
        /// Why the assignment failed.
        message: String,
    },

    /// A plugin hook, callback or catalog failed during `init()`.
    #[error("initialization failed during {stage} ({component}): {source}")]
    Initialization {
        /// Pipeline step that failed.
        stage: InitStage,
        /// Plugin, catalog or callback name.
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// `init()` was re-entered while a previous run had not finished.
    #[error("context initialization is already in progress")]
    AlreadyInitializing,

    /// The context has no page formats, so no page can ever resolve.
    #[error("no page formats configured")]
    NoPageFormats,

    /// A page's front matter is not valid YAML.
    #[error("invalid front matter in {path}: {source}")]
    FrontMatter {
        /// Virtual path of the page.
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The template engine rejected or failed to render a page.
    #[error("failed to render {path}: {source}")]
    Render {
        /// Virtual path of the page.
        path: String,
        #[source]
        source: minijinja::Error,
    },

    /// A code page returned an error.
    #[error("code page {path} failed: {source}")]
    CodePage {
        /// Lookup path of the code page.
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reading page sources failed.
    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// Loading configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ScriptError {
    /// Creates a page-not-found error.
    pub fn page_not_found(path: impl Into<String>) -> Self {
        ScriptError::PageNotFound { path: path.into() }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        ScriptError::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    pub(crate) fn init(stage: InitStage, component: impl Into<String>, source: anyhow::Error) -> Self {
        ScriptError::Initialization {
            stage,
            component: component.into(),
            source,
        }
    }

    /// Returns true for [`ScriptError::PageNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScriptError::PageNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScriptError::page_not_found("blog/post");
        assert!(err.to_string().contains("page not found"));
        assert!(err.to_string().contains("blog/post"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_initialization_error_names_stage_and_component() {
        let err = ScriptError::init(
            InitStage::BeforeRegister,
            "MarkdownPlugin",
            anyhow::anyhow!("boom"),
        );
        let msg = err.to_string();
        assert!(msg.contains("before-register"));
        assert!(msg.contains("MarkdownPlugin"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_from_vfs_error() {
        let err: ScriptError = VfsError::not_found("a.html").into();
        assert!(matches!(err, ScriptError::Vfs(_)));
    }
}
