//! Context configuration.
//!
//! [`ScriptConfig`] holds every setting that shapes initialization and page
//! lookup. It can be built in code or loaded from YAML/JSON; missing keys fall
//! back to defaults.
//!
//! ```yaml
//! debug_mode: true
//! index_page: home
//! default_layout: _layout
//! check_modified_after_ms: 2000
//! page_formats:
//!   - extension: html
//!     content_type: text/html
//! args:
//!   site_name: Quill
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::page::{default_formats, PageFormat};

/// Errors loading a [`ScriptConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Path of the config file.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax or shape error.
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON syntax or shape error.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension is neither YAML nor JSON.
    #[error("unsupported config format: {}", path.display())]
    UnsupportedFormat {
        /// Path of the config file.
        path: PathBuf,
    },
}

/// Settings for a [`ScriptContext`](crate::ScriptContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Disables path mappings and re-checks cached pages on every lookup.
    pub debug_mode: bool,
    /// Page name used when a lookup path is empty or ends with `/`.
    pub index_page: String,
    /// Layout page name searched for when a page names none.
    pub default_layout: String,
    /// Outside debug mode, re-check cached pages once this many milliseconds
    /// have passed since their last check. `None` trusts cached pages forever.
    pub check_modified_after_ms: Option<u64>,
    /// Recognized page formats in lookup priority order.
    pub page_formats: Vec<PageFormat>,
    /// Global arguments visible to every page.
    pub args: BTreeMap<String, serde_json::Value>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            index_page: "index".to_string(),
            default_layout: "_layout".to_string(),
            check_modified_after_ms: None,
            page_formats: default_formats(),
            args: BTreeMap::new(),
        }
    }
}

impl ScriptConfig {
    /// Parses YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads configuration from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// The modified-page check interval as a `Duration`.
    pub fn check_modified_after(&self) -> Option<Duration> {
        self.check_modified_after_ms.map(Duration::from_millis)
    }
}
