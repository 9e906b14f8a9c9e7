//! Error type for virtual file providers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`VirtualFiles`](crate::VirtualFiles) implementations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The file disappeared or never existed.
    #[error("virtual file not found: {path}")]
    NotFound {
        /// Virtual path that was requested.
        path: String,
    },

    /// Reading from the backing store failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Virtual path being read.
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The filesystem root handed to a provider is not a directory.
    #[error("root directory not found: {}", path.display())]
    RootNotFound {
        /// Path that was given as the provider root.
        path: PathBuf,
    },
}

impl VfsError {
    /// Creates a not-found error for `path`.
    pub fn not_found(path: impl Into<String>) -> Self {
        VfsError::NotFound { path: path.into() }
    }
}
