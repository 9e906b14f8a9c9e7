//! Cascading lookup over several providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{VfsError, VirtualEntry, VirtualFile, VirtualFiles};

/// Looks files up in each provider in order; the first one that has the
/// file wins. Directory listings are merged with the same precedence.
///
/// Typical use is an application directory layered over built-in pages:
///
/// ```rust
/// use std::sync::Arc;
/// use quill_vfs::{MemoryFiles, MultiFiles, VirtualFiles};
///
/// let app = Arc::new(MemoryFiles::new().with_file("_layout.html", "app"));
/// let builtin = Arc::new(MemoryFiles::new()
///     .with_file("_layout.html", "builtin")
///     .with_file("404.html", "missing"));
///
/// let files = MultiFiles::new().with(app).with(builtin);
/// let layout = files.get_file("_layout.html").unwrap();
/// assert_eq!(files.read_to_string(&layout).unwrap(), "app");
/// assert!(files.file_exists("404.html"));
/// ```
#[derive(Clone, Default)]
pub struct MultiFiles {
    providers: Vec<Arc<dyn VirtualFiles>>,
}

impl MultiFiles {
    /// Creates an empty cascade.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider with lower precedence than the existing ones.
    pub fn with(mut self, provider: Arc<dyn VirtualFiles>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Number of providers in the cascade.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if the cascade has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for MultiFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiFiles")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl VirtualFiles for MultiFiles {
    fn get_file(&self, virtual_path: &str) -> Option<VirtualFile> {
        self.providers
            .iter()
            .find_map(|provider| provider.get_file(virtual_path))
    }

    fn read_to_string(&self, file: &VirtualFile) -> Result<String, VfsError> {
        let owner = self
            .providers
            .iter()
            .find(|provider| provider.file_exists(&file.virtual_path))
            .ok_or_else(|| VfsError::not_found(&file.virtual_path))?;
        owner.read_to_string(file)
    }

    fn list_dir(&self, virtual_dir: &str) -> Vec<VirtualEntry> {
        let mut merged: BTreeMap<String, VirtualEntry> = BTreeMap::new();
        for provider in &self.providers {
            for entry in provider.list_dir(virtual_dir) {
                merged
                    .entry(entry.virtual_path().to_string())
                    .or_insert(entry);
            }
        }
        merged.into_values().collect()
    }
}
