//! # Quill VFS - Virtual file providers
//!
//! Page sources are addressed by *virtual path*: a `/`-separated path relative
//! to a provider root. Everything above this crate only needs two
//! capabilities, reading a file and listing a directory, captured by the
//! [`VirtualFiles`] trait.
//!
//! Providers:
//!
//! - [`MemoryFiles`]: in-memory store, writable at runtime (tests, generated pages)
//! - [`FileSystemFiles`]: a directory on disk
//! - [`MultiFiles`]: cascading lookup over several providers, first match wins
//!
//! ```rust
//! use quill_vfs::{MemoryFiles, VirtualFiles};
//!
//! let files = MemoryFiles::new();
//! files.write_file("blog/index.html", "<h1>Blog</h1>");
//!
//! let file = files.get_file("blog/index.html").unwrap();
//! assert_eq!(files.read_to_string(&file).unwrap(), "<h1>Blog</h1>");
//! ```

mod error;
mod filesystem;
mod memory;
mod multi;
pub mod path;

use std::sync::Arc;
use std::time::SystemTime;

pub use error::VfsError;
pub use filesystem::FileSystemFiles;
pub use memory::MemoryFiles;
pub use multi::MultiFiles;

/// Metadata for a file known to a provider.
///
/// Contents are read separately through [`VirtualFiles::read_to_string`] so
/// that freshness checks stay cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Normalized virtual path, including extension.
    pub virtual_path: String,
    /// Last modification stamp. Providers guarantee it changes on every write.
    pub last_modified: SystemTime,
    /// Size in bytes.
    pub len: u64,
}

impl VirtualFile {
    /// Creates file metadata.
    pub fn new(virtual_path: impl Into<String>, last_modified: SystemTime, len: u64) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            last_modified,
            len,
        }
    }

    /// File name including extension.
    pub fn name(&self) -> &str {
        path::file_name(&self.virtual_path)
    }

    /// Extension without the dot.
    pub fn extension(&self) -> Option<&str> {
        path::extension(&self.virtual_path)
    }

    /// Directory containing the file (`""` at the root).
    pub fn directory(&self) -> &str {
        path::parent(&self.virtual_path)
    }
}

/// An entry returned by [`VirtualFiles::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualEntry {
    /// A file directly inside the listed directory.
    File(VirtualFile),
    /// A sub-directory, by virtual path.
    Directory(String),
}

impl VirtualEntry {
    /// Virtual path of the entry.
    pub fn virtual_path(&self) -> &str {
        match self {
            VirtualEntry::File(file) => &file.virtual_path,
            VirtualEntry::Directory(dir) => dir,
        }
    }
}

/// Read access to page sources.
///
/// Implementations must be safe to share across request threads.
pub trait VirtualFiles: Send + Sync {
    /// Looks up file metadata. Paths are normalized by the provider.
    fn get_file(&self, virtual_path: &str) -> Option<VirtualFile>;

    /// Reads the full text of a file previously returned by [`get_file`](Self::get_file).
    fn read_to_string(&self, file: &VirtualFile) -> Result<String, VfsError>;

    /// Lists the direct children of a directory. Unknown directories are empty.
    fn list_dir(&self, virtual_dir: &str) -> Vec<VirtualEntry>;

    /// Returns true if a file exists at `virtual_path`.
    fn file_exists(&self, virtual_path: &str) -> bool {
        self.get_file(virtual_path).is_some()
    }
}

impl<T: VirtualFiles + ?Sized> VirtualFiles for Arc<T> {
    fn get_file(&self, virtual_path: &str) -> Option<VirtualFile> {
        (**self).get_file(virtual_path)
    }

    fn read_to_string(&self, file: &VirtualFile) -> Result<String, VfsError> {
        (**self).read_to_string(file)
    }

    fn list_dir(&self, virtual_dir: &str) -> Vec<VirtualEntry> {
        (**self).list_dir(virtual_dir)
    }

    fn file_exists(&self, virtual_path: &str) -> bool {
        (**self).file_exists(virtual_path)
    }
}
