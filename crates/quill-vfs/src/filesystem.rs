//! Virtual files backed by a directory on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::path;
use crate::{VfsError, VirtualEntry, VirtualFile, VirtualFiles};

/// Serves files below a root directory.
///
/// Virtual paths are normalized before touching the disk, so `..` segments
/// can never reach outside the root.
#[derive(Debug, Clone)]
pub struct FileSystemFiles {
    root: PathBuf,
}

impl FileSystemFiles {
    /// Creates a provider rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, VfsError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|_| VfsError::RootNotFound {
            path: root.to_path_buf(),
        })?;
        if !canonical.is_dir() {
            return Err(VfsError::RootNotFound {
                path: root.to_path_buf(),
            });
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn disk_path(&self, virtual_path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for segment in virtual_path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        full
    }
}

impl VirtualFiles for FileSystemFiles {
    fn get_file(&self, virtual_path: &str) -> Option<VirtualFile> {
        let normalized = path::normalize(virtual_path);
        if normalized.is_empty() || normalized.ends_with('/') {
            return None;
        }
        let metadata = fs::metadata(self.disk_path(&normalized)).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Some(VirtualFile::new(normalized, modified, metadata.len()))
    }

    fn read_to_string(&self, file: &VirtualFile) -> Result<String, VfsError> {
        let disk_path = self.disk_path(&file.virtual_path);
        fs::read_to_string(&disk_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                VfsError::not_found(&file.virtual_path)
            } else {
                VfsError::Io {
                    path: file.virtual_path.clone(),
                    source,
                }
            }
        })
    }

    fn list_dir(&self, virtual_dir: &str) -> Vec<VirtualEntry> {
        let dir = path::normalize(virtual_dir);
        let dir = dir.trim_end_matches('/');
        let read = match fs::read_dir(self.disk_path(dir)) {
            Ok(read) => read,
            Err(err) => {
                tracing::debug!(dir, error = %err, "cannot list directory");
                return Vec::new();
            }
        };

        let mut entries: Vec<VirtualEntry> = read
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let virtual_path = path::combine(dir, &name);
                let metadata = entry.metadata().ok()?;
                if metadata.is_dir() {
                    Some(VirtualEntry::Directory(virtual_path))
                } else if metadata.is_file() {
                    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    Some(VirtualEntry::File(VirtualFile::new(
                        virtual_path,
                        modified,
                        metadata.len(),
                    )))
                } else {
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| a.virtual_path().cmp(b.virtual_path()));
        entries
    }
}
