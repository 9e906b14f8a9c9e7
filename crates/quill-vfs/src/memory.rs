//! In-memory virtual files.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::path;
use crate::{VfsError, VirtualEntry, VirtualFile, VirtualFiles};

#[derive(Debug, Clone)]
struct MemoryEntry {
    contents: Arc<str>,
    last_modified: SystemTime,
}

/// A writable, in-memory file store.
///
/// Every write gets a strictly increasing modification stamp, so page
/// registries can detect rewrites even when two writes land in the same
/// clock tick.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: RwLock<BTreeMap<String, MemoryEntry>>,
    clock: Mutex<Option<SystemTime>>,
}

impl MemoryFiles {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`write_file`](Self::write_file).
    pub fn with_file(self, virtual_path: &str, contents: impl Into<String>) -> Self {
        self.write_file(virtual_path, contents);
        self
    }

    /// Creates or replaces a file.
    pub fn write_file(&self, virtual_path: &str, contents: impl Into<String>) {
        let key = path::normalize(virtual_path);
        let entry = MemoryEntry {
            contents: Arc::from(contents.into()),
            last_modified: self.tick(),
        };
        tracing::trace!(path = %key, "memory file written");
        self.files.write().insert(key, entry);
    }

    /// Deletes a file. Returns `true` if it existed.
    pub fn delete_file(&self, virtual_path: &str) -> bool {
        let key = path::normalize(virtual_path);
        self.files.write().remove(&key).is_some()
    }

    /// Deletes every file under a directory. Returns the number removed.
    pub fn delete_dir(&self, virtual_dir: &str) -> usize {
        let prefix = dir_prefix(virtual_dir);
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|key, _| !key.starts_with(&prefix));
        before - files.len()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if no files are stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn tick(&self) -> SystemTime {
        let mut last = self.clock.lock();
        let now = SystemTime::now();
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::from_micros(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

fn dir_prefix(virtual_dir: &str) -> String {
    let dir = path::normalize(virtual_dir);
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

impl VirtualFiles for MemoryFiles {
    fn get_file(&self, virtual_path: &str) -> Option<VirtualFile> {
        let key = path::normalize(virtual_path);
        let files = self.files.read();
        let entry = files.get(&key)?;
        Some(VirtualFile::new(
            key,
            entry.last_modified,
            entry.contents.len() as u64,
        ))
    }

    fn read_to_string(&self, file: &VirtualFile) -> Result<String, VfsError> {
        self.files
            .read()
            .get(&file.virtual_path)
            .map(|entry| entry.contents.to_string())
            .ok_or_else(|| VfsError::not_found(&file.virtual_path))
    }

    fn list_dir(&self, virtual_dir: &str) -> Vec<VirtualEntry> {
        let prefix = dir_prefix(virtual_dir);
        let files = self.files.read();

        let mut entries = Vec::new();
        let mut last_dir: Option<String> = None;
        for (key, entry) in files.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    let dir_path = format!("{}{}", prefix, dir);
                    if last_dir.as_deref() != Some(dir_path.as_str()) {
                        entries.push(VirtualEntry::Directory(dir_path.clone()));
                        last_dir = Some(dir_path);
                    }
                }
                None => entries.push(VirtualEntry::File(VirtualFile::new(
                    key.clone(),
                    entry.last_modified,
                    entry.contents.len() as u64,
                ))),
            }
        }
        entries
    }
}
