//! Filesystem clip source
//!
//! A namespace maps to a subdirectory of the root (`""` is the root itself).
//! Clips are found recursively; since callers address them by filename
//! only, a later file with an already-seen name is skipped.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use walkdir::WalkDir;

use super::{ByteSource, SourceError};
use crate::types::is_clip_filename;

/// Byte source reading `.wav` files from a directory tree
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    /// namespace → filename → path, rebuilt on every `list`
    index: Mutex<HashMap<String, BTreeMap<String, PathBuf>>>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        if namespace.is_empty() {
            self.root.clone()
        } else {
            self.root.join(namespace)
        }
    }

    /// Walk a namespace directory and map clip filenames to paths
    fn scan(&self, namespace: &str) -> Result<BTreeMap<String, PathBuf>, SourceError> {
        let dir = self.namespace_dir(namespace);
        if !dir.is_dir() {
            return Err(SourceError::NamespaceNotFound(namespace.to_string()));
        }

        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("[CLIP_SOURCE] Skipping unreadable entry under {:?}: {}", dir, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !is_clip_filename(name) {
                continue;
            }
            if found.contains_key(name) {
                log::warn!(
                    "[CLIP_SOURCE] Duplicate clip name, skipping {:?}",
                    entry.path()
                );
                continue;
            }
            found.insert(name.to_string(), entry.path().to_owned());
        }

        log::debug!("[CLIP_SOURCE] {:?}: {} clip files", dir, found.len());
        Ok(found)
    }

    fn lookup(&self, namespace: &str, filename: &str) -> Option<PathBuf> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.get(namespace)?.get(filename).cloned()
    }
}

impl ByteSource for DirectorySource {
    fn list(&self, namespace: &str) -> Result<Vec<String>, SourceError> {
        let found = self.scan(namespace)?;
        let names = found.keys().cloned().collect();
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), found);
        Ok(names)
    }

    fn open(&self, namespace: &str, filename: &str) -> Result<Vec<u8>, SourceError> {
        let path = match self.lookup(namespace, filename) {
            Some(path) => path,
            None => {
                // Not listed yet: rescan rather than guess a path
                self.list(namespace)?;
                self.lookup(namespace, filename).ok_or_else(|| {
                    SourceError::FileNotFound {
                        namespace: namespace.to_string(),
                        filename: filename.to_string(),
                    }
                })?
            }
        };

        std::fs::read(&path).map_err(|source| SourceError::Io { path, source })
    }
}
