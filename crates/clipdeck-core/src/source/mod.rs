//! Clip byte sources
//!
//! A [`ByteSource`] supplies the raw WAV bytes the coordinator preloads. It
//! is organised like a bundled asset tree: a namespace (directory) holding
//! flat filenames.
//!
//! - [`DirectorySource`] reads a directory tree on disk
//! - [`MemorySource`] holds clips in memory (embedded assets, tests)

mod directory;

pub use directory::DirectorySource;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a byte source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Clip file not found: {namespace}/{filename}")]
    FileNotFound { namespace: String, filename: String },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Provider of raw clip bytes
pub trait ByteSource: Send + Sync {
    /// Filenames available in `namespace`
    fn list(&self, namespace: &str) -> Result<Vec<String>, SourceError>;

    /// Full contents of one file
    fn open(&self, namespace: &str, filename: &str) -> Result<Vec<u8>, SourceError>;
}

/// In-memory byte source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    namespaces: HashMap<String, BTreeMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any previous one with the same name
    pub fn with_file(
        mut self,
        namespace: impl Into<String>,
        filename: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.insert(namespace, filename, bytes);
        self
    }

    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        filename: impl Into<String>,
        bytes: Vec<u8>,
    ) {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(filename.into(), bytes);
    }
}

impl ByteSource for MemorySource {
    fn list(&self, namespace: &str) -> Result<Vec<String>, SourceError> {
        self.namespaces
            .get(namespace)
            .map(|files| files.keys().cloned().collect())
            .ok_or_else(|| SourceError::NamespaceNotFound(namespace.to_string()))
    }

    fn open(&self, namespace: &str, filename: &str) -> Result<Vec<u8>, SourceError> {
        self.namespaces
            .get(namespace)
            .and_then(|files| files.get(filename))
            .cloned()
            .ok_or_else(|| SourceError::FileNotFound {
                namespace: namespace.to_string(),
                filename: filename.to_string(),
            })
    }
}
