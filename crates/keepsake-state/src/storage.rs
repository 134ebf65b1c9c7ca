//! The storage boundary.
//!
//! A [`DocumentStore`] keeps one [`Document`] per `(namespace, key)`. The
//! manager calls it only from its I/O lane or from explicitly blocking
//! operations, so implementations may block.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::StorageError;
use crate::lock;

/// Document encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// YAML, written as `<key>.yml`.
    #[default]
    Yaml,
    /// JSON, written as `<key>.json`.
    Json,
}

impl Backend {
    /// File extension, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yml",
            Self::Json => "json",
        }
    }

    /// Encode a document.
    pub fn encode(self, document: &Document) -> Result<String, StorageError> {
        Ok(match self {
            Self::Yaml => serde_yml::to_string(document)?,
            Self::Json => serde_json::to_string_pretty(document)?,
        })
    }

    /// Decode a document. Blank input is an empty document.
    pub fn decode(self, text: &str) -> Result<Document, StorageError> {
        if text.trim().is_empty() {
            return Ok(Document::new());
        }
        Ok(match self {
            Self::Yaml => serde_yml::from_str(text)?,
            Self::Json => serde_json::from_str(text)?,
        })
    }
}

/// Reject keys and namespaces that could escape their directory.
///
/// Separators are banned outright, so a key is a single path component
/// and only `.` and `..` themselves can point elsewhere.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.contains(['/', '\\', '\0'])
        || key == "."
        || key == "..";
    if bad {
        return Err(StorageError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// Persistent home for entity documents.
pub trait DocumentStore: Send + Sync {
    /// The stored document, or `None` when there is none.
    fn read(&self, namespace: &str, key: &str, backend: Backend) -> Result<Option<Document>, StorageError>;

    /// Create or replace the document.
    fn write(
        &self,
        namespace: &str,
        key: &str,
        backend: Backend,
        document: &Document,
    ) -> Result<(), StorageError>;

    /// Remove the document. Returns whether one existed.
    fn remove(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError>;

    /// Whether a document exists.
    fn exists(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError>;

    /// Every stored key in `namespace`, in any backend.
    fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

// =============================================================================
// File store
// =============================================================================

/// Documents as files under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// A store rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        validate_key(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn path(&self, namespace: &str, key: &str, backend: Backend) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self
            .dir(namespace)?
            .join(format!("{key}.{}", backend.extension())))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl DocumentStore for FileStore {
    fn read(&self, namespace: &str, key: &str, backend: Backend) -> Result<Option<Document>, StorageError> {
        let path = self.path(namespace, key, backend)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, err)),
        };
        backend.decode(&text).map(Some)
    }

    fn write(
        &self,
        namespace: &str,
        key: &str,
        backend: Backend,
        document: &Document,
    ) -> Result<(), StorageError> {
        let path = self.path(namespace, key, backend)?;
        let text = backend.encode(document)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
        fs::write(&path, text).map_err(|err| io_error(&path, err))
    }

    fn remove(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
        let path = self.path(namespace, key, backend)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path, err)),
        }
    }

    fn exists(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
        let path = self.path(namespace, key, backend)?;
        path.try_exists().map_err(|err| io_error(&path, err))
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.dir(namespace)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| io_error(&dir, err))?.path();
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    ext == Backend::Yaml.extension() || ext == Backend::Json.extension()
                });
            if !known {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_owned());
            }
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

// =============================================================================
// Memory store
// =============================================================================

type Slot = (String, String, Backend);

/// Documents in a map. Counts writes and can be told to fail, which makes
/// it the store of choice for tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<Slot, Document>>,
    writes: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// When `failing`, every operation returns an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// A copy of the stored document, bypassing failure injection.
    pub fn document(&self, namespace: &str, key: &str, backend: Backend) -> Option<Document> {
        lock(&self.documents)
            .get(&slot(namespace, key, backend))
            .cloned()
    }

    fn check(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        validate_key(namespace)?;
        validate_key(key)?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                path: PathBuf::from(namespace).join(key),
                source: std::io::Error::other("memory store set to fail"),
            });
        }
        Ok(())
    }
}

fn slot(namespace: &str, key: &str, backend: Backend) -> Slot {
    (namespace.to_owned(), key.to_owned(), backend)
}

impl DocumentStore for MemoryStore {
    fn read(&self, namespace: &str, key: &str, backend: Backend) -> Result<Option<Document>, StorageError> {
        self.check(namespace, key)?;
        Ok(lock(&self.documents)
            .get(&slot(namespace, key, backend))
            .cloned())
    }

    fn write(
        &self,
        namespace: &str,
        key: &str,
        backend: Backend,
        document: &Document,
    ) -> Result<(), StorageError> {
        self.check(namespace, key)?;
        lock(&self.documents).insert(slot(namespace, key, backend), document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
        self.check(namespace, key)?;
        Ok(lock(&self.documents)
            .remove(&slot(namespace, key, backend))
            .is_some())
    }

    fn exists(&self, namespace: &str, key: &str, backend: Backend) -> Result<bool, StorageError> {
        self.check(namespace, key)?;
        Ok(lock(&self.documents).contains_key(&slot(namespace, key, backend)))
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        validate_key(namespace)?;
        let mut keys: Vec<String> = lock(&self.documents)
            .keys()
            .filter(|(ns, _, _)| ns == namespace)
            .map(|(_, key, _)| key.clone())
            .collect();
        keys.dedup();
        Ok(keys)
    }
}
