//! Ledger persistence
//!
//! The ledger document is a disposable local cache: it is read in full at
//! startup and rewritten in full after every mutation. The remote store is
//! the durable record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use super::LedgerDocument;

/// Ledger store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document exists but cannot be parsed
    #[error("Ledger document {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Load/save lifecycle for the ledger document
pub trait LedgerStore: Send + Sync {
    /// Full read; `Ok(None)` when nothing has been stored yet
    fn load(&self) -> Result<Option<LedgerDocument>, StoreError>;

    /// Full overwrite
    fn save(&self, doc: &LedgerDocument) -> Result<(), StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    fn load(&self) -> Result<Option<LedgerDocument>, StoreError> {
        (**self).load()
    }

    fn save(&self, doc: &LedgerDocument) -> Result<(), StoreError> {
        (**self).save(doc)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ========================================
// JSON file store
// ========================================

/// Pretty-printed JSON document on disk
///
/// Saves go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerDocument>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        if content.trim().is_empty() {
            debug!(path = %self.path.display(), "Ledger file is empty");
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn save(&self, doc: &LedgerDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), "Ledger saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ========================================
// In-memory store
// ========================================

/// Process-local store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<Option<LedgerDocument>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a document
    pub fn with_document(doc: LedgerDocument) -> Self {
        Self {
            doc: Mutex::new(Some(doc)),
            ..Self::default()
        }
    }

    /// Last saved document
    pub fn snapshot(&self) -> Option<LedgerDocument> {
        self.doc.lock().ok().and_then(|guard| guard.clone())
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (simulates a full disk)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerDocument>, StoreError> {
        let guard = self
            .doc
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, doc: &LedgerDocument) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves disabled".to_string()));
        }

        let mut guard = self
            .doc
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        *guard = Some(doc.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
