//! Storage engine contract.
//!
//! The pipeline only needs per-call atomicity from an engine. Anything that
//! spans calls (history append + current write) is composed by the pipeline
//! under its per-key lock.

mod memory;

pub use memory::MemoryEngine;

use crate::error::Result;
use crate::types::{Document, DocumentKey, HistoryEntry};

/// Backing store for committed documents and their history.
pub trait StorageEngine: Send + Sync {
    /// Current document for a key.
    fn get(&self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Store `document` as the current version of its key.
    fn put(&self, document: &Document) -> Result<()>;

    /// Append a superseded version to the key's history.
    fn append_history(&self, entry: HistoryEntry) -> Result<()>;

    /// Remove the current pointer for a key. History is kept.
    fn delete(&self, key: &DocumentKey) -> Result<()>;

    /// All superseded versions for a key, oldest first.
    fn history(&self, key: &DocumentKey) -> Result<Vec<HistoryEntry>>;

    /// Up to `limit` current documents of `model` with id strictly greater
    /// than `after`, in id order.
    fn scan(&self, model: &str, after: Option<&str>, limit: usize) -> Result<Vec<Document>>;

    /// Number of current documents and history entries.
    fn counts(&self) -> (u64, u64);

    /// Highest version ever committed for a key (0 if never).
    fn last_version(&self, key: &DocumentKey) -> Result<u64> {
        if let Some(doc) = self.get(key)? {
            return Ok(doc.version);
        }
        Ok(self
            .history(key)?
            .last()
            .map(|entry| entry.version())
            .unwrap_or(0))
    }
}
