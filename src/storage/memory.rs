//! In-memory storage engine.

use crate::error::{Result, StoreError};
use crate::types::{Document, DocumentKey, HistoryEntry};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::StorageEngine;

/// Storage engine keeping everything in process memory.
///
/// Documents are held per model in id order so scans can resume from an id.
#[derive(Default)]
pub struct MemoryEngine {
    /// model -> id -> current document.
    documents: RwLock<HashMap<String, BTreeMap<String, Document>>>,

    /// Superseded versions per key, oldest first.
    history: RwLock<HashMap<DocumentKey, Vec<HistoryEntry>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .get(&key.model)
            .and_then(|docs| docs.get(&key.id))
            .cloned())
    }

    fn put(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .entry(document.model.clone())
            .or_default()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut history = self.history.write();
        let entries = history.entry(entry.document.key()).or_default();

        if let Some(last) = entries.last() {
            if entry.version() <= last.version() {
                return Err(StoreError::Storage(format!(
                    "history for {} is append-only: version {} after {}",
                    entry.document.key(),
                    entry.version(),
                    last.version()
                )));
            }
        }

        entries.push(entry);
        Ok(())
    }

    fn delete(&self, key: &DocumentKey) -> Result<()> {
        let mut documents = self.documents.write();
        if let Some(docs) = documents.get_mut(&key.model) {
            docs.remove(&key.id);
            if docs.is_empty() {
                documents.remove(&key.model);
            }
        }
        Ok(())
    }

    fn history(&self, key: &DocumentKey) -> Result<Vec<HistoryEntry>> {
        Ok(self.history.read().get(key).cloned().unwrap_or_default())
    }

    fn scan(&self, model: &str, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        let documents = self.documents.read();
        let docs = match documents.get(model) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        Ok(docs
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn counts(&self) -> (u64, u64) {
        let documents = self.documents.read().values().map(|d| d.len() as u64).sum();
        let history = self.history.read().values().map(|h| h.len() as u64).sum();
        (documents, history)
    }
}
