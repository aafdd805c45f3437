//! Read path: filtered enumeration of committed documents.
//!
//! Search only ever sees what the storage engine holds as current, so a
//! candidate that was rejected or is still in flight is never visible.
//! Results come in id order within a model. The cursor is the hex-encoded
//! last returned id; it carries no server state.

mod filter;

pub use filter::Filter;

use crate::error::{Result, StoreError};
use crate::storage::StorageEngine;
use crate::types::{validate_part, Document, DocumentKey, HistoryEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Documents pulled from the engine per scan call.
const SCAN_BATCH: usize = 256;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub model: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Return whole documents instead of ids.
    #[serde(default)]
    pub full: bool,
}

impl SearchRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn full(mut self) -> Self {
        self.full = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchHits {
    Ids(Vec<String>),
    Documents(Vec<Document>),
}

impl SearchHits {
    pub fn len(&self) -> usize {
        match self {
            SearchHits::Ids(ids) => ids.len(),
            SearchHits::Documents(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<&str> {
        match self {
            SearchHits::Ids(ids) => ids.iter().map(String::as_str).collect(),
            SearchHits::Documents(docs) => docs.iter().map(|d| d.id.as_str()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: SearchHits,
    /// Pass back as `cursor` to continue; `None` when exhausted.
    pub cursor: Option<String>,
}

pub fn encode_cursor(id: &str) -> String {
    hex::encode(id.as_bytes())
}

pub fn decode_cursor(cursor: &str) -> Result<String> {
    let bytes = hex::decode(cursor)
        .map_err(|e| StoreError::Validation(format!("invalid cursor: {}", e)))?;
    String::from_utf8(bytes).map_err(|_| StoreError::Validation("invalid cursor: not utf-8".into()))
}

/// Query facade over a storage engine.
pub struct DocumentSearch {
    engine: Arc<dyn StorageEngine>,
    default_limit: usize,
    max_limit: usize,
}

impl DocumentSearch {
    pub fn new(engine: Arc<dyn StorageEngine>, default_limit: usize, max_limit: usize) -> Self {
        Self {
            engine,
            default_limit,
            max_limit,
        }
    }

    pub fn get(&self, model: &str, id: &str) -> Result<Document> {
        let key = DocumentKey::new(model, id);
        key.validate()?;
        self.engine.get(&key)?.ok_or_else(|| StoreError::NotFound {
            model: model.to_string(),
            id: id.to_string(),
        })
    }

    /// Superseded versions of a key, oldest first. Empty if none.
    pub fn history(&self, model: &str, id: &str) -> Result<Vec<HistoryEntry>> {
        let key = DocumentKey::new(model, id);
        key.validate()?;
        self.engine.history(&key)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        validate_part("model", &request.model)?;
        for filter in &request.filters {
            filter.validate()?;
        }

        let limit = request
            .limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1));
        let needs_val = request.filters.iter().any(Filter::reads_val);

        let mut after = request.cursor.as_deref().map(decode_cursor).transpose()?;
        let mut hits: Vec<Document> = Vec::new();
        let mut more = false;

        'scan: loop {
            let batch = self
                .engine
                .scan(&request.model, after.as_deref(), SCAN_BATCH)?;
            let exhausted = batch.len() < SCAN_BATCH;

            for document in batch {
                after = Some(document.id.clone());

                let val = if needs_val {
                    Some(document.val.to_json()?)
                } else {
                    None
                };
                if !request
                    .filters
                    .iter()
                    .all(|f| f.matches(&document, val.as_ref()))
                {
                    continue;
                }

                if hits.len() == limit {
                    more = true;
                    break 'scan;
                }
                hits.push(document);
            }

            if exhausted {
                break;
            }
        }

        let cursor = if more {
            hits.last().map(|doc| encode_cursor(&doc.id))
        } else {
            None
        };
        debug!(model = %request.model, hits = hits.len(), more, "search");

        let hits = if request.full {
            SearchHits::Documents(hits)
        } else {
            SearchHits::Ids(hits.into_iter().map(|doc| doc.id).collect())
        };
        Ok(SearchResponse { hits, cursor })
    }
}
