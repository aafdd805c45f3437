//! Subscription types for the commit-event feed.

use crate::types::Document;
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only these models (None = every model).
    pub models: Option<Vec<String>>,

    /// Include committed puts.
    pub include_commits: bool,

    /// Include deletes.
    pub include_deletes: bool,

    /// Include cascade truncation notices.
    pub include_cascade_events: bool,
}

impl SubscriptionFilter {
    /// Everything, for every model.
    pub fn all() -> Self {
        Self {
            models: None,
            include_commits: true,
            include_deletes: true,
            include_cascade_events: true,
        }
    }

    /// Everything, restricted to the given models.
    pub fn models(models: Vec<String>) -> Self {
        Self {
            models: Some(models),
            ..Self::all()
        }
    }

    /// Committed puts only.
    pub fn commits() -> Self {
        Self {
            include_commits: true,
            ..Default::default()
        }
    }

    pub(crate) fn wants_model(&self, model: &str) -> bool {
        match &self.models {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A put committed a new current version.
    Committed { document: DocumentSummary },

    /// A delete removed the current version.
    Deleted {
        model: String,
        id: String,
        /// Version that was current before the delete.
        version: u64,
    },

    /// A cascade chain hit the depth bound and was cut short.
    CascadeTruncated {
        model: String,
        id: String,
        depth: usize,
    },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The store shut down.
    Shutdown,
}

/// Summary of a committed document; the value is inlined only when small.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub model: String,
    pub id: String,
    pub version: u64,
    pub updated: i64,
    /// Hex SHA-256 of the encoded value.
    pub digest: String,
    /// Encoded value size in bytes.
    pub val_size: usize,
    /// The decoded value (if small enough, otherwise None).
    pub val: Option<serde_json::Value>,
}

impl DocumentSummary {
    pub fn from_document(document: &Document, include_val_threshold: usize) -> Self {
        let val_size = document.val.len();
        let val = if val_size <= include_val_threshold {
            document.val.to_json().ok()
        } else {
            None
        };

        Self {
            model: document.model.clone(),
            id: document.id.clone(),
            version: document.version,
            updated: document.updated.0,
            digest: document.val.digest().to_hex(),
            val_size,
            val,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
