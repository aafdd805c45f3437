//! Subscription manager for broadcasting commit events.

use crate::types::{Document, DocumentKey};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{
    DocumentSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};

/// Default threshold for inlining values in commit events (bytes).
const DEFAULT_PAYLOAD_THRESHOLD: usize = 4096;

struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// False if the buffer is full or the receiver is gone.
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    payload_threshold: usize,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::with_payload_threshold(DEFAULT_PAYLOAD_THRESHOLD)
    }

    /// Values larger than `threshold` bytes are summarized without the value.
    pub fn with_payload_threshold(threshold: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            payload_threshold: threshold,
        }
    }

    /// Create a new live subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });
        debug!(subscription = id.0, "subscribed");

        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drop every subscriber with a `Shutdown` notice.
    pub fn close_all(&self) {
        for (_, sub) in self.subscriptions.write().drain() {
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Shutdown,
            });
        }
    }

    // --- Broadcasting ---

    pub fn broadcast_commit(&self, document: &Document) {
        let summary = DocumentSummary::from_document(document, self.payload_threshold);
        let event = StoreEvent::Committed { document: summary };

        self.broadcast(
            |sub| sub.config.filter.include_commits && sub.config.filter.wants_model(&document.model),
            event,
        );
    }

    /// `prior` is the document that was current before the delete.
    pub fn broadcast_delete(&self, prior: &Document) {
        let event = StoreEvent::Deleted {
            model: prior.model.clone(),
            id: prior.id.clone(),
            version: prior.version,
        };

        self.broadcast(
            |sub| sub.config.filter.include_deletes && sub.config.filter.wants_model(&prior.model),
            event,
        );
    }

    pub fn broadcast_cascade_truncated(&self, key: &DocumentKey, depth: usize) {
        let event = StoreEvent::CascadeTruncated {
            model: key.model.clone(),
            id: key.id.clone(),
            depth,
        };

        self.broadcast(
            |sub| {
                sub.config.filter.include_cascade_events && sub.config.filter.wants_model(&key.model)
            },
            event,
        );
    }

    /// Sends to matching subscribers and drops the ones that cannot keep up.
    fn broadcast<F>(&self, filter: F, event: StoreEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    debug!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
