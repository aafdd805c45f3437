//! The mutation pipeline.
//!
//! Every write goes through the same sequence under a per-key lock:
//! validate, load current, check the expected version, run each reactor
//! for the model in registration order, then commit and record history.
//! Cascade writes requested by reactors run afterwards as independent
//! writes, driven from an explicit work stack with a depth bound.

mod locks;
mod mutate;

pub use locks::{KeyGuard, KeyLocks};
pub use mutate::{FieldMutations, MutationOp};

use crate::error::{Result, StoreError};
use crate::reactors::{
    ActivationFailure, ActivationId, CascadeWrite, ReactorActivation, ReactorRegistry, Verdict,
};
use crate::storage::StorageEngine;
use crate::store::StoreConfig;
use crate::subscriptions::SubscriptionManager;
use crate::types::{Document, DocumentKey, HistoryEntry, PayloadEncoding, Supersession, Timestamp, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Cooperative cancellation for a submission.
///
/// Checked before every reactor invocation and right before commit. Once a
/// submission has committed, cancelling has no effect.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options for `submit`, `delete` and `mutate`.
#[derive(Clone, Debug, Default)]
pub struct SubmitOptions {
    /// Version the caller believes is current. `Some(0)` means "must not exist".
    pub expected_version: Option<u64>,
    pub cancel: Option<CancelToken>,
}

impl SubmitOptions {
    pub fn expect(version: u64) -> Self {
        Self {
            expected_version: Some(version),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StoreError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// A cascade write that committed.
#[derive(Clone, Debug)]
pub struct CascadeOutcome {
    /// 1 for writes requested by the root's reactors, 2 for theirs, ...
    pub depth: usize,
    pub document: Document,
}

/// Non-fatal problems attached to a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitWarning {
    /// The cascade chain reached `depth`, beyond the configured bound.
    /// `dropped` cascade writes were not attempted.
    CascadeLimitExceeded { depth: usize, dropped: usize },

    /// One cascade write failed. The root and other cascades still stand.
    CascadeFailed {
        model: String,
        id: String,
        depth: usize,
        error: String,
    },
}

/// Result of a successful submission.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    /// The new current document, or `None` after a delete.
    pub document: Option<Document>,
    /// Cascade writes that committed, in the order they ran.
    pub cascades: Vec<CascadeOutcome>,
    pub warnings: Vec<CommitWarning>,
}

impl CommitOutcome {
    pub fn version(&self) -> Option<u64> {
        self.document.as_ref().map(|doc| doc.version)
    }

    pub fn cascade_truncated(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, CommitWarning::CascadeLimitExceeded { .. }))
    }
}

enum WriteIntent {
    Put(Value),
    Mutate(FieldMutations),
    Delete,
}

/// A single committed write plus the cascades its reactors asked for.
struct Committed {
    document: Option<Document>,
    cascade: Vec<CascadeWrite>,
}

/// Orchestrates writes through reactors into the storage engine.
pub struct MutationPipeline {
    engine: Arc<dyn StorageEngine>,
    registry: Arc<ReactorRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    locks: KeyLocks,
    next_activation: AtomicU64,
    config: StoreConfig,
}

impl MutationPipeline {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        registry: Arc<ReactorRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        config: StoreConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            subscriptions,
            locks: KeyLocks::new(),
            next_activation: AtomicU64::new(1),
            config,
        }
    }

    /// Put `val` as the next version of `key`.
    pub fn submit(&self, key: DocumentKey, val: Value, opts: SubmitOptions) -> Result<CommitOutcome> {
        self.run(key, WriteIntent::Put(val), opts)
    }

    /// Delete the current version of `key`. Reactors see `pending: None`.
    pub fn delete(&self, key: DocumentKey, opts: SubmitOptions) -> Result<CommitOutcome> {
        self.run(key, WriteIntent::Delete, opts)
    }

    /// Apply field mutations to the current value and submit the result.
    pub fn mutate(
        &self,
        key: DocumentKey,
        mutations: FieldMutations,
        opts: SubmitOptions,
    ) -> Result<CommitOutcome> {
        self.run(key, WriteIntent::Mutate(mutations), opts)
    }

    /// Keys currently locked or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.active()
    }

    fn run(&self, key: DocumentKey, intent: WriteIntent, opts: SubmitOptions) -> Result<CommitOutcome> {
        let root = self.commit_one(&key, intent, &opts)?;

        let mut outcome = CommitOutcome {
            document: root.document,
            cascades: Vec::new(),
            warnings: Vec::new(),
        };
        if !root.cascade.is_empty() {
            self.run_cascades(root.cascade, &mut outcome);
        }
        Ok(outcome)
    }

    /// Everything from validation to commit for one key. The key lock is
    /// released on return, before any cascade runs.
    fn commit_one(&self, key: &DocumentKey, intent: WriteIntent, opts: &SubmitOptions) -> Result<Committed> {
        key.validate()?;
        if let WriteIntent::Put(val) = &intent {
            val.check()?;
        }

        let _guard = self.locks.acquire(key);
        opts.check_cancelled()?;

        let current = self.engine.get(key)?;
        let actual = current.as_ref().map_or(0, |doc| doc.version);

        if matches!(intent, WriteIntent::Delete) && current.is_none() {
            return Err(StoreError::NotFound {
                model: key.model.clone(),
                id: key.id.clone(),
            });
        }
        if let Some(expected) = opts.expected_version {
            if expected != actual {
                debug!(model = %key.model, id = %key.id, expected, actual, "version conflict");
                return Err(StoreError::Conflict { expected, actual });
            }
        }

        let mut pending = match intent {
            WriteIntent::Put(val) => Some(val),
            WriteIntent::Mutate(mutations) => Some(Self::apply_mutations(current.as_ref(), &mutations)?),
            WriteIntent::Delete => None,
        };

        let version = match &current {
            Some(doc) => doc.version + 1,
            None => self.engine.last_version(key)? + 1,
        };
        let now = Timestamp::now();
        let created = current.as_ref().map_or(now, |doc| doc.created);

        let reactors = self.registry.resolve(&key.model);
        let required = self.config.require_reactor_for.iter().any(|m| m == &key.model);
        if reactors.is_empty() && required {
            return Err(StoreError::ReactorUnavailable(key.model.clone()));
        }

        let mut cascade = Vec::new();
        let mut answered = 0usize;
        for registration in reactors {
            opts.check_cancelled()?;

            let activation = ReactorActivation {
                activation: ActivationId(self.next_activation.fetch_add(1, Ordering::Relaxed)),
                model: key.model.clone(),
                id: key.id.clone(),
                current: current.clone(),
                pending: pending.as_ref().map(|val| Document {
                    model: key.model.clone(),
                    id: key.id.clone(),
                    version,
                    val: val.clone(),
                    created,
                    updated: now,
                }),
            };
            let activation_id = activation.activation;

            match registration
                .endpoint
                .activate(activation, self.config.activation_timeout)
            {
                Ok(Verdict::Reject { message }) => {
                    info!(
                        model = %key.model,
                        id = %key.id,
                        reactor = %registration.reactor,
                        activation = %activation_id,
                        %message,
                        "mutation rejected"
                    );
                    return Err(StoreError::Rejected {
                        reactor: registration.reactor.clone(),
                        message,
                    });
                }
                Ok(Verdict::Accept { replace, cascade: writes }) => {
                    answered += 1;
                    if let Some(val) = replace {
                        if pending.is_some() {
                            val.check()?;
                            pending = Some(val);
                        } else {
                            warn!(
                                model = %key.model,
                                id = %key.id,
                                reactor = %registration.reactor,
                                "ignoring replacement value for a delete"
                            );
                        }
                    }
                    cascade.extend(writes);
                }
                Err(ActivationFailure::Unavailable) => {
                    debug!(reactor = %registration.reactor, "reactor went away before dispatch, skipping");
                }
                Err(failure) => {
                    warn!(
                        model = %key.model,
                        id = %key.id,
                        reactor = %registration.reactor,
                        activation = %activation_id,
                        %failure,
                        "reactor did not deliver a verdict"
                    );
                    return Err(StoreError::ReactorTimeout {
                        reactor: registration.reactor.clone(),
                    });
                }
            }
        }

        // Every resolved reactor may have vanished before dispatch.
        if answered == 0 && required {
            return Err(StoreError::ReactorUnavailable(key.model.clone()));
        }

        opts.check_cancelled()?;

        let document = match pending {
            Some(val) => {
                let document = Document {
                    model: key.model.clone(),
                    id: key.id.clone(),
                    version,
                    val,
                    created,
                    updated: now,
                };
                self.commit_put(&document, current)?;
                self.subscriptions.broadcast_commit(&document);
                debug!(model = %key.model, id = %key.id, version, "committed");
                Some(document)
            }
            None => {
                let prior = current.ok_or_else(|| StoreError::NotFound {
                    model: key.model.clone(),
                    id: key.id.clone(),
                })?;
                self.commit_delete(key, &prior)?;
                self.subscriptions.broadcast_delete(&prior);
                debug!(model = %key.model, id = %key.id, version = prior.version, "deleted");
                None
            }
        };

        Ok(Committed { document, cascade })
    }

    fn apply_mutations(current: Option<&Document>, mutations: &FieldMutations) -> Result<Value> {
        let current_json = current.map(|doc| doc.val.to_json()).transpose()?;
        let next = mutations.apply(current_json.as_ref())?;

        match current.map(|doc| doc.val.encoding()) {
            Some(PayloadEncoding::MessagePack) => Value::msgpack(&next),
            _ => Value::json(&next),
        }
    }

    // --- Commit ---

    /// Write the new current, then archive the prior one. If archiving
    /// fails the prior current is restored.
    fn commit_put(&self, document: &Document, prior: Option<Document>) -> Result<()> {
        self.engine.put(document)?;

        let Some(prior) = prior else {
            return Ok(());
        };
        let entry = HistoryEntry::new(prior.clone(), Supersession::Update(document.version));
        if let Err(e) = self.engine.append_history(entry) {
            if let Err(restore) = self.engine.put(&prior) {
                error!(key = %prior.key(), error = %restore, "failed to restore prior version");
            }
            return Err(e);
        }
        Ok(())
    }

    fn commit_delete(&self, key: &DocumentKey, prior: &Document) -> Result<()> {
        self.engine.delete(key)?;

        if let Err(e) = self
            .engine
            .append_history(HistoryEntry::new(prior.clone(), Supersession::Delete))
        {
            if let Err(restore) = self.engine.put(prior) {
                error!(%key, error = %restore, "failed to restore deleted document");
            }
            return Err(e);
        }
        Ok(())
    }

    // --- Cascades ---

    /// Depth-first, in emission order. The stack holds `(write, depth)`.
    fn run_cascades(&self, writes: Vec<CascadeWrite>, outcome: &mut CommitOutcome) {
        let mut stack: Vec<(CascadeWrite, usize)> = writes.into_iter().rev().map(|w| (w, 1)).collect();

        while let Some((write, depth)) = stack.pop() {
            let key = write.key();

            if depth > self.config.max_cascade_depth {
                let dropped = stack.len() + 1;
                warn!(%key, depth, dropped, "cascade depth limit exceeded, truncating");
                self.subscriptions.broadcast_cascade_truncated(&key, depth);
                outcome
                    .warnings
                    .push(CommitWarning::CascadeLimitExceeded { depth, dropped });
                break;
            }

            match self.commit_one(&key, WriteIntent::Put(write.val), &SubmitOptions::default()) {
                Ok(committed) => {
                    stack.extend(committed.cascade.into_iter().rev().map(|w| (w, depth + 1)));
                    if let Some(document) = committed.document {
                        outcome.cascades.push(CascadeOutcome { depth, document });
                    }
                }
                Err(e) => {
                    warn!(%key, depth, error = %e, "cascade write failed");
                    outcome.warnings.push(CommitWarning::CascadeFailed {
                        model: key.model,
                        id: key.id,
                        depth,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
