//! Main DocumentStore struct tying all components together.

use crate::error::{Result, StoreError};
use crate::pipeline::{CommitOutcome, FieldMutations, MutationPipeline, SubmitOptions};
use crate::reactors::{
    ReactorEndpoint, ReactorHub, ReactorMode, ReactorRegistry, ReactorSession, ReactorTransport,
    RegistrationId, SyncEndpoint, Validator,
};
use crate::search::{DocumentSearch, SearchRequest, SearchResponse};
use crate::storage::{MemoryEngine, StorageEngine};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{Document, DocumentKey, HistoryEntry, StoreStats, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Deepest cascade level that still runs; the root write is depth 0.
    pub max_cascade_depth: usize,

    /// How long a streaming reactor may stay silent on one activation.
    /// Each `Working` message restarts the window.
    pub activation_timeout: Duration,

    /// How long a new session has to send `Start`.
    pub handshake_timeout: Duration,

    /// Models that refuse writes while no reactor is registered for them.
    pub require_reactor_for: Vec<String>,

    /// Search page size when the request names none.
    pub default_search_limit: usize,

    /// Upper bound on any search page size.
    pub max_search_limit: usize,

    /// Values up to this many bytes are inlined in commit events.
    pub subscription_payload_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 8,
            activation_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            require_reactor_for: Vec::new(),
            default_search_limit: 100,
            max_search_limit: 1000,
            subscription_payload_threshold: 4096,
        }
    }
}

/// The document store.
///
/// Provides a unified interface for:
/// - Writing documents through the reactor pipeline
/// - Registering sync validators and streaming reactor sessions
/// - Reading, searching and walking history
/// - Following commits live
pub struct DocumentStore {
    config: StoreConfig,
    engine: Arc<dyn StorageEngine>,
    registry: Arc<ReactorRegistry>,
    hub: ReactorHub,
    pipeline: MutationPipeline,
    search: DocumentSearch,
    subscriptions: Arc<SubscriptionManager>,
    closed: AtomicBool,
}

impl DocumentStore {
    /// Create a store backed by an in-memory engine.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_engine(config, Arc::new(MemoryEngine::new()))
    }

    /// Create a store on top of an existing engine.
    pub fn with_engine(config: StoreConfig, engine: Arc<dyn StorageEngine>) -> Self {
        let registry = Arc::new(ReactorRegistry::new());
        let subscriptions = Arc::new(SubscriptionManager::with_payload_threshold(
            config.subscription_payload_threshold,
        ));
        let hub = ReactorHub::new(Arc::clone(&registry), config.handshake_timeout);
        let pipeline = MutationPipeline::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            config.clone(),
        );
        let search = DocumentSearch::new(
            Arc::clone(&engine),
            config.default_search_limit,
            config.max_search_limit,
        );

        Self {
            config,
            engine,
            registry,
            hub,
            pipeline,
            search,
            subscriptions,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &ReactorRegistry {
        &self.registry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }

    // --- Reactor Operations ---

    /// Register an in-process validator for `model`.
    pub fn register_validator<V>(&self, model: &str, reactor: &str, validator: V) -> Result<RegistrationId>
    where
        V: Validator + 'static,
    {
        self.register_reactor(
            model,
            reactor,
            ReactorMode::Sync,
            Arc::new(SyncEndpoint::new(validator)),
        )
    }

    /// Register any endpoint with an explicit mode.
    pub fn register_reactor(
        &self,
        model: &str,
        reactor: &str,
        mode: ReactorMode,
        endpoint: Arc<dyn ReactorEndpoint>,
    ) -> Result<RegistrationId> {
        self.ensure_open()?;
        crate::types::validate_part("model", model)?;
        self.registry.register(model, reactor, mode, endpoint)
    }

    /// Remove a reactor from every model it serves.
    pub fn deregister(&self, reactor: &str) -> usize {
        self.registry.deregister(reactor)
    }

    /// Open a streaming reactor session over `transport`.
    pub fn connect_reactor(&self, transport: ReactorTransport) -> Result<Arc<ReactorSession>> {
        self.ensure_open()?;
        self.hub.connect(transport)
    }

    // --- Write Operations ---

    /// Submit a new version with no version expectation.
    pub fn put(&self, model: &str, id: &str, val: Value) -> Result<CommitOutcome> {
        self.submit(model, id, val, SubmitOptions::default())
    }

    pub fn submit(&self, model: &str, id: &str, val: Value, opts: SubmitOptions) -> Result<CommitOutcome> {
        self.ensure_open()?;
        self.pipeline.submit(DocumentKey::new(model, id), val, opts)
    }

    pub fn delete(&self, model: &str, id: &str, opts: SubmitOptions) -> Result<CommitOutcome> {
        self.ensure_open()?;
        self.pipeline.delete(DocumentKey::new(model, id), opts)
    }

    pub fn mutate(
        &self,
        model: &str,
        id: &str,
        mutations: FieldMutations,
        opts: SubmitOptions,
    ) -> Result<CommitOutcome> {
        self.ensure_open()?;
        self.pipeline.mutate(DocumentKey::new(model, id), mutations, opts)
    }

    // --- Read Operations ---

    pub fn get(&self, model: &str, id: &str) -> Result<Document> {
        self.search.get(model, id)
    }

    pub fn history(&self, model: &str, id: &str) -> Result<Vec<HistoryEntry>> {
        self.search.history(model, id)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search.search(request)
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id)
    }

    // --- Store Operations ---

    pub fn stats(&self) -> StoreStats {
        let (document_count, history_entry_count) = self.engine.counts();
        StoreStats {
            document_count,
            history_entry_count,
            registered_reactors: self.registry.len() as u64,
            live_sessions: self.hub.live_count() as u64,
            subscriptions: self.subscriptions.subscription_count() as u64,
        }
    }

    /// Refuse further writes, close reactor sessions and drop subscribers.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub.shutdown();
        self.subscriptions.close_all();
        info!("document store shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
