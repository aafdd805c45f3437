//! # Reactor Store
//!
//! A versioned document store whose writes pass through reactors: external
//! collaborators that can validate, veto, enrich, or cascade a change before
//! and after it commits.
//!
//! ## Core Concepts
//!
//! - **Documents**: `(model, id)` keyed values with a version counter
//! - **History**: append-only log of every superseded version
//! - **Reactors**: sync validators or streaming sessions, run in registration order
//! - **Cascades**: follow-up writes requested by reactors, bounded in depth
//!
//! ## Example
//!
//! ```ignore
//! use reactor_store::{DocumentStore, StoreConfig, SubmitOptions, Value, Verdict};
//!
//! let store = DocumentStore::new(StoreConfig::default());
//!
//! store.register_validator("com.example.Book", "has-title", |a: &ReactorActivation| {
//!     match a.pending_json() {
//!         Ok(Some(v)) if v["title"].is_string() => Verdict::accept(),
//!         Ok(None) => Verdict::accept(),
//!         _ => Verdict::reject("title is required"),
//!     }
//! })?;
//!
//! let outcome = store.put("com.example.Book", "b1", Value::json(&json!({"title": "X"}))?)?;
//! assert_eq!(outcome.version(), Some(1));
//!
//! store.submit("com.example.Book", "b1", Value::json(&json!({"title": "Y"}))?, SubmitOptions::expect(1))?;
//! ```

pub mod error;
pub mod pipeline;
pub mod reactors;
pub mod search;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use pipeline::{
    CancelToken, CascadeOutcome, CommitOutcome, CommitWarning, FieldMutations, MutationOp,
    MutationPipeline, SubmitOptions,
};
pub use reactors::{
    ActivationFailure, ActivationId, CascadeWrite, Immutable, JsonSchemaValidator, ReactorActivation, ReactorClient,
    ReactorDone, ReactorEndpoint, ReactorHub, ReactorIn, ReactorMode, ReactorOut,
    ReactorRegistry, ReactorSession, ReactorStart, ReactorTransport, ReactorWorking,
    Registration, RegistrationId, SessionId, SessionState, SyncEndpoint, Validator, Verdict,
};
pub use search::{DocumentSearch, Filter, SearchHits, SearchRequest, SearchResponse};
pub use storage::{MemoryEngine, StorageEngine};
pub use store::{DocumentStore, StoreConfig};
pub use subscriptions::{
    DocumentSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
