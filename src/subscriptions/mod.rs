//! Live feed of committed changes.
//!
//! Subscribers receive an event for every committed put and delete, plus a
//! notice when a cascade chain is truncated. Buffers are bounded; a
//! subscriber that falls behind is dropped rather than slowing writers.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::models(vec!["com.example.Book".to_string()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::Committed { document }) => println!("{} v{}", document.id, document.version),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DocumentSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
