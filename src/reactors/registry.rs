//! Registry of reactors per document model.

use crate::error::{Result, StoreError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::protocol::{ReactorActivation, Verdict};

/// How the store talks to a reactor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactorMode {
    /// One request, one response, no session.
    Sync,
    /// Long-lived session with correlated activations.
    Streaming,
}

/// Why an activation produced no verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationFailure {
    /// The reactor went away before the activation was dispatched.
    Unavailable,
    /// No `Done` arrived within the inactivity window.
    TimedOut,
    /// The session closed while the activation was outstanding.
    Closed,
}

impl fmt::Display for ActivationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationFailure::Unavailable => write!(f, "unavailable"),
            ActivationFailure::TimedOut => write!(f, "timed out"),
            ActivationFailure::Closed => write!(f, "session closed"),
        }
    }
}

/// Something that can answer an activation.
pub trait ReactorEndpoint: Send + Sync {
    /// Deliver an activation and block until a verdict, a failure, or
    /// `timeout` of inactivity.
    fn activate(
        &self,
        activation: ReactorActivation,
        timeout: Duration,
    ) -> std::result::Result<Verdict, ActivationFailure>;
}

/// Handle for one registration, used to remove exactly that entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// A reactor registered for a model.
#[derive(Clone)]
pub struct Registration {
    pub id: RegistrationId,
    pub reactor: String,
    pub mode: ReactorMode,
    pub endpoint: Arc<dyn ReactorEndpoint>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("reactor", &self.reactor)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Maps model names to their reactors, in registration order.
///
/// Registration order is invocation order; nothing is re-sorted.
pub struct ReactorRegistry {
    by_model: DashMap<String, Vec<Registration>>,
    next_id: AtomicU64,
}

impl ReactorRegistry {
    pub fn new() -> Self {
        Self {
            by_model: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `endpoint` as reactor `reactor` for `model`.
    pub fn register(
        &self,
        model: &str,
        reactor: &str,
        mode: ReactorMode,
        endpoint: Arc<dyn ReactorEndpoint>,
    ) -> Result<RegistrationId> {
        let mut entries = self.by_model.entry(model.to_string()).or_default();

        if entries.iter().any(|r| r.reactor == reactor) {
            return Err(StoreError::ReactorExists {
                model: model.to_string(),
                reactor: reactor.to_string(),
            });
        }

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.push(Registration {
            id,
            reactor: reactor.to_string(),
            mode,
            endpoint,
        });

        info!(model, reactor, ?mode, "reactor registered");
        Ok(id)
    }

    /// Reactors for `model`, in registration order.
    pub fn resolve(&self, model: &str) -> Vec<Registration> {
        self.by_model
            .get(model)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Remove a single registration.
    pub fn deregister_registration(&self, id: RegistrationId) -> bool {
        let mut removed = false;
        for mut entry in self.by_model.iter_mut() {
            let before = entry.len();
            entry.retain(|r| r.id != id);
            if entry.len() != before {
                removed = true;
                debug!(model = entry.key().as_str(), registration = id.0, "reactor deregistered");
            }
        }
        self.by_model.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Remove `reactor` from every model. Returns how many entries went.
    pub fn deregister(&self, reactor: &str) -> usize {
        let mut removed = 0;
        for mut entry in self.by_model.iter_mut() {
            let before = entry.len();
            entry.retain(|r| r.reactor != reactor);
            removed += before - entry.len();
        }
        self.by_model.retain(|_, entries| !entries.is_empty());

        if removed > 0 {
            info!(reactor, removed, "reactor deregistered");
        }
        removed
    }

    /// Reactor names and modes for `model`, in order.
    pub fn reactors_for(&self, model: &str) -> Vec<(String, ReactorMode)> {
        self.resolve(model)
            .into_iter()
            .map(|r| (r.reactor, r.mode))
            .collect()
    }

    /// Models with at least one reactor.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.by_model.iter().map(|e| e.key().clone()).collect();
        models.sort();
        models
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.by_model.iter().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReactorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Verdict);

    impl ReactorEndpoint for Fixed {
        fn activate(
            &self,
            _activation: ReactorActivation,
            _timeout: Duration,
        ) -> std::result::Result<Verdict, ActivationFailure> {
            Ok(self.0.clone())
        }
    }

    fn endpoint() -> Arc<dyn ReactorEndpoint> {
        Arc::new(Fixed(Verdict::accept()))
    }

    #[test]
    fn test_resolve_keeps_registration_order() {
        let registry = ReactorRegistry::new();
        registry.register("Book", "zeta", ReactorMode::Sync, endpoint()).unwrap();
        registry.register("Book", "alpha", ReactorMode::Streaming, endpoint()).unwrap();

        let names: Vec<_> = registry.resolve("Book").into_iter().map(|r| r.reactor).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(registry.resolve("Other").is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ReactorRegistry::new();
        registry.register("Book", "r1", ReactorMode::Sync, endpoint()).unwrap();

        let result = registry.register("Book", "r1", ReactorMode::Sync, endpoint());
        assert!(matches!(result, Err(StoreError::ReactorExists { .. })));

        // Same reactor on a different model is fine.
        registry.register("Email", "r1", ReactorMode::Sync, endpoint()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_deregister_by_name_and_by_handle() {
        let registry = ReactorRegistry::new();
        registry.register("Book", "r1", ReactorMode::Sync, endpoint()).unwrap();
        registry.register("Email", "r1", ReactorMode::Sync, endpoint()).unwrap();
        let keep = registry.register("Email", "r2", ReactorMode::Sync, endpoint()).unwrap();

        assert_eq!(registry.deregister("r1"), 2);
        assert_eq!(registry.models(), vec!["Email".to_string()]);

        assert!(registry.deregister_registration(keep));
        assert!(!registry.deregister_registration(keep));
        assert!(registry.is_empty());
    }
}
