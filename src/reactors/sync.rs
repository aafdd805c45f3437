//! Synchronous reactors: one activation in, one verdict out.

use jsonschema::JSONSchema;
use serde_json::{json, Value as Json};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::protocol::{ReactorActivation, Verdict};
use crate::error::{Result, StoreError};
use super::registry::{ActivationFailure, ReactorEndpoint};

/// A reactor answering activations in-line.
///
/// Implemented for any `Fn(&ReactorActivation) -> Verdict`, so simple
/// validators can be registered as closures.
pub trait Validator: Send + Sync {
    fn validate(&self, activation: &ReactorActivation) -> Verdict;
}

impl<F> Validator for F
where
    F: Fn(&ReactorActivation) -> Verdict + Send + Sync,
{
    fn validate(&self, activation: &ReactorActivation) -> Verdict {
        self(activation)
    }
}

/// Adapts a [`Validator`] to the registry's endpoint interface.
///
/// The call runs on the submitting thread; the inactivity timeout does not
/// apply because there is no session to go quiet. Validators that talk to a
/// remote service bound their own calls.
pub struct SyncEndpoint<V> {
    validator: V,
}

impl<V: Validator> SyncEndpoint<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }
}

impl<V: Validator> ReactorEndpoint for SyncEndpoint<V> {
    fn activate(
        &self,
        activation: ReactorActivation,
        _timeout: Duration,
    ) -> std::result::Result<Verdict, ActivationFailure> {
        debug!(activation = %activation.activation, model = %activation.model, id = %activation.id, "sync activation");
        Ok(self.validator.validate(&activation))
    }
}

/// Rejects any change to a document that already exists.
///
/// Creates and deletes pass through.
#[derive(Clone, Copy, Debug, Default)]
pub struct Immutable;

impl Validator for Immutable {
    fn validate(&self, activation: &ReactorActivation) -> Verdict {
        if activation.current.is_some() && activation.pending.is_some() {
            Verdict::reject("document is immutable")
        } else {
            Verdict::accept()
        }
    }
}

/// Rejects candidates that do not match a JSON schema.
///
/// A schema without a `type` is taken to describe an object. Deletes pass.
pub struct JsonSchemaValidator {
    compiled: JSONSchema,
}

impl JsonSchemaValidator {
    pub fn new(mut schema: Json) -> Result<Self> {
        let object = schema
            .as_object_mut()
            .ok_or_else(|| StoreError::Validation("schema must be a JSON object".into()))?;
        object.entry("type").or_insert_with(|| json!("object"));

        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| StoreError::Validation(format!("invalid schema: {}", e)))?;
        Ok(Self { compiled })
    }
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, activation: &ReactorActivation) -> Verdict {
        let candidate = match activation.pending_json() {
            Ok(Some(v)) => v,
            Ok(None) => return Verdict::accept(),
            Err(e) => return Verdict::reject(e.to_string()),
        };

        let first_error = match self.compiled.validate(&candidate) {
            Ok(()) => return Verdict::accept(),
            Err(mut errors) => errors.next().map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            }),
        };
        Verdict::reject(first_error.unwrap_or_else(|| "schema validation failed".into()))
    }
}
