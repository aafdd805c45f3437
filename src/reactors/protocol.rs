//! Envelopes exchanged between the store and a reactor.
//!
//! The same shapes serve both reactor modes. A synchronous reactor sees one
//! [`ReactorActivation`] and answers with one [`Verdict`]; a streaming
//! reactor speaks [`ReactorIn`] / [`ReactorOut`] over a long-lived session.

use crate::error::{Result, StoreError};
use crate::types::{Document, DocumentKey, Value};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Correlates a `Working`/`Done` message with the activation it answers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationId(pub u64);

impl fmt::Debug for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationId({})", self.0)
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session handshake: the reactor names itself and the models it handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorStart {
    pub id: String,
    pub models: Vec<String>,
}

/// Store -> reactor: validate or enrich this pending mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorActivation {
    pub activation: ActivationId,
    pub model: String,
    pub id: String,

    /// Committed document, if one exists.
    pub current: Option<Document>,

    /// Proposed document. `None` means the mutation is a delete.
    pub pending: Option<Document>,
}

impl ReactorActivation {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.model.clone(), self.id.clone())
    }

    pub fn is_delete(&self) -> bool {
        self.pending.is_none()
    }

    /// Decode the pending value as JSON, if there is one.
    pub fn pending_json(&self) -> Result<Option<serde_json::Value>> {
        self.pending.as_ref().map(|doc| doc.val.to_json()).transpose()
    }

    /// Decode the current value as JSON, if there is one.
    pub fn current_json(&self) -> Result<Option<serde_json::Value>> {
        self.current.as_ref().map(|doc| doc.val.to_json()).transpose()
    }
}

/// Reactor -> store: still working on an activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorWorking {
    pub activation: ActivationId,
}

/// An extra write a reactor asks for once the triggering write commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeWrite {
    pub model: String,
    pub id: String,
    pub val: Value,
}

impl CascadeWrite {
    pub fn new(model: impl Into<String>, id: impl Into<String>, val: Value) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
            val,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.model.clone(), self.id.clone())
    }
}

/// Terminal decision for one activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accept {
        /// Replacement for the pending value, seen by later reactors.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replace: Option<Value>,

        /// Writes to run after the triggering write commits, in order.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cascade: Vec<CascadeWrite>,
    },
    Reject {
        message: String,
    },
}

impl Verdict {
    pub fn accept() -> Self {
        Verdict::Accept {
            replace: None,
            cascade: Vec::new(),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Verdict::Reject {
            message: message.into(),
        }
    }

    pub fn replace(value: Value) -> Self {
        Verdict::Accept {
            replace: Some(value),
            cascade: Vec::new(),
        }
    }

    pub fn cascade(writes: Vec<CascadeWrite>) -> Self {
        Verdict::Accept {
            replace: None,
            cascade: writes,
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

/// Reactor -> store: verdict for an activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorDone {
    pub activation: ActivationId,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Messages a reactor sends to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactorIn {
    Start(ReactorStart),
    Working(ReactorWorking),
    Done(ReactorDone),
}

/// Messages the store sends to a reactor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactorOut {
    Activation(ReactorActivation),
}

/// Store side of a bidirectional reactor channel.
///
/// Any wire transport can be bridged onto this as long as it preserves
/// message order within one session.
pub struct ReactorTransport {
    pub inbound: Receiver<ReactorIn>,
    pub outbound: Sender<ReactorOut>,
}

impl ReactorTransport {
    /// Create a connected in-process pair.
    pub fn pair() -> (ReactorTransport, ReactorClient) {
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();

        (
            ReactorTransport {
                inbound: in_rx,
                outbound: out_tx,
            },
            ReactorClient {
                sender: in_tx,
                receiver: out_rx,
            },
        )
    }
}

/// Reactor side of a bidirectional reactor channel.
///
/// Dropping the client closes the session from the store's point of view.
pub struct ReactorClient {
    pub sender: Sender<ReactorIn>,
    pub receiver: Receiver<ReactorOut>,
}

impl ReactorClient {
    /// Send the handshake.
    pub fn start(&self, id: impl Into<String>, models: Vec<String>) -> Result<()> {
        self.send(ReactorIn::Start(ReactorStart {
            id: id.into(),
            models,
        }))
    }

    /// Send a keepalive for an outstanding activation.
    pub fn working(&self, activation: ActivationId) -> Result<()> {
        self.send(ReactorIn::Working(ReactorWorking { activation }))
    }

    /// Send the verdict for an activation.
    pub fn done(&self, activation: ActivationId, verdict: Verdict) -> Result<()> {
        self.send(ReactorIn::Done(ReactorDone {
            activation,
            verdict,
        }))
    }

    /// Wait for the next activation. `Ok(None)` on timeout.
    pub fn next_activation(&self, timeout: Duration) -> Result<Option<ReactorActivation>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(ReactorOut::Activation(activation)) => Ok(Some(activation)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Shutdown),
        }
    }

    fn send(&self, message: ReactorIn) -> Result<()> {
        self.sender.send(message).map_err(|_| StoreError::Shutdown)
    }
}
