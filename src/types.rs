//! Core types for the document store.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length of a model name or document id, in bytes.
pub const MAX_KEY_LEN: usize = 64;

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Content digest of a document value (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Compute digest from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Payload encoding format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Json,
    MessagePack,
}

/// Opaque, already-encoded document value.
///
/// The store never interprets a value beyond checking that it decodes.
/// Reactors and callers decode it into whatever shape they expect.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    encoding: PayloadEncoding,
    bytes: Vec<u8>,
}

impl Value {
    /// Encode `value` as JSON.
    pub fn json(value: &impl Serialize) -> Result<Self> {
        Ok(Self {
            encoding: PayloadEncoding::Json,
            bytes: serde_json::to_vec(value)?,
        })
    }

    /// Encode `value` as MessagePack (struct fields by name).
    pub fn msgpack(value: &impl Serialize) -> Result<Self> {
        Ok(Self {
            encoding: PayloadEncoding::MessagePack,
            bytes: rmp_serde::to_vec_named(value)?,
        })
    }

    /// Wrap bytes that are claimed to be in `encoding`.
    ///
    /// Nothing is checked here; the pipeline calls [`Value::check`] before
    /// a value reaches any reactor.
    pub fn from_raw(encoding: PayloadEncoding, bytes: Vec<u8>) -> Self {
        Self { encoding, bytes }
    }

    pub fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.encoding {
            PayloadEncoding::Json => serde_json::from_slice(&self.bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            PayloadEncoding::MessagePack => Ok(rmp_serde::from_slice(&self.bytes)?),
        }
    }

    /// Decode into a structural JSON value, regardless of encoding.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.decode()
    }

    /// Verify the bytes decode under the declared encoding.
    pub fn check(&self) -> Result<()> {
        self.to_json()
            .map(|_| ())
            .map_err(|e| StoreError::Validation(format!("malformed value: {}", e)))
    }

    /// Digest of the encoded bytes.
    pub fn digest(&self) -> Digest {
        Digest::from_bytes(&self.bytes)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoding {
            PayloadEncoding::Json => match std::str::from_utf8(&self.bytes) {
                Ok(text) => write!(f, "Value(json {})", text),
                Err(_) => write!(f, "Value(json, {} bytes)", self.bytes.len()),
            },
            PayloadEncoding::MessagePack => {
                write!(f, "Value(msgpack, {} bytes)", self.bytes.len())
            }
        }
    }
}

/// Primary key of a document.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub model: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }

    /// Check the model and id against the accepted key alphabet.
    pub fn validate(&self) -> Result<()> {
        validate_part("model", &self.model)?;
        validate_part("id", &self.id)
    }
}

pub(crate) fn validate_part(what: &str, s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(StoreError::Validation(format!("/{} must not be empty", what)));
    }
    if s.len() > MAX_KEY_LEN {
        return Err(StoreError::Validation(format!(
            "/{} must be at most {} bytes",
            what, MAX_KEY_LEN
        )));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '@')))
    {
        return Err(StoreError::Validation(format!(
            "/{} has invalid character: {:?}",
            what, c
        )));
    }
    Ok(())
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentKey({}/{})", self.model, self.id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.id)
    }
}

/// A committed document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub model: String,
    pub id: String,

    /// Commit counter for this key, starting at 1.
    pub version: u64,

    pub val: Value,

    /// When the first version of this document was committed.
    pub created: Timestamp,

    /// When this version was committed.
    pub updated: Timestamp,
}

impl Document {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.model.clone(), self.id.clone())
    }
}

/// What replaced a document version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Supersession {
    /// Replaced by the given version.
    Update(u64),
    /// Removed by a delete.
    Delete,
}

/// One superseded version of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub document: Document,

    /// When this version was committed.
    pub committed_at: Timestamp,

    /// When this version stopped being current.
    pub superseded_at: Timestamp,

    pub superseded_by: Supersession,

    pub digest: Digest,
}

impl HistoryEntry {
    pub fn new(document: Document, superseded_by: Supersession) -> Self {
        Self {
            committed_at: document.updated,
            superseded_at: Timestamp::now(),
            digest: document.val.digest(),
            superseded_by,
            document,
        }
    }

    pub fn version(&self) -> u64 {
        self.document.version
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub document_count: u64,
    pub history_entry_count: u64,
    pub registered_reactors: u64,
    pub live_sessions: u64,
    pub subscriptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_json_and_msgpack_agree() {
        let payload = json!({"name": "X", "pages": 12});
        let a = Value::json(&payload).unwrap();
        let b = Value::msgpack(&payload).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_value_check_rejects_garbage() {
        let bad = Value::from_raw(PayloadEncoding::Json, b"{not json".to_vec());
        assert!(matches!(bad.check(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_key_validation() {
        assert!(DocumentKey::new("com.example.Book", "b1").validate().is_ok());
        assert!(DocumentKey::new("com.example.Email", "b1@user@example.com")
            .validate()
            .is_ok());
        assert!(DocumentKey::new("", "b1").validate().is_err());
        assert!(DocumentKey::new("Book", "has space").validate().is_err());
        assert!(DocumentKey::new("Book", "snake_case").validate().is_err());
        assert!(DocumentKey::new("Book", "x".repeat(MAX_KEY_LEN + 1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_digest_hex() {
        let digest = Digest::from_bytes(b"hello");
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest, Value::from_raw(PayloadEncoding::Json, b"hello".to_vec()).digest());
    }
}
