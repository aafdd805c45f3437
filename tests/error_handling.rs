//! Error handling tests.
//!
//! Every failure mode must leave the current document and its history
//! exactly as they were.

use reactor_store::{
    ActivationFailure, Document, DocumentKey, DocumentStore, HistoryEntry, MemoryEngine,
    PayloadEncoding, ReactorActivation, ReactorEndpoint, ReactorMode, Result, StorageEngine,
    StoreConfig, StoreError, SubmitOptions, Value, Verdict,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BOOK: &str = "com.example.Book";

fn val(v: serde_json::Value) -> Value {
    Value::json(&v).unwrap()
}

/// Current document and history, for before/after comparison.
fn snapshot(store: &DocumentStore, id: &str) -> (Option<Document>, Vec<HistoryEntry>) {
    (store.get(BOOK, id).ok(), store.history(BOOK, id).unwrap())
}

/// Delegates to a memory engine but can be told to fail history appends.
#[derive(Default)]
struct FlakyEngine {
    inner: MemoryEngine,
    fail_history: AtomicBool,
}

impl StorageEngine for FlakyEngine {
    fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        self.inner.get(key)
    }

    fn put(&self, document: &Document) -> Result<()> {
        self.inner.put(document)
    }

    fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("history volume is read-only".into()));
        }
        self.inner.append_history(entry)
    }

    fn delete(&self, key: &DocumentKey) -> Result<()> {
        self.inner.delete(key)
    }

    fn history(&self, key: &DocumentKey) -> Result<Vec<HistoryEntry>> {
        self.inner.history(key)
    }

    fn scan(&self, model: &str, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        self.inner.scan(model, after, limit)
    }

    fn counts(&self) -> (u64, u64) {
        self.inner.counts()
    }
}

// --- Conflicts ---

#[test]
fn test_stale_expected_version_conflicts() {
    let store = DocumentStore::new(StoreConfig::default());
    store.put(BOOK, "b1", val(json!({"n": 1}))).unwrap();
    store.put(BOOK, "b1", val(json!({"n": 2}))).unwrap();
    let before = snapshot(&store, "b1");

    let err = store
        .submit(BOOK, "b1", val(json!({"n": 3})), SubmitOptions::expect(1))
        .unwrap_err();

    assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2 }));
    assert!(err.is_retryable());
    assert_eq!(snapshot(&store, "b1"), before);
}

#[test]
fn test_expected_version_on_missing_document() {
    let store = DocumentStore::new(StoreConfig::default());

    let err = store
        .submit(BOOK, "b1", val(json!({})), SubmitOptions::expect(4))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { expected: 4, actual: 0 }));
    assert_eq!(store.stats().document_count, 0);
}

// --- Rejections ---

#[test]
fn test_rejection_is_byte_identical() {
    let store = DocumentStore::new(StoreConfig::default());
    store.put(BOOK, "b1", val(json!({"title": "X"}))).unwrap();
    store.put(BOOK, "b1", val(json!({"title": "Y"}))).unwrap();
    store
        .register_validator(BOOK, "no-z", |a: &ReactorActivation| match a.pending_json() {
            Ok(Some(v)) if v["title"] == json!("Z") => Verdict::reject("no Z allowed"),
            _ => Verdict::accept(),
        })
        .unwrap();
    let before = snapshot(&store, "b1");

    let err = store.put(BOOK, "b1", val(json!({"title": "Z"}))).unwrap_err();

    assert!(matches!(err, StoreError::Rejected { ref message, .. } if message == "no Z allowed"));
    assert!(!err.is_retryable());
    assert_eq!(snapshot(&store, "b1"), before);
}

#[test]
fn test_first_rejection_stops_later_reactors() {
    let store = DocumentStore::new(StoreConfig::default());
    let later_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&later_ran);

    store
        .register_validator(BOOK, "first", |_: &ReactorActivation| Verdict::reject("no"))
        .unwrap();
    store
        .register_validator(BOOK, "second", move |_: &ReactorActivation| {
            flag.store(true, Ordering::SeqCst);
            Verdict::accept()
        })
        .unwrap();

    let err = store.put(BOOK, "b1", val(json!({}))).unwrap_err();
    assert!(matches!(err, StoreError::Rejected { ref reactor, .. } if reactor == "first"));
    assert!(!later_ran.load(Ordering::SeqCst));
}

#[test]
fn test_rejected_root_produces_no_cascade() {
    let store = DocumentStore::new(StoreConfig::default());
    store
        .register_validator(BOOK, "fanout", |_: &ReactorActivation| {
            Verdict::cascade(vec![reactor_store::CascadeWrite::new(
                "Audit",
                "a1",
                Value::json(&json!({})).unwrap(),
            )])
        })
        .unwrap();
    store
        .register_validator(BOOK, "veto", |_: &ReactorActivation| Verdict::reject("vetoed"))
        .unwrap();

    assert!(store.put(BOOK, "b1", val(json!({}))).is_err());
    assert!(matches!(store.get("Audit", "a1"), Err(StoreError::NotFound { .. })));
}

// --- Validation ---

#[test]
fn test_invalid_keys_fail_before_reactors() {
    let store = DocumentStore::new(StoreConfig::default());
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    store
        .register_validator(BOOK, "spy", move |_: &ReactorActivation| {
            flag.store(true, Ordering::SeqCst);
            Verdict::accept()
        })
        .unwrap();

    let too_long = "x".repeat(65);
    for id in ["", "has space", "slash/id", too_long.as_str()] {
        let err = store.put(BOOK, id, val(json!({}))).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "id {:?} gave {:?}", id, err);
    }
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn test_malformed_values() {
    let store = DocumentStore::new(StoreConfig::default());

    let garbage = Value::from_raw(PayloadEncoding::Json, b"{\"unterminated\": ".to_vec());
    assert!(matches!(
        store.put(BOOK, "b1", garbage),
        Err(StoreError::Validation(_))
    ));

    let garbage = Value::from_raw(PayloadEncoding::MessagePack, vec![0xc1]);
    assert!(matches!(
        store.put(BOOK, "b2", garbage),
        Err(StoreError::Validation(_))
    ));

    store
        .register_validator(BOOK, "broken", |_: &ReactorActivation| {
            Verdict::replace(Value::from_raw(PayloadEncoding::Json, b"nope".to_vec()))
        })
        .unwrap();
    assert!(matches!(
        store.put(BOOK, "b3", val(json!({}))),
        Err(StoreError::Validation(_))
    ));
    assert_eq!(store.stats().document_count, 0);
}

#[test]
fn test_required_reactor_missing() {
    let store = DocumentStore::new(StoreConfig {
        require_reactor_for: vec![BOOK.to_string()],
        ..Default::default()
    });

    assert!(matches!(
        store.put(BOOK, "b1", val(json!({}))),
        Err(StoreError::ReactorUnavailable(ref model)) if model == BOOK
    ));
    // Other models are unaffected.
    assert!(store.put("com.example.Author", "a1", val(json!({}))).is_ok());
}

/// A registration whose reactor is already gone when the write reaches it.
struct Departed;

impl ReactorEndpoint for Departed {
    fn activate(
        &self,
        _activation: ReactorActivation,
        _timeout: Duration,
    ) -> std::result::Result<Verdict, ActivationFailure> {
        Err(ActivationFailure::Unavailable)
    }
}

#[test]
fn test_required_reactor_gone_before_dispatch() {
    let store = DocumentStore::new(StoreConfig {
        require_reactor_for: vec![BOOK.to_string()],
        ..Default::default()
    });
    store
        .register_reactor(BOOK, "departed", ReactorMode::Streaming, Arc::new(Departed))
        .unwrap();

    assert!(matches!(
        store.put(BOOK, "b1", val(json!({}))),
        Err(StoreError::ReactorUnavailable(ref model)) if model == BOOK
    ));
    assert_eq!(store.stats().document_count, 0);

    // Without the policy the vanished reactor is simply skipped.
    store
        .register_reactor("com.example.Author", "departed", ReactorMode::Streaming, Arc::new(Departed))
        .unwrap();
    assert_eq!(
        store.put("com.example.Author", "a1", val(json!({}))).unwrap().version(),
        Some(1)
    );
}

// --- Storage failures ---

#[test]
fn test_history_failure_leaves_no_partial_commit() {
    let engine = Arc::new(FlakyEngine::default());
    let store = DocumentStore::with_engine(StoreConfig::default(), Arc::clone(&engine) as Arc<dyn StorageEngine>);
    store.put(BOOK, "b1", val(json!({"n": 1}))).unwrap();
    let before = snapshot(&store, "b1");

    engine.fail_history.store(true, Ordering::SeqCst);
    let err = store.put(BOOK, "b1", val(json!({"n": 2}))).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(snapshot(&store, "b1"), before);

    let err = store.delete(BOOK, "b1", SubmitOptions::default()).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(snapshot(&store, "b1"), before);

    engine.fail_history.store(false, Ordering::SeqCst);
    let outcome = store.put(BOOK, "b1", val(json!({"n": 2}))).unwrap();
    assert_eq!(outcome.version(), Some(2));
}

#[test]
fn test_mutation_errors() {
    let store = DocumentStore::new(StoreConfig::default());
    store.put(BOOK, "b1", val(json!({"title": "X", "stock": 0}))).unwrap();
    let before = snapshot(&store, "b1");

    let div = reactor_store::FieldMutations::from_json(&json!({"stock": {"div": 0}})).unwrap();
    assert!(matches!(
        store.mutate(BOOK, "b1", div, SubmitOptions::default()),
        Err(StoreError::Validation(_))
    ));

    let add = reactor_store::FieldMutations::new().add("title", 1);
    assert!(matches!(
        store.mutate(BOOK, "b1", add, SubmitOptions::default()),
        Err(StoreError::Validation(_))
    ));

    assert_eq!(snapshot(&store, "b1"), before);
}
