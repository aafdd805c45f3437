//! Streaming reactor sessions driven through the store.

use reactor_store::{
    DocumentStore, ReactorActivation, ReactorClient, ReactorMode, ReactorTransport, SessionState,
    StoreConfig, StoreError, Value, Verdict,
};
use serde_json::json;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ORDER: &str = "com.example.Order";

fn val(v: serde_json::Value) -> Value {
    Value::json(&v).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn connect(store: &DocumentStore, reactor: &str, models: &[&str]) -> ReactorClient {
    let (transport, client) = ReactorTransport::pair();
    let session = store.connect_reactor(transport).unwrap();
    client
        .start(reactor, models.iter().map(|m| m.to_string()).collect())
        .unwrap();
    assert!(session.wait_ready(Duration::from_secs(1)));
    client
}

/// Answer activations with `decide` until the store side goes away.
fn serve<F>(client: ReactorClient, decide: F) -> JoinHandle<usize>
where
    F: Fn(&ReactorClient, &ReactorActivation) -> Verdict + Send + 'static,
{
    thread::spawn(move || {
        let mut handled = 0;
        while let Ok(next) = client.next_activation(Duration::from_millis(50)) {
            if let Some(activation) = next {
                let verdict = decide(&client, &activation);
                if client.done(activation.activation, verdict).is_err() {
                    break;
                }
                handled += 1;
            }
        }
        handled
    })
}

#[test]
fn test_streaming_reactor_enriches() {
    init_tracing();
    let store = DocumentStore::new(StoreConfig::default());
    let client = connect(&store, "pricer", &[ORDER]);
    let reactor = serve(client, |_, activation| {
        let mut order = activation.pending_json().unwrap().unwrap();
        order["total"] = json!(order["qty"].as_i64().unwrap_or(0) * 3);
        Verdict::replace(Value::json(&order).unwrap())
    });

    let outcome = store.put(ORDER, "o1", val(json!({"qty": 4}))).unwrap();
    let stored = outcome.document.unwrap().val.to_json().unwrap();
    assert_eq!(stored, json!({"qty": 4, "total": 12}));

    store.shutdown();
    assert_eq!(reactor.join().unwrap(), 1);
}

#[test]
fn test_working_keeps_slow_reactor_alive() {
    let store = DocumentStore::new(StoreConfig {
        activation_timeout: Duration::from_millis(200),
        ..Default::default()
    });
    let client = connect(&store, "slow", &[ORDER]);
    let reactor = serve(client, |client, activation| {
        // Total work is well past the activation timeout.
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(100));
            client.working(activation.activation).unwrap();
        }
        Verdict::accept()
    });

    let started = Instant::now();
    let outcome = store.put(ORDER, "o1", val(json!({}))).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(outcome.version(), Some(1));

    store.shutdown();
    reactor.join().unwrap();
}

#[test]
fn test_silent_reactor_times_out() {
    init_tracing();
    let store = DocumentStore::new(StoreConfig {
        activation_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let client = connect(&store, "mute", &[ORDER]);

    let err = store.put(ORDER, "o1", val(json!({}))).unwrap_err();

    assert!(matches!(err, StoreError::ReactorTimeout { ref reactor } if reactor == "mute"));
    assert!(matches!(store.get(ORDER, "o1"), Err(StoreError::NotFound { .. })));
    // The activation was delivered even though it went unanswered.
    assert!(client.next_activation(Duration::from_millis(10)).unwrap().is_some());
}

#[test]
fn test_sync_and_streaming_run_in_registration_order() {
    let store = DocumentStore::new(StoreConfig::default());
    store
        .register_validator(ORDER, "stamp", |a: &ReactorActivation| {
            let mut order = a.pending_json().unwrap().unwrap();
            order["stamped"] = json!(true);
            Verdict::replace(Value::json(&order).unwrap())
        })
        .unwrap();

    let client = connect(&store, "auditor", &[ORDER]);
    let reactor = serve(client, |_, activation| {
        match activation.pending_json() {
            Ok(Some(order)) if order["stamped"] == json!(true) => Verdict::accept(),
            _ => Verdict::reject("unstamped order"),
        }
    });

    assert_eq!(
        store.registry().reactors_for(ORDER),
        vec![
            ("stamp".to_string(), ReactorMode::Sync),
            ("auditor".to_string(), ReactorMode::Streaming)
        ]
    );
    assert!(store.put(ORDER, "o1", val(json!({"qty": 1}))).is_ok());

    store.shutdown();
    reactor.join().unwrap();
}

#[test]
fn test_one_session_serves_concurrent_writers() {
    let store = Arc::new(DocumentStore::new(StoreConfig::default()));
    let client = connect(&store, "tagger", &[ORDER]);

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.put(ORDER, &format!("o{}", i), val(json!({"i": i}))))
        })
        .collect();

    // Hold every activation before answering any of them.
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut held = Vec::new();
    while held.len() < 8 && Instant::now() < deadline {
        if let Some(activation) = client.next_activation(Duration::from_millis(50)).unwrap() {
            held.push(activation);
        }
    }
    assert_eq!(held.len(), 8);

    for activation in held.iter().rev() {
        let mut order = activation.pending_json().unwrap().unwrap();
        order["tagged_for"] = json!(activation.id);
        client
            .done(activation.activation, Verdict::replace(Value::json(&order).unwrap()))
            .unwrap();
    }

    for (i, writer) in writers.into_iter().enumerate() {
        let document = writer.join().unwrap().unwrap().document.unwrap();
        let id = format!("o{}", i);
        assert_eq!(document.version, 1);
        assert_eq!(
            document.val.to_json().unwrap(),
            json!({"i": i, "tagged_for": id})
        );
    }
    assert_eq!(store.stats().document_count, 8);

    store.shutdown();
}

#[test]
fn test_handshake_timeout_closes_session() {
    init_tracing();
    let store = DocumentStore::new(StoreConfig {
        handshake_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let (transport, _client) = ReactorTransport::pair();
    let session = store.connect_reactor(transport).unwrap();

    assert!(!session.wait_ready(Duration::from_millis(500)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(store.registry().is_empty());
}

#[test]
fn test_shutdown_closes_sessions_and_refuses_connections() {
    let store = DocumentStore::new(StoreConfig::default());
    let _client = connect(&store, "mailer", &[ORDER]);
    assert_eq!(store.stats().live_sessions, 1);

    store.shutdown();

    assert_eq!(store.stats().live_sessions, 0);
    assert!(store.registry().is_empty());
    let (transport, _client2) = ReactorTransport::pair();
    assert!(matches!(
        store.connect_reactor(transport),
        Err(StoreError::Shutdown)
    ));
}
