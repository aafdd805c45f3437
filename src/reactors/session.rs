//! Streaming reactor sessions.
//!
//! A session moves `Connecting -> Ready -> Closed`. While `Ready` it carries
//! any number of concurrent activations; each one is correlated by its
//! [`ActivationId`] through a waiting table, not by message order.
//!
//! ```text
//!  submit thread                session thread               reactor
//!  -------------                --------------               -------
//!  activate() ──insert waiter──► waiting table
//!            ──Activation──────────────────────────────────► handle
//!                               ◄──Working──────────────────
//!            ◄──Working─────── route()
//!                               ◄──Done─────────────────────
//!            ◄──Done────────── route() (waiter removed)
//! ```

use crate::error::Result;
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::protocol::{
    ActivationId, ReactorActivation, ReactorIn, ReactorOut, ReactorStart, ReactorTransport,
    Verdict,
};
use super::registry::{
    ActivationFailure, ReactorEndpoint, ReactorMode, ReactorRegistry, RegistrationId,
};

/// Identifies one session within a hub.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the reactor's `Start`.
    Connecting,
    /// Registered and accepting activations.
    Ready,
    /// Terminal.
    Closed,
}

enum ActivationSignal {
    Working,
    Done(Verdict),
}

/// One streaming reactor connection.
pub struct ReactorSession {
    id: SessionId,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    start: Mutex<Option<ReactorStart>>,
    outbound: Mutex<Option<Sender<ReactorOut>>>,
    waiting: Mutex<HashMap<ActivationId, Sender<ActivationSignal>>>,
    registrations: Mutex<Vec<RegistrationId>>,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl ReactorSession {
    fn new(id: SessionId, outbound: Sender<ReactorOut>, shutdown: Sender<()>) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Connecting),
            state_changed: Condvar::new(),
            start: Mutex::new(None),
            outbound: Mutex::new(Some(outbound)),
            waiting: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
            shutdown: Mutex::new(Some(shutdown)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Reactor id from the handshake, once received.
    pub fn reactor(&self) -> Option<String> {
        self.start.lock().as_ref().map(|s| s.id.clone())
    }

    /// Models declared in the handshake.
    pub fn models(&self) -> Vec<String> {
        self.start
            .lock()
            .as_ref()
            .map(|s| s.models.clone())
            .unwrap_or_default()
    }

    /// Number of activations awaiting a verdict.
    pub fn outstanding(&self) -> usize {
        self.waiting.lock().len()
    }

    /// Block until the handshake finished or `timeout` passed.
    /// Returns true if the session is `Ready`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |s| s == SessionState::Connecting) == SessionState::Ready
    }

    /// Block until the session is `Closed` or `timeout` passed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |s| s != SessionState::Closed) == SessionState::Closed
    }

    fn wait_while(&self, timeout: Duration, cond: impl Fn(SessionState) -> bool) -> SessionState {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while cond(*state) {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }

    /// Ask the session to close. Outstanding activations fail.
    pub fn close(&self) {
        self.shutdown.lock().take();
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock() = next;
        self.state_changed.notify_all();
    }

    /// Handle one inbound message while `Ready`.
    fn route(&self, message: ReactorIn) {
        match message {
            ReactorIn::Start(start) => {
                warn!(session = ?self.id, reactor = %start.id, "ignoring repeated start");
            }
            ReactorIn::Working(working) => {
                let waiting = self.waiting.lock();
                match waiting.get(&working.activation) {
                    Some(waiter) => {
                        let _ = waiter.send(ActivationSignal::Working);
                    }
                    None => {
                        debug!(session = ?self.id, activation = %working.activation, "working for unknown activation");
                    }
                }
            }
            ReactorIn::Done(done) => {
                let waiter = self.waiting.lock().remove(&done.activation);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(ActivationSignal::Done(done.verdict));
                    }
                    None => {
                        warn!(session = ?self.id, activation = %done.activation, "done for unknown or expired activation");
                    }
                }
            }
        }
    }

    /// Move to `Closed` and release everything the session holds.
    fn finish(&self, registry: &ReactorRegistry) {
        self.set_state(SessionState::Closed);

        for registration in self.registrations.lock().drain(..) {
            registry.deregister_registration(registration);
        }

        // Dropping the senders wakes every blocked activation.
        let abandoned = {
            let mut waiting = self.waiting.lock();
            let count = waiting.len();
            waiting.clear();
            count
        };

        self.outbound.lock().take();
        self.shutdown.lock().take();

        info!(session = ?self.id, reactor = ?self.reactor(), abandoned, "reactor session closed");
    }
}

impl ReactorEndpoint for ReactorSession {
    fn activate(
        &self,
        activation: ReactorActivation,
        timeout: Duration,
    ) -> std::result::Result<Verdict, ActivationFailure> {
        let id = activation.activation;
        let (tx, rx) = unbounded();

        {
            let mut waiting = self.waiting.lock();
            if self.state() != SessionState::Ready {
                return Err(ActivationFailure::Unavailable);
            }
            waiting.insert(id, tx);
        }

        let outbound = self.outbound.lock().clone();
        let sent = match outbound {
            Some(outbound) => outbound.send(ReactorOut::Activation(activation)).is_ok(),
            None => false,
        };
        if !sent {
            self.waiting.lock().remove(&id);
            return Err(ActivationFailure::Closed);
        }

        loop {
            match rx.recv_timeout(timeout) {
                Ok(ActivationSignal::Working) => {
                    debug!(session = ?self.id, activation = %id, "reactor working");
                }
                Ok(ActivationSignal::Done(verdict)) => return Ok(verdict),
                Err(RecvTimeoutError::Timeout) => {
                    self.waiting.lock().remove(&id);
                    return Err(ActivationFailure::TimedOut);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(ActivationFailure::Closed),
            }
        }
    }
}

/// Accepts streaming reactor connections and owns their sessions.
///
/// Created with the store and torn down by [`ReactorHub::shutdown`].
pub struct ReactorHub {
    registry: Arc<ReactorRegistry>,
    handshake_timeout: Duration,
    sessions: Mutex<HashMap<SessionId, (Arc<ReactorSession>, JoinHandle<()>)>>,
    next_id: AtomicU64,
}

impl ReactorHub {
    pub fn new(registry: Arc<ReactorRegistry>, handshake_timeout: Duration) -> Self {
        Self {
            registry,
            handshake_timeout,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a session over `transport`.
    ///
    /// Returns immediately in `Connecting`; use
    /// [`ReactorSession::wait_ready`] to observe the handshake.
    pub fn connect(&self, transport: ReactorTransport) -> Result<Arc<ReactorSession>> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (shutdown_tx, shutdown_rx) = unbounded();
        let session = Arc::new(ReactorSession::new(id, transport.outbound, shutdown_tx));

        let worker = Arc::clone(&session);
        let registry = Arc::clone(&self.registry);
        let handshake_timeout = self.handshake_timeout;
        let inbound = transport.inbound;

        let handle = thread::Builder::new()
            .name(format!("reactor-session-{}", id.0))
            .spawn(move || {
                run_session(&worker, &registry, inbound, shutdown_rx, handshake_timeout);
            })?;

        let mut sessions = self.sessions.lock();
        sessions.retain(|_, (s, _)| s.state() != SessionState::Closed);
        sessions.insert(id, (Arc::clone(&session), handle));

        debug!(session = ?id, "reactor session connecting");
        Ok(session)
    }

    /// Sessions that have not closed yet.
    pub fn sessions(&self) -> Vec<Arc<ReactorSession>> {
        self.sessions
            .lock()
            .values()
            .filter(|(s, _)| s.state() != SessionState::Closed)
            .map(|(s, _)| Arc::clone(s))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions().len()
    }

    /// Close every session and wait for their threads.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, v)| v).collect();
        for (session, _) in &sessions {
            session.close();
        }
        for (session, handle) in sessions {
            if handle.join().is_err() {
                warn!(session = ?session.id(), "reactor session thread panicked");
            }
        }
    }
}

impl Drop for ReactorHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_session(
    session: &Arc<ReactorSession>,
    registry: &ReactorRegistry,
    inbound: Receiver<ReactorIn>,
    shutdown: Receiver<()>,
    handshake_timeout: Duration,
) {
    let start = select! {
        recv(inbound) -> message => match message {
            Ok(ReactorIn::Start(start)) => Some(start),
            Ok(other) => {
                warn!(session = ?session.id, message = ?other, "expected start message");
                None
            }
            Err(_) => None,
        },
        recv(shutdown) -> _ => None,
        default(handshake_timeout) => {
            warn!(session = ?session.id, "reactor handshake timed out");
            None
        }
    };

    let registered = start.map_or(false, |start| handshake(session, registry, start));
    if !registered {
        session.finish(registry);
        return;
    }

    loop {
        select! {
            recv(inbound) -> message => match message {
                Ok(message) => session.route(message),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }

    session.finish(registry);
}

/// Register the session for every declared model. All or nothing.
fn handshake(session: &Arc<ReactorSession>, registry: &ReactorRegistry, start: ReactorStart) -> bool {
    if start.id.is_empty() || start.models.is_empty() || start.models.iter().any(|m| m.is_empty()) {
        warn!(session = ?session.id, reactor = %start.id, "invalid start message");
        return false;
    }

    let endpoint: Arc<dyn ReactorEndpoint> = Arc::clone(session) as Arc<dyn ReactorEndpoint>;
    let mut ids = Vec::with_capacity(start.models.len());

    for model in &start.models {
        match registry.register(model, &start.id, ReactorMode::Streaming, Arc::clone(&endpoint)) {
            Ok(id) => ids.push(id),
            Err(e) => {
                warn!(session = ?session.id, reactor = %start.id, model = %model, error = %e, "reactor registration failed");
                for id in ids {
                    registry.deregister_registration(id);
                }
                return false;
            }
        }
    }

    info!(session = ?session.id, reactor = %start.id, models = ?start.models, "reactor session ready");
    *session.registrations.lock() = ids;
    *session.start.lock() = Some(start);
    session.set_state(SessionState::Ready);
    true
}
