//! Reactors: external collaborators that validate, reject, enrich, or
//! cascade writes.
//!
//! Two modes are supported and chosen per registration:
//!
//! - **Sync**: a [`Validator`] answers each activation in-line.
//! - **Streaming**: a reactor connects over a [`ReactorTransport`], declares
//!   its models with `Start`, and answers activations asynchronously with
//!   `Working` keepalives and a final `Done`.
//!
//! # Example
//!
//! ```ignore
//! let (transport, client) = ReactorTransport::pair();
//! let session = store.connect_reactor(transport)?;
//! client.start("mailer", vec!["com.example.EmailTemplate".into()])?;
//! session.wait_ready(Duration::from_secs(1));
//!
//! while let Some(activation) = client.next_activation(Duration::from_secs(30))? {
//!     client.done(activation.activation, Verdict::accept())?;
//! }
//! ```

pub mod protocol;
pub mod registry;
pub mod session;
pub mod sync;

pub use protocol::{
    ActivationId, CascadeWrite, ReactorActivation, ReactorClient, ReactorDone, ReactorIn,
    ReactorOut, ReactorStart, ReactorTransport, ReactorWorking, Verdict,
};
pub use registry::{
    ActivationFailure, ReactorEndpoint, ReactorMode, ReactorRegistry, Registration,
    RegistrationId,
};
pub use session::{ReactorHub, ReactorSession, SessionId, SessionState};
pub use sync::{Immutable, JsonSchemaValidator, SyncEndpoint, Validator};
