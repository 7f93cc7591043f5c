//! The protocol engine crate (§4.3-§4.7): the symmetric JSON-RPC runtime
//! shared by `Client` and `Server`, independent of any one transport.
//!
//! This crate owns everything that sits between a decoded wire frame and a
//! handler's business logic: the pending-request table, progress-callback
//! routing, debounced notifications, per-request timeouts, the session
//! lifecycle (handshake, version negotiation, pre-init gating), and the
//! request-handler context object handlers actually see.

pub mod context;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod pending;
pub mod progress;
pub mod session;
pub mod timeout;

pub use context::{CapabilityGate, RequestContext, SessionChannel, StreamGuard};
pub use debounce::Debouncer;
pub use engine::{
    Engine, NotificationHandler, RequestHandler, RequestOptions, ResponseRouter,
};
pub use error::{ProtocolError, ProtocolResult};
pub use pending::PendingRequests;
pub use progress::{ProgressCallbacks, ProgressUpdate};
pub use session::{GatingMode, PeerCapabilities, SessionConfig, SessionState, negotiate_version};
pub use timeout::{DeadlineHandle, TimeoutPolicy, with_timeout};
