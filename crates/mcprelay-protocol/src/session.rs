//! The session lifecycle layer (§4.5): initialize handshake, version
//! negotiation, pre-init gating, capability enforcement, and the
//! exactly-once disconnect callback. Shared by both Client and Server
//! endpoints; which side calls which method differs, the state machine
//! does not.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use mcprelay_core::types::{ClientCapabilities, Implementation, InitializeRequest, InitializeResult, ServerCapabilities};
use mcprelay_core::{LATEST_PROTOCOL_VERSION, SUPPORTED_VERSIONS, methods};

use crate::error::{ProtocolError, ProtocolResult};

/// Echoes `requested` if it is one of [`SUPPORTED_VERSIONS`], otherwise
/// falls back to [`LATEST_PROTOCOL_VERSION`] (§4.5, scenario 4 in §8).
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|&&v| v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Pre-init gating policy (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatingMode {
    /// Every method except `ping` is rejected before `initialized = true`.
    Strict,
    /// Requests are processed normally regardless of initialize state.
    Lenient,
}

/// Builder-style configuration for a [`SessionState`], mirroring the
/// `default()` / named-preset / `with_*` convention used throughout this
/// workspace's configuration surfaces.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pre-init gating mode.
    pub gating: GatingMode,
    /// Methods that may be sent as notifications before initialize (`ping`
    /// is always implicitly allowed and need not be listed).
    pub debounced_notification_methods: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gating: GatingMode::Strict,
            debounced_notification_methods: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// The default configuration: strict pre-init gating.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A permissive preset: requests are processed before initialize completes.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            gating: GatingMode::Lenient,
            ..Self::default()
        }
    }

    /// Sets the debounced notification method set.
    #[must_use]
    pub fn with_debounced_methods(mut self, methods: Vec<String>) -> Self {
        self.debounced_notification_methods = methods;
        self
    }
}

/// Per-endpoint session state (§3 `SessionState`): initialize progress,
/// negotiated version, peer/own capabilities, and the gating mode in effect.
#[derive(Debug)]
pub struct SessionState {
    config: SessionConfig,
    initialize_started: AtomicBool,
    initialized: AtomicBool,
    negotiated_version: RwLock<Option<String>>,
    peer_capabilities: RwLock<PeerCapabilities>,
    own_capabilities: RwLock<ServerCapabilities>,
    logging_min_level: RwLock<Option<String>>,
    disconnect_fired: AtomicBool,
    on_disconnect: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
    initialized_fired: AtomicBool,
    on_initialized: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
}

/// Whichever capability set belongs to the remote peer, seen from this
/// endpoint's perspective. A server's peer is a [`ClientCapabilities`]; a
/// client's peer is a [`ServerCapabilities`]. Both are tracked so the same
/// [`SessionState`] serves either role.
#[derive(Debug, Clone, Default)]
pub struct PeerCapabilities {
    /// Set when this endpoint is a server and has received client capabilities.
    pub client: Option<ClientCapabilities>,
    /// Set when this endpoint is a client and has received server capabilities.
    pub server: Option<ServerCapabilities>,
}

impl PeerCapabilities {
    /// Checks whether sending `method` to the peer is covered by its
    /// declared capabilities (§4.5 capability enforcement). Methods this
    /// layer has no opinion about - most application-registered ones -
    /// always pass; only the handful of MCP methods gated by a capability
    /// flag are checked.
    pub fn check(&self, method: &str) -> ProtocolResult<()> {
        let supported = match method {
            "sampling/createMessage" => self.client.as_ref().is_some_and(|c| c.sampling.is_some()),
            "roots/list" => self.client.as_ref().is_some_and(|c| c.roots.is_some()),
            "tools/list" | "tools/call" => self.server.as_ref().is_some_and(|s| s.tools.is_some()),
            "resources/list" | "resources/read" | "resources/subscribe" => {
                self.server.as_ref().is_some_and(|s| s.resources.is_some())
            }
            "prompts/list" | "prompts/get" => self.server.as_ref().is_some_and(|s| s.prompts.is_some()),
            "logging/setLevel" => self.server.as_ref().is_some_and(|s| s.logging.is_some()),
            _ => return Ok(()),
        };
        if supported {
            Ok(())
        } else {
            Err(ProtocolError::CapabilityNotSupported(method.to_string()))
        }
    }
}

impl SessionState {
    /// Creates a fresh, un-initialized session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            initialize_started: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            negotiated_version: RwLock::new(None),
            peer_capabilities: RwLock::new(PeerCapabilities::default()),
            own_capabilities: RwLock::new(ServerCapabilities::default()),
            logging_min_level: RwLock::new(None),
            disconnect_fired: AtomicBool::new(false),
            on_disconnect: RwLock::new(None),
            initialized_fired: AtomicBool::new(false),
            on_initialized: RwLock::new(None),
        }
    }

    /// Whether `notifications/initialized` has been observed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The negotiated protocol version, once the handshake has run.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<String> {
        self.negotiated_version.read().clone()
    }

    /// Server-side handling of an inbound `initialize` request: negotiates
    /// the version, records the client's capabilities, and returns the
    /// response to send back. Fails with [`ProtocolError::AlreadyInitialized`]
    /// if a handshake has already been started on this session.
    pub fn handle_initialize_request(
        &self,
        request: &InitializeRequest,
        server_info: Implementation,
        server_capabilities: ServerCapabilities,
    ) -> ProtocolResult<InitializeResult> {
        if self.initialize_started.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyInitialized);
        }

        let version = negotiate_version(&request.protocol_version);
        *self.negotiated_version.write() = Some(version.to_string());
        self.peer_capabilities.write().client = Some(request.capabilities.clone());
        *self.own_capabilities.write() = server_capabilities.clone();

        Ok(InitializeResult::new(server_info)
            .with_capabilities(server_capabilities)
            .with_protocol_version_override(version))
    }

    /// Marks the session initialized, called upon receiving
    /// `notifications/initialized`. Fires the `on_initialized` callback, if
    /// any, exactly once regardless of how many times this is called.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
        if !self.initialized_fired.swap(true, Ordering::AcqRel)
            && let Some(callback) = self.on_initialized.read().clone()
        {
            callback();
        }
    }

    /// Sets (or clears, with `None`) the callback fired once the handshake
    /// completes. Mirrors [`Self::set_on_disconnect`]'s fire-once contract.
    pub fn set_on_initialized(&self, callback: Option<Arc<dyn Fn() + Send + Sync>>) {
        *self.on_initialized.write() = callback;
    }

    /// Client-side recording of the server's `initialize` response.
    pub fn record_initialize_result(&self, result: &InitializeResult) {
        *self.negotiated_version.write() = Some(result.protocol_version.clone());
        self.peer_capabilities.write().server = Some(result.capabilities.clone());
    }

    /// Enforces pre-init gating for an inbound method. `ping` and
    /// `initialize` itself are always permitted. In [`GatingMode::Strict`],
    /// every other method fails until `initialized` is true.
    pub fn check_gate(&self, method: &str) -> ProtocolResult<()> {
        if method == methods::PING || method == methods::INITIALIZE {
            return Ok(());
        }
        match self.config.gating {
            GatingMode::Lenient => Ok(()),
            GatingMode::Strict if self.is_initialized() => Ok(()),
            GatingMode::Strict => Err(ProtocolError::NotInitialized {
                method: method.to_string(),
            }),
        }
    }

    /// The peer's declared capabilities, for enforcement checks.
    #[must_use]
    pub fn peer_capabilities(&self) -> PeerCapabilities {
        self.peer_capabilities.read().clone()
    }

    /// Sets the minimum logging level the peer requested via
    /// `logging/setLevel`.
    pub fn set_logging_min_level(&self, level: impl Into<String>) {
        *self.logging_min_level.write() = Some(level.into());
    }

    /// The currently configured minimum logging level, if any.
    #[must_use]
    pub fn logging_min_level(&self) -> Option<String> {
        self.logging_min_level.read().clone()
    }

    /// Sets (or clears, with `None`) the disconnect callback. Only the most
    /// recently set callback fires.
    pub fn set_on_disconnect(&self, callback: Option<Arc<dyn Fn() + Send + Sync>>) {
        *self.on_disconnect.write() = callback;
    }

    /// Fires the disconnect callback, exactly once per session lifetime
    /// regardless of how many times this is called (graceful stop, peer
    /// close, and explicit stop-after-peer-close must all collapse to one
    /// invocation).
    pub fn fire_disconnect(&self) {
        if self.disconnect_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(callback) = self.on_disconnect.read().clone() {
            callback();
        }
    }
}

/// Extension methods used only by the handshake response builder above;
/// kept local because only the session layer needs to override the
/// protocol version after negotiation.
trait WithProtocolVersionOverride {
    fn with_protocol_version_override(self, version: &str) -> Self;
}

impl WithProtocolVersionOverride for InitializeResult {
    fn with_protocol_version_override(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_request(version: &str) -> InitializeRequest {
        InitializeRequest::new(Implementation::new("test-client", "1.0.0"))
            .with_protocol_version(version)
    }

    #[test]
    fn negotiates_a_supported_version_verbatim() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
    }

    #[test]
    fn falls_back_to_latest_for_an_unsupported_version() {
        assert_eq!(negotiate_version("2023-01-01"), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn handshake_records_negotiated_version_and_peer_capabilities() {
        let session = SessionState::new(SessionConfig::new());
        let request = client_request("2024-11-05")
            .with_capabilities(ClientCapabilities::new().with_sampling());

        let result = session
            .handle_initialize_request(
                &request,
                Implementation::new("test-server", "1.0.0"),
                ServerCapabilities::new().with_tools(true),
            )
            .unwrap();

        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(session.negotiated_version(), Some("2024-11-05".to_string()));
        assert!(session.peer_capabilities().client.unwrap().sampling.is_some());
    }

    #[test]
    fn double_initialize_is_rejected() {
        let session = SessionState::new(SessionConfig::new());
        let request = client_request("2024-11-05");
        session
            .handle_initialize_request(
                &request,
                Implementation::default(),
                ServerCapabilities::default(),
            )
            .unwrap();

        let err = session
            .handle_initialize_request(
                &request,
                Implementation::default(),
                ServerCapabilities::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyInitialized));
    }

    #[test]
    fn strict_gating_allows_only_ping_before_initialized() {
        let session = SessionState::new(SessionConfig::new());
        assert!(session.check_gate("ping").is_ok());
        assert!(matches!(
            session.check_gate("tools/list"),
            Err(ProtocolError::NotInitialized { .. })
        ));

        session.mark_initialized();
        assert!(session.check_gate("tools/list").is_ok());
    }

    #[test]
    fn lenient_gating_allows_everything() {
        let session = SessionState::new(SessionConfig::lenient());
        assert!(session.check_gate("tools/list").is_ok());
    }

    #[test]
    fn on_initialized_callback_fires_exactly_once() {
        let session = SessionState::new(SessionConfig::new());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        session.set_on_initialized(Some(Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })));

        session.mark_initialized();
        session.mark_initialized();

        assert!(session.is_initialized());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_callback_fires_exactly_once() {
        let session = SessionState::new(SessionConfig::new());
        let count = Arc::new(AtomicBool::new(false));
        let count_clone = count.clone();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        session.set_on_disconnect(Some(Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            count_clone.store(true, Ordering::SeqCst);
        })));

        session.fire_disconnect();
        session.fire_disconnect();
        session.fire_disconnect();

        assert!(count.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn peer_capability_check_rejects_unsupported_gated_methods() {
        let peer = PeerCapabilities {
            client: Some(ClientCapabilities::new()),
            server: None,
        };
        assert!(matches!(
            peer.check("sampling/createMessage"),
            Err(ProtocolError::CapabilityNotSupported(_))
        ));
    }

    #[test]
    fn peer_capability_check_allows_declared_gated_methods() {
        let peer = PeerCapabilities {
            client: Some(ClientCapabilities::new().with_sampling()),
            server: None,
        };
        assert!(peer.check("sampling/createMessage").is_ok());
    }

    #[test]
    fn peer_capability_check_ignores_unrecognized_methods() {
        let peer = PeerCapabilities::default();
        assert!(peer.check("echo").is_ok());
    }

    #[test]
    fn replacing_the_callback_before_disconnect_only_invokes_the_latest() {
        let session = SessionState::new(SessionConfig::new());
        let first_fired = Arc::new(AtomicBool::new(false));
        let second_fired = Arc::new(AtomicBool::new(false));

        let first_clone = first_fired.clone();
        session.set_on_disconnect(Some(Arc::new(move || first_clone.store(true, Ordering::SeqCst))));

        let second_clone = second_fired.clone();
        session.set_on_disconnect(Some(Arc::new(move || second_clone.store(true, Ordering::SeqCst))));

        session.fire_disconnect();
        assert!(!first_fired.load(Ordering::SeqCst));
        assert!(second_fired.load(Ordering::SeqCst));
    }
}
