use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use mcprelay_core::methods;
use mcprelay_core::types::{ClientCapabilities, Implementation, InitializeRequest, ServerCapabilities};
use mcprelay_protocol::{
    Engine, GatingMode, NotificationHandler, ProtocolError, RequestContext, RequestHandler,
    SessionConfig, SessionState,
};
use mcprelay_transport::Transport;

use crate::Result;

type OnInitialized = dyn Fn(&ClientCapabilities) + Send + Sync;

/// Builds a [`Server`]: the peer-facing half of an MCP session (§1, §4.5).
///
/// A `ServerBuilder` collects the `initialize` response's own identity and
/// capabilities, the request/notification handlers the application wants
/// registered on every session's [`Engine`], and the pre-init gating mode.
/// It has two terminal methods: [`serve`](ServerBuilder::serve) connects a
/// single transport directly (stdio, in-memory, one TCP/WS connection);
/// [`into_configurator`](ServerBuilder::into_configurator) produces the
/// per-session hook consumed by `mcprelay_http::StreamableHttpServer::new`,
/// which constructs one `Engine` per HTTP session.
pub struct ServerBuilder {
    implementation: Implementation,
    capabilities: ServerCapabilities,
    gating: GatingMode,
    debounce_methods: HashSet<String>,
    request_handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    notification_handlers: Vec<(String, Arc<dyn NotificationHandler>)>,
    on_initialized: Option<Arc<OnInitialized>>,
}

impl ServerBuilder {
    /// Starts a builder for a server identifying itself as `implementation`.
    #[must_use]
    pub fn new(implementation: Implementation) -> Self {
        Self {
            implementation,
            capabilities: ServerCapabilities::default(),
            gating: GatingMode::Strict,
            debounce_methods: HashSet::new(),
            request_handlers: Vec::new(),
            notification_handlers: Vec::new(),
            on_initialized: None,
        }
    }

    /// Sets the capabilities advertised in the `initialize` response.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the pre-init gating mode (default: [`GatingMode::Strict`]).
    #[must_use]
    pub fn with_gating(mut self, gating: GatingMode) -> Self {
        self.gating = gating;
        self
    }

    /// Sets which outbound notification methods get coalesced into a
    /// single debounced send (§4.3).
    #[must_use]
    pub fn with_debounced_methods(mut self, methods: impl IntoIterator<Item = String>) -> Self {
        self.debounce_methods = methods.into_iter().collect();
        self
    }

    /// Registers a handler for requests with the given `method`.
    ///
    /// `handler` may be a plain closure returning an `async move { .. }`
    /// block, thanks to the blanket [`RequestHandler`] impl for
    /// `Fn(Option<Value>, RequestContext) -> impl Future<Output =
    /// ProtocolResult<Value>>`.
    #[must_use]
    pub fn request_handler(mut self, method: impl Into<String>, handler: impl RequestHandler + 'static) -> Self {
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        self.request_handlers.push((method.into(), handler));
        self
    }

    /// Registers a handler for notifications with the given `method`.
    #[must_use]
    pub fn notification_handler(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        let handler: Arc<dyn NotificationHandler> = Arc::new(handler);
        self.notification_handlers.push((method.into(), handler));
        self
    }

    /// Sets a callback fired once per session, right after
    /// `notifications/initialized` marks the handshake complete. Receives
    /// the capabilities the peer advertised in its `initialize` request.
    #[must_use]
    pub fn on_initialized<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ClientCapabilities) + Send + Sync + 'static,
    {
        self.on_initialized = Some(Arc::new(callback));
        self
    }

    /// Registers this builder's handlers (plus the built-in `initialize`
    /// and `notifications/initialized` handshake handlers) on `engine`.
    fn register(&self, engine: &Arc<Engine>) {
        let session = Arc::clone(engine.session());
        let implementation = self.implementation.clone();
        let capabilities = self.capabilities.clone();
        let initialize_handler: Arc<dyn RequestHandler> =
            Arc::new(move |params: Option<Value>, _ctx: RequestContext| {
                let session = Arc::clone(&session);
                let implementation = implementation.clone();
                let capabilities = capabilities.clone();
                async move {
                    let request: InitializeRequest = serde_json::from_value(params.unwrap_or(Value::Null))
                        .map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))?;
                    let result = session.handle_initialize_request(&request, implementation, capabilities)?;
                    serde_json::to_value(&result).map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))
                }
            });
        engine.register_request_handler(methods::INITIALIZE, initialize_handler);

        let session = Arc::clone(engine.session());
        let on_initialized = self.on_initialized.clone();
        let initialized_handler: Arc<dyn NotificationHandler> =
            Arc::new(move |_params: Option<Value>, _ctx: RequestContext| {
                let session = Arc::clone(&session);
                let on_initialized = on_initialized.clone();
                async move {
                    session.mark_initialized();
                    if let Some(callback) = on_initialized {
                        let client_capabilities = session.peer_capabilities().client.unwrap_or_default();
                        callback(&client_capabilities);
                    }
                }
            });
        engine.register_notification_handler(methods::INITIALIZED, initialized_handler);

        for (method, handler) in &self.request_handlers {
            engine.register_request_handler(method.clone(), Arc::clone(handler));
        }
        for (method, handler) in &self.notification_handlers {
            engine.register_notification_handler(method.clone(), Arc::clone(handler));
        }
    }

    /// Connects to `transport` and starts serving. The `initialize`
    /// handshake is driven by the peer; this call returns as soon as the
    /// engine's receive loop has started, not once a handshake completes.
    pub async fn serve(self, transport: Arc<dyn Transport>) -> Result<Server> {
        let session_config = SessionConfig {
            gating: self.gating,
            debounced_notification_methods: self.debounce_methods.iter().cloned().collect(),
        };
        let session = Arc::new(SessionState::new(session_config));
        let engine = Arc::new(Engine::new(transport, session, self.debounce_methods.clone()));
        self.register(&engine);
        Arc::clone(&engine).start().await?;
        Ok(Server { engine })
    }

    /// Consumes the builder into a per-session configurator for
    /// `mcprelay_http::StreamableHttpServer::new`: every time the HTTP
    /// transport accepts a new session, it constructs a fresh `Engine` and
    /// invokes this closure once to register handlers on it.
    #[must_use]
    pub fn into_configurator(self) -> Arc<dyn Fn(&Arc<Engine>) + Send + Sync> {
        Arc::new(move |engine: &Arc<Engine>| self.register(engine))
    }
}

/// A running server-side session: the built-in handshake handlers plus any
/// application request/notification handlers are already registered and
/// the engine's receive loop is running.
pub struct Server {
    engine: Arc<Engine>,
}

impl Server {
    /// The underlying protocol engine, for advanced use (sending
    /// server-initiated requests such as `sampling/createMessage`, adding
    /// response routers, etc).
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Whether the peer has completed the `initialize` handshake.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.engine.session().is_initialized()
    }

    /// Stops the engine's receive loop and fires the session's disconnect
    /// callback, if any.
    pub async fn stop(&self) {
        self.engine.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use mcprelay_transport::MemoryTransport;

    use crate::Client;

    #[tokio::test]
    async fn on_initialized_receives_the_peers_capabilities() {
        let (client_transport, server_transport) = MemoryTransport::pair();
        let seen: Arc<Mutex<Option<ClientCapabilities>>> = Arc::new(Mutex::new(None));
        let seen_in_hook = Arc::clone(&seen);

        let _server = ServerBuilder::new(Implementation::new("test-server", "1.0.0"))
            .on_initialized(move |caps| {
                *seen_in_hook.lock().unwrap() = Some(caps.clone());
            })
            .serve(Arc::new(server_transport))
            .await
            .unwrap();

        let _client = Client::connect_with_capabilities(
            Arc::new(client_transport),
            Implementation::new("test-client", "1.0.0"),
            ClientCapabilities::new().with_sampling(),
        )
        .await
        .unwrap();

        let captured = seen.lock().unwrap().clone().expect("on_initialized was not called");
        assert!(captured.sampling.is_some());
    }

    #[tokio::test]
    async fn notification_handler_observes_a_client_notification() {
        let (client_transport, server_transport) = MemoryTransport::pair();
        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let received_in_handler = Arc::clone(&received);

        let _server = ServerBuilder::new(Implementation::new("test-server", "1.0.0"))
            .notification_handler("notifications/roots/list_changed", move |params: Option<Value>, _ctx| {
                let received = Arc::clone(&received_in_handler);
                async move {
                    received.lock().unwrap().push(params.unwrap_or(Value::Null));
                }
            })
            .serve(Arc::new(server_transport))
            .await
            .unwrap();

        let client = Client::connect(Arc::new(client_transport), Implementation::new("test-client", "1.0.0"))
            .await
            .unwrap();
        client
            .notify("notifications/roots/list_changed", Some(serde_json::json!({"n": 1})))
            .await
            .unwrap();

        // Give the server's receive loop a chance to process the notification.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(received.lock().unwrap().as_slice(), &[serde_json::json!({"n": 1})]);
    }
}
