use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use mcprelay_core::methods;
use mcprelay_core::types::{ClientCapabilities, Implementation, InitializeRequest, InitializeResult};
use mcprelay_protocol::{Engine, RequestOptions, SessionConfig, SessionState};
use mcprelay_transport::Transport;

use crate::Result;

/// The client side of an MCP session (§1, §4.5): drives the `initialize`
/// handshake, then exchanges requests/notifications with the peer over
/// the shared protocol engine.
///
/// `Client` is cheap to clone: it is a thin handle around the
/// [`Engine`], which is itself `Arc`-internal.
#[derive(Clone)]
pub struct Client {
    engine: Arc<Engine>,
}

impl Client {
    /// Connects over `transport` and completes the `initialize` handshake
    /// with default (empty) client capabilities.
    pub async fn connect(transport: Arc<dyn Transport>, client_info: Implementation) -> Result<Self> {
        Self::connect_with_capabilities(transport, client_info, ClientCapabilities::default()).await
    }

    /// Connects over `transport` and completes the `initialize` handshake,
    /// advertising `capabilities`.
    pub async fn connect_with_capabilities(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<Self> {
        let session = Arc::new(SessionState::new(SessionConfig::new()));
        let engine = Arc::new(Engine::new(transport, session, HashSet::new()));
        Arc::clone(&engine).start().await?;

        let request = InitializeRequest::new(client_info).with_capabilities(capabilities);
        let params = serde_json::to_value(&request)?;
        let result = engine
            .send_request(methods::INITIALIZE, Some(params), RequestOptions::default())
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;
        engine.session().record_initialize_result(&result);

        engine
            .send_notification(methods::INITIALIZED, None, None)
            .await?;

        Ok(Self { engine })
    }

    /// Sends a request and deserializes the peer's result into `T`.
    pub async fn call<T: DeserializeOwned>(&self, method: impl Into<String>, params: Option<Value>) -> Result<T> {
        let value = self
            .engine
            .send_request(method, params, RequestOptions::default())
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends a request with explicit [`RequestOptions`] (progress channel,
    /// timeout, related-request correlation), returning the raw JSON result.
    pub async fn call_with_options(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        Ok(self.engine.send_request(method, params, options).await?)
    }

    /// Sends a one-way notification to the peer.
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        Ok(self.engine.send_notification(method, params, None).await?)
    }

    /// The protocol version negotiated during the handshake, if it has
    /// completed.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<String> {
        self.engine.session().negotiated_version()
    }

    /// The underlying protocol engine, for advanced use (registering
    /// server-to-client request handlers such as `sampling/createMessage`,
    /// adding response routers, etc).
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Stops the engine's receive loop and fires the session's disconnect
    /// callback, if any.
    pub async fn close(&self) {
        self.engine.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprelay_core::types::ServerCapabilities;
    use mcprelay_transport::MemoryTransport;

    use crate::ServerBuilder;

    #[tokio::test]
    async fn connect_negotiates_the_latest_version() {
        let (client_transport, server_transport) = MemoryTransport::pair();
        let server = ServerBuilder::new(Implementation::new("test-server", "1.0.0"))
            .with_capabilities(ServerCapabilities::new().with_tools(true))
            .serve(Arc::new(server_transport))
            .await
            .unwrap();

        let client = Client::connect(
            Arc::new(client_transport),
            Implementation::new("test-client", "1.0.0"),
        )
        .await
        .unwrap();

        assert_eq!(client.negotiated_version(), Some(mcprelay_core::LATEST_PROTOCOL_VERSION.to_string()));
        assert!(server.is_initialized());
    }

    #[tokio::test]
    async fn call_round_trips_through_a_registered_handler() {
        let (client_transport, server_transport) = MemoryTransport::pair();
        let _server = ServerBuilder::new(Implementation::new("test-server", "1.0.0"))
            .request_handler("echo", |params: Option<Value>, _ctx| async move {
                Ok(params.unwrap_or(Value::Null))
            })
            .serve(Arc::new(server_transport))
            .await
            .unwrap();

        let client = Client::connect(
            Arc::new(client_transport),
            Implementation::new("test-client", "1.0.0"),
        )
        .await
        .unwrap();

        let echoed: Value = client
            .call("echo", Some(serde_json::json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(echoed, serde_json::json!({"hello": "world"}));
    }
}
