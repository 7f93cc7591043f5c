//! The protocol engine (§4.3): the symmetric JSON-RPC runtime shared by
//! Client and Server. Owns the receive loop, the pending-request and
//! progress-callback tables, the debounce queue, and handler dispatch.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mcprelay_transport::{SendOptions, Transport};
use mcprelay_wire::{
    BatchElement, DecodedFrame, Envelope, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ProgressToken, RequestId, decode,
};

use crate::context::{CapabilityGate, RequestContext, SessionChannel};
use crate::debounce::Debouncer;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pending::PendingRequests;
use crate::progress::{ProgressCallbacks, ProgressUpdate};
use crate::session::SessionState;
use crate::timeout::{TimeoutPolicy, with_timeout};

/// A handler for an inbound request. Returns the JSON `result` value, or an
/// error that the engine converts to a JSON-RPC error response.
pub trait RequestHandler: Send + Sync {
    /// Handles `params` under `ctx`.
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<Value>> + Send>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ProtocolResult<Value>> + Send + 'static,
{
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<Value>> + Send>> {
        Box::pin(self(params, ctx))
    }
}

/// A handler for an inbound notification. Errors are logged, never
/// propagated: a misbehaving notification handler must not take down the
/// receive loop.
pub trait NotificationHandler: Send + Sync {
    /// Handles `params` under `ctx`.
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self(params, ctx))
    }
}

/// An extension point in the response-routing chain of responsibility
/// (§3 `ResponseRouter`). The first router to return `true` claims the
/// response; the pending-request table is the fallback when none do.
pub trait ResponseRouter: Send + Sync {
    /// Attempts to claim a successful response. Returns `true` if claimed.
    fn route_response(&self, id: &RequestId, result: &Value) -> bool;
    /// Attempts to claim an error response. Returns `true` if claimed.
    fn route_error(&self, id: &RequestId, error: &JsonRpcError) -> bool;
}

/// Builds the JSON-RPC error used when a method is rejected by pre-init
/// gating (§4.5): `-32600 Invalid Request`, annotated with which method
/// triggered the rejection.
fn not_initialized_error(message: impl Into<String>) -> JsonRpcError {
    JsonRpcError::with_data(-32600, message.into(), Value::Null)
}

/// Options accepted by [`Engine::send_request`].
#[derive(Default)]
pub struct RequestOptions {
    /// Tags the outgoing bytes for a multiplexing transport.
    pub related_request_id: Option<RequestId>,
    /// When set, progress notifications carrying the auto-injected token are
    /// forwarded on this channel.
    pub on_progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    /// Per-request timeout policy. `None` means no deadline is enforced.
    pub timeout: Option<TimeoutPolicy>,
}

/// The channel captured for a single in-flight request handler: the
/// transport in effect when the handler was spawned, tagged with that
/// request's id, so later transport replacement never misroutes the
/// response (§4.3, scenario 1 in §8).
#[derive(Debug)]
struct EngineChannel {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    id_gen: Arc<AtomicI64>,
    related_request_id: RequestId,
    session: Arc<SessionState>,
    torn_down: Arc<AtomicBool>,
}

impl SessionChannel for EngineChannel {
    fn call(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<Value>> + Send + '_>> {
        Box::pin(async move {
            if !self.transport.supports_server_to_client_requests() {
                return Err(ProtocolError::StatelessMode);
            }
            self.session.peer_capabilities().check(&method)?;
            let id = RequestId::Number(self.id_gen.fetch_add(1, Ordering::Relaxed));
            let rx = self.pending.register(id.clone());
            let request = JsonRpcRequest::new(method, params, id.clone());
            let bytes = serde_json::to_vec(&request)
                .map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))?;
            self.transport
                .send(bytes.into(), SendOptions::for_request(self.related_request_id.clone()))
                .await?;
            match rx.await {
                Ok(response) => match response.result() {
                    Some(result) => Ok(result.clone()),
                    None => {
                        let error = response.error().cloned().unwrap_or_else(|| {
                            JsonRpcError::internal_error("missing result and error")
                        });
                        Err(ProtocolError::PeerError {
                            code: error.code,
                            message: error.message,
                        })
                    }
                },
                Err(_) if self.torn_down.load(Ordering::Acquire) => Err(ProtocolError::ConnectionClosed),
                Err(_) => Err(ProtocolError::Dropped),
            }
        })
    }

    fn notify(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + '_>> {
        Box::pin(async move {
            let notification = JsonRpcNotification::new(method, params);
            let bytes = serde_json::to_vec(&notification)
                .map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))?;
            self.transport
                .send(bytes.into(), SendOptions::for_request(self.related_request_id.clone()))
                .await?;
            Ok(())
        })
    }
}

/// The protocol engine: owns the pending/progress tables, handler registry,
/// debounce queue, and receive loop for one connected endpoint.
pub struct Engine {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    progress: Arc<ProgressCallbacks>,
    pub(crate) session: Arc<SessionState>,
    request_handlers: DashMap<String, Arc<dyn RequestHandler>>,
    notification_handlers: DashMap<String, Arc<dyn NotificationHandler>>,
    routers: RwLock<Vec<Arc<dyn ResponseRouter>>>,
    capabilities: Arc<CapabilityGate>,
    id_gen: Arc<AtomicI64>,
    cancellation: CancellationToken,
    debounce_methods: HashSet<String>,
    debouncer: Debouncer<String, Option<Value>>,
    debounce_flush_task: JoinHandle<()>,
    receive_task: RwLock<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    torn_down: Arc<AtomicBool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("transport_type", &self.transport.transport_type())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Engine {
    /// Builds a new engine over `transport`, with no handlers registered
    /// and every request/notification rejected until handlers are added.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionState>,
        debounce_methods: HashSet<String>,
    ) -> Self {
        let (debouncer, mut rx) = Debouncer::spawn(Duration::from_millis(10));
        let flush_transport = Arc::clone(&transport);
        let debounce_flush_task = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for (method, params) in batch {
                    let notification = JsonRpcNotification::new(method, params);
                    if let Ok(bytes) = serde_json::to_vec(&notification) {
                        let _ = flush_transport.send(bytes.into(), SendOptions::default()).await;
                    }
                }
            }
        });

        Self {
            transport,
            pending: Arc::new(PendingRequests::new()),
            progress: Arc::new(ProgressCallbacks::new()),
            session,
            request_handlers: DashMap::new(),
            notification_handlers: DashMap::new(),
            routers: RwLock::new(Vec::new()),
            capabilities: Arc::new(CapabilityGate::new()),
            id_gen: Arc::new(AtomicI64::new(1)),
            cancellation: CancellationToken::new(),
            debounce_methods,
            debouncer,
            debounce_flush_task,
            receive_task: RwLock::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            torn_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the capability gate handed to every spawned [`RequestContext`].
    pub fn set_capabilities(&mut self, capabilities: Arc<CapabilityGate>) {
        self.capabilities = capabilities;
    }

    /// The session state backing this engine: negotiated version, init
    /// progress, peer capabilities.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Registers (replacing any prior registration) the handler for `method`.
    pub fn register_request_handler(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.request_handlers.insert(method.into(), handler);
    }

    /// Registers (replacing any prior registration) the handler for `method`.
    pub fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.notification_handlers.insert(method.into(), handler);
    }

    /// Appends `router` to the response-routing chain.
    pub async fn add_response_router(&self, router: Arc<dyn ResponseRouter>) {
        self.routers.write().await.push(router);
    }

    /// Clears the response-routing chain.
    pub async fn clear_response_routers(&self) {
        self.routers.write().await.clear();
    }

    /// Connects the transport and spawns the receive loop. Fails with
    /// [`ProtocolError::AlreadyConnected`] if a receive loop is already
    /// running on this engine.
    pub async fn start(self: Arc<Self>) -> ProtocolResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.transport.connect().await?;
        let engine = Arc::clone(&self);
        let handle = tokio::spawn(async move { engine.run_receive_loop().await });
        *self.receive_task.write().await = Some(handle);
        Ok(())
    }

    /// Awaits until every notification currently coalesced in the debounce
    /// queue has been flushed to the transport. Exists so tests that send
    /// debounced notifications faster than the flush interval can assert on
    /// delivery deterministically instead of racing the background task.
    pub async fn wait_for_pending_debounced_notifications(&self) {
        while !self.debouncer.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // The flush task still needs to hand the drained batch to the
        // transport after the map itself goes empty; give it one more slice.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    async fn run_receive_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancellation.cancelled() => break,
                result = self.transport.receive() => match result {
                    Ok(Some(message)) => {
                        let engine = Arc::clone(&self);
                        engine.handle_message(message.payload, message.context).await;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "transport receive failed, tearing down session");
                        break;
                    }
                },
            }
        }
        self.teardown().await;
    }

    async fn handle_message(
        self: Arc<Self>,
        payload: bytes::Bytes,
        context: mcprelay_transport::MessageContext,
    ) {
        match decode(&payload) {
            Ok(DecodedFrame::Request(request)) => self.dispatch_request(request, context).await,
            Ok(DecodedFrame::Notification(notification)) => {
                self.dispatch_notification(notification, context).await;
            }
            Ok(DecodedFrame::Response(response)) => self.route_response(response).await,
            Ok(DecodedFrame::Batch(elements)) => self.dispatch_batch(elements, context).await,
            Ok(DecodedFrame::Unknown(value)) => {
                warn!(?value, "received an unrecognized but well-formed frame");
            }
            Err(error) => {
                warn!(%error, "failed to decode an inbound frame");
            }
        }
    }

    fn build_context(&self, id: RequestId, context: &mcprelay_transport::MessageContext) -> RequestContext {
        let channel: Arc<dyn SessionChannel> = Arc::new(EngineChannel {
            transport: Arc::clone(&self.transport),
            pending: Arc::clone(&self.pending),
            id_gen: Arc::clone(&self.id_gen),
            related_request_id: id.clone(),
            session: Arc::clone(&self.session),
            torn_down: Arc::clone(&self.torn_down),
        });
        let response_stream_transport = Arc::clone(&self.transport);
        let response_stream_id = id.clone();
        let notification_stream_transport = Arc::clone(&self.transport);
        let mut ctx = RequestContext::new(id)
            .with_channel(channel)
            .with_capabilities(Arc::clone(&self.capabilities))
            .with_cancellation(self.cancellation.child_token())
            .with_response_stream_release(Arc::new(move || {
                response_stream_transport.close_response_stream(&response_stream_id);
            }))
            .with_notification_stream_release(Arc::new(move || {
                notification_stream_transport.close_notification_stream();
            }));
        if let Some(session_id) = &context.session_id {
            ctx = ctx.with_session_id(session_id.clone());
        }
        if let Some(auth_info) = &context.auth_info {
            ctx = ctx.with_auth_info(auth_info.clone());
        }
        ctx
    }

    async fn dispatch_request(
        self: Arc<Self>,
        request: JsonRpcRequest,
        context: mcprelay_transport::MessageContext,
    ) {
        if let Err(ProtocolError::NotInitialized { method }) = self.session.check_gate(&request.method) {
            let error = not_initialized_error(format!(
                "Server is not initialized: {method} is not permitted before initialize completes"
            ));
            self.send_error_response(request.id, error).await;
            return;
        }

        let Some(handler) = self.request_handlers.get(&request.method).map(|h| Arc::clone(h.value())) else {
            let error = JsonRpcError::method_not_found(&request.method);
            self.send_error_response(request.id, error).await;
            return;
        };

        let engine = Arc::clone(&self);
        let id = request.id.clone();
        let ctx = self.build_context(id.clone(), &context);
        tokio::spawn(async move {
            let result = handler.handle(request.params, ctx).await;
            let response = match result {
                Ok(value) => JsonRpcResponse::success(value, id.clone()),
                Err(ProtocolError::PeerError { code, message }) => {
                    JsonRpcResponse::error_response(JsonRpcError::new(code, message), id.clone())
                }
                Err(error) => JsonRpcResponse::error_response(
                    JsonRpcError::internal_error(&error.to_string()),
                    id.clone(),
                ),
            };
            engine.send_response(response, id).await;
        });
    }

    async fn send_error_response(&self, id: RequestId, error: JsonRpcError) {
        let response = JsonRpcResponse::error_response(error, id.clone());
        self.send_response(response, id).await;
    }

    async fn send_response(&self, response: JsonRpcResponse, related: RequestId) {
        let Ok(bytes) = serde_json::to_vec(&response) else {
            warn!("failed to encode outgoing response");
            return;
        };
        if let Err(error) = self.transport.send(bytes.into(), SendOptions::for_request(related)).await {
            warn!(%error, "failed to send response");
        }
    }

    async fn dispatch_notification(
        &self,
        notification: JsonRpcNotification,
        context: mcprelay_transport::MessageContext,
    ) {
        if notification.method == mcprelay_core::methods::INITIALIZED {
            self.session.mark_initialized();
        }

        if notification.method == mcprelay_core::methods::PROGRESS {
            if let Some(params) = &notification.params {
                if let (Some(token_value), Some(update)) =
                    (params.get("progressToken"), ProgressUpdate::from_params(params))
                {
                    if let Ok(token) = serde_json::from_value::<ProgressToken>(token_value.clone()) {
                        if !self.progress.notify(&token, update) {
                            debug!(?token, "progress notification for an unknown token, dropped");
                        }
                    }
                }
            }
        }

        let Some(handler) = self
            .notification_handlers
            .get(&notification.method)
            .map(|h| Arc::clone(h.value()))
        else {
            return;
        };

        let request_id = RequestId::String(format!("notification:{}", notification.method));
        let ctx = self.build_context(request_id, &context);
        handler.handle(notification.params, ctx).await;
    }

    async fn route_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_request_id().cloned() else {
            warn!("received a response with a null id");
            return;
        };

        let routers = self.routers.read().await;
        for router in routers.iter() {
            let claimed = match &response.payload {
                mcprelay_wire::JsonRpcResponsePayload::Success { result } => {
                    router.route_response(&id, result)
                }
                mcprelay_wire::JsonRpcResponsePayload::Error { error } => {
                    router.route_error(&id, error)
                }
            };
            if claimed {
                return;
            }
        }
        drop(routers);

        if !self.pending.resolve(&id, response) {
            warn!(%id, "received a response for an unknown or already-resolved request id");
        }
    }

    async fn dispatch_batch(
        &self,
        elements: Vec<BatchElement>,
        context: mcprelay_transport::MessageContext,
    ) {
        let mut responses = Vec::new();
        for element in elements {
            match element {
                BatchElement::Recognized(Envelope::Request(request)) => {
                    if let Err(ProtocolError::NotInitialized { method }) =
                        self.session.check_gate(&request.method)
                    {
                        let error = not_initialized_error(format!(
                            "Server is not initialized: {method} is not permitted before initialize completes"
                        ));
                        responses.push(JsonRpcResponse::error_response(error, request.id));
                        continue;
                    }
                    let Some(handler) = self
                        .request_handlers
                        .get(&request.method)
                        .map(|h| Arc::clone(h.value()))
                    else {
                        responses.push(JsonRpcResponse::error_response(
                            JsonRpcError::method_not_found(&request.method),
                            request.id,
                        ));
                        continue;
                    };
                    let ctx = self.build_context(request.id.clone(), &context);
                    let result = handler.handle(request.params, ctx).await;
                    let response = match result {
                        Ok(value) => JsonRpcResponse::success(value, request.id),
                        Err(ProtocolError::PeerError { code, message }) => {
                            JsonRpcResponse::error_response(JsonRpcError::new(code, message), request.id)
                        }
                        Err(error) => JsonRpcResponse::error_response(
                            JsonRpcError::internal_error(&error.to_string()),
                            request.id,
                        ),
                    };
                    responses.push(response);
                }
                BatchElement::Recognized(Envelope::Notification(notification)) => {
                    self.dispatch_notification(notification, context.clone()).await;
                }
                BatchElement::Recognized(Envelope::Response(response)) => {
                    self.route_response(response).await;
                }
                BatchElement::Unknown(value) => {
                    warn!(?value, "unrecognized element inside a batch");
                }
            }
        }

        if !responses.is_empty() {
            let Ok(bytes) = serde_json::to_vec(&responses) else {
                warn!("failed to encode batch response");
                return;
            };
            if let Err(error) = self.transport.send(bytes.into(), SendOptions::default()).await {
                warn!(%error, "failed to send batch response");
            }
        }
    }

    /// Sends a request and awaits its response, applying `options`.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        options: RequestOptions,
    ) -> ProtocolResult<Value> {
        let method = method.into();
        self.session.peer_capabilities().check(&method)?;
        let id = RequestId::Number(self.id_gen.fetch_add(1, Ordering::Relaxed));
        let rx = self.pending.register(id.clone());

        let mut params = params;
        if let Some(sender) = options.on_progress {
            let token: ProgressToken = match &id {
                RequestId::Number(n) => ProgressToken::Number(*n),
                RequestId::String(s) => ProgressToken::String(s.clone()),
            };
            let mut rx_updates = self.progress.register(token.clone());
            tokio::spawn(async move { while let Some(update) = rx_updates.recv().await {
                if sender.send(update).is_err() {
                    break;
                }
            }});
            let mut object = params.unwrap_or_else(|| serde_json::json!({}));
            object["_meta"] = serde_json::json!({ "progressToken": token });
            params = Some(object);
        }

        let request = JsonRpcRequest::new(method, params, id.clone());
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))?;

        let related = options.related_request_id.unwrap_or_else(|| id.clone());
        self.transport.send(bytes.into(), SendOptions::for_request(related)).await?;

        let outcome = async {
            match rx.await {
                Ok(response) => match response.result() {
                    Some(result) => Ok(result.clone()),
                    None => {
                        let error = response.error().cloned().unwrap_or_else(|| {
                            JsonRpcError::internal_error("missing result and error")
                        });
                        Err(ProtocolError::PeerError {
                            code: error.code,
                            message: error.message,
                        })
                    }
                },
                Err(_) if self.torn_down.load(Ordering::Acquire) => Err(ProtocolError::ConnectionClosed),
                Err(_) => Err(ProtocolError::Dropped),
            }
        };

        match options.timeout {
            Some(policy) => {
                let (result, _handle) = with_timeout(policy, self.cancellation.clone(), outcome).await;
                result.and_then(|inner| inner)
            }
            None => outcome.await,
        }
    }

    /// Sends a notification, coalescing it into the debounce queue when its
    /// method is in the debounce set and no `related_request_id` is given.
    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        related_request_id: Option<RequestId>,
    ) -> ProtocolResult<()> {
        let method = method.into();
        if related_request_id.is_none() && self.debounce_methods.contains(&method) {
            self.debouncer.push(method, params);
            return Ok(());
        }

        let notification = JsonRpcNotification::new(method, params);
        let bytes = serde_json::to_vec(&notification)
            .map_err(|e| ProtocolError::Wire(mcprelay_wire::WireError::ParseError(e)))?;
        let options = match related_request_id {
            Some(id) => SendOptions::for_request(id),
            None => SendOptions::default(),
        };
        self.transport.send(bytes.into(), options).await?;
        Ok(())
    }

    /// Idempotent shutdown: cancels the receive loop, fails every pending
    /// request, and disconnects the transport. `teardown` (invoked from the
    /// loop itself on stream end) handles the `onDisconnect` firing; calling
    /// `stop` explicitly after that still only disconnects once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancellation.cancel();
        self.debounce_flush_task.abort();
        if let Some(handle) = self.receive_task.write().await.take() {
            let _ = handle.await;
        }
        let _ = self.transport.disconnect().await;
    }

    async fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.pending.fail_all();
        self.session.fire_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use mcprelay_transport::{MemoryTransport, MessageContext};
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::session::SessionConfig;

    fn lenient_session() -> Arc<SessionState> {
        Arc::new(SessionState::new(SessionConfig::lenient()))
    }

    fn paired_engines(debounce_methods: HashSet<String>) -> (Arc<Engine>, Arc<Engine>) {
        let (transport_a, transport_b) = MemoryTransport::pair();
        let engine_a = Arc::new(Engine::new(Arc::new(transport_a), lenient_session(), HashSet::new()));
        let engine_b = Arc::new(Engine::new(Arc::new(transport_b), lenient_session(), debounce_methods));
        (engine_a, engine_b)
    }

    #[tokio::test]
    async fn send_request_round_trips_through_a_registered_handler() {
        let (engine_a, engine_b) = paired_engines(HashSet::new());
        let handler: Arc<dyn RequestHandler> =
            Arc::new(|params: Option<Value>, _ctx: RequestContext| async move { Ok(params.unwrap()) });
        engine_b.register_request_handler("test/echo", handler);
        Arc::clone(&engine_a).start().await.unwrap();
        Arc::clone(&engine_b).start().await.unwrap();

        let result = engine_a
            .send_request("test/echo", Some(json!({"x": 1})), RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn send_request_surfaces_the_peers_error() {
        let (engine_a, engine_b) = paired_engines(HashSet::new());
        let handler: Arc<dyn RequestHandler> =
            Arc::new(|_params: Option<Value>, _ctx: RequestContext| async move {
                Err(ProtocolError::PeerError { code: -32001, message: "nope".into() })
            });
        engine_b.register_request_handler("test/fail", handler);
        Arc::clone(&engine_a).start().await.unwrap();
        Arc::clone(&engine_b).start().await.unwrap();

        let err = engine_a
            .send_request("test/fail", None, RequestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::PeerError { code: -32001, .. }));
    }

    #[tokio::test]
    async fn send_notification_reaches_the_registered_handler() {
        let (engine_a, engine_b) = paired_engines(HashSet::new());
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let handler: Arc<dyn NotificationHandler> =
            Arc::new(move |params: Option<Value>, _ctx: RequestContext| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(params);
                }
                async move {}
            });
        engine_b.register_notification_handler("test/ping", handler);
        Arc::clone(&engine_a).start().await.unwrap();
        Arc::clone(&engine_b).start().await.unwrap();

        engine_a.send_notification("test/ping", Some(json!("hi")), None).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), rx).await.unwrap().unwrap();
        assert_eq!(received, Some(json!("hi")));
    }

    #[tokio::test]
    async fn dispatch_batch_sends_one_combined_response_for_every_request() {
        let (transport, peer) = MemoryTransport::pair();
        let engine = Engine::new(Arc::new(transport), lenient_session(), HashSet::new());
        let handler: Arc<dyn RequestHandler> =
            Arc::new(|params: Option<Value>, _ctx: RequestContext| async move {
                let params = params.unwrap();
                Ok(json!(params["a"].as_i64().unwrap() + params["b"].as_i64().unwrap()))
            });
        engine.register_request_handler("test/add", handler);

        let elements = vec![
            BatchElement::Recognized(Envelope::Request(JsonRpcRequest::new(
                "test/add",
                Some(json!({"a": 1, "b": 2})),
                RequestId::Number(1),
            ))),
            BatchElement::Recognized(Envelope::Notification(JsonRpcNotification::new(
                "test/noop",
                None,
            ))),
        ];
        engine.dispatch_batch(elements, MessageContext::default()).await;

        let message = tokio::time::timeout(Duration::from_millis(200), peer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let responses: Vec<Value> = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"], json!(3));
    }

    #[tokio::test]
    async fn start_twice_is_rejected_without_leaking_a_second_receive_loop() {
        let (transport, _peer) = MemoryTransport::pair();
        let engine = Arc::new(Engine::new(Arc::new(transport), lenient_session(), HashSet::new()));
        Arc::clone(&engine).start().await.unwrap();
        let err = Arc::clone(&engine).start().await.unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyConnected));
    }

    #[tokio::test]
    async fn wait_for_pending_debounced_notifications_settles_after_coalescing() {
        let (transport, peer) = MemoryTransport::pair();
        let mut debounced = HashSet::new();
        debounced.insert("test/debounced".to_string());
        let engine = Engine::new(Arc::new(transport), lenient_session(), debounced);

        engine.send_notification("test/debounced", Some(json!(1)), None).await.unwrap();
        engine.send_notification("test/debounced", Some(json!(2)), None).await.unwrap();
        engine.wait_for_pending_debounced_notifications().await;

        let message = tokio::time::timeout(Duration::from_millis(200), peer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let notification: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(notification["params"], json!(2));

        // Only the coalesced value was flushed, nothing further follows it.
        let second = tokio::time::timeout(Duration::from_millis(50), peer.receive()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn engine_channel_sends_through_its_captured_transport() {
        // A second, independent pair stands in for the transport the engine
        // might move on to later (session resumption, reconnection): the
        // channel below was built against `transport_a` and must keep using
        // it regardless.
        let (transport_a, peer_a) = MemoryTransport::pair();
        let (_transport_b, _peer_b) = MemoryTransport::pair();
        let channel = EngineChannel {
            transport: Arc::new(transport_a),
            pending: Arc::new(PendingRequests::new()),
            id_gen: Arc::new(AtomicI64::new(1)),
            related_request_id: RequestId::Number(7),
            session: lenient_session(),
            torn_down: Arc::new(AtomicBool::new(false)),
        };

        channel.notify("test/ping".to_string(), None).await.unwrap();

        let message = tokio::time::timeout(Duration::from_millis(200), peer_a.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&message.payload).contains("test/ping"));
    }

    #[tokio::test]
    async fn stop_aborts_the_debounce_flush_task() {
        let (transport, _peer) = MemoryTransport::pair();
        let engine = Arc::new(Engine::new(Arc::new(transport), lenient_session(), HashSet::new()));
        Arc::clone(&engine).start().await.unwrap();
        engine.stop().await;

        // `abort()` wakes the task but finishing it still needs a poll; give
        // the scheduler a few chances before asserting.
        for _ in 0..20 {
            if engine.debounce_flush_task.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.debounce_flush_task.is_finished());
    }
}
