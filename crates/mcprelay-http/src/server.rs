//! The axum router for the streaming HTTP transport (§4.6): a single `/mcp`
//! endpoint handling `POST`, `GET`, and `DELETE`.
//!
//! This module is deliberately agnostic of what methods an MCP server
//! actually implements: the caller supplies a `configure_engine` callback
//! invoked once per new session, immediately after the session's
//! [`Engine`] is constructed and before it starts, to register `initialize`
//! and every other request/notification handler. This mirrors how the rest
//! of the runtime keeps the protocol engine independent of any one
//! transport, and the transport independent of any one set of handlers.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes as AxumBytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self};
use mcprelay_core::{BATCH_DISABLED_SINCE, LATEST_PROTOCOL_VERSION, PRIMING_EVENT_SINCE};
use mcprelay_protocol::{Engine, SessionConfig, SessionState};
use mcprelay_wire::{BatchElement, DecodedFrame, Envelope, RequestId, decode};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::StreamableConfig;
use crate::event_store::{EventStore, InMemoryEventStore, STANDALONE_STREAM_ID, StoredEvent};
use crate::headers::{ACCEPT_SSE, CONTENT_TYPE_SSE, LAST_EVENT_ID, MCP_SESSION_ID};
use crate::transport::HttpTransport;
use crate::types::OriginValidation;

/// Cheaply sniffs whether a stored SSE payload carries a JSON-RPC response
/// (has `result` or `error`, no `method`) as opposed to a notification.
/// Used to know when a per-request SSE stream has delivered every response
/// it owes and can be closed.
fn is_response_payload(data: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .is_some_and(|obj| !obj.contains_key("method") && (obj.contains_key("result") || obj.contains_key("error")))
}

fn sse_event(event: StoredEvent) -> Result<Event, std::convert::Infallible> {
    Ok(Event::default().event(event.event_type).data(event.data).id(event.id))
}

/// Called once per freshly constructed session [`Engine`], before it is
/// started, to register request/notification handlers.
pub type EngineConfigurator = dyn Fn(&Arc<Engine>) + Send + Sync;

/// Generates a fresh session id at `initialize`. Injectable for
/// deterministic tests (§4.6, "`sessionIdGenerator()`").
pub type SessionIdGenerator = dyn Fn() -> String + Send + Sync;

/// Fires once per session lifecycle event, never throwing (§4.6).
pub type SessionLifecycleHook = dyn Fn(String) + Send + Sync;

fn default_session_id() -> String {
    format!("mcp-{}", uuid::Uuid::new_v4().simple())
}

struct SessionEntry {
    transport: Arc<HttpTransport>,
    engine: Arc<Engine>,
    created_at: tokio::time::Instant,
    last_activity: parking_lot::Mutex<tokio::time::Instant>,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_activity.lock() = tokio::time::Instant::now();
    }
}

/// Shared state for the streaming HTTP router.
struct AppState {
    config: StreamableConfig,
    event_store: Arc<dyn EventStore>,
    sessions: DashMap<String, Arc<SessionEntry>>,
    configure_engine: Arc<EngineConfigurator>,
    session_id_generator: Arc<SessionIdGenerator>,
    on_session_initialized: Arc<SessionLifecycleHook>,
    on_session_closed: Arc<SessionLifecycleHook>,
}

/// Builds the streaming HTTP router, mounted at `endpoint_path`.
pub struct StreamableHttpServer {
    state: Arc<AppState>,
    endpoint_path: String,
}

impl StreamableHttpServer {
    /// Creates a new server. `configure_engine` is invoked once per session,
    /// immediately after construction of that session's [`Engine`], and is
    /// the caller's only hook for registering MCP method handlers.
    #[must_use]
    pub fn new(
        config: StreamableConfig,
        endpoint_path: impl Into<String>,
        configure_engine: Arc<EngineConfigurator>,
    ) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            state: Arc::new(AppState {
                event_store: Arc::new(InMemoryEventStore::new(config.max_events_per_session)),
                sessions: DashMap::new(),
                configure_engine,
                session_id_generator: Arc::new(default_session_id),
                on_session_initialized: Arc::new(|_| {}),
                on_session_closed: Arc::new(|_| {}),
                config,
            }),
        }
    }

    /// Overrides the session id generator (default: random `mcp-{uuid}`).
    #[must_use]
    pub fn with_session_id_generator(mut self, generator: Arc<SessionIdGenerator>) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("server not yet shared")
            .session_id_generator = generator;
        self
    }

    /// Sets the `onSessionInitialized` hook.
    #[must_use]
    pub fn with_on_session_initialized(mut self, hook: Arc<SessionLifecycleHook>) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("server not yet shared")
            .on_session_initialized = hook;
        self
    }

    /// Sets the `onSessionClosed` hook.
    #[must_use]
    pub fn with_on_session_closed(mut self, hook: Arc<SessionLifecycleHook>) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("server not yet shared")
            .on_session_closed = hook;
        self
    }

    /// Builds the axum [`Router`]. Also starts the background sweeper that
    /// evicts sessions past `session_timeout_ms`/`idle_timeout_ms`.
    #[must_use]
    pub fn into_router(self) -> Router {
        spawn_session_sweeper(Arc::clone(&self.state));
        Router::new()
            .route(
                &self.endpoint_path,
                get(get_handler).post(post_handler).delete(delete_handler),
            )
            .with_state(self.state)
    }
}

fn validate_origin(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let validation = OriginValidation::validate(origin, &state.config.allowed_origins);
    if validation.passed(state.config.require_origin) {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

fn session_id_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn protocol_version_header(headers: &HeaderMap) -> String {
    headers
        .get("MCP-Protocol-Version")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(LATEST_PROTOCOL_VERSION)
        .to_string()
}

fn accepts_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(ACCEPT_SSE))
}

fn error_body(code: i32, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message.into() },
        "id": null,
    })
}

const PARSE_ERROR: i32 = mcprelay_core::error_codes::PARSE_ERROR;
const INVALID_REQUEST: i32 = mcprelay_core::error_codes::INVALID_REQUEST;

fn new_session(state: &AppState) -> (String, Arc<SessionEntry>) {
    let session_id = (state.session_id_generator)();
    let session_state = Arc::new(SessionState::new(SessionConfig::new()));

    let on_session_initialized = Arc::clone(&state.on_session_initialized);
    let hook_session_id = session_id.clone();
    session_state.set_on_initialized(Some(Arc::new(move || {
        on_session_initialized(hook_session_id.clone());
    })));

    let transport = Arc::new(HttpTransport::new(
        session_id.clone(),
        Arc::clone(&state.event_store),
        state.config.enable_sessions,
    ));
    let engine = Arc::new(Engine::new(Arc::clone(&transport), session_state, HashSet::new()));
    (state.configure_engine)(&engine);
    let now = tokio::time::Instant::now();
    let entry = Arc::new(SessionEntry {
        transport,
        engine,
        created_at: now,
        last_activity: parking_lot::Mutex::new(now),
    });
    state.sessions.insert(session_id.clone(), Arc::clone(&entry));
    (session_id, entry)
}

/// Periodically evicts sessions that exceeded `session_timeout_ms` since
/// creation or `idle_timeout_ms` since their last request, mirroring the
/// `DELETE /mcp` teardown path.
fn spawn_session_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let now = tokio::time::Instant::now();
            let expired: Vec<String> = state
                .sessions
                .iter()
                .filter(|entry| {
                    let age = now.saturating_duration_since(entry.value().created_at);
                    let idle = now.saturating_duration_since(*entry.value().last_activity.lock());
                    age >= std::time::Duration::from_millis(state.config.session_timeout_ms)
                        || idle >= std::time::Duration::from_millis(state.config.idle_timeout_ms)
                })
                .map(|entry| entry.key().clone())
                .collect();
            for session_id in expired {
                if let Some((_, entry)) = state.sessions.remove(&session_id) {
                    entry.engine.stop().await;
                    (state.on_session_closed)(session_id);
                }
            }
        }
    });
}

/// `POST /mcp`: accepts one JSON-RPC frame (single or batch).
async fn post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: AxumBytes,
) -> Response {
    if validate_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    if body.len() > state.config.max_body_size {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(error_body(INVALID_REQUEST, "request body exceeds max_body_size")),
        )
            .into_response();
    }

    let protocol_version = protocol_version_header(&headers);

    let frame = match decode(&body) {
        Ok(frame) => frame,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(error_body(PARSE_ERROR, "Invalid JSON")))
                .into_response();
        }
    };

    if matches!(frame, DecodedFrame::Batch(_)) && protocol_version.as_str() >= BATCH_DISABLED_SINCE
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_body(INVALID_REQUEST, "batch requests are not supported")),
        )
            .into_response();
    }

    let is_initialize = matches!(&frame, DecodedFrame::Request(r) if r.method == mcprelay_core::methods::INITIALIZE);

    let (session_id, entry) = if is_initialize {
        let (id, entry) = new_session(&state);
        if Arc::clone(&entry.engine).start().await.is_err() {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(
                    mcprelay_core::error_codes::INTERNAL_ERROR,
                    "failed to start session transport",
                )),
            )
                .into_response();
        }
        (id, entry)
    } else {
        let Some(session_id) = session_id_header(&headers) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_body(INVALID_REQUEST, "missing Mcp-Session-Id")),
            )
                .into_response();
        };
        let Some(entry) = state.sessions.get(&session_id).map(|e| Arc::clone(e.value())) else {
            return (
                StatusCode::NOT_FOUND,
                Json(error_body(INVALID_REQUEST, "unknown session")),
            )
                .into_response();
        };
        (session_id, entry)
    };
    entry.touch();

    let request_ids = collect_request_ids(&frame);
    let is_notification_only = request_ids.is_empty();

    if is_notification_only {
        let _ = entry.transport.deliver(body.clone());
        let mut response = StatusCode::ACCEPTED.into_response();
        response.headers_mut().insert(
            MCP_SESSION_ID,
            header::HeaderValue::from_str(&session_id).unwrap_or(header::HeaderValue::from_static("")),
        );
        return response;
    }

    let prefers_sse = accepts_sse(&headers);

    if prefers_sse {
        let streams: Vec<_> = request_ids
            .iter()
            .map(|id| {
                let stream_id = crate::event_store::request_stream_id(&id.to_string());
                entry.transport.subscribe(&stream_id)
            })
            .collect();
        let _ = entry.transport.deliver(body.clone());

        // Keep yielding until every request this POST carried has had its
        // response delivered; notifications emitted along the way don't
        // count against the budget (§4.6: "streams end after all responses
        // are delivered").
        let merged = stream::select_all(streams.into_iter().map(UnboundedReceiverStream::new))
            .scan(request_ids.len(), |remaining, event: StoredEvent| {
                if *remaining == 0 {
                    return futures::future::ready(None);
                }
                if is_response_payload(&event.data) {
                    *remaining -= 1;
                }
                futures::future::ready(Some(sse_event(event)))
            });

        let mut response = Sse::new(merged)
            .keep_alive(KeepAlive::new().interval(std::time::Duration::from_millis(
                state.config.keepalive_interval_ms,
            )))
            .into_response();
        response.headers_mut().insert(
            MCP_SESSION_ID,
            header::HeaderValue::from_str(&session_id).unwrap_or(header::HeaderValue::from_static("")),
        );
        return response;
    }

    let mut waiters = Vec::with_capacity(request_ids.len());
    for id in &request_ids {
        waiters.push((id.clone(), entry.transport.await_direct_reply(id.clone())));
    }
    let _ = entry.transport.deliver(body.clone());

    let mut values = Vec::with_capacity(waiters.len());
    for (id, waiter) in waiters {
        match waiter.await {
            Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => values.push(value),
                Err(_) => values.push(error_body(PARSE_ERROR, "malformed response")),
            },
            Err(_) => {
                entry.transport.cancel_direct_reply(&id);
                values.push(error_body(mcprelay_core::error_codes::INTERNAL_ERROR, "no response"));
            }
        }
    }

    let body_value = if values.len() == 1 {
        values.into_iter().next().unwrap()
    } else {
        serde_json::Value::Array(values)
    };

    let mut response = (StatusCode::OK, Json(body_value)).into_response();
    response.headers_mut().insert(
        MCP_SESSION_ID,
        header::HeaderValue::from_str(&session_id).unwrap_or(header::HeaderValue::from_static("")),
    );
    response
}

fn collect_request_ids(frame: &DecodedFrame) -> Vec<RequestId> {
    match frame {
        DecodedFrame::Request(r) => vec![r.id.clone()],
        DecodedFrame::Batch(elements) => elements
            .iter()
            .filter_map(|e| match e {
                BatchElement::Recognized(Envelope::Request(r)) => Some(r.id.clone()),
                _ => None,
            })
            .collect(),
        DecodedFrame::Notification(_) | DecodedFrame::Response(_) | DecodedFrame::Unknown(_) => {
            Vec::new()
        }
    }
}

/// `GET /mcp`: opens the standalone SSE stream for server-initiated traffic.
async fn get_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if validate_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !accepts_sse(&headers) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    let Some(session_id) = session_id_header(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(entry) = state.sessions.get(&session_id).map(|e| Arc::clone(e.value())) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    entry.touch();

    let protocol_version = entry
        .engine
        .session()
        .negotiated_version()
        .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string());

    let mut replayed = Vec::new();
    if let Some(last_event_id) = headers.get(LAST_EVENT_ID).and_then(|v| v.to_str().ok()) {
        let mut collected = Vec::new();
        let result = state
            .event_store
            .replay_after(last_event_id, &mut |event| collected.push(event.clone()));
        match result {
            Ok(_) => replayed = collected,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        }
        if protocol_version.as_str() >= PRIMING_EVENT_SINCE {
            replayed.push(state.event_store.prime(STANDALONE_STREAM_ID));
        }
    }

    let Some(rx) =
        entry.transport.try_subscribe(STANDALONE_STREAM_ID, state.config.max_streams_per_session)
    else {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    };
    let live = UnboundedReceiverStream::new(rx).map(|event| {
        Ok::<_, std::convert::Infallible>(
            Event::default().event(event.event_type).data(event.data).id(event.id),
        )
    });
    let replay_stream = stream::iter(replayed.into_iter().map(|event| {
        Ok::<_, std::convert::Infallible>(
            Event::default().event(event.event_type).data(event.data).id(event.id),
        )
    }));

    let combined = replay_stream.chain(live);
    let keep_alive =
        KeepAlive::new().interval(std::time::Duration::from_millis(state.config.keepalive_interval_ms));
    let mut response = Sse::new(combined).keep_alive(keep_alive).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(CONTENT_TYPE_SSE));
    response
}

/// `DELETE /mcp`: terminates a session.
async fn delete_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    if validate_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN;
    }
    let Some(session_id) = session_id_header(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if let Some((_, entry)) = state.sessions.remove(&session_id) {
        entry.engine.stop().await;
        (state.on_session_closed)(session_id);
    }
    StatusCode::OK
}
