//! The request-handler context (§4.7): the capability object handlers
//! receive instead of touching the engine or transport directly.
//!
//! Handlers never see a transport or the pending-request table. They see a
//! [`RequestContext`], which borrows back into the engine through the
//! [`SessionChannel`] trait object captured at the moment the handler was
//! spawned - never an owning reference to the session itself. This mirrors
//! the ownership resolution for the handler/session cycle: the session owns
//! the handler registry, handlers borrow a context, and the context's only
//! path back to the session is a trait object it does not own.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mcprelay_wire::RequestId;

use crate::error::{ProtocolError, ProtocolResult};

/// The channel a [`RequestContext`] uses to talk back to its peer: issuing
/// server-initiated requests and notifications tagged with the
/// `relatedRequestId` captured when the handler was spawned.
///
/// Implemented by the protocol engine over the transport it captured; absent
/// entirely (`None` in [`RequestContext`]) when no such channel was set up,
/// e.g. a context built outside of a live session for testing.
pub trait SessionChannel: Send + Sync + std::fmt::Debug {
    /// Issues a server-to-client request and awaits its response. Fails with
    /// [`ProtocolError::StatelessMode`] if the underlying transport cannot
    /// carry it.
    fn call(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<Value>> + Send + '_>>;

    /// Emits a notification tagged with the captured `relatedRequestId`.
    fn notify(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + '_>>;
}

/// Tracks which outgoing-notification capabilities the local endpoint has
/// declared. Convenience sends on [`RequestContext`] are silently dropped
/// (return `Ok(())` without sending) rather than erroring when the
/// corresponding flag is unset.
#[derive(Debug, Default)]
pub struct CapabilityGate {
    logging: AtomicBool,
    resources: AtomicBool,
    resources_list_changed: AtomicBool,
    prompts_list_changed: AtomicBool,
    tools_list_changed: AtomicBool,
}

impl CapabilityGate {
    /// Creates a gate with every capability closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the `logging` capability.
    #[must_use]
    pub fn with_logging(self, enabled: bool) -> Self {
        self.logging.store(enabled, Ordering::Relaxed);
        self
    }

    /// Opens the `resources` capability (required for `resources/updated`).
    #[must_use]
    pub fn with_resources(self, enabled: bool) -> Self {
        self.resources.store(enabled, Ordering::Relaxed);
        self
    }

    /// Opens `resources.listChanged`.
    #[must_use]
    pub fn with_resources_list_changed(self, enabled: bool) -> Self {
        self.resources_list_changed.store(enabled, Ordering::Relaxed);
        self
    }

    /// Opens `prompts.listChanged`.
    #[must_use]
    pub fn with_prompts_list_changed(self, enabled: bool) -> Self {
        self.prompts_list_changed.store(enabled, Ordering::Relaxed);
        self
    }

    /// Opens `tools.listChanged`.
    #[must_use]
    pub fn with_tools_list_changed(self, enabled: bool) -> Self {
        self.tools_list_changed.store(enabled, Ordering::Relaxed);
        self
    }
}

/// A scoped handle on a per-request or standalone notification stream.
/// Releasing happens on drop, on every exit path, so handlers cannot leak a
/// held-open stream by forgetting to close it explicitly.
pub struct StreamGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamGuard {
    fn noop() -> Self {
        Self { release: None }
    }

    fn with_release(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard").finish()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// The capability object passed by reference to every request handler.
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    session_id: Option<String>,
    meta: Option<Value>,
    task_id: Option<String>,
    auth_info: Option<String>,
    request_info: Option<Value>,
    cancellation: CancellationToken,
    channel: Option<Arc<dyn SessionChannel>>,
    capabilities: Arc<CapabilityGate>,
    response_stream_release: Option<Arc<dyn Fn() + Send + Sync>>,
    notification_stream_release: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("session_id", &self.session_id)
            .field("task_id", &self.task_id)
            .field("cancellation", &self.cancellation)
            .field("has_channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Creates a new context for `request_id` with no peer channel and every
    /// capability closed. Use the `with_*` builders to fill in the rest.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            session_id: None,
            meta: None,
            task_id: None,
            auth_info: None,
            request_info: None,
            cancellation: CancellationToken::new(),
            channel: None,
            capabilities: Arc::new(CapabilityGate::new()),
            response_stream_release: None,
            notification_stream_release: None,
        }
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the request's `_meta` object.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Sets the task id, when the request was issued as part of a tracked task.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Sets opaque auth info passed through from the transport.
    #[must_use]
    pub fn with_auth_info(mut self, auth_info: impl Into<String>) -> Self {
        self.auth_info = Some(auth_info.into());
        self
    }

    /// Sets transport-specific request info (e.g. HTTP headers as JSON).
    #[must_use]
    pub fn with_request_info(mut self, request_info: Value) -> Self {
        self.request_info = Some(request_info);
        self
    }

    /// Wires a cooperative cancellation token, e.g. the one cascaded from
    /// the receive loop when the transport disconnects.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Captures the channel back to the peer (the transport plus
    /// `relatedRequestId` in effect when the handler was spawned).
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn SessionChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Sets the capability gate governing convenience sends.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityGate>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Wires the closure that releases this request's per-request response
    /// stream when [`Self::close_response_stream`]'s guard drops.
    #[must_use]
    pub fn with_response_stream_release(mut self, release: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.response_stream_release = Some(release);
        self
    }

    /// Wires the closure that releases this session's standalone
    /// notification stream when [`Self::close_notification_stream`]'s guard
    /// drops.
    #[must_use]
    pub fn with_notification_stream_release(mut self, release: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.notification_stream_release = Some(release);
        self
    }

    /// The id of the request this context was created for.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The session id, if the transport is session-scoped.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The request's `_meta` object, if any.
    #[must_use]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// The task id, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Opaque auth info passed through from the transport.
    #[must_use]
    pub fn auth_info(&self) -> Option<&str> {
        self.auth_info.as_deref()
    }

    /// Transport-specific request info.
    #[must_use]
    pub fn request_info(&self) -> Option<&Value> {
        self.request_info.as_ref()
    }

    /// Emits a notification tagged with this request's id.
    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> ProtocolResult<()> {
        let channel = self.channel.as_ref().ok_or(ProtocolError::StatelessMode)?;
        channel.notify(method.into(), params).await
    }

    /// Issues a server-to-client request over the captured channel. Fails
    /// with [`ProtocolError::StatelessMode`] when no channel is available,
    /// e.g. the transport cannot carry server-initiated requests.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> ProtocolResult<Value> {
        let channel = self.channel.as_ref().ok_or(ProtocolError::StatelessMode)?;
        channel.call(method.into(), params).await
    }

    /// Convenience wrapper over [`Self::send_notification`] for
    /// `notifications/progress`.
    pub async fn send_progress(
        &self,
        token: Value,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> ProtocolResult<()> {
        let mut params = serde_json::json!({
            "progressToken": token,
            "progress": progress,
        });
        if let Some(total) = total {
            params["total"] = serde_json::json!(total);
        }
        if let Some(message) = message {
            params["message"] = serde_json::json!(message);
        }
        self.send_notification("notifications/progress", Some(params))
            .await
    }

    /// Sends a `notifications/message` log entry. Silently dropped if the
    /// logging capability has not been declared.
    pub async fn send_log_message(
        &self,
        level: impl Into<String>,
        logger: Option<String>,
        data: Value,
    ) -> ProtocolResult<()> {
        if !self.capabilities.logging.load(Ordering::Relaxed) {
            return Ok(());
        }
        let mut params = serde_json::json!({
            "level": level.into(),
            "data": data,
        });
        if let Some(logger) = logger {
            params["logger"] = serde_json::json!(logger);
        }
        self.send_notification("notifications/message", Some(params))
            .await
    }

    /// Sends `notifications/resources/updated` for `uri`. Silently dropped
    /// if the resources capability has not been declared.
    pub async fn send_resource_updated(&self, uri: impl Into<String>) -> ProtocolResult<()> {
        if !self.capabilities.resources.load(Ordering::Relaxed) {
            return Ok(());
        }
        let params = serde_json::json!({ "uri": uri.into() });
        self.send_notification("notifications/resources/updated", Some(params))
            .await
    }

    /// Sends `notifications/resources/list_changed`. Silently dropped if
    /// `resources.listChanged` has not been declared.
    pub async fn send_resource_list_changed(&self) -> ProtocolResult<()> {
        if !self.capabilities.resources_list_changed.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.send_notification("notifications/resources/list_changed", None)
            .await
    }

    /// Sends `notifications/prompts/list_changed`. Silently dropped if
    /// `prompts.listChanged` has not been declared.
    pub async fn send_prompt_list_changed(&self) -> ProtocolResult<()> {
        if !self.capabilities.prompts_list_changed.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.send_notification("notifications/prompts/list_changed", None)
            .await
    }

    /// Sends `notifications/tools/list_changed`. Silently dropped if
    /// `tools.listChanged` has not been declared.
    pub async fn send_tool_list_changed(&self) -> ProtocolResult<()> {
        if !self.capabilities.tools_list_changed.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.send_notification("notifications/tools/list_changed", None)
            .await
    }

    /// Acquires the per-request response stream, released on drop.
    #[must_use]
    pub fn close_response_stream(&self) -> StreamGuard {
        match &self.response_stream_release {
            Some(release) => {
                let release = Arc::clone(release);
                StreamGuard::with_release(move || release())
            }
            None => StreamGuard::noop(),
        }
    }

    /// Acquires the standalone notification stream, released on drop.
    #[must_use]
    pub fn close_notification_stream(&self) -> StreamGuard {
        match &self.notification_stream_release {
            Some(release) => {
                let release = Arc::clone(release);
                StreamGuard::with_release(move || release())
            }
            None => StreamGuard::noop(),
        }
    }

    /// Returns `Err(ProtocolError::Dropped)` if this request has been
    /// cancelled, `Ok(())` otherwise. Handlers call this at suspension
    /// points to cooperatively bail out early.
    pub fn check_cancellation(&self) -> ProtocolResult<()> {
        if self.cancellation.is_cancelled() {
            Err(ProtocolError::Dropped)
        } else {
            Ok(())
        }
    }

    /// Whether this request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The cancellation token backing this context, for handlers that want
    /// to race it directly inside a `tokio::select!`.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingChannel {
        calls: Mutex<Vec<(String, Option<Value>)>>,
        notifications: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl SessionChannel for RecordingChannel {
        fn call(
            &self,
            method: String,
            params: Option<Value>,
        ) -> Pin<Box<dyn Future<Output = ProtocolResult<Value>> + Send + '_>> {
            self.calls.lock().unwrap().push((method, params));
            Box::pin(async { Ok(serde_json::json!({"ok": true})) })
        }

        fn notify(
            &self,
            method: String,
            params: Option<Value>,
        ) -> Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + '_>> {
            self.notifications.lock().unwrap().push((method, params));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn send_request_without_a_channel_is_stateless() {
        let ctx = RequestContext::new(RequestId::Number(1));
        let err = ctx.send_request("sampling/createMessage", None).await.unwrap_err();
        assert!(matches!(err, ProtocolError::StatelessMode));
    }

    #[tokio::test]
    async fn send_request_uses_the_captured_channel() {
        let channel = Arc::new(RecordingChannel::default());
        let ctx = RequestContext::new(RequestId::Number(1)).with_channel(channel.clone());
        ctx.send_request("roots/list", None).await.unwrap();
        assert_eq!(channel.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn convenience_sends_are_dropped_without_the_capability() {
        let channel = Arc::new(RecordingChannel::default());
        let ctx = RequestContext::new(RequestId::Number(1)).with_channel(channel.clone());
        ctx.send_resource_updated("file:///a").await.unwrap();
        ctx.send_log_message("info", None, serde_json::json!("hi"))
            .await
            .unwrap();
        assert!(channel.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn convenience_sends_go_through_once_capability_is_declared() {
        let channel = Arc::new(RecordingChannel::default());
        let caps = Arc::new(CapabilityGate::new().with_resources(true));
        let ctx = RequestContext::new(RequestId::Number(1))
            .with_channel(channel.clone())
            .with_capabilities(caps);
        ctx.send_resource_updated("file:///a").await.unwrap();
        assert_eq!(channel.notifications.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancellation_is_observed() {
        let ctx = RequestContext::new(RequestId::Number(1));
        assert!(ctx.check_cancellation().is_ok());
        ctx.cancellation_token().cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(
            ctx.check_cancellation(),
            Err(ProtocolError::Dropped)
        ));
    }

    #[test]
    fn close_response_stream_invokes_the_wired_release() {
        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();
        let ctx = RequestContext::new(RequestId::Number(1))
            .with_response_stream_release(Arc::new(move || released_clone.store(true, Ordering::SeqCst)));
        drop(ctx.close_response_stream());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn close_response_stream_is_a_noop_without_a_wired_release() {
        let ctx = RequestContext::new(RequestId::Number(1));
        drop(ctx.close_response_stream());
    }

    #[test]
    fn stream_guard_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();
        {
            let guard = StreamGuard::with_release(move || released_clone.store(true, Ordering::SeqCst));
            assert!(!released.load(Ordering::SeqCst));
            drop(guard);
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
