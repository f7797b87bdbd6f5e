//! Request/response correlation over the page message channel.
//!
//! Every call gets a fresh id and a pending entry holding its continuation.
//! An entry leaves the table exactly once: through the matching response,
//! through its timeout, or when the caller drops the request future. Whoever
//! removes the entry owns the outcome; every other path becomes a no-op.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::bridge::channel::{target_origin, InboundEvent, MessageChannel, MessageSource};
use crate::bridge::messages::{parse_inbound, Inbound, StatePush, EXT_REQUEST};
use crate::core::errors::{ProviderError, ProviderResult};
use crate::security::envelope::SecureMessageSigner;
use crate::security::error_sanitizer::sanitize_for_logging;

/// Request path to the relay, as seen by the components layered on top of it.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Sends `method` with the transport's default timeout.
    async fn send_request(&self, method: &str, params: Value) -> ProviderResult<Value>;

    async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ProviderResult<Value>;

    /// Rejects every in-flight request with `error`. Returns how many were rejected.
    fn abandon_pending(&self, _error: ProviderError) -> usize {
        0
    }
}

struct PendingRequest {
    method: String,
    created_at: Instant,
    responder: oneshot::Sender<ProviderResult<Value>>,
}

/// Settings for a [`BridgeClient`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub page_origin: Option<String>,
    pub default_timeout: Duration,
    pub max_pending: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self { page_origin: None, default_timeout: Duration::from_secs(30), max_pending: 1_024 }
    }
}

pub struct BridgeClient {
    channel: Arc<dyn MessageChannel>,
    signer: SecureMessageSigner,
    settings: BridgeSettings,
    pending: Mutex<HashMap<String, PendingRequest>>,
    instance_tag: String,
    next_seq: AtomicU64,
}

/// Removes the pending entry if the request future is dropped before settling.
struct PendingGuard<'a> {
    client: &'a BridgeClient,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.client.pending.lock().remove(self.request_id).is_some() {
            debug!(request_id = self.request_id, "pending request abandoned by caller");
        }
    }
}

impl BridgeClient {
    pub fn new(channel: Arc<dyn MessageChannel>, settings: BridgeSettings) -> Self {
        let instance_tag = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            channel,
            signer: SecureMessageSigner::new(),
            settings,
            pending: Mutex::new(HashMap::new()),
            instance_tag,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn page_origin(&self) -> Option<&str> {
        self.settings.page_origin.as_deref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings.default_timeout
    }

    /// Number of requests still awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    fn next_request_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.instance_tag, seq)
    }

    async fn dispatch(&self, method: &str, params: Value, timeout: Duration) -> ProviderResult<Value> {
        let request_id = self.next_request_id();

        let mut payload = Map::new();
        payload.insert("method".into(), Value::String(method.to_string()));
        payload.insert("params".into(), params);
        payload.insert("requestId".into(), Value::String(request_id.clone()));
        payload.insert(
            "origin".into(),
            self.settings.page_origin.clone().map(Value::String).unwrap_or(Value::Null),
        );
        let envelope = self.signer.wrap(EXT_REQUEST, payload)?;

        let (responder, mut outcome) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.settings.max_pending {
                warn!(method, pending = pending.len(), "pending request table full");
                return Err(ProviderError::TooManyPendingRequests);
            }
            pending.insert(
                request_id.clone(),
                PendingRequest { method: method.to_string(), created_at: Instant::now(), responder },
            );
        }
        let _guard = PendingGuard { client: self, request_id: &request_id };

        debug!(request_id = %request_id, method, "posting relay request");
        self.channel.post_message(envelope, target_origin(self.page_origin()))?;

        match tokio::time::timeout(timeout, &mut outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProviderError::Internal("pending request dropped".into())),
            Err(_) => {
                if self.pending.lock().remove(&request_id).is_some() {
                    debug!(request_id = %request_id, method, ?timeout, "relay request timed out");
                    return Err(ProviderError::RequestTimeout);
                }
                // The response settled the entry before the timer fired.
                outcome.try_recv().unwrap_or(Err(ProviderError::RequestTimeout))
            }
        }
    }

    /// Settles `request_id` if it is still pending. Returns whether it was.
    fn settle(&self, request_id: &str, outcome: ProviderResult<Value>) -> bool {
        let Some(entry) = self.pending.lock().remove(request_id) else {
            trace!(request_id, "response for settled or unknown request ignored");
            return false;
        };
        if let Err(err) = &outcome {
            debug!(
                request_id,
                method = %entry.method,
                error = %sanitize_for_logging(&err.to_string()),
                "relay request failed"
            );
        }
        debug!(request_id, method = %entry.method, elapsed = ?entry.created_at.elapsed(), "relay request settled");
        // The caller may already be gone; nothing to do then.
        let _ = entry.responder.send(outcome);
        true
    }

    /// Fails every in-flight request with `error`. Returns how many were failed.
    pub fn fail_all_pending(&self, error: ProviderError) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.responder.send(Err(error.clone()));
        }
        if count > 0 {
            warn!(count, %error, "failed all pending relay requests");
        }
        count
    }

    /// Filters and routes one inbound `message` event.
    ///
    /// Responses settle their pending entry; state pushes are returned to the
    /// caller. Foreign-source, foreign-origin and non-allow-listed messages are
    /// ignored.
    pub fn handle_inbound(&self, event: &InboundEvent) -> Option<StatePush> {
        if event.source != MessageSource::SameWindow {
            trace!(origin = %event.origin, "ignoring message from another frame");
            return None;
        }
        if let Some(origin) = self.page_origin() {
            if event.origin != origin {
                trace!(origin = %event.origin, "ignoring message from unexpected origin");
                return None;
            }
        }

        match parse_inbound(&event.data)? {
            Inbound::Response { request_id, outcome } => {
                self.settle(&request_id, outcome);
                None
            }
            Inbound::Malformed { request_id, reason } => {
                if self.is_pending(&request_id) {
                    warn!(request_id = %request_id, %reason, "malformed relay response");
                }
                self.settle(&request_id, Err(ProviderError::MalformedResponse(reason)));
                None
            }
            Inbound::Push(push) => Some(push),
        }
    }
}

#[async_trait]
impl RelayTransport for BridgeClient {
    async fn send_request(&self, method: &str, params: Value) -> ProviderResult<Value> {
        self.dispatch(method, params, self.settings.default_timeout).await
    }

    async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ProviderResult<Value> {
        self.dispatch(method, params, timeout).await
    }

    fn abandon_pending(&self, error: ProviderError) -> usize {
        self.fail_all_pending(error)
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("instance_tag", &self.instance_tag)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::ChannelError;
    use crate::bridge::mock::RecordingChannel;
    use serde_json::json;

    const ORIGIN: &str = "https://dapp.example";

    fn client(channel: Arc<RecordingChannel>) -> Arc<BridgeClient> {
        Arc::new(BridgeClient::new(
            channel,
            BridgeSettings { page_origin: Some(ORIGIN.into()), ..BridgeSettings::default() },
        ))
    }

    fn response(request_id: &str, data: Value) -> InboundEvent {
        InboundEvent::same_window(
            ORIGIN,
            json!({ "type": "EXT_RESPONSE", "requestId": request_id, "success": true, "data": data }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_posts_signed_envelope_to_page_origin() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = client(Arc::clone(&channel));

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send_request("eth_blockNumber", json!([])).await })
        };
        tokio::task::yield_now().await;

        let (message, target) = channel.last().unwrap();
        assert_eq!(target, ORIGIN);
        assert_eq!(message["type"], "EXT_REQUEST");
        assert_eq!(message["method"], "eth_blockNumber");
        assert_eq!(message["origin"], ORIGIN);
        assert!(SecureMessageSigner::verify(&message));

        let id = message["requestId"].as_str().unwrap().to_string();
        bridge.handle_inbound(&response(&id, json!("0x10")));
        assert_eq!(task.await.unwrap().unwrap(), json!("0x10"));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry_and_late_response_is_noop() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = client(Arc::clone(&channel));

        let err = bridge
            .send_request_with_timeout("eth_call", json!([]), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::RequestTimeout);
        assert_eq!(bridge.pending_count(), 0);

        let id = channel.last().unwrap().0["requestId"].as_str().unwrap().to_string();
        assert_eq!(bridge.handle_inbound(&response(&id, json!("late"))), None);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_source_and_origin_ignored() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = client(Arc::clone(&channel));

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                bridge.send_request_with_timeout("eth_call", json!([]), Duration::from_secs(1)).await
            })
        };
        tokio::task::yield_now().await;
        let id = channel.last().unwrap().0["requestId"].as_str().unwrap().to_string();

        let mut forged = response(&id, json!("forged"));
        forged.source = MessageSource::Foreign;
        bridge.handle_inbound(&forged);

        let mut other_origin = response(&id, json!("forged"));
        other_origin.origin = "https://evil.example".into();
        bridge.handle_inbound(&other_origin);

        assert!(bridge.is_pending(&id));
        assert_eq!(task.await.unwrap().unwrap_err(), ProviderError::RequestTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_rejects() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = client(Arc::clone(&channel));

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send_request("eth_call", json!([])).await })
        };
        tokio::task::yield_now().await;
        let id = channel.last().unwrap().0["requestId"].as_str().unwrap().to_string();

        bridge.handle_inbound(&InboundEvent::same_window(
            ORIGIN,
            json!({ "type": "EXT_RESPONSE", "requestId": id, "success": "maybe" }),
        ));
        assert!(matches!(task.await.unwrap(), Err(ProviderError::MalformedResponse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_failure_maps_to_context_invalidated() {
        let channel = Arc::new(RecordingChannel::new());
        channel.fail_with(Some(ChannelError::ContextInvalidated));
        let bridge = client(Arc::clone(&channel));

        let err = bridge.send_request("eth_call", json!([])).await.unwrap_err();
        assert_eq!(err, ProviderError::ExtensionContextInvalidated);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_capacity_enforced() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = Arc::new(BridgeClient::new(
            channel,
            BridgeSettings { page_origin: Some(ORIGIN.into()), max_pending: 1, ..BridgeSettings::default() },
        ));

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send_request("eth_call", json!([])).await })
        };
        tokio::task::yield_now().await;

        let err = bridge.send_request("eth_call", json!([])).await.unwrap_err();
        assert_eq!(err, ProviderError::TooManyPendingRequests);

        first.abort();
        let _ = first.await;
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_all_pending() {
        let channel = Arc::new(RecordingChannel::new());
        let bridge = client(Arc::clone(&channel));

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.send_request("eth_call", json!([])).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(bridge.fail_all_pending(ProviderError::ExtensionContextInvalidated), 1);
        assert_eq!(task.await.unwrap().unwrap_err(), ProviderError::ExtensionContextInvalidated);
    }
}
