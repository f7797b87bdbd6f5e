//! In-process stand-ins for the privileged side of the channel.
//!
//! `RecordingChannel` captures posted envelopes so tests can answer them by
//! hand, in any order. `LoopbackRelay` simulates relay plus wallet engine:
//! it verifies envelopes, answers the relay methods the provider uses and can
//! emit state pushes. Neither signs anything; transaction and signature
//! results are placeholder digests.

use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bridge::channel::{ChannelError, InboundEvent, MessageChannel};
use crate::bridge::messages::{
    relay_methods, ACCOUNTS_CHANGED, CHAIN_CHANGED, DISCONNECT, EXT_REQUEST, EXT_RESPONSE, LOCK_STATE_CHANGED,
};
use crate::core::errors::{
    CODE_DISCONNECTED, CODE_INVALID_PARAMS, CODE_UNAUTHORIZED, CODE_UNSUPPORTED_CHAIN, CODE_UNSUPPORTED_METHOD,
    CODE_USER_REJECTED,
};
use crate::core::state::normalize_chain_id;
use crate::security::envelope::SecureMessageSigner;

/// Records every post; optionally fails them.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    posted: Mutex<Vec<(Value, String)>>,
    failure: Mutex<Option<ChannelError>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent posts fail with `failure` (or succeed again with `None`).
    pub fn fail_with(&self, failure: Option<ChannelError>) {
        *self.failure.lock() = failure;
    }

    pub fn posted(&self) -> Vec<(Value, String)> {
        self.posted.lock().clone()
    }

    pub fn last(&self) -> Option<(Value, String)> {
        self.posted.lock().last().cloned()
    }

    /// Request ids of every posted request, in post order.
    pub fn request_ids(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .filter_map(|(message, _)| message.get("requestId").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Methods of every posted request, in post order.
    pub fn methods(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .filter_map(|(message, _)| message.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

impl MessageChannel for RecordingChannel {
    fn post_message(&self, message: Value, target_origin: &str) -> Result<(), ChannelError> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }
        self.posted.lock().push((message, target_origin.to_string()));
        Ok(())
    }
}

/// Wallet-engine state behind a [`LoopbackRelay`].
#[derive(Debug, Clone)]
pub struct EngineState {
    pub alive: bool,
    /// Whether the engine can reach any chain node.
    pub chains_reachable: bool,
    pub unlocked: bool,
    pub accounts: Vec<String>,
    pub chain_id: String,
    pub supported_chains: HashSet<String>,
    pub connected_origins: HashSet<String>,
    /// Whether the user approves connection prompts.
    pub approve_connections: bool,
    pub unlock_surface_open: bool,
    /// Status polls after opening the surface before the user unlocks.
    pub unlock_after_polls: Option<u32>,
    /// Status polls after opening the surface before the user closes it.
    pub close_after_polls: Option<u32>,
    pub status_polls: u32,
    pub unlock_surface_opened: u32,
    /// Delay before each response is delivered.
    pub latency: Duration,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            alive: true,
            chains_reachable: true,
            unlocked: false,
            accounts: vec!["0x9858effd232b4033e47d90003d41ec34ecaeda94".to_string()],
            chain_id: "0x1".to_string(),
            supported_chains: ["0x1", "0x89", "0xaa36a7"].into_iter().map(str::to_string).collect(),
            connected_origins: HashSet::new(),
            approve_connections: true,
            unlock_surface_open: false,
            unlock_after_polls: Some(2),
            close_after_polls: None,
            status_polls: 0,
            unlock_surface_opened: 0,
            latency: Duration::ZERO,
        }
    }
}

/// Simulated relay + wallet engine delivering responses through an mpsc queue.
pub struct LoopbackRelay {
    origin: String,
    engine: Mutex<EngineState>,
    outbox: mpsc::UnboundedSender<InboundEvent>,
}

impl LoopbackRelay {
    /// Returns the relay and the queue of messages it sends to the page.
    pub fn new(origin: impl Into<String>, engine: EngineState) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (Self { origin: origin.into(), engine: Mutex::new(engine), outbox }, inbox)
    }

    pub fn engine(&self) -> EngineState {
        self.engine.lock().clone()
    }

    pub fn update_engine(&self, f: impl FnOnce(&mut EngineState)) {
        f(&mut self.engine.lock());
    }

    /// Simulates extension reload/uninstall (`false`) or recovery (`true`).
    pub fn set_alive(&self, alive: bool) {
        self.engine.lock().alive = alive;
    }

    /// Sends an unsolicited push to the page.
    pub fn push(&self, message_type: &str, data: Value) {
        self.deliver(json!({ "type": message_type, "data": data }), Duration::ZERO);
    }

    /// User locks the wallet from the extension UI.
    pub fn lock_wallet(&self) {
        self.engine.lock().unlocked = false;
        self.push(LOCK_STATE_CHANGED, json!({ "isUnlocked": false }));
    }

    /// User unlocks the wallet from the extension UI.
    pub fn unlock_wallet(&self) {
        let accounts = {
            let mut engine = self.engine.lock();
            engine.unlocked = true;
            engine.accounts.clone()
        };
        self.push(LOCK_STATE_CHANGED, json!({ "isUnlocked": true, "accounts": accounts }));
    }

    pub fn switch_account(&self, accounts: Vec<String>) {
        self.engine.lock().accounts = accounts.clone();
        self.push(ACCOUNTS_CHANGED, json!({ "accounts": accounts }));
    }

    pub fn switch_chain(&self, chain_id: &str) {
        self.engine.lock().chain_id = chain_id.to_string();
        self.push(CHAIN_CHANGED, json!({ "chainId": chain_id }));
    }

    /// Revokes the page's connection.
    pub fn disconnect_origin(&self) {
        self.engine.lock().connected_origins.remove(&self.origin);
        self.push(DISCONNECT, json!({ "code": 4900, "message": "Disconnected" }));
    }

    fn deliver(&self, data: Value, latency: Duration) {
        let event = InboundEvent::same_window(self.origin.clone(), data);
        if latency.is_zero() {
            let _ = self.outbox.send(event);
            return;
        }
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = outbox.send(event);
        });
    }

    fn respond(&self, request_id: &str, outcome: Result<Value, (i64, &str)>, latency: Duration) {
        let message = match outcome {
            Ok(data) => json!({ "type": EXT_RESPONSE, "requestId": request_id, "success": true, "data": data }),
            Err((code, message)) => json!({
                "type": EXT_RESPONSE,
                "requestId": request_id,
                "success": false,
                "error": { "code": code, "message": message },
            }),
        };
        self.deliver(message, latency);
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value, (i64, &'static str)> {
        let mut engine = self.engine.lock();
        let connected = engine.connected_origins.contains(&self.origin);
        let visible_accounts = if connected && engine.unlocked { engine.accounts.clone() } else { Vec::new() };
        match method {
            relay_methods::PING => Ok(json!("pong")),
            relay_methods::UNLOCK_STATUS => {
                engine.status_polls += 1;
                if engine.unlock_surface_open {
                    if engine.unlock_after_polls.is_some_and(|n| engine.status_polls >= n) {
                        engine.unlocked = true;
                        engine.unlock_surface_open = false;
                    } else if engine.close_after_polls.is_some_and(|n| engine.status_polls >= n) {
                        engine.unlock_surface_open = false;
                    }
                }
                Ok(json!({ "isUnlocked": engine.unlocked, "unlockSurfaceOpen": engine.unlock_surface_open }))
            }
            relay_methods::OPEN_UNLOCK_SURFACE => {
                engine.unlock_surface_open = true;
                engine.unlock_surface_opened += 1;
                engine.status_polls = 0;
                Ok(json!(true))
            }
            relay_methods::PROVIDER_STATE => Ok(json!({
                "chainId": engine.chain_id,
                "accounts": visible_accounts,
                "isUnlocked": engine.unlocked,
            })),
            "eth_requestAccounts" => {
                if !engine.unlocked {
                    return Err((CODE_UNAUTHORIZED, "Wallet is locked"));
                }
                if !connected && !engine.approve_connections {
                    return Err((CODE_USER_REJECTED, "User rejected the request"));
                }
                let origin = self.origin.clone();
                engine.connected_origins.insert(origin);
                Ok(json!(engine.accounts))
            }
            "eth_accounts" => Ok(json!(visible_accounts)),
            "eth_chainId" => Ok(json!(engine.chain_id)),
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => {
                let Some(chain_id) = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .and_then(normalize_chain_id)
                else {
                    return Err((CODE_INVALID_PARAMS, "Invalid chainId"));
                };
                if method == "wallet_addEthereumChain" {
                    engine.supported_chains.insert(chain_id.clone());
                }
                if !engine.supported_chains.contains(&chain_id) {
                    return Err((CODE_UNSUPPORTED_CHAIN, "Unrecognized chain ID"));
                }
                engine.chain_id = chain_id;
                Ok(Value::Null)
            }
            "eth_sendTransaction" | "personal_sign" | "eth_signTypedData_v4" => {
                if !engine.unlocked || !connected {
                    return Err((CODE_UNAUTHORIZED, "Unauthorized"));
                }
                let digest = Sha256::digest(params.to_string().as_bytes());
                Ok(json!(format!("0x{}", hex::encode(digest))))
            }
            "eth_blockNumber" if !engine.chains_reachable => {
                Err((CODE_DISCONNECTED, "Provider is disconnected from all chains"))
            }
            "eth_blockNumber" => Ok(json!("0x10d4f")),
            _ => Err((CODE_UNSUPPORTED_METHOD, "Unsupported method")),
        }
    }
}

impl MessageChannel for LoopbackRelay {
    fn post_message(&self, message: Value, target_origin: &str) -> Result<(), ChannelError> {
        let (alive, latency) = {
            let engine = self.engine.lock();
            (engine.alive, engine.latency)
        };
        if !alive {
            return Err(ChannelError::ContextInvalidated);
        }
        if target_origin != self.origin && target_origin != "*" {
            debug!(target_origin, "loopback relay ignoring post for another origin");
            return Ok(());
        }
        if message.get("type").and_then(Value::as_str) != Some(EXT_REQUEST) {
            return Ok(());
        }
        let Some(request_id) = message.get("requestId").and_then(Value::as_str) else {
            return Ok(());
        };
        if !SecureMessageSigner::verify(&message) {
            info!(request_id, "loopback relay rejecting envelope with bad digest");
            self.respond(request_id, Err((CODE_INVALID_PARAMS, "Invalid envelope")), latency);
            return Ok(());
        }

        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let outcome = self.handle(method, &params);
        debug!(request_id, method, ok = outcome.is_ok(), "loopback relay answered");
        self.respond(request_id, outcome, latency);
        Ok(())
    }
}

/// Feeds messages from a [`LoopbackRelay`] into `deliver` until the relay is dropped.
pub fn spawn_delivery<F>(mut inbox: mpsc::UnboundedReceiver<InboundEvent>, deliver: F) -> JoinHandle<()>
where
    F: Fn(InboundEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            deliver(event);
        }
    })
}
