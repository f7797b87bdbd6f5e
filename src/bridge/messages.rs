//! Wire format between the page and the relay.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::errors::{ProviderError, ProviderResult, CODE_DISCONNECTED, CODE_INTERNAL};
use crate::core::state::is_hex_chain_id;

pub const EXT_REQUEST: &str = "EXT_REQUEST";
pub const EXT_RESPONSE: &str = "EXT_RESPONSE";
pub const ACCOUNTS_CHANGED: &str = "ACCOUNTS_CHANGED";
pub const CHAIN_CHANGED: &str = "CHAIN_CHANGED";
pub const CONNECT: &str = "CONNECT";
pub const DISCONNECT: &str = "DISCONNECT";
pub const LOCK_STATE_CHANGED: &str = "LOCK_STATE_CHANGED";
pub const PROVIDER_MESSAGE: &str = "PROVIDER_MESSAGE";

/// Inbound message types the page accepts. Everything else, including the
/// echo of our own `EXT_REQUEST`, is dropped.
pub const INBOUND_ALLOW_LIST: [&str; 7] = [
    EXT_RESPONSE,
    ACCOUNTS_CHANGED,
    CHAIN_CHANGED,
    CONNECT,
    DISCONNECT,
    LOCK_STATE_CHANGED,
    PROVIDER_MESSAGE,
];

/// Relay methods the provider itself calls.
pub mod relay_methods {
    pub const UNLOCK_STATUS: &str = "wallet_getUnlockStatus";
    pub const OPEN_UNLOCK_SURFACE: &str = "wallet_openUnlockSurface";
    pub const PING: &str = "wallet_ping";
    pub const PROVIDER_STATE: &str = "wallet_getProviderState";
}

/// Unsolicited state push from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum StatePush {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Connect { chain_id: Option<String>, accounts: Option<Vec<String>> },
    Disconnect { code: i64, message: String },
    LockState { is_unlocked: bool, accounts: Option<Vec<String>> },
    Message { kind: String, data: Value },
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response { request_id: String, outcome: ProviderResult<Value> },
    /// Carries a usable id but fails shape validation.
    Malformed { request_id: String, reason: String },
    Push(StatePush),
}

#[derive(Deserialize)]
struct AccountsPayload {
    accounts: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainPayload {
    chain_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    chain_id: Option<String>,
    accounts: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct DisconnectPayload {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    is_unlocked: bool,
    accounts: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Classifies an inbound message; `None` means drop silently.
pub fn parse_inbound(data: &Value) -> Option<Inbound> {
    let obj = data.as_object()?;
    let kind = obj.get("type")?.as_str()?;
    if !INBOUND_ALLOW_LIST.contains(&kind) {
        return None;
    }

    if kind == EXT_RESPONSE {
        return parse_response(data);
    }

    let payload = obj.get("data").cloned().unwrap_or(Value::Null);
    let push = match kind {
        ACCOUNTS_CHANGED => {
            // Relays send either `{accounts: [...]}` or a bare array.
            let accounts = match payload {
                Value::Array(_) => serde_json::from_value::<Vec<String>>(payload).ok(),
                other => serde_json::from_value::<AccountsPayload>(other).ok().map(|p| p.accounts),
            };
            accounts.map(StatePush::AccountsChanged)
        }
        CHAIN_CHANGED => serde_json::from_value::<ChainPayload>(payload)
            .ok()
            .filter(|p| is_hex_chain_id(&p.chain_id))
            .map(|p| StatePush::ChainChanged(p.chain_id)),
        CONNECT => {
            let p = if payload.is_null() {
                Some(ConnectPayload::default())
            } else {
                serde_json::from_value::<ConnectPayload>(payload).ok()
            };
            p.filter(|p| p.chain_id.as_deref().map(is_hex_chain_id).unwrap_or(true))
                .map(|p| StatePush::Connect { chain_id: p.chain_id, accounts: p.accounts })
        }
        DISCONNECT => {
            let p = serde_json::from_value::<DisconnectPayload>(payload).unwrap_or_default();
            Some(StatePush::Disconnect {
                code: p.code.unwrap_or(CODE_DISCONNECTED),
                message: p.message.unwrap_or_else(|| "Disconnected".to_string()),
            })
        }
        LOCK_STATE_CHANGED => serde_json::from_value::<LockPayload>(payload)
            .ok()
            .map(|p| StatePush::LockState { is_unlocked: p.is_unlocked, accounts: p.accounts }),
        PROVIDER_MESSAGE => serde_json::from_value::<MessagePayload>(payload)
            .ok()
            .map(|p| StatePush::Message { kind: p.kind, data: p.data }),
        _ => None,
    };

    if push.is_none() {
        warn!(message_type = kind, "dropping state push with invalid payload");
    }
    push.map(Inbound::Push)
}

fn parse_response(data: &Value) -> Option<Inbound> {
    let Some(request_id) = data.get("requestId").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
        debug!("dropping response without a request id");
        return None;
    };
    let request_id = request_id.to_string();

    let Some(success) = data.get("success").and_then(Value::as_bool) else {
        return Some(Inbound::Malformed { request_id, reason: "missing success flag".into() });
    };

    if success {
        let result = data.get("data").cloned().unwrap_or(Value::Null);
        return Some(Inbound::Response { request_id, outcome: Ok(result) });
    }

    let error = match data.get("error") {
        Some(Value::String(message)) => ProviderError::from_relay(CODE_INTERNAL, message.clone()),
        Some(Value::Object(err)) => {
            let code = err.get("code").and_then(Value::as_i64);
            let message = err.get("message").and_then(Value::as_str);
            match (code, message) {
                (Some(code), Some(message)) => ProviderError::from_relay(code, message),
                (Some(code), None) => ProviderError::from_relay(code, ""),
                _ => {
                    return Some(Inbound::Malformed { request_id, reason: "error object without code".into() })
                }
            }
        }
        _ => return Some(Inbound::Malformed { request_id, reason: "failure without error".into() }),
    };
    Some(Inbound::Response { request_id, outcome: Err(error) })
}
