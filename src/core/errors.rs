//! Provider error taxonomy and the public `{code, message}` shape handed to dApps.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::error_sanitizer::sanitize_relay_message;

/// EIP-1193 user rejected the request.
pub const CODE_USER_REJECTED: i64 = 4001;
/// EIP-1193 requested method/account not authorized.
pub const CODE_UNAUTHORIZED: i64 = 4100;
/// EIP-1193 provider does not support the method.
pub const CODE_UNSUPPORTED_METHOD: i64 = 4200;
/// EIP-1193 provider is disconnected from all chains.
pub const CODE_DISCONNECTED: i64 = 4900;
/// EIP-1193 provider is not connected to the requested chain.
pub const CODE_CHAIN_DISCONNECTED: i64 = 4901;
/// Unrecognized chain id (wallet_switchEthereumChain / wallet_addEthereumChain).
pub const CODE_UNSUPPORTED_CHAIN: i64 = 4902;
/// JSON-RPC invalid params.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC method not found.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC internal error.
pub const CODE_INTERNAL: i64 = -32603;
/// EIP-1474 limit exceeded.
pub const CODE_LIMIT_EXCEEDED: i64 = -32005;

/// Message used whenever an error is re-coded to `-32603`.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal JSON-RPC error";

/// Codes that may be forwarded verbatim from the relay to the host page.
const PUBLIC_CODES: &[i64] = &[
    CODE_USER_REJECTED,
    CODE_UNAUTHORIZED,
    CODE_UNSUPPORTED_METHOD,
    CODE_DISCONNECTED,
    CODE_CHAIN_DISCONNECTED,
    CODE_UNSUPPORTED_CHAIN,
    CODE_INVALID_PARAMS,
    CODE_METHOD_NOT_FOUND,
    CODE_LIMIT_EXCEEDED,
    -32000,
    -32001,
    -32002,
    -32003,
    -32004,
    -32006,
];

/// Error raised anywhere inside the provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("User rejected the request")]
    UserRejected,

    #[error("The requested account and/or method has not been authorized by the user")]
    Unauthorized,

    #[error("Unrecognized chain ID: {0}")]
    UnsupportedChain(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("User cancelled")]
    UnlockCancelled,

    #[error("Unlock timeout")]
    UnlockTimeout,

    #[error("Extension context invalidated")]
    ExtensionContextInvalidated,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Too many pending requests")]
    TooManyPendingRequests,

    #[error("Relay error {code}: {message}")]
    Relay { code: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Numeric code exposed to the host page.
    pub fn code(&self) -> i64 {
        match self {
            Self::UserRejected | Self::UnlockCancelled => CODE_USER_REJECTED,
            Self::Unauthorized => CODE_UNAUTHORIZED,
            Self::UnsupportedChain(_) => CODE_UNSUPPORTED_CHAIN,
            Self::InvalidParams(_) => CODE_INVALID_PARAMS,
            Self::ExtensionContextInvalidated => CODE_DISCONNECTED,
            Self::TooManyPendingRequests => CODE_LIMIT_EXCEEDED,
            Self::Relay { code, .. } if PUBLIC_CODES.contains(code) => *code,
            Self::RequestTimeout
            | Self::UnlockTimeout
            | Self::MalformedResponse(_)
            | Self::Relay { .. }
            | Self::Internal(_) => CODE_INTERNAL,
        }
    }

    /// Converts the error into the shape returned to the host page.
    ///
    /// Internal detail never crosses this boundary: `Internal` errors and relay
    /// errors carrying a non-public code collapse to the generic `-32603` message.
    pub fn to_rpc_error(&self) -> RpcError {
        let message = match self {
            Self::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
            Self::Relay { code, message } => {
                if PUBLIC_CODES.contains(code) {
                    sanitize_relay_message(message)
                } else {
                    GENERIC_INTERNAL_MESSAGE.to_string()
                }
            }
            Self::MalformedResponse(_) => "Malformed response".to_string(),
            other => other.to_string(),
        };
        RpcError { code: self.code(), message, data: None }
    }

    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout
                | Self::UnlockTimeout
                | Self::ExtensionContextInvalidated
                | Self::MalformedResponse(_)
                | Self::TooManyPendingRequests
        )
    }

    /// Whether the failure is the user's decision rather than a fault.
    pub fn is_user_decision(&self) -> bool {
        matches!(self, Self::UserRejected | Self::UnlockCancelled)
    }

    /// Rebuilds a typed error from a `{code, message}` pair reported by the relay.
    ///
    /// A relay that answers is reachable, so `4900` stays a relay error; only a
    /// failed post produces `ExtensionContextInvalidated`.
    pub fn from_relay(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            CODE_USER_REJECTED => Self::UserRejected,
            CODE_UNAUTHORIZED => Self::Unauthorized,
            _ => Self::Relay { code, message },
        }
    }

    /// Whether the relay reported the requested chain as unknown.
    pub fn is_unsupported_chain(&self) -> bool {
        matches!(self, Self::UnsupportedChain(_) | Self::Relay { code: CODE_UNSUPPORTED_CHAIN, .. })
    }
}

/// Error object surfaced to dApps; the only error shape that leaves the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        err.to_rpc_error()
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Internal(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
