//! Page message channel abstraction (`window.postMessage` / `message` events).

use serde_json::Value;
use thiserror::Error;

use crate::core::errors::ProviderError;

/// Failure to hand a message to the host.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    /// The extension runtime behind the channel is gone (reload, update, uninstall).
    #[error("extension context invalidated")]
    ContextInvalidated,

    #[error("message could not be posted: {0}")]
    PostFailed(String),
}

impl From<ChannelError> for ProviderError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::ContextInvalidated => ProviderError::ExtensionContextInvalidated,
            ChannelError::PostFailed(reason) => ProviderError::Internal(reason),
        }
    }
}

/// Outbound half of the page channel.
pub trait MessageChannel: Send + Sync {
    /// Posts `message` to the window, restricted to `target_origin`.
    fn post_message(&self, message: Value, target_origin: &str) -> Result<(), ChannelError>;
}

/// Who dispatched an inbound `message` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    /// `event.source === window`
    SameWindow,
    /// Another frame, a popup, or a worker.
    Foreign,
}

/// One `message` event as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub source: MessageSource,
    pub origin: String,
    pub data: Value,
}

impl InboundEvent {
    pub fn same_window(origin: impl Into<String>, data: Value) -> Self {
        Self { source: MessageSource::SameWindow, origin: origin.into(), data }
    }
}

/// Wildcard target, used only when the page origin is unknown (opaque origins).
pub const WILDCARD_ORIGIN: &str = "*";

/// Target origin for outbound posts.
pub fn target_origin(page_origin: Option<&str>) -> &str {
    match page_origin {
        Some(origin) if !origin.is_empty() && origin != "null" => origin,
        _ => WILDCARD_ORIGIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_origin_prefers_page_origin() {
        assert_eq!(target_origin(Some("https://app.example")), "https://app.example");
        assert_eq!(target_origin(Some("null")), WILDCARD_ORIGIN);
        assert_eq!(target_origin(None), WILDCARD_ORIGIN);
    }

    #[test]
    fn test_channel_error_mapping() {
        assert_eq!(
            ProviderError::from(ChannelError::ContextInvalidated),
            ProviderError::ExtensionContextInvalidated
        );
    }
}
