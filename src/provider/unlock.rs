//! Locked-wallet recovery without collecting credentials in the page.
//!
//! The coordinator asks the relay to open the wallet's own unlock surface,
//! then polls the unlock status until the wallet reports unlocked, the user
//! closes the surface, or the ceiling elapses. No credential ever passes
//! through this module.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::client::RelayTransport;
use crate::bridge::messages::relay_methods;
use crate::core::config::ProviderConfig;
use crate::core::errors::{ProviderError, ProviderResult};

/// How an unlock request ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The wallet was unlocked before the surface had to be shown.
    AlreadyUnlocked,
    /// The user unlocked through the wallet's surface.
    Unlocked,
}

#[derive(Debug, Clone)]
pub struct UnlockSettings {
    pub poll_interval: Duration,
    pub ceiling: Duration,
    /// Timeout for the initial status check.
    pub status_timeout: Duration,
}

impl From<&ProviderConfig> for UnlockSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            poll_interval: config.unlock_poll_interval(),
            ceiling: config.unlock_ceiling(),
            status_timeout: config.probe_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlockStatus {
    is_unlocked: bool,
    #[serde(default)]
    unlock_surface_open: bool,
}

pub struct UnlockCoordinator {
    transport: Arc<dyn RelayTransport>,
    settings: UnlockSettings,
    // One unlock flow at a time; later callers re-check status after the first finishes.
    turn: tokio::sync::Mutex<()>,
}

impl UnlockCoordinator {
    pub fn new(transport: Arc<dyn RelayTransport>, settings: UnlockSettings) -> Self {
        Self { transport, settings, turn: tokio::sync::Mutex::new(()) }
    }

    async fn status(&self, timeout: Duration) -> ProviderResult<UnlockStatus> {
        let raw = self
            .transport
            .send_request_with_timeout(relay_methods::UNLOCK_STATUS, json!([]), timeout)
            .await?;
        serde_json::from_value(raw).map_err(|e| ProviderError::MalformedResponse(format!("unlock status: {e}")))
    }

    /// Brings the wallet to the unlocked state.
    ///
    /// Fails with `UnlockCancelled` when the user closes the unlock surface and
    /// with `UnlockTimeout` when the ceiling elapses first.
    pub async fn request_unlock(&self) -> ProviderResult<UnlockOutcome> {
        let _turn = self.turn.lock().await;
        let started = Instant::now();

        if self.status(self.settings.status_timeout).await?.is_unlocked {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        self.transport.send_request(relay_methods::OPEN_UNLOCK_SURFACE, json!([])).await?;
        info!("wallet unlock surface requested");

        loop {
            let remaining = self.settings.ceiling.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(ceiling = ?self.settings.ceiling, "unlock timed out");
                return Err(ProviderError::UnlockTimeout);
            }
            tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;

            let remaining = self.settings.ceiling.saturating_sub(started.elapsed());
            let poll_timeout = remaining.max(Duration::from_millis(1));
            match self.status(poll_timeout).await {
                Ok(status) if status.is_unlocked => {
                    info!(elapsed = ?started.elapsed(), "wallet unlocked");
                    return Ok(UnlockOutcome::Unlocked);
                }
                Ok(status) if !status.unlock_surface_open => {
                    info!("unlock surface closed by user");
                    return Err(ProviderError::UnlockCancelled);
                }
                Ok(_) => {}
                Err(err @ (ProviderError::RequestTimeout | ProviderError::MalformedResponse(_))) => {
                    debug!(error = %err, "unlock status poll failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for UnlockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCoordinator").field("settings", &self.settings).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::VecDeque;

    /// Answers unlock status polls from a script; the last entry repeats.
    struct ScriptedTransport {
        statuses: Mutex<VecDeque<Value>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self { statuses: Mutex::new(statuses.into()), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self, method: &str) -> usize {
            self.calls.lock().iter().filter(|m| *m == method).count()
        }
    }

    #[async_trait]
    impl RelayTransport for ScriptedTransport {
        async fn send_request(&self, method: &str, params: Value) -> ProviderResult<Value> {
            self.send_request_with_timeout(method, params, Duration::from_secs(30)).await
        }

        async fn send_request_with_timeout(
            &self,
            method: &str,
            _params: Value,
            _timeout: Duration,
        ) -> ProviderResult<Value> {
            self.calls.lock().push(method.to_string());
            match method {
                relay_methods::OPEN_UNLOCK_SURFACE => Ok(json!(true)),
                relay_methods::UNLOCK_STATUS => {
                    let mut statuses = self.statuses.lock();
                    let next = if statuses.len() > 1 { statuses.pop_front() } else { statuses.front().cloned() };
                    next.ok_or(ProviderError::RequestTimeout)
                }
                _ => Err(ProviderError::Internal("unexpected".into())),
            }
        }
    }

    fn settings() -> UnlockSettings {
        UnlockSettings {
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            status_timeout: Duration::from_secs(5),
        }
    }

    fn status(unlocked: bool, open: bool) -> Value {
        json!({ "isUnlocked": unlocked, "unlockSurfaceOpen": open })
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_unlocked_skips_surface() {
        let transport = ScriptedTransport::new(vec![status(true, false)]);
        let coordinator = UnlockCoordinator::new(transport.clone(), settings());
        assert_eq!(coordinator.request_unlock().await.unwrap(), UnlockOutcome::AlreadyUnlocked);
        assert_eq!(transport.calls(relay_methods::OPEN_UNLOCK_SURFACE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_after_polling() {
        let transport = ScriptedTransport::new(vec![
            status(false, false),
            status(false, true),
            status(false, true),
            status(true, false),
        ]);
        let coordinator = UnlockCoordinator::new(transport.clone(), settings());
        let started = Instant::now();
        assert_eq!(coordinator.request_unlock().await.unwrap(), UnlockOutcome::Unlocked);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(transport.calls(relay_methods::OPEN_UNLOCK_SURFACE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_closed_is_cancellation() {
        let transport = ScriptedTransport::new(vec![status(false, false), status(false, true), status(false, false)]);
        let coordinator = UnlockCoordinator::new(transport, settings());
        assert_eq!(coordinator.request_unlock().await.unwrap_err(), ProviderError::UnlockCancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_is_timeout() {
        let transport = ScriptedTransport::new(vec![status(false, false), status(false, true)]);
        let coordinator = UnlockCoordinator::new(transport.clone(), settings());
        let started = Instant::now();
        assert_eq!(coordinator.request_unlock().await.unwrap_err(), ProviderError::UnlockTimeout);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(transport.calls(relay_methods::UNLOCK_STATUS), 61);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_status_is_retried() {
        let transport = ScriptedTransport::new(vec![
            status(false, false),
            json!("garbage"),
            status(true, false),
        ]);
        let coordinator = UnlockCoordinator::new(transport, settings());
        assert_eq!(coordinator.request_unlock().await.unwrap(), UnlockOutcome::Unlocked);
    }
}
