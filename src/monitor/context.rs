//! Liveness monitoring of the privileged extension channel.
//!
//! The host can tear the channel down at any time (extension reload, update,
//! uninstall). The monitor probes it on an interval, shows one notice per
//! outage, and re-announces the provider once the channel answers again.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bridge::client::RelayTransport;
use crate::bridge::messages::relay_methods;
use crate::core::config::ProviderConfig;
use crate::core::errors::ProviderError;
use crate::monitor::notice::NoticeController;
use crate::network::rate_limit::RateLimiter;

/// Something that re-establishes discovery after the channel recovers.
pub trait RecoveryTarget: Send + Sync {
    /// Returns whether a fresh announcement went out.
    fn on_recovery(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextHealth {
    Healthy,
    Unreachable,
    /// The channel answered after an outage.
    Recovered { reannounced: bool },
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub recovery_min_interval: Duration,
}

impl From<&ProviderConfig> for MonitorSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            interval: config.monitor_interval(),
            probe_timeout: config.probe_timeout(),
            recovery_min_interval: config.recovery_min_interval(),
        }
    }
}

pub struct ExtensionContextMonitor {
    transport: Arc<dyn RelayTransport>,
    recovery: Arc<dyn RecoveryTarget>,
    notices: Arc<NoticeController>,
    settings: MonitorSettings,
    limiter: RateLimiter,
    healthy: AtomicBool,
    recovery_pending: AtomicBool,
}

impl ExtensionContextMonitor {
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        recovery: Arc<dyn RecoveryTarget>,
        notices: Arc<NoticeController>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            limiter: RateLimiter::one_per(settings.recovery_min_interval),
            transport,
            recovery,
            notices,
            settings,
            healthy: AtomicBool::new(true),
            recovery_pending: AtomicBool::new(false),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Probes the channel once and reacts to the result.
    pub async fn check_once(&self) -> ContextHealth {
        let probe = self
            .transport
            .send_request_with_timeout(relay_methods::PING, json!([]), self.settings.probe_timeout)
            .await;

        let reachable = match &probe {
            Ok(_) => true,
            Err(ProviderError::ExtensionContextInvalidated
                | ProviderError::RequestTimeout
                | ProviderError::MalformedResponse(_)) => false,
            // The relay answered, just not with a result.
            Err(err) => {
                debug!(error = %err, "liveness probe answered with an error");
                true
            }
        };

        if !reachable {
            if self.healthy.swap(false, Ordering::AcqRel) {
                let abandoned = self.transport.abandon_pending(ProviderError::ExtensionContextInvalidated);
                warn!(abandoned, "extension context unreachable");
                self.notices.report_invalidated();
            }
            return ContextHealth::Unreachable;
        }

        if !self.healthy.swap(true, Ordering::AcqRel) {
            info!("extension context reachable again");
            self.notices.dismiss_active();
            self.recovery_pending.store(true, Ordering::Release);
        }

        if !self.recovery_pending.load(Ordering::Acquire) {
            return ContextHealth::Healthy;
        }
        if !self.limiter.allow() {
            debug!("recovery re-announcement rate limited, retrying next check");
            return ContextHealth::Recovered { reannounced: false };
        }
        self.recovery_pending.store(false, Ordering::Release);
        let reannounced = self.recovery.on_recovery();
        ContextHealth::Recovered { reannounced }
    }

    /// Runs [`check_once`](Self::check_once) every interval until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let health = self.check_once().await;
                debug!(?health, "extension context check");
            }
        })
    }
}

impl std::fmt::Debug for ExtensionContextMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContextMonitor")
            .field("settings", &self.settings)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ProviderResult;
    use crate::monitor::notice::{Notice, NoticeSurface};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct SwitchableTransport {
        down: AtomicBool,
        probes: AtomicUsize,
        abandoned: AtomicUsize,
    }

    #[async_trait]
    impl RelayTransport for SwitchableTransport {
        async fn send_request(&self, method: &str, params: Value) -> ProviderResult<Value> {
            self.send_request_with_timeout(method, params, Duration::from_secs(30)).await
        }

        async fn send_request_with_timeout(&self, _: &str, _: Value, _: Duration) -> ProviderResult<Value> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(ProviderError::ExtensionContextInvalidated)
            } else {
                Ok(json!("pong"))
            }
        }

        fn abandon_pending(&self, error: ProviderError) -> usize {
            assert_eq!(error, ProviderError::ExtensionContextInvalidated);
            self.abandoned.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[derive(Default)]
    struct CountingRecovery(AtomicUsize);

    impl RecoveryTarget for CountingRecovery {
        fn on_recovery(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[derive(Default)]
    struct CountingSurface(Mutex<Vec<u64>>);

    impl NoticeSurface for CountingSurface {
        fn show(&self, notice: &Notice) {
            self.0.lock().push(notice.id);
        }

        fn dismiss(&self, _notice_id: u64) {}
    }

    struct Fixture {
        transport: Arc<SwitchableTransport>,
        recovery: Arc<CountingRecovery>,
        surface: Arc<CountingSurface>,
        monitor: Arc<ExtensionContextMonitor>,
    }

    fn fixture(recovery_min_interval: Duration) -> Fixture {
        let transport = Arc::new(SwitchableTransport::default());
        let recovery = Arc::new(CountingRecovery::default());
        let surface = Arc::new(CountingSurface::default());
        let notices = Arc::new(NoticeController::new(surface.clone(), Duration::from_secs(6)));
        let settings = MonitorSettings {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            recovery_min_interval,
        };
        let monitor = Arc::new(ExtensionContextMonitor::new(transport.clone(), recovery.clone(), notices, settings));
        Fixture { transport, recovery, surface, monitor }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_shows_one_notice_and_recovers_once() {
        let f = fixture(Duration::from_millis(1));
        assert_eq!(f.monitor.check_once().await, ContextHealth::Healthy);

        f.transport.down.store(true, Ordering::SeqCst);
        assert_eq!(f.monitor.check_once().await, ContextHealth::Unreachable);
        assert_eq!(f.monitor.check_once().await, ContextHealth::Unreachable);
        assert_eq!(f.surface.0.lock().len(), 1);
        assert_eq!(f.transport.abandoned.load(Ordering::SeqCst), 1);

        f.transport.down.store(false, Ordering::SeqCst);
        assert_eq!(f.monitor.check_once().await, ContextHealth::Recovered { reannounced: true });
        assert_eq!(f.monitor.check_once().await, ContextHealth::Healthy);
        assert_eq!(f.recovery.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_is_rate_limited() {
        let f = fixture(Duration::from_secs(3600));

        for _ in 0..2 {
            f.transport.down.store(true, Ordering::SeqCst);
            f.monitor.check_once().await;
            f.transport.down.store(false, Ordering::SeqCst);
            f.monitor.check_once().await;
        }
        assert_eq!(f.recovery.0.load(Ordering::SeqCst), 1);
        assert_eq!(f.monitor.check_once().await, ContextHealth::Recovered { reannounced: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_probes_on_interval() {
        let f = fixture(Duration::from_millis(1));
        let handle = Arc::clone(&f.monitor).spawn();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(f.transport.probes.load(Ordering::SeqCst), 3);
        handle.abort();
    }
}
