//! One-time provider injection into a page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::channel::{InboundEvent, MessageChannel};
use crate::bridge::client::{BridgeClient, BridgeSettings, RelayTransport};
use crate::core::config::ProviderConfig;
use crate::core::errors::ProviderResult;
use crate::discovery::announce::{AnnouncementBroadcaster, DiscoveryBus, ProviderAnnouncement};
use crate::discovery::wallet_slot::{GlobalWalletSlot, InjectedWallet, RegistrationOutcome};
use crate::monitor::context::{ExtensionContextMonitor, MonitorSettings, RecoveryTarget};
use crate::monitor::notice::{NoticeController, NoticeSurface};
use crate::provider::page_provider::PageProvider;

/// Per-page guard; the first `inject` wins.
#[derive(Debug, Default)]
pub struct InjectionGuard {
    injected: AtomicBool,
}

impl InjectionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once.
    pub fn try_acquire(&self) -> bool {
        !self.injected.swap(true, Ordering::AcqRel)
    }

    pub fn is_injected(&self) -> bool {
        self.injected.load(Ordering::Acquire)
    }
}

/// Everything the provider needs from the hosting page.
pub struct HostEnvironment {
    pub page_origin: Option<String>,
    pub channel: Arc<dyn MessageChannel>,
    pub discovery: Arc<dyn DiscoveryBus>,
    pub notices: Arc<dyn NoticeSurface>,
    pub wallet_slot: Arc<GlobalWalletSlot>,
    guard: InjectionGuard,
}

impl HostEnvironment {
    pub fn new(
        page_origin: Option<String>,
        channel: Arc<dyn MessageChannel>,
        discovery: Arc<dyn DiscoveryBus>,
        notices: Arc<dyn NoticeSurface>,
        wallet_slot: Arc<GlobalWalletSlot>,
    ) -> Self {
        Self { page_origin, channel, discovery, notices, wallet_slot, guard: InjectionGuard::new() }
    }

    pub fn is_injected(&self) -> bool {
        self.guard.is_injected()
    }
}

/// A provider installed into a page, with its discovery and monitoring parts.
#[derive(Debug)]
pub struct Injection {
    pub provider: Arc<PageProvider>,
    pub broadcaster: Arc<AnnouncementBroadcaster>,
    pub monitor: Arc<ExtensionContextMonitor>,
    pub notices: Arc<NoticeController>,
    pub registration: RegistrationOutcome,
}

impl Injection {
    /// Forwards a window `message` event to the provider.
    pub fn handle_message(&self, event: &InboundEvent) {
        self.provider.handle_message(event);
    }

    /// Handles an `eip6963:requestProvider` broadcast.
    pub fn handle_request_provider(&self) -> bool {
        self.broadcaster.handle_request_provider()
    }

    /// Starts the liveness monitor on the current runtime.
    pub fn start_monitor(&self) -> JoinHandle<()> {
        Arc::clone(&self.monitor).spawn()
    }
}

/// Installs the provider into `env`.
///
/// Returns `Ok(None)` when the page already has our provider. The provider is
/// registered in the global slot without displacing an existing wallet and is
/// announced once.
pub fn inject(env: &HostEnvironment, config: &ProviderConfig) -> ProviderResult<Option<Injection>> {
    config.validate()?;
    if !env.guard.try_acquire() {
        warn!("provider already injected into this page");
        return Ok(None);
    }

    let bridge = Arc::new(BridgeClient::new(
        Arc::clone(&env.channel),
        BridgeSettings {
            page_origin: env.page_origin.clone(),
            default_timeout: config.request_timeout(),
            max_pending: config.max_pending_requests,
        },
    ));
    let notices = Arc::new(NoticeController::new(Arc::clone(&env.notices), config.notice_ttl()));
    let provider = Arc::new(PageProvider::new(Arc::clone(&bridge), config, Some(Arc::clone(&notices))));

    let registration = env.wallet_slot.register(provider.clone() as Arc<dyn InjectedWallet>);

    let broadcaster = Arc::new(AnnouncementBroadcaster::new(
        Arc::clone(&env.discovery),
        ProviderAnnouncement::new(&config.identity),
        Arc::clone(&provider),
    ));
    broadcaster.announce();

    let transport: Arc<dyn RelayTransport> = bridge;
    let recovery: Arc<dyn RecoveryTarget> = broadcaster.clone();
    let monitor = Arc::new(ExtensionContextMonitor::new(
        transport,
        recovery,
        Arc::clone(&notices),
        MonitorSettings::from(config),
    ));

    info!(
        name = %config.identity.name,
        origin = env.page_origin.as_deref().unwrap_or("<opaque>"),
        ?registration,
        "provider injected"
    );
    Ok(Some(Injection { provider, broadcaster, monitor, notices, registration }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::RecordingChannel;
    use crate::discovery::announce::AnnounceDetail;
    use crate::monitor::notice::LogNoticeSurface;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingBus(Mutex<usize>);

    impl DiscoveryBus for CountingBus {
        fn dispatch_announce(&self, _detail: Arc<AnnounceDetail>) {
            *self.0.lock() += 1;
        }
    }

    fn env(bus: Arc<CountingBus>) -> HostEnvironment {
        HostEnvironment::new(
            Some("https://dapp.example".into()),
            Arc::new(RecordingChannel::new()),
            bus,
            Arc::new(LogNoticeSurface),
            Arc::new(GlobalWalletSlot::new()),
        )
    }

    #[test]
    fn test_inject_once() {
        let bus = Arc::new(CountingBus::default());
        let env = env(bus.clone());
        let config = ProviderConfig::default();

        let injection = inject(&env, &config).unwrap().unwrap();
        assert_eq!(injection.registration, RegistrationOutcome::Installed);
        assert_eq!(*bus.0.lock(), 1);
        assert!(inject(&env, &config).unwrap().is_none());
        assert_eq!(*bus.0.lock(), 1);
        assert!(env.is_injected());
    }

    #[test]
    fn test_invalid_config_rejected_before_guard() {
        let env = env(Arc::new(CountingBus::default()));
        let config = ProviderConfig { default_chain_id: "1".into(), ..ProviderConfig::default() };
        assert!(inject(&env, &config).is_err());
        assert!(!env.is_injected());
    }
}
