//! EIP-6963 provider announcement.
//!
//! One announcement per epoch. A `requestProvider` broadcast or a recovery
//! signal opens a new epoch and allows exactly one more announcement.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::config::IdentityConfig;
use crate::monitor::context::RecoveryTarget;
use crate::provider::page_provider::PageProvider;

pub const ANNOUNCE_EVENT: &str = "eip6963:announceProvider";
pub const REQUEST_EVENT: &str = "eip6963:requestProvider";

/// `info` half of an announcement. Fixed for the lifetime of the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAnnouncement {
    uuid: String,
    name: String,
    icon: String,
    rdns: String,
}

impl ProviderAnnouncement {
    pub fn new(identity: &IdentityConfig) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: identity.name.clone(),
            icon: identity.icon.clone(),
            rdns: identity.rdns.clone(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    pub fn rdns(&self) -> &str {
        &self.rdns
    }
}

/// Event detail carried by `eip6963:announceProvider`.
#[derive(Debug)]
pub struct AnnounceDetail {
    pub info: ProviderAnnouncement,
    pub provider: Arc<PageProvider>,
}

/// Page-global event bus used for discovery broadcasts.
pub trait DiscoveryBus: Send + Sync {
    fn dispatch_announce(&self, detail: Arc<AnnounceDetail>);
}

pub struct AnnouncementBroadcaster {
    bus: Arc<dyn DiscoveryBus>,
    detail: Arc<AnnounceDetail>,
    announced: AtomicBool,
    announcements: AtomicU64,
}

impl AnnouncementBroadcaster {
    pub fn new(bus: Arc<dyn DiscoveryBus>, info: ProviderAnnouncement, provider: Arc<PageProvider>) -> Self {
        Self {
            bus,
            detail: Arc::new(AnnounceDetail { info, provider }),
            announced: AtomicBool::new(false),
            announcements: AtomicU64::new(0),
        }
    }

    pub fn info(&self) -> &ProviderAnnouncement {
        &self.detail.info
    }

    /// Total announcements dispatched.
    pub fn announcements(&self) -> u64 {
        self.announcements.load(Ordering::Relaxed)
    }

    /// Dispatches the announcement unless this epoch already has one.
    pub fn announce(&self) -> bool {
        if self.announced.swap(true, Ordering::AcqRel) {
            debug!("announcement suppressed, already announced this epoch");
            return false;
        }
        self.bus.dispatch_announce(Arc::clone(&self.detail));
        let total = self.announcements.fetch_add(1, Ordering::Relaxed) + 1;
        info!(rdns = %self.detail.info.rdns, total, "provider announced");
        true
    }

    /// A dApp re-scanned for wallets.
    pub fn handle_request_provider(&self) -> bool {
        self.reset_epoch();
        self.announce()
    }

    fn reset_epoch(&self) {
        self.announced.store(false, Ordering::Release);
    }
}

impl RecoveryTarget for AnnouncementBroadcaster {
    fn on_recovery(&self) -> bool {
        self.reset_epoch();
        self.announce()
    }
}

impl std::fmt::Debug for AnnouncementBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnouncementBroadcaster")
            .field("info", &self.detail.info)
            .field("announcements", &self.announcements())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::client::{BridgeClient, BridgeSettings};
    use crate::bridge::mock::RecordingChannel;
    use crate::core::config::ProviderConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingBus {
        seen: Mutex<Vec<Arc<AnnounceDetail>>>,
    }

    impl DiscoveryBus for CollectingBus {
        fn dispatch_announce(&self, detail: Arc<AnnounceDetail>) {
            self.seen.lock().push(detail);
        }
    }

    fn broadcaster(bus: Arc<CollectingBus>) -> AnnouncementBroadcaster {
        let config = ProviderConfig::default();
        let bridge = Arc::new(BridgeClient::new(Arc::new(RecordingChannel::new()), BridgeSettings::default()));
        let provider = Arc::new(PageProvider::new(bridge, &config, None));
        AnnouncementBroadcaster::new(bus, ProviderAnnouncement::new(&config.identity), provider)
    }

    #[test]
    fn test_one_announcement_per_epoch() {
        let bus = Arc::new(CollectingBus::default());
        let broadcaster = broadcaster(bus.clone());

        assert!(broadcaster.announce());
        assert!(!broadcaster.announce());
        assert_eq!(bus.seen.lock().len(), 1);

        assert!(broadcaster.handle_request_provider());
        assert!(!broadcaster.announce());
        assert!(broadcaster.on_recovery());
        assert_eq!(broadcaster.announcements(), 3);
    }

    #[test]
    fn test_detail_is_shared_and_stable() {
        let bus = Arc::new(CollectingBus::default());
        let broadcaster = broadcaster(bus.clone());
        broadcaster.announce();
        broadcaster.handle_request_provider();

        let seen = bus.seen.lock();
        assert!(Arc::ptr_eq(&seen[0], &seen[1]));
        assert_eq!(seen[0].info.name(), "Injected Wallet");
        assert!(seen[0].info.icon().starts_with("data:image/"));
        assert_eq!(Uuid::parse_str(seen[0].info.uuid()).unwrap().get_version_num(), 4);
    }
}
