// tests/util.rs
// Shared test helpers for integration tests

#![allow(dead_code)]

use injected_provider::bridge::client::{BridgeClient, BridgeSettings};
use injected_provider::bridge::mock::{spawn_delivery, EngineState, LoopbackRelay, RecordingChannel};
use injected_provider::bridge::InboundEvent;
use injected_provider::discovery::{AnnounceDetail, DiscoveryBus, GlobalWalletSlot, InjectedWallet};
use injected_provider::monitor::{Notice, NoticeSurface};
use injected_provider::provider::{listener, EventKind, ProviderEvent};
use injected_provider::{inject, HostEnvironment, Injection, PageProvider, ProviderConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const ORIGIN: &str = "https://dapp.example";
pub const ACCOUNT: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";

/// Discovery bus that keeps every announcement.
#[derive(Default)]
pub struct CollectingBus {
    pub announced: Mutex<Vec<Arc<AnnounceDetail>>>,
}

impl DiscoveryBus for CollectingBus {
    fn dispatch_announce(&self, detail: Arc<AnnounceDetail>) {
        self.announced.lock().push(detail);
    }
}

impl CollectingBus {
    pub fn count(&self) -> usize {
        self.announced.lock().len()
    }
}

/// Notice surface that records what the page would render.
#[derive(Default)]
pub struct CollectingNotices {
    pub shown: Mutex<Vec<Notice>>,
    pub dismissed: Mutex<Vec<u64>>,
}

impl NoticeSurface for CollectingNotices {
    fn show(&self, notice: &Notice) {
        self.shown.lock().push(notice.clone());
    }

    fn dismiss(&self, notice_id: u64) {
        self.dismissed.lock().push(notice_id);
    }
}

/// Another wallet's provider already sitting in the global slot.
pub struct OtherWallet(pub &'static str);

impl InjectedWallet for OtherWallet {
    fn wallet_name(&self) -> &str {
        self.0
    }
}

/// A simulated page with the provider injected and a loopback relay behind it.
pub struct Page {
    pub env: HostEnvironment,
    pub relay: Arc<LoopbackRelay>,
    pub bus: Arc<CollectingBus>,
    pub notices: Arc<CollectingNotices>,
    pub injection: Arc<Injection>,
}

impl Page {
    /// Must be called inside a tokio runtime.
    pub fn new(engine: EngineState) -> Self {
        Self::with_slot(engine, GlobalWalletSlot::new(), ProviderConfig::default())
    }

    pub fn with_slot(engine: EngineState, slot: GlobalWalletSlot, config: ProviderConfig) -> Self {
        let (relay, inbox) = LoopbackRelay::new(ORIGIN, engine);
        let relay = Arc::new(relay);
        let bus = Arc::new(CollectingBus::default());
        let notices = Arc::new(CollectingNotices::default());
        let env = HostEnvironment::new(
            Some(ORIGIN.to_string()),
            relay.clone(),
            bus.clone(),
            notices.clone(),
            Arc::new(slot),
        );
        let injection = Arc::new(inject(&env, &config).unwrap().unwrap());
        let page = Arc::clone(&injection);
        spawn_delivery(inbox, move |event| page.handle_message(&event));
        Self { env, relay, bus, notices, injection }
    }

    pub fn provider(&self) -> Arc<PageProvider> {
        Arc::clone(&self.injection.provider)
    }
}

/// Records every provider event in order.
pub fn record_events(provider: &PageProvider) -> Arc<Mutex<Vec<ProviderEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let log = Arc::clone(&log);
        provider.on(
            kind,
            listener(move |event| {
                log.lock().push(event.clone());
                Ok(())
            }),
        );
    }
    log
}

/// A bridge over a channel the test answers by hand.
pub fn manual_bridge(timeout: Duration) -> (Arc<BridgeClient>, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::new());
    let bridge = Arc::new(BridgeClient::new(
        channel.clone(),
        BridgeSettings { page_origin: Some(ORIGIN.to_string()), default_timeout: timeout, max_pending: 1_024 },
    ));
    (bridge, channel)
}

pub fn success(request_id: &str, data: Value) -> InboundEvent {
    InboundEvent::same_window(
        ORIGIN,
        json!({ "type": "EXT_RESPONSE", "requestId": request_id, "success": true, "data": data }),
    )
}

/// Lets spawned delivery tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
