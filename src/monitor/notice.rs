//! Transient on-page notices.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONTEXT_INVALIDATED_NOTICE: &str =
    "The wallet extension was updated or restarted. Refresh this page to reconnect your wallet.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub ttl: Duration,
}

/// Host element that renders notices.
pub trait NoticeSurface: Send + Sync {
    fn show(&self, notice: &Notice);
    fn dismiss(&self, notice_id: u64);
}

/// Renders notices through the log; used by the simulator.
#[derive(Debug, Default)]
pub struct LogNoticeSurface;

impl NoticeSurface for LogNoticeSurface {
    fn show(&self, notice: &Notice) {
        warn!(notice_id = notice.id, "notice: {}", notice.message);
    }

    fn dismiss(&self, notice_id: u64) {
        info!(notice_id, "notice dismissed");
    }
}

/// Keeps at most one notice on the page and dismisses it after its TTL.
pub struct NoticeController {
    surface: Arc<dyn NoticeSurface>,
    ttl: Duration,
    active: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl NoticeController {
    pub fn new(surface: Arc<dyn NoticeSurface>, ttl: Duration) -> Self {
        Self { surface, ttl, active: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Shows the context-invalidated notice unless one is already visible.
    pub fn report_invalidated(self: &Arc<Self>) -> bool {
        self.show(CONTEXT_INVALIDATED_NOTICE)
    }

    /// Returns `false` when a notice is already visible or no runtime can
    /// schedule the dismissal.
    pub fn show(self: &Arc<Self>, message: &str) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to dismiss notices, not showing");
            return false;
        };

        let notice = {
            let mut active = self.active.lock();
            if active.is_some() {
                debug!("notice already visible");
                return false;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            *active = Some(id);
            Notice { id, message: message.to_string(), ttl: self.ttl }
        };

        self.surface.show(&notice);

        let controller = Arc::clone(self);
        runtime.spawn(async move {
            tokio::time::sleep(notice.ttl).await;
            controller.dismiss(notice.id);
        });
        true
    }

    /// Dismisses `notice_id` if it is still the visible notice.
    pub fn dismiss(&self, notice_id: u64) {
        let mut active = self.active.lock();
        if *active == Some(notice_id) {
            *active = None;
            drop(active);
            self.surface.dismiss(notice_id);
        }
    }

    pub fn dismiss_active(&self) {
        let current = *self.active.lock();
        if let Some(id) = current {
            self.dismiss(id);
        }
    }
}

impl std::fmt::Debug for NoticeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeController")
            .field("ttl", &self.ttl)
            .field("active", &*self.active.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSurface {
        shown: Mutex<Vec<u64>>,
        dismissed: Mutex<Vec<u64>>,
    }

    impl NoticeSurface for CountingSurface {
        fn show(&self, notice: &Notice) {
            self.shown.lock().push(notice.id);
        }

        fn dismiss(&self, notice_id: u64) {
            self.dismissed.lock().push(notice_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_notice_auto_dismissed() {
        let surface = Arc::new(CountingSurface::default());
        let controller = Arc::new(NoticeController::new(surface.clone(), Duration::from_secs(6)));

        assert!(controller.report_invalidated());
        assert!(!controller.report_invalidated());
        assert_eq!(surface.shown.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!controller.is_active());
        assert_eq!(*surface.dismissed.lock(), vec![1]);

        assert!(controller.report_invalidated());
        assert_eq!(*surface.shown.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_dismiss_then_timer_is_noop() {
        let surface = Arc::new(CountingSurface::default());
        let controller = Arc::new(NoticeController::new(surface.clone(), Duration::from_secs(6)));

        controller.report_invalidated();
        controller.dismiss_active();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(*surface.dismissed.lock(), vec![1]);
    }

    #[test]
    fn test_without_runtime_nothing_is_shown() {
        let surface = Arc::new(CountingSurface::default());
        let controller = Arc::new(NoticeController::new(surface.clone(), Duration::from_secs(6)));
        assert!(!controller.report_invalidated());
        assert!(surface.shown.lock().is_empty());
    }
}
