pub mod context;
pub mod notice;

pub use context::{ContextHealth, ExtensionContextMonitor, MonitorSettings, RecoveryTarget};
pub use notice::{Notice, NoticeController, NoticeSurface};
