//! Integrity monitoring: IoC scanning and audit-log watching.

pub mod log_watch;
pub mod scanner;

pub use log_watch::{follow_ioc_alerts, format_alert, replay_ioc_alerts};
pub use scanner::{IntegrityMonitor, IocFinding, ScanSummary, IOC_KIND_OUTPUT_PRIMITIVE};
