pub mod reader;
pub mod sink;

pub use reader::{AuditFilter, AuditLogReader};
pub use sink::AuditSink;
