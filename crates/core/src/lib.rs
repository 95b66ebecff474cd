pub mod error;
pub mod event;

pub use error::{Result, WormError};
pub use event::{AuditEvent, EventType, Severity};
