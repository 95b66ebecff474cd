//! Structured Logger
//!
//! Wraps `tracing` to provide JSON-formatted output, file rotation
//! (NDJSON), and environment-based level control.

pub mod logger;

pub use logger::init_logger;
