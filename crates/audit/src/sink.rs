//! Append-only audit sink.
//!
//! One serialized record per line, written with a single `write_all`
//! on an `O_APPEND` handle so readers never observe a partial record.
//! Write failures are swallowed and surfaced on the tracing side
//! channel — audit-log failure must never terminate or block the
//! sandboxed program.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;
use worm_core::{AuditEvent, EventType, Severity};

pub struct AuditSink {
    log_file: PathBuf,
    session_id: String,
    pid: u32,
    enabled: bool,
    // Serializes writers within this process; ordering across
    // processes is not guaranteed and readers filter by session id.
    write_lock: Mutex<()>,
}

impl AuditSink {
    /// Create a sink appending to `log_file` on behalf of `session_id`.
    pub fn new(log_file: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        let log_file = log_file.into();
        if let Some(parent) = log_file.parent() {
            // Best effort; a failed mkdir will surface as a swallowed
            // write failure on the first record.
            let _ = std::fs::create_dir_all(parent);
        }
        AuditSink {
            log_file,
            session_id: session_id.into(),
            pid: std::process::id(),
            enabled: true,
            write_lock: Mutex::new(()),
        }
    }

    /// A sink that records nothing.
    pub fn disabled(session_id: impl Into<String>) -> Self {
        AuditSink {
            log_file: PathBuf::new(),
            session_id: session_id.into(),
            pid: std::process::id(),
            enabled: false,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append one record. Never fails from the caller's perspective.
    pub fn record(&self, event_type: EventType, data: serde_json::Value) {
        if !self.enabled {
            return;
        }
        let event = AuditEvent {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            pid: self.pid,
            event_type,
            data,
        };
        let mut line = match serde_json::to_string(&event) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Audit record serialization failed");
                return;
            }
        };
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.log_file.display(), error = %e, "Audit log write failed");
        }
    }

    pub fn blocked_import(&self, capability: &str) {
        self.record(
            EventType::BlockedImport,
            serde_json::json!({ "capability": capability }),
        );
    }

    pub fn blocked_subprocess(&self, command: &str, reason: &str) {
        self.record(
            EventType::BlockedSubprocess,
            serde_json::json!({ "command": command, "reason": reason }),
        );
    }

    pub fn restricted_builtin(&self, context: &str) {
        self.record(
            EventType::RestrictedBuiltin,
            serde_json::json!({ "context": context }),
        );
    }

    pub fn filesystem_denied(&self, path: &Path, mode: &str, policy_mode: &str) {
        self.record(
            EventType::FilesystemDenied,
            serde_json::json!({
                "path": path.display().to_string(),
                "mode": mode,
                "policy": policy_mode,
            }),
        );
    }

    /// A running process breached a ceiling.
    pub fn resource_limit_hit(&self, resource: &str, limit: u64) {
        self.record(
            EventType::ResourceLimitHit,
            serde_json::json!({ "resource": resource, "limit": limit }),
        );
    }

    /// Installing a ceiling failed. Same event type as a breach, but
    /// the `phase` field keeps the two distinguishable on the trail.
    pub fn resource_limit_apply_failed(&self, resource: &str, limit: u64, error: &str) {
        self.record(
            EventType::ResourceLimitHit,
            serde_json::json!({
                "resource": resource,
                "limit": limit,
                "phase": "apply_failure",
                "error": error,
            }),
        );
    }

    pub fn session_start(&self, script: Option<&str>, args: &[String]) {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.record(
            EventType::SessionStart,
            serde_json::json!({ "script": script, "args": args, "cwd": cwd }),
        );
    }

    pub fn session_end(&self, exit_code: i32) {
        self.record(
            EventType::SessionEnd,
            serde_json::json!({ "exit_code": exit_code }),
        );
    }

    pub fn ioc_detected(&self, kind: &str, detail: &str, severity: Severity) {
        self.record(
            EventType::IocDetected,
            serde_json::json!({
                "ioc_type": kind,
                "details": detail,
                "severity": severity,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{AuditFilter, AuditLogReader};

    #[test]
    fn records_are_readable_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "42_1_1");

        sink.blocked_import("socket");
        sink.blocked_subprocess("curl example.com", "network command");
        sink.session_end(0);

        let reader = AuditLogReader::new(&path);
        let events: Vec<_> = reader.read(&AuditFilter::default()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::BlockedImport);
        assert_eq!(events[1].event_type, EventType::BlockedSubprocess);
        assert_eq!(events[2].event_type, EventType::SessionEnd);
        assert!(events.iter().all(|e| e.session_id == "42_1_1"));
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::disabled("42_1_1");
        sink.blocked_import("socket");
        assert!(!path.exists());
    }

    #[test]
    fn write_failure_is_swallowed() {
        // A directory path cannot be opened for append; record must
        // not panic or error.
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::new(dir.path(), "42_1_1");
        sink.session_end(1);
    }

    #[test]
    fn apply_failures_are_distinguishable_from_breaches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "s");
        sink.resource_limit_apply_failed("max_open_files", 100, "EPERM");
        sink.resource_limit_hit("cpu_seconds", 30);

        let events: Vec<_> = AuditLogReader::new(&path)
            .read(&AuditFilter::default().event_type(EventType::ResourceLimitHit))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data["phase"], "apply_failure");
        assert_eq!(events[0].data["error"], "EPERM");
        assert!(events[1].data.get("phase").is_none());
    }

    #[test]
    fn ioc_events_carry_critical_severity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "s");
        sink.ioc_detected("output_primitive", "job.py:5", Severity::Critical);

        let reader = AuditLogReader::new(&path);
        let events: Vec<_> = reader
            .read(&AuditFilter::default().event_type(EventType::IocDetected))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["severity"], "CRITICAL");
    }
}
