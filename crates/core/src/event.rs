//! Audit event wire model.
//!
//! One JSON object per line in the audit log, exactly five fields:
//! `timestamp`, `session_id`, `pid`, `event_type`, `data`. Consumers
//! must treat the file as append-only and skip malformed lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    BlockedImport,
    BlockedSubprocess,
    RestrictedBuiltin,
    FilesystemDenied,
    ResourceLimitHit,
    LayersInstalled,
    /// Indicator of compromise. Uppercase on the wire so it stands out
    /// in raw logs and grep output.
    #[serde(rename = "IOC_DETECTED")]
    IocDetected,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::BlockedImport => "blocked_import",
            EventType::BlockedSubprocess => "blocked_subprocess",
            EventType::RestrictedBuiltin => "restricted_builtin",
            EventType::FilesystemDenied => "filesystem_denied",
            EventType::ResourceLimitHit => "resource_limit_hit",
            EventType::LayersInstalled => "layers_installed",
            EventType::IocDetected => "IOC_DETECTED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "session_start" => Ok(EventType::SessionStart),
            "session_end" => Ok(EventType::SessionEnd),
            "blocked_import" => Ok(EventType::BlockedImport),
            "blocked_subprocess" => Ok(EventType::BlockedSubprocess),
            "restricted_builtin" => Ok(EventType::RestrictedBuiltin),
            "filesystem_denied" => Ok(EventType::FilesystemDenied),
            "resource_limit_hit" => Ok(EventType::ResourceLimitHit),
            "layers_installed" => Ok(EventType::LayersInstalled),
            "IOC_DETECTED" | "ioc_detected" => Ok(EventType::IocDetected),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A single audit record. Once written, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub pid: u32,
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// Severity of an integrity finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_serde() {
        let json = serde_json::to_string(&EventType::BlockedImport).unwrap();
        assert_eq!(json, "\"blocked_import\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::BlockedImport);
    }

    #[test]
    fn ioc_event_is_uppercase_on_the_wire() {
        let json = serde_json::to_string(&EventType::IocDetected).unwrap();
        assert_eq!(json, "\"IOC_DETECTED\"");
    }

    #[test]
    fn audit_event_serializes_all_five_fields() {
        let event = AuditEvent {
            timestamp: Utc::now(),
            session_id: "123_1700000000_1".to_string(),
            pid: 123,
            event_type: EventType::SessionStart,
            data: serde_json::json!({ "script": "job.sh" }),
        };
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["timestamp", "session_id", "pid", "event_type", "data"] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(obj.len(), 5);
    }

    #[test]
    fn parses_event_type_from_str() {
        assert_eq!(
            "filesystem_denied".parse::<EventType>().unwrap(),
            EventType::FilesystemDenied
        );
        assert!("bogus".parse::<EventType>().is_err());
    }
}
