//! Audit-log watching for integrity alerts.
//!
//! A thin view over the audit reader, pinned to `IOC_DETECTED`
//! records. Replay covers the existing log; follow keeps watching and
//! is cancelled by dropping the future.

use std::path::Path;

use worm_audit::{AuditFilter, AuditLogReader};
use worm_core::{AuditEvent, EventType};

fn ioc_filter() -> AuditFilter {
    AuditFilter::default().event_type(EventType::IocDetected)
}

/// Invoke `on_alert` for every `IOC_DETECTED` record already in the
/// log. Returns the number of alerts raised.
pub fn replay_ioc_alerts<F>(path: &Path, mut on_alert: F) -> usize
where
    F: FnMut(&AuditEvent),
{
    let mut count = 0;
    for event in AuditLogReader::new(path).read(&ioc_filter()) {
        on_alert(&event);
        count += 1;
    }
    count
}

/// Replay existing `IOC_DETECTED` records, then keep following the
/// log. Never completes on its own; drop the future to stop.
pub async fn follow_ioc_alerts<F>(path: &Path, mut on_alert: F)
where
    F: FnMut(&AuditEvent),
{
    AuditLogReader::new(path)
        .tail(&ioc_filter(), |event| on_alert(&event))
        .await;
}

/// Human-readable one-line alert for an `IOC_DETECTED` record.
pub fn format_alert(event: &AuditEvent) -> String {
    let severity = event.data["severity"].as_str().unwrap_or("CRITICAL");
    let details = event.data["details"].as_str().unwrap_or("<no details>");
    format!(
        "[{severity}] {} session={} pid={} {}",
        event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        event.session_id,
        event.pid,
        details,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use worm_audit::AuditSink;
    use worm_core::Severity;

    #[test]
    fn replay_raises_one_alert_per_ioc_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = Arc::new(AuditSink::new(&log, "s"));
        sink.session_start(None, &[]);
        sink.ioc_detected("disallowed_output_primitive", "a.py:1: bad", Severity::Critical);
        sink.ioc_detected("disallowed_output_primitive", "b.py:9: bad", Severity::Critical);
        sink.session_end(0);

        let mut alerts = Vec::new();
        let count = replay_ioc_alerts(&log, |e| alerts.push(format_alert(e)));
        assert_eq!(count, 2);
        assert!(alerts[0].contains("a.py:1"));
        assert!(alerts[1].contains("b.py:9"));
    }

    #[test]
    fn replay_of_missing_log_raises_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let count = replay_ioc_alerts(&dir.path().join("nope.log"), |_| {});
        assert_eq!(count, 0);
    }

    #[test]
    fn alert_line_carries_severity_session_and_details() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::new(&log, "session-x");
        sink.ioc_detected("disallowed_output_primitive", "x.py:3: bad", Severity::Critical);

        let mut line = String::new();
        replay_ioc_alerts(&log, |e| line = format_alert(e));
        assert!(line.starts_with("[CRITICAL]"));
        assert!(line.contains("session=session-x"));
        assert!(line.ends_with("x.py:3: bad"));
    }

    #[tokio::test]
    async fn follow_sees_records_appended_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::new(&log, "s");

        let mut seen = 0usize;
        {
            let follow = follow_ioc_alerts(&log, |_| seen += 1);
            tokio::pin!(follow);

            let _ = tokio::time::timeout(Duration::from_millis(100), &mut follow).await;
            sink.ioc_detected("disallowed_output_primitive", "late.py:1: bad", Severity::Critical);
            // Non-IoC records must not alert.
            sink.session_end(0);
            let _ = tokio::time::timeout(Duration::from_millis(700), &mut follow).await;
        }

        assert_eq!(seen, 1);
    }
}
