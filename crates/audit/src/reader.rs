//! Audit log reading and following.
//!
//! Readers tolerate concurrent appends from other sessions: malformed
//! or partially-written lines are skipped, and filtering by session id
//! is the supported way to isolate one session's records.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;
use worm_core::{AuditEvent, EventType};

/// How often `tail` polls for new records. Cancellation (dropping the
/// future) is therefore observed within this interval.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Record filter for reads and tails. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    event_type: Option<EventType>,
    since: Option<DateTime<Utc>>,
    session_id: Option<String>,
}

impl AuditFilter {
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(t) = self.event_type {
            if event.event_type != t {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(ref sid) = self.session_id {
            if event.session_id != *sid {
                return false;
            }
        }
        true
    }
}

/// Lazy, restartable reader over an audit log file.
pub struct AuditLogReader {
    path: PathBuf,
}

impl AuditLogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLogReader { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate over existing records matching `filter`, in file order.
    ///
    /// A missing file yields an empty sequence; malformed lines are
    /// skipped. Each call re-opens the file, so the sequence is
    /// restartable.
    pub fn read(&self, filter: &AuditFilter) -> Box<dyn Iterator<Item = AuditEvent>> {
        let filter = filter.clone();
        match File::open(&self.path) {
            Ok(f) => Box::new(
                BufReader::new(f)
                    .lines()
                    .map_while(|line| line.ok())
                    .filter_map(|line| serde_json::from_str::<AuditEvent>(line.trim()).ok())
                    .filter(move |event| filter.matches(event)),
            ),
            Err(_) => Box::new(std::iter::empty()),
        }
    }

    /// Follow the log: replay existing matching records, then poll for
    /// new ones forever. Cooperative — cancel by dropping the future
    /// (e.g. inside `tokio::select!`); the poll interval bounds the
    /// cancellation latency.
    pub async fn tail<F>(&self, filter: &AuditFilter, mut on_event: F)
    where
        F: FnMut(AuditEvent),
    {
        let mut offset: u64 = 0;
        loop {
            offset = self.drain_from(offset, filter, &mut on_event);
            tokio::time::sleep(TAIL_POLL_INTERVAL).await;
        }
    }

    /// Read complete lines starting at `offset`; returns the new offset.
    fn drain_from<F>(&self, mut offset: u64, filter: &AuditFilter, on_event: &mut F) -> u64
    where
        F: FnMut(AuditEvent),
    {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            // Not created yet; keep waiting.
            Err(_) => return offset,
        };
        if let Ok(meta) = file.metadata() {
            if meta.len() < offset {
                // Log was truncated or rotated underneath us.
                warn!(path = %self.path.display(), "Audit log shrank; restarting from the top");
                offset = 0;
            }
        }
        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::Start(offset)).is_err() {
            return offset;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => {
                    if !line.ends_with('\n') {
                        // Partial record still being appended; re-read
                        // it on the next poll.
                        break;
                    }
                    offset += n as u64;
                    if let Ok(event) = serde_json::from_str::<AuditEvent>(line.trim()) {
                        if filter.matches(&event) {
                            on_event(event);
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Audit log read failed");
                    break;
                }
            }
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::AuditSink;
    use std::io::Write;

    #[test]
    fn skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "a");
        sink.session_start(None, &[]);
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "this is not json").unwrap();
        }
        sink.session_end(0);

        let events: Vec<_> = AuditLogReader::new(&path)
            .read(&AuditFilter::default())
            .collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn filters_by_event_type_and_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let first = AuditSink::new(&path, "session-1");
        let second = AuditSink::new(&path, "session-2");
        first.blocked_import("socket");
        second.blocked_import("http");
        second.session_end(0);

        let reader = AuditLogReader::new(&path);
        let by_type: Vec<_> = reader
            .read(&AuditFilter::default().event_type(EventType::BlockedImport))
            .collect();
        assert_eq!(by_type.len(), 2);

        let by_session: Vec<_> = reader
            .read(&AuditFilter::default().session("session-2"))
            .collect();
        assert_eq!(by_session.len(), 2);
        assert!(by_session.iter().all(|e| e.session_id == "session-2"));
    }

    #[test]
    fn read_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "s");
        sink.session_end(0);

        let reader = AuditLogReader::new(&path);
        assert_eq!(reader.read(&AuditFilter::default()).count(), 1);
        assert_eq!(reader.read(&AuditFilter::default()).count(), 1);
    }

    #[test]
    fn missing_file_yields_empty_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let reader = AuditLogReader::new(dir.path().join("nope.log"));
        assert_eq!(reader.read(&AuditFilter::default()).count(), 0);
    }

    #[tokio::test]
    async fn tail_sees_new_records_and_is_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = AuditSink::new(&path, "s");
        sink.blocked_import("socket");

        let reader = AuditLogReader::new(&path);
        let mut seen = Vec::new();
        let filter = AuditFilter::default();
        {
            let tail = reader.tail(&filter, |e| seen.push(e.event_type));
            tokio::pin!(tail);

            // Drive the tail briefly; it never completes on its own.
            let _ = tokio::time::timeout(Duration::from_millis(100), &mut tail).await;
            sink.session_end(0);
            let _ = tokio::time::timeout(Duration::from_millis(700), &mut tail).await;
        }

        assert_eq!(seen, vec![EventType::BlockedImport, EventType::SessionEnd]);
    }
}
