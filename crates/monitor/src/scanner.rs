//! IoC scanning.
//!
//! The sandboxed environment has no legitimate use for the direct
//! output primitive; all sanctioned output goes through tracing or
//! explicit stream writers. A match is therefore treated as an
//! indicator of compromise, not a style issue. Findings are advisory:
//! they are recorded and returned, and the caller decides whether to
//! abort.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use worm_audit::AuditSink;
use worm_core::Severity;

/// Bare call or macro form of the output primitive, with optional
/// whitespace before the opening parenthesis. Written as an
/// alternation so this source file stays clean under a self-scan.
static OUTPUT_PRIMITIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(print|println)\s*!?\s*[(]").unwrap());

pub const IOC_KIND_OUTPUT_PRIMITIVE: &str = "disallowed_output_primitive";

/// One indicator-of-compromise match.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IocFinding {
    /// File path or caller-supplied label for in-memory text.
    pub origin: String,
    /// 1-based line number.
    pub line: usize,
    /// The offending line, trimmed.
    pub content: String,
    pub kind: &'static str,
}

impl IocFinding {
    pub fn describe(&self) -> String {
        format!("{}:{}: {}", self.origin, self.line, self.content)
    }
}

/// Aggregate result of a directory scan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub files_scanned: usize,
    pub findings: Vec<IocFinding>,
}

impl ScanSummary {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

pub struct IntegrityMonitor {
    sink: Arc<AuditSink>,
}

impl IntegrityMonitor {
    pub fn new(sink: Arc<AuditSink>) -> Self {
        IntegrityMonitor { sink }
    }

    /// Scan source text line by line. Every finding is recorded as a
    /// critical `IOC_DETECTED` event before it is returned.
    pub fn scan_text(&self, source: &str, origin: &str) -> Vec<IocFinding> {
        let findings: Vec<IocFinding> = source
            .lines()
            .enumerate()
            .filter(|(_, line)| OUTPUT_PRIMITIVE_RE.is_match(line))
            .map(|(idx, line)| IocFinding {
                origin: origin.to_string(),
                line: idx + 1,
                content: line.trim().to_string(),
                kind: IOC_KIND_OUTPUT_PRIMITIVE,
            })
            .collect();

        for finding in &findings {
            warn!(origin = %finding.origin, line = finding.line, "IoC detected");
            self.sink
                .ioc_detected(finding.kind, &finding.describe(), Severity::Critical);
        }
        findings
    }

    pub fn scan_file(&self, path: &Path) -> anyhow::Result<Vec<IocFinding>> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(self.scan_text(&source, &path.display().to_string()))
    }

    /// Scan every file under `dir` matching the glob `pattern`
    /// (relative to `dir`, `**` supported). Unreadable files are
    /// skipped with a warning and still counted as scanned.
    pub fn scan_dir(&self, dir: &Path, pattern: &str) -> anyhow::Result<ScanSummary> {
        // A missing tree must never read as a clean scan.
        if !dir.is_dir() {
            anyhow::bail!("scan directory not found: {}", dir.display());
        }
        let full_pattern = dir.join(pattern);
        let full_pattern = full_pattern.to_string_lossy();
        let paths = glob::glob(&full_pattern)
            .with_context(|| format!("bad scan pattern '{full_pattern}'"))?;

        let mut files_scanned = 0;
        let mut findings = Vec::new();
        for entry in paths {
            let path: PathBuf = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            files_scanned += 1;
            match self.scan_file(&path) {
                Ok(mut file_findings) => findings.append(&mut file_findings),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        debug!(files_scanned, findings = findings.len(), "Directory scan complete");
        Ok(ScanSummary {
            files_scanned,
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worm_audit::{AuditFilter, AuditLogReader};
    use worm_core::EventType;

    // Fixtures assemble the pattern from pieces so that this file is
    // itself clean under a self-scan.

    fn bare_call(arg: &str) -> String {
        format!("{}{}{arg})", "pri", "nt(")
    }

    fn macro_call(arg: &str) -> String {
        format!("{}{}{arg})", "printl", "n!(")
    }

    fn monitor(dir: &Path) -> (IntegrityMonitor, PathBuf) {
        let log = dir.join("audit.log");
        let sink = Arc::new(AuditSink::new(&log, "test-session"));
        (IntegrityMonitor::new(sink), log)
    }

    #[test]
    fn flags_bare_and_macro_forms() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _) = monitor(dir.path());
        let source = format!(
            "x = 1\n{}\ny = 2\n{}\n",
            bare_call("'hello'"),
            macro_call("\"hi\"")
        );
        let findings = monitor.scan_text(&source, "script");
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].line, 2);
        assert_eq!(findings[1].line, 4);
        assert_eq!(findings[0].kind, IOC_KIND_OUTPUT_PRIMITIVE);
    }

    #[test]
    fn flags_whitespace_before_parenthesis() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _) = monitor(dir.path());
        let source = format!("{}  {}'x')\n", "print", "(");
        assert_eq!(monitor.scan_text(&source, "s").len(), 1);
    }

    #[test]
    fn ignores_words_that_merely_contain_the_primitive() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, log) = monitor(dir.path());
        let source = "sprint(x)\npprint(y)\nblueprint(z)\nreprints = 3\n";
        assert!(monitor.scan_text(source, "s").is_empty());
        assert!(!log.exists());
    }

    #[test]
    fn findings_are_recorded_as_critical_ioc_events() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, log) = monitor(dir.path());
        monitor.scan_text(&bare_call("'x'"), "payload.py");

        let events: Vec<_> = AuditLogReader::new(&log)
            .read(&AuditFilter::default().event_type(EventType::IocDetected))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["severity"], "CRITICAL");
        assert_eq!(events[0].data["ioc_type"], IOC_KIND_OUTPUT_PRIMITIVE);
        assert!(events[0].data["details"]
            .as_str()
            .unwrap()
            .starts_with("payload.py:1:"));
    }

    #[test]
    fn directory_scan_honors_the_glob_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("pkg");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("clean.py"), "x = 1\n").unwrap();
        std::fs::write(nested.join("dirty.py"), bare_call("'x'")).unwrap();
        std::fs::write(nested.join("notes.txt"), bare_call("'x'")).unwrap();

        let scan_root = tempfile::tempdir().unwrap();
        let (monitor, _) = monitor(scan_root.path());
        let summary = monitor.scan_dir(dir.path(), "**/*.py").unwrap();
        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.findings.len(), 1);
        assert!(summary.findings[0].origin.ends_with("dirty.py"));
        assert!(!summary.is_clean());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _) = monitor(dir.path());
        assert!(monitor.scan_file(&dir.path().join("absent.py")).is_err());
    }

    #[test]
    fn missing_directory_is_an_error_not_a_clean_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _) = monitor(dir.path());
        assert!(monitor
            .scan_dir(&dir.path().join("no-such-tree"), "**/*.py")
            .is_err());
    }
}
