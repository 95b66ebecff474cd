//! Resource governor — kernel-enforced ceilings via rlimits.
//!
//! Limits are applied per-limit: a failure on one leaves the others in
//! force and is reported in the outcome rather than unwinding. Once
//! applied, ceilings hold for the process and everything it spawns.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use worm_audit::AuditSink;
use worm_core::WormError;
use worm_policy::{PolicyProfile, ResourceLimits};

/// Outcome of applying one limit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedLimit {
    pub name: &'static str,
    pub value: u64,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-limit outcomes for one `apply_limits` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedSet {
    pub limits: Vec<AppliedLimit>,
}

impl AppliedSet {
    pub fn all_applied(&self) -> bool {
        self.limits.iter().all(|l| l.applied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AppliedLimit> {
        self.limits.iter().filter(|l| !l.applied)
    }
}

/// Point-in-time resource usage against the active ceilings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub cpu_seconds_used: f64,
    pub peak_memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_files_limit: Option<u64>,
    pub syscall_filter_active: bool,
}

pub struct ResourceGovernor {
    sink: Arc<AuditSink>,
}

impl ResourceGovernor {
    pub fn new(sink: Arc<AuditSink>) -> Self {
        ResourceGovernor { sink }
    }

    /// Apply the four ceilings to the calling process. A limit of 0
    /// means unlimited and is skipped (reported as applied). Returns
    /// the per-limit outcomes; the caller decides whether a partial
    /// application is acceptable.
    pub fn apply_limits(&self, limits: &ResourceLimits) -> AppliedSet {
        let mut applied = Vec::with_capacity(4);
        applied.push(self.apply_one("cpu_seconds", rlimit_cpu(), limits.cpu_seconds));
        applied.push(self.apply_one("memory_bytes", rlimit_as(), limits.memory_bytes));
        applied.push(self.apply_one("file_size_bytes", rlimit_fsize(), limits.file_size_bytes));
        applied.push(self.apply_one(
            "max_open_files",
            rlimit_nofile(),
            u64::from(limits.max_open_files),
        ));
        let set = AppliedSet { limits: applied };
        for failure in set.failures() {
            self.sink.resource_limit_apply_failed(
                failure.name,
                failure.value,
                failure.error.as_deref().unwrap_or("apply failed"),
            );
        }
        set
    }

    /// Apply the ceilings a profile mandates.
    pub fn apply_profile(&self, profile: PolicyProfile) -> AppliedSet {
        self.apply_limits(&profile.limits())
    }

    fn apply_one(&self, name: &'static str, resource: RlimitResource, value: u64) -> AppliedLimit {
        if value == 0 {
            debug!(limit = name, "Resource limit unlimited, not applied");
            return AppliedLimit {
                name,
                value,
                applied: true,
                error: None,
            };
        }
        match set_rlimit(resource, value) {
            Ok(()) => {
                debug!(limit = name, value, "Resource limit applied");
                AppliedLimit {
                    name,
                    value,
                    applied: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(limit = name, value, error = %e, "Failed to apply resource limit");
                AppliedLimit {
                    name,
                    value,
                    applied: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Snapshot current usage and the active soft ceilings. The
    /// `syscall_filter_active` field is filled in by the session, which
    /// owns the filter.
    pub fn snapshot_usage(&self) -> worm_core::Result<UsageReport> {
        snapshot_usage_impl()
    }
}

#[cfg(unix)]
type RlimitResource = libc::c_int;
#[cfg(not(unix))]
type RlimitResource = i32;

#[cfg(unix)]
fn rlimit_cpu() -> RlimitResource {
    libc::RLIMIT_CPU as RlimitResource
}
#[cfg(unix)]
fn rlimit_as() -> RlimitResource {
    libc::RLIMIT_AS as RlimitResource
}
#[cfg(unix)]
fn rlimit_fsize() -> RlimitResource {
    libc::RLIMIT_FSIZE as RlimitResource
}
#[cfg(unix)]
fn rlimit_nofile() -> RlimitResource {
    libc::RLIMIT_NOFILE as RlimitResource
}

#[cfg(not(unix))]
fn rlimit_cpu() -> RlimitResource {
    0
}
#[cfg(not(unix))]
fn rlimit_as() -> RlimitResource {
    0
}
#[cfg(not(unix))]
fn rlimit_fsize() -> RlimitResource {
    0
}
#[cfg(not(unix))]
fn rlimit_nofile() -> RlimitResource {
    0
}

#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, value: u64) -> std::io::Result<()> {
    let rl = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: rl is a valid rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(resource as _, &rl) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_rlimit(_resource: RlimitResource, _value: u64) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "resource limits are not supported on this platform",
    ))
}

#[cfg(unix)]
fn snapshot_usage_impl() -> worm_core::Result<UsageReport> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: usage is a valid, writable rusage.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return Err(WormError::ResourceExceeded(format!(
            "getrusage failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let cpu_seconds_used = usage.ru_utime.tv_sec as f64
        + usage.ru_utime.tv_usec as f64 / 1e6
        + usage.ru_stime.tv_sec as f64
        + usage.ru_stime.tv_usec as f64 / 1e6;

    // ru_maxrss is kilobytes on Linux, bytes on macOS.
    #[cfg(target_os = "macos")]
    let peak_memory_bytes = usage.ru_maxrss as u64;
    #[cfg(not(target_os = "macos"))]
    let peak_memory_bytes = (usage.ru_maxrss as u64).saturating_mul(1024);

    Ok(UsageReport {
        cpu_seconds_used,
        peak_memory_bytes,
        cpu_limit_seconds: soft_limit(rlimit_cpu()),
        memory_limit_bytes: soft_limit(rlimit_as()),
        open_files_limit: soft_limit(rlimit_nofile()),
        syscall_filter_active: false,
    })
}

#[cfg(not(unix))]
fn snapshot_usage_impl() -> worm_core::Result<UsageReport> {
    Err(WormError::ResourceExceeded(
        "resource usage reporting is not supported on this platform".to_string(),
    ))
}

/// Soft limit for a resource, `None` when unlimited or unreadable.
#[cfg(unix)]
fn soft_limit(resource: RlimitResource) -> Option<u64> {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rl is a valid, writable rlimit.
    let rc = unsafe { libc::getrlimit(resource as _, &mut rl) };
    if rc != 0 || rl.rlim_cur == libc::RLIM_INFINITY {
        None
    } else {
        Some(rl.rlim_cur as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(dir: &std::path::Path) -> ResourceGovernor {
        let sink = Arc::new(AuditSink::new(dir.join("audit.log"), "test-session"));
        ResourceGovernor::new(sink)
    }

    #[test]
    fn zero_means_unlimited_and_counts_as_applied() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path());
        let set = governor.apply_limits(&ResourceLimits {
            cpu_seconds: 0,
            memory_bytes: 0,
            file_size_bytes: 0,
            max_open_files: 0,
        });
        assert!(set.all_applied());
        assert_eq!(set.limits.len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn open_files_ceiling_is_applied_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path());
        // Lowering NOFILE within the current hard limit needs no
        // privilege; pick a value comfortably below the usual soft
        // default but high enough not to disturb the test harness.
        let set = governor.apply_limits(&ResourceLimits {
            cpu_seconds: 0,
            memory_bytes: 0,
            file_size_bytes: 0,
            max_open_files: 512,
        });
        let nofile = set
            .limits
            .iter()
            .find(|l| l.name == "max_open_files")
            .unwrap();
        if nofile.applied {
            assert_eq!(soft_limit(rlimit_nofile()), Some(512));
        }
    }

    // Rlimits are process-wide and irreversible downward, so the
    // Strict ceilings are applied in a re-executed child: the test
    // spawns its own binary with a marker env var, and the child
    // branch applies the profile, checks the snapshot, and exits.
    const STRICT_CHILD_ENV: &str = "WORM_TEST_APPLY_STRICT";

    #[cfg(unix)]
    #[test]
    fn strict_profile_ceilings_are_visible_in_a_child_snapshot() {
        if std::env::var_os(STRICT_CHILD_ENV).is_some() {
            let governor = ResourceGovernor::new(Arc::new(AuditSink::disabled("child")));
            let set = governor.apply_profile(PolicyProfile::Strict);
            assert!(set.all_applied(), "{:?}", set.limits);

            let report = governor.snapshot_usage().unwrap();
            assert_eq!(report.cpu_limit_seconds, Some(30));
            assert_eq!(report.memory_limit_bytes, Some(512 * 1024 * 1024));
            assert_eq!(report.open_files_limit, Some(100));
            std::process::exit(0);
        }

        let exe = std::env::current_exe().unwrap();
        let status = std::process::Command::new(exe)
            .arg("limits::tests::strict_profile_ceilings_are_visible_in_a_child_snapshot")
            .arg("--exact")
            .arg("--test-threads=1")
            .env(STRICT_CHILD_ENV, "1")
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn usage_snapshot_reports_nonzero_cpu_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let governor = governor(dir.path());
        let report = governor.snapshot_usage().unwrap();
        assert!(report.cpu_seconds_used >= 0.0);
        assert!(report.peak_memory_bytes > 0);
        assert!(!report.syscall_filter_active);
    }

    #[test]
    fn usage_report_serializes_camel_case() {
        let report = UsageReport {
            cpu_seconds_used: 1.5,
            peak_memory_bytes: 4096,
            cpu_limit_seconds: Some(30),
            memory_limit_bytes: None,
            open_files_limit: Some(100),
            syscall_filter_active: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cpuSecondsUsed"], 1.5);
        assert_eq!(json["syscallFilterActive"], true);
        assert!(json.get("memoryLimitBytes").is_none());
    }
}
