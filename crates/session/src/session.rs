//! Sandbox session orchestration.
//!
//! A session resolves its policy once, installs every enforcement
//! layer into the calling process, runs exactly one script (or
//! embedded body), and terminates. All layers share one audit sink,
//! passed explicitly; there is no global registry to tamper with.
//! Kernel-level layers (rlimits, the syscall filter) are inherited by
//! anything the session spawns.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};
use worm_audit::AuditSink;
use worm_core::{EventType, WormError};
use worm_monitor::IntegrityMonitor;
use worm_policy::{SessionPolicy, WormConfig};
use worm_sandbox::{
    AppliedSet, CapabilityGate, CodeEvaluationGate, CommandGate, FilesystemController,
    ResourceGovernor, SyscallFilter, UsageReport,
};

use crate::state::SessionState;

/// Informational environment markers, never read back by the layers.
const ENV_MARKERS: [(&str, &str); 2] = [("WORM_SANDBOX", "1"), ("WORM_SECURE_MODE", "1")];

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", std::process::id(), ts, seq)
}

/// How `run_script` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The script ran; its exit code.
    Exited(i32),
    /// The script path does not exist. Distinct from a failing script.
    MissingScript,
}

/// What `install_layers` actually achieved.
#[derive(Debug)]
pub struct LayerReport {
    pub limits: AppliedSet,
    pub syscall_filter_installed: bool,
}

struct Layers {
    capability: CapabilityGate,
    code_evaluation: CodeEvaluationGate,
    command: CommandGate,
    filesystem: FilesystemController,
    governor: ResourceGovernor,
    report: LayerReport,
}

pub struct SandboxSession {
    id: String,
    policy: SessionPolicy,
    sink: Arc<AuditSink>,
    state: SessionState,
    layers: Option<Layers>,
}

impl SandboxSession {
    /// Resolve `config` into a session ready for layer installation.
    pub fn new(config: &WormConfig) -> worm_core::Result<Self> {
        let policy = SessionPolicy::resolve(config)?;
        let id = next_session_id();
        let sink = if config.audit.enabled {
            let log_file = config
                .audit
                .log_file
                .clone()
                .unwrap_or_else(|| worm_policy::default_audit_log(&worm_policy::worm_dir()));
            Arc::new(AuditSink::new(log_file, id.clone()))
        } else {
            Arc::new(AuditSink::disabled(id.clone()))
        };
        Ok(Self::with_policy_and_sink(id, policy, sink))
    }

    /// Session over a pre-resolved policy and sink, for embedding
    /// hosts that manage their own configuration.
    pub fn with_policy(policy: SessionPolicy, sink: Arc<AuditSink>) -> Self {
        Self::with_policy_and_sink(next_session_id(), policy, sink)
    }

    fn with_policy_and_sink(id: String, policy: SessionPolicy, sink: Arc<AuditSink>) -> Self {
        SandboxSession {
            id,
            policy,
            sink,
            state: SessionState::PolicyLoaded,
            layers: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn capability_gate(&self) -> Option<&CapabilityGate> {
        self.layers.as_ref().map(|l| &l.capability)
    }

    pub fn code_evaluation_gate(&self) -> Option<&CodeEvaluationGate> {
        self.layers.as_ref().map(|l| &l.code_evaluation)
    }

    pub fn command_gate(&self) -> Option<&CommandGate> {
        self.layers.as_ref().map(|l| &l.command)
    }

    pub fn filesystem(&self) -> Option<&FilesystemController> {
        self.layers.as_ref().map(|l| &l.filesystem)
    }

    /// Install every enforcement layer into the calling process.
    /// Rlimits and the syscall filter are process-wide and inherited
    /// by children; the filter install is best-effort (unavailable
    /// platforms degrade to the in-process layers).
    pub fn install_layers(&mut self) -> worm_core::Result<&LayerReport> {
        self.state.expect(SessionState::PolicyLoaded)?;

        let governor = ResourceGovernor::new(self.sink.clone());
        let limits = governor.apply_limits(&self.policy.limits());

        let mut syscall_filter_installed = false;
        if self.policy.profile().wants_syscall_filter() && SyscallFilter::is_available() {
            match SyscallFilter::new().install() {
                Ok(()) => syscall_filter_installed = true,
                Err(e) => {
                    warn!(error = %e, "Syscall filter unavailable, relying on in-process layers")
                }
            }
        }

        for (key, value) in ENV_MARKERS {
            std::env::set_var(key, value);
        }

        let layers = Layers {
            capability: CapabilityGate::new(self.sink.clone()),
            code_evaluation: CodeEvaluationGate::new(
                self.policy.code_evaluation(),
                self.sink.clone(),
            ),
            command: CommandGate::new(self.sink.clone()),
            filesystem: FilesystemController::new(self.policy.filesystem(), self.sink.clone()),
            governor,
            report: LayerReport {
                limits,
                syscall_filter_installed,
            },
        };
        self.sink.record(
            EventType::LayersInstalled,
            serde_json::json!({
                "profile": self.policy.profile().to_string(),
                "limits_applied": layers.report.limits.all_applied(),
                "syscall_filter": layers.report.syscall_filter_installed,
                "fs_mode": self.policy.filesystem().mode.to_string(),
            }),
        );
        info!(
            session = %self.id,
            profile = %self.policy.profile(),
            syscall_filter = layers.report.syscall_filter_installed,
            "Sandbox layers installed"
        );

        self.state = SessionState::LayersInstalled;
        let report = &self.layers.insert(layers).report;
        Ok(report)
    }

    /// Run an embedded body under the installed layers. Records
    /// session start and end around it and terminates the session.
    pub fn run<F>(&mut self, body: F) -> worm_core::Result<i32>
    where
        F: FnOnce() -> i32,
    {
        self.state.expect(SessionState::LayersInstalled)?;
        self.sink.session_start(None, &[]);
        self.state = SessionState::Running;

        let exit_code = body();

        self.sink.session_end(exit_code);
        self.state = SessionState::Terminated { exit_code };
        Ok(exit_code)
    }

    /// Run a script file under the installed layers. The source is
    /// IoC-scanned first; findings abort when the policy says so. The
    /// child goes through the command gate and inherits this process's
    /// rlimits and syscall filter.
    pub fn run_script(&mut self, script: &Path, args: &[String]) -> worm_core::Result<RunOutcome> {
        self.state.expect(SessionState::LayersInstalled)?;

        if !script.is_file() {
            warn!(script = %script.display(), "Script path does not exist");
            return Ok(RunOutcome::MissingScript);
        }

        let monitor = IntegrityMonitor::new(self.sink.clone());
        let findings = monitor.scan_file(script)?;
        if !findings.is_empty() {
            if self.policy.abort_on_ioc() {
                return Err(WormError::IntegrityViolation(format!(
                    "{} indicator(s) of compromise in {}",
                    findings.len(),
                    script.display()
                )));
            }
            warn!(
                script = %script.display(),
                findings = findings.len(),
                "IoC findings present, continuing per policy"
            );
        }

        let script_str = script.display().to_string();
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(script_str.clone());
        argv.extend_from_slice(args);

        self.sink.session_start(Some(&script_str), args);
        self.state = SessionState::Running;

        let gate = match self.layers.as_ref() {
            Some(l) => &l.command,
            None => {
                return Err(WormError::ConfigError(
                    "session has no installed layers".to_string(),
                ))
            }
        };
        let exit_code = match gate.spawn(&argv).and_then(|mut child| {
            child
                .wait()
                .map_err(|e| WormError::Other(anyhow::anyhow!("wait failed: {e}")))
        }) {
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                self.sink.session_end(1);
                self.state = SessionState::Terminated { exit_code: 1 };
                return Err(e);
            }
        };

        self.sink.session_end(exit_code);
        self.state = SessionState::Terminated { exit_code };
        Ok(RunOutcome::Exited(exit_code))
    }

    /// Current usage against the active ceilings, including whether
    /// the syscall filter is live in this process.
    pub fn usage(&self) -> worm_core::Result<UsageReport> {
        let governor = match self.layers.as_ref() {
            Some(l) => &l.governor,
            None => return Err(WormError::ConfigError("layers not installed".to_string())),
        };
        let mut report = governor.snapshot_usage()?;
        report.syscall_filter_active = SyscallFilter::is_installed();
        Ok(report)
    }
}
