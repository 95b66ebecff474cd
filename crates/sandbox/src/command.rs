//! Command gate — blocks external commands that reach the network.
//!
//! Two independent checks, either of which denies: the base executable
//! name against the blocked set (case-sensitive, final path segment),
//! and the lower-cased joined command line against protocol markers.
//! On allow, the real spawn primitive runs unmodified.

use std::collections::HashSet;
use std::process::{Child, Command};
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;
use worm_audit::AuditSink;
use worm_core::WormError;

pub struct CommandGate {
    blocked_base_names: HashSet<&'static str>,
    blocked_substrings: &'static [&'static str],
    sink: Arc<AuditSink>,
}

impl CommandGate {
    pub fn new(sink: Arc<AuditSink>) -> Self {
        CommandGate {
            blocked_base_names: worm_policy::rules::blocked_commands(),
            blocked_substrings: worm_policy::rules::blocked_substrings(),
            sink,
        }
    }

    /// Check an argv-style command. The underlying process must never
    /// be spawned when this returns an error.
    pub fn check(&self, argv: &[String]) -> worm_core::Result<()> {
        let joined = argv.join(" ");
        let base = argv
            .first()
            .map(|arg0| final_segment(arg0))
            .unwrap_or_default();

        if self.blocked_base_names.contains(base) {
            return Err(self.deny(&joined, format!("network command '{base}'")));
        }

        let lowered = joined.to_lowercase();
        for marker in self.blocked_substrings {
            if lowered.contains(marker) {
                return Err(self.deny(&joined, format!("blocked pattern '{marker}'")));
            }
        }

        Ok(())
    }

    /// Check a shell-style single string (whitespace split).
    pub fn check_line(&self, line: &str) -> worm_core::Result<()> {
        let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        self.check(&argv)
    }

    /// Spawn the command after the gate check. The allowed path adds
    /// nothing beyond the check itself — the child is a plain
    /// `std::process::Command` spawn and its result is returned
    /// unmodified.
    pub fn spawn(&self, argv: &[String]) -> worm_core::Result<Child> {
        self.check(argv)?;
        let program = argv
            .first()
            .ok_or_else(|| WormError::Other(anyhow::anyhow!("empty command")))?;
        let child = Command::new(program)
            .args(&argv[1..])
            .spawn()
            .with_context(|| format!("failed to spawn '{program}'"))?;
        Ok(child)
    }

    fn deny(&self, command: &str, reason: String) -> WormError {
        self.sink.blocked_subprocess(command, &reason);
        debug!(command = %command, reason = %reason, "Blocked subprocess");
        WormError::CommandDenied {
            command: command.to_string(),
            reason,
        }
    }
}

/// Final path segment of an executable reference (`/usr/bin/curl` →
/// `curl`).
fn final_segment(arg0: &str) -> &str {
    arg0.rsplit('/').next().unwrap_or(arg0)
}
