//! Capability gate — denies loading of network-capable units.
//!
//! First line of defense: a unit on the deny list is refused before it
//! is ever materialized, so nothing network-shaped exists for the
//! script to reach. Denials are recoverable errors; the caller must
//! not retry with a different loader.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use worm_audit::AuditSink;
use worm_core::WormError;
use worm_policy::CodeEvaluationPolicy;

pub struct CapabilityGate {
    denied: HashSet<&'static str>,
    sink: Arc<AuditSink>,
}

impl CapabilityGate {
    /// Gate over the fixed build-time deny set.
    pub fn new(sink: Arc<AuditSink>) -> Self {
        CapabilityGate {
            denied: worm_policy::rules::denied_capabilities(),
            sink,
        }
    }

    /// Gate over an alternate rule set (test harnesses, future
    /// profiles). The set is still fixed for the gate's lifetime.
    pub fn with_denied(denied: HashSet<&'static str>, sink: Arc<AuditSink>) -> Self {
        CapabilityGate { denied, sink }
    }

    /// Check `name` before the capability-providing unit is
    /// materialized. A denied root also denies every dotted sub-name
    /// (`net` denies `net.tcp` but not `network`).
    pub fn try_load(&self, name: &str) -> worm_core::Result<()> {
        if self.is_denied(name) {
            self.sink.blocked_import(name);
            debug!(capability = %name, "Blocked capability load");
            return Err(WormError::CapabilityDenied {
                name: name.to_string(),
            });
        }
        // Allowed loads are not recorded, to bound log volume.
        Ok(())
    }

    pub fn is_denied(&self, name: &str) -> bool {
        if self.denied.contains(name) {
            return true;
        }
        self.denied.iter().any(|root| {
            name.strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// The roots of the active deny set.
    pub fn denied_roots(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.denied.iter().copied()
    }
}

/// Dynamic code evaluation gate — orthogonal to the capability gate:
/// it controls code-injection risk, not network access.
pub struct CodeEvaluationGate {
    policy: CodeEvaluationPolicy,
    sink: Arc<AuditSink>,
}

impl CodeEvaluationGate {
    pub fn new(policy: CodeEvaluationPolicy, sink: Arc<AuditSink>) -> Self {
        CodeEvaluationGate { policy, sink }
    }

    /// Check whether compiling and running text as code is permitted.
    /// `context` names the call site for the audit trail.
    pub fn try_evaluate(&self, context: &str) -> worm_core::Result<()> {
        if self.policy.enabled {
            return Ok(());
        }
        self.sink.restricted_builtin(context);
        Err(WormError::CodeEvaluationDenied {
            context: context.to_string(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }
}
