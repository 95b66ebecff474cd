//! Worm runtime configuration schema.
//!
//! Typed for serde YAML deserialization. Everything here is an
//! override on top of the selected profile; the fixed deny sets in
//! [`crate::rules`] are deliberately not part of the schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::profile::{CodeEvaluationPolicy, PolicyProfile, ResourceLimits};

/// Filesystem sandbox mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsMode {
    /// No filesystem restrictions.
    #[default]
    Disabled,
    /// All write-mode opens fail regardless of path.
    ReadOnly,
    /// Only paths under an allowed root may be opened.
    Allowlist,
    /// Paths under a denied root may not be opened.
    Denylist,
}

impl std::fmt::Display for FsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FsMode::Disabled => "disabled",
            FsMode::ReadOnly => "read-only",
            FsMode::Allowlist => "allowlist",
            FsMode::Denylist => "denylist",
        };
        f.write_str(s)
    }
}

/// Filesystem access policy: mode plus the roots it applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemPolicy {
    #[serde(default)]
    pub mode: FsMode,
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    #[serde(default)]
    pub denied_roots: Vec<PathBuf>,
}

impl FilesystemPolicy {
    pub fn read_only() -> Self {
        FilesystemPolicy {
            mode: FsMode::ReadOnly,
            ..Default::default()
        }
    }

    pub fn allowlist(roots: Vec<PathBuf>) -> Self {
        FilesystemPolicy {
            mode: FsMode::Allowlist,
            allowed_roots: roots,
            ..Default::default()
        }
    }

    pub fn denylist(roots: Vec<PathBuf>) -> Self {
        FilesystemPolicy {
            mode: FsMode::Denylist,
            denied_roots: roots,
            ..Default::default()
        }
    }
}

/// Audit sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Path to the append-only NDJSON log. Defaults to
    /// `<worm dir>/audit.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Disable recording entirely (reads still work).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Integrity monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityConfig {
    /// Whether an IoC finding during session orchestration aborts the
    /// run. Passive scan tools ignore this and always just report.
    #[serde(default = "default_true")]
    pub abort_on_ioc: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        IntegrityConfig { abort_on_ioc: true }
    }
}

fn default_true() -> bool {
    true
}

/// Root configuration for a Worm session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WormConfig {
    /// Profile name; unknown values are a fatal configuration error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Filesystem policy override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemPolicy>,

    /// Resource ceiling overrides (replaces the profile's ceilings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,

    /// Dynamic code evaluation override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_evaluation: Option<CodeEvaluationPolicy>,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub integrity: IntegrityConfig,
}

/// The resolved, immutable policy for one session.
///
/// Once constructed it cannot be loosened: there are no setters, and
/// the session holds it for its whole lifetime.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    profile: PolicyProfile,
    filesystem: FilesystemPolicy,
    limits: ResourceLimits,
    code_evaluation: CodeEvaluationPolicy,
    integrity: IntegrityConfig,
}

impl SessionPolicy {
    /// Resolve a config into a concrete policy. Overrides replace the
    /// profile's defaults wholesale; absent sections fall back to the
    /// profile.
    pub fn resolve(config: &WormConfig) -> worm_core::Result<Self> {
        let profile = match config.profile.as_deref() {
            Some(name) => name.parse::<PolicyProfile>()?,
            None => PolicyProfile::Moderate,
        };
        Ok(SessionPolicy {
            profile,
            filesystem: config.filesystem.clone().unwrap_or_default(),
            limits: config.limits.unwrap_or_else(|| profile.limits()),
            code_evaluation: config
                .code_evaluation
                .unwrap_or_else(|| CodeEvaluationPolicy::for_profile(profile)),
            integrity: config.integrity.clone(),
        })
    }

    pub fn from_profile(profile: PolicyProfile) -> Self {
        SessionPolicy {
            profile,
            filesystem: FilesystemPolicy::default(),
            limits: profile.limits(),
            code_evaluation: CodeEvaluationPolicy::for_profile(profile),
            integrity: IntegrityConfig::default(),
        }
    }

    pub fn profile(&self) -> PolicyProfile {
        self.profile
    }

    pub fn filesystem(&self) -> &FilesystemPolicy {
        &self.filesystem
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn code_evaluation(&self) -> CodeEvaluationPolicy {
        self.code_evaluation
    }

    pub fn abort_on_ioc(&self) -> bool {
        self.integrity.abort_on_ioc
    }
}
