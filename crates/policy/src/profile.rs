//! Security profiles and the ceilings they map to.

use serde::{Deserialize, Serialize};
use worm_core::WormError;

/// Named bundle of resource ceilings and policy modes.
///
/// Immutable once loaded for a session: a profile is selected at
/// session start and is never downgraded mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyProfile {
    /// Very restrictive: competitions, fully untrusted code.
    Strict,
    /// Balanced: general analysis and CI use.
    Moderate,
    /// Minimal restrictions: mostly-trusted code.
    Relaxed,
    /// No enforcement. The audit trail still records the session.
    Disabled,
}

impl PolicyProfile {
    /// Resource ceilings for this profile.
    pub fn limits(self) -> ResourceLimits {
        match self {
            PolicyProfile::Strict => ResourceLimits {
                cpu_seconds: 30,
                memory_bytes: 512 * MIB,
                file_size_bytes: 10 * MIB,
                max_open_files: 100,
            },
            PolicyProfile::Moderate => ResourceLimits {
                cpu_seconds: 300,
                memory_bytes: 2048 * MIB,
                file_size_bytes: 100 * MIB,
                max_open_files: 1000,
            },
            PolicyProfile::Relaxed => ResourceLimits {
                cpu_seconds: 3600,
                memory_bytes: 4096 * MIB,
                file_size_bytes: 1024 * MIB,
                max_open_files: 10_000,
            },
            PolicyProfile::Disabled => ResourceLimits::unlimited(),
        }
    }

    /// Whether dynamic code evaluation is permitted under this profile.
    pub fn allows_code_evaluation(self) -> bool {
        matches!(self, PolicyProfile::Relaxed | PolicyProfile::Disabled)
    }

    /// Whether the kernel syscall filter should be attempted.
    pub fn wants_syscall_filter(self) -> bool {
        !matches!(self, PolicyProfile::Disabled)
    }
}

impl std::fmt::Display for PolicyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyProfile::Strict => "strict",
            PolicyProfile::Moderate => "moderate",
            PolicyProfile::Relaxed => "relaxed",
            PolicyProfile::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PolicyProfile {
    type Err = WormError;

    /// Unknown profile names are a fatal configuration error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(PolicyProfile::Strict),
            "moderate" => Ok(PolicyProfile::Moderate),
            "relaxed" => Ok(PolicyProfile::Relaxed),
            "disabled" => Ok(PolicyProfile::Disabled),
            other => Err(WormError::ConfigError(format!(
                "unknown profile '{other}' (expected strict|moderate|relaxed|disabled)"
            ))),
        }
    }
}

const MIB: u64 = 1024 * 1024;

/// Hard resource ceilings. A value of 0 means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub cpu_seconds: u64,
    pub memory_bytes: u64,
    pub file_size_bytes: u64,
    pub max_open_files: u32,
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        ResourceLimits {
            cpu_seconds: 0,
            memory_bytes: 0,
            file_size_bytes: 0,
            max_open_files: 0,
        }
    }
}

/// Dynamic code evaluation control — a distinct concern from the
/// network capability gate (code-injection risk, not exfiltration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEvaluationPolicy {
    pub enabled: bool,
}

impl CodeEvaluationPolicy {
    pub fn for_profile(profile: PolicyProfile) -> Self {
        CodeEvaluationPolicy {
            enabled: profile.allows_code_evaluation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_profile_ceilings() {
        let limits = PolicyProfile::Strict.limits();
        assert_eq!(limits.cpu_seconds, 30);
        assert_eq!(limits.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(limits.file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.max_open_files, 100);
    }

    #[test]
    fn moderate_and_relaxed_ceilings() {
        assert_eq!(PolicyProfile::Moderate.limits().cpu_seconds, 300);
        assert_eq!(PolicyProfile::Moderate.limits().max_open_files, 1000);
        assert_eq!(PolicyProfile::Relaxed.limits().cpu_seconds, 3600);
        assert_eq!(PolicyProfile::Relaxed.limits().memory_bytes, 4096 * 1024 * 1024);
    }

    #[test]
    fn disabled_profile_is_unlimited() {
        assert_eq!(PolicyProfile::Disabled.limits(), ResourceLimits::unlimited());
    }

    #[test]
    fn parses_known_profiles() {
        assert_eq!("strict".parse::<PolicyProfile>().unwrap(), PolicyProfile::Strict);
        assert_eq!("disabled".parse::<PolicyProfile>().unwrap(), PolicyProfile::Disabled);
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let err = "paranoid".parse::<PolicyProfile>().unwrap_err();
        assert!(matches!(err, WormError::ConfigError(_)));
    }

    #[test]
    fn code_evaluation_follows_profile() {
        assert!(!CodeEvaluationPolicy::for_profile(PolicyProfile::Strict).enabled);
        assert!(!CodeEvaluationPolicy::for_profile(PolicyProfile::Moderate).enabled);
        assert!(CodeEvaluationPolicy::for_profile(PolicyProfile::Relaxed).enabled);
    }
}
