//! One-way session lifecycle.

use worm_core::WormError;

/// Lifecycle of a sandbox session. Transitions only move forward;
/// attempting an operation in the wrong state is a usage error, never
/// a silent re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    PolicyLoaded,
    LayersInstalled,
    Running,
    Terminated { exit_code: i32 },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::PolicyLoaded => "policy-loaded",
            SessionState::LayersInstalled => "layers-installed",
            SessionState::Running => "running",
            SessionState::Terminated { .. } => "terminated",
        }
    }

    /// Require the session to be in `expected`.
    pub fn expect(&self, expected: SessionState) -> worm_core::Result<()> {
        let matches = match (self, &expected) {
            (SessionState::Terminated { .. }, SessionState::Terminated { .. }) => true,
            (a, b) => a == b,
        };
        if matches {
            Ok(())
        } else {
            Err(WormError::ConfigError(format!(
                "session is {} but the operation requires {}",
                self.name(),
                expected.name()
            )))
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_accepts_the_current_state() {
        assert!(SessionState::PolicyLoaded
            .expect(SessionState::PolicyLoaded)
            .is_ok());
    }

    #[test]
    fn expect_rejects_any_other_state() {
        let err = SessionState::Running
            .expect(SessionState::PolicyLoaded)
            .unwrap_err();
        assert!(matches!(err, WormError::ConfigError(_)));
    }

    #[test]
    fn terminated_matches_regardless_of_exit_code() {
        assert!(SessionState::Terminated { exit_code: 7 }
            .expect(SessionState::Terminated { exit_code: 0 })
            .is_ok());
    }
}
