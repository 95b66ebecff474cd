//! Sandbox session orchestration.

pub mod session;
pub mod state;

pub use session::{LayerReport, RunOutcome, SandboxSession};
pub use state::SessionState;
