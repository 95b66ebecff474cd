//! Enforcement layers for sandboxed script execution.
//!
//! Defense in depth, outermost first: the capability gate refuses
//! network-capable units before they exist, the command gate filters
//! external processes, the filesystem controller mediates opens, the
//! resource governor applies kernel ceilings, and the syscall filter
//! backstops everything at the kernel boundary. Each layer stands on
//! its own; bypassing one still leaves the others in force.

pub mod capability;
pub mod command;
pub mod fs;
pub mod limits;
pub mod seccomp;

pub use capability::{CapabilityGate, CodeEvaluationGate};
pub use command::CommandGate;
pub use fs::{FilesystemController, OpenMode};
pub use limits::{AppliedLimit, AppliedSet, ResourceGovernor, UsageReport};
pub use seccomp::{SeccompStatus, SyscallFilter};
