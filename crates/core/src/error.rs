use thiserror::Error;

/// Top-level error type for the Worm sandbox runtime.
///
/// Gate denials (`CapabilityDenied`, `CommandDenied`, `AccessDenied`,
/// `CodeEvaluationDenied`) are synchronous and recoverable by the
/// sandboxed script — the contract is "deny the operation", not
/// "terminate the script". `ResourceExceeded` for CPU/memory is fatal
/// by design and is delivered by the kernel, not through this enum.
#[derive(Debug, Error)]
pub enum WormError {
    #[error("capability '{name}' is denied: network-capable units are disabled in this sandbox")]
    CapabilityDenied { name: String },

    #[error("command denied: {reason} (command: {command})")]
    CommandDenied { command: String, reason: String },

    #[error("filesystem access denied: {path} ({detail})")]
    AccessDenied { path: String, detail: String },

    #[error("dynamic code evaluation is disabled: {context}")]
    CodeEvaluationDenied { context: String },

    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("audit write failure: {0}")]
    AuditWriteFailure(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WormError>;
