pub mod io;
pub mod profile;
pub mod rules;
pub mod schema;

pub use io::{config_file_path, default_audit_log, load_config, worm_dir, write_config};
pub use profile::{CodeEvaluationPolicy, PolicyProfile, ResourceLimits};
pub use schema::{AuditConfig, FilesystemPolicy, FsMode, IntegrityConfig, SessionPolicy, WormConfig};
