//! Config file read/write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::schema::WormConfig;

/// Default config file name within the worm directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the Worm state directory.
/// Priority: `WORM_CONFIG_DIR` env > `~/.worm/`.
pub fn worm_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WORM_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".worm");
    }
    PathBuf::from(".worm")
}

/// Resolve the full path to the main config file.
pub fn config_file_path(worm_dir: &Path) -> PathBuf {
    worm_dir.join(CONFIG_FILE_NAME)
}

/// Default audit log path within the worm directory.
pub fn default_audit_log(worm_dir: &Path) -> PathBuf {
    worm_dir.join("audit.log")
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub fn load_config(path: &Path) -> Result<WormConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(WormConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: WormConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write config to disk atomically (write to temp file, rename).
pub fn write_config(config: &WormConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    let yaml =
        serde_yaml::to_string(config).with_context(|| "Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, yaml.as_bytes())
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}
