//! Filesystem access controller.
//!
//! Every decision runs on canonical paths: symlinks and relative
//! segments are resolved before any comparison, and containment is
//! computed component-wise (`/tmp/allowed-evil` is not under
//! `/tmp/allowed`). When a path cannot be canonicalized the open is
//! denied — fail closed.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use worm_audit::AuditSink;
use worm_core::WormError;
use worm_policy::{FilesystemPolicy, FsMode};

/// Requested open flags. `is_write` is true for any of
/// write/append/create/truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn read() -> Self {
        OpenMode {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
        }
    }

    /// Create-or-truncate write, like `std::fs::File::create`.
    pub fn write() -> Self {
        OpenMode {
            read: false,
            write: true,
            append: false,
            create: true,
            truncate: true,
        }
    }

    pub fn append() -> Self {
        OpenMode {
            read: false,
            write: true,
            append: true,
            create: true,
            truncate: false,
        }
    }

    pub fn is_write(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }

    fn describe(&self) -> String {
        let mut flags = Vec::new();
        if self.read {
            flags.push("read");
        }
        if self.write {
            flags.push("write");
        }
        if self.append {
            flags.push("append");
        }
        if self.create {
            flags.push("create");
        }
        if self.truncate {
            flags.push("truncate");
        }
        if flags.is_empty() {
            flags.push("read");
        }
        flags.join("|")
    }
}

pub struct FilesystemController {
    mode: FsMode,
    allowed_roots: Vec<PathBuf>,
    denied_roots: Vec<PathBuf>,
    sink: Arc<AuditSink>,
}

impl FilesystemController {
    pub fn new(policy: &FilesystemPolicy, sink: Arc<AuditSink>) -> Self {
        // Roots are canonicalized once at installation. A root that
        // does not resolve cannot contain any resolvable path, so it
        // is dropped (with a warning for denylist roots, where the
        // operator likely expects it to bite).
        let allowed_roots = canonical_roots(&policy.allowed_roots, false);
        let denied_roots = canonical_roots(&policy.denied_roots, true);
        FilesystemController {
            mode: policy.mode,
            allowed_roots,
            denied_roots,
            sink,
        }
    }

    pub fn mode(&self) -> FsMode {
        self.mode
    }

    /// Apply the decision table without opening anything.
    pub fn check(&self, path: &Path, mode: OpenMode) -> worm_core::Result<()> {
        if self.mode == FsMode::Disabled {
            return Ok(());
        }

        if self.mode == FsMode::ReadOnly {
            if mode.is_write() {
                return Err(self.deny(path, mode, "filesystem is read-only"));
            }
            return Ok(());
        }

        let canonical = match canonicalize_target(path, mode.is_write()) {
            Some(p) => p,
            None => return Err(self.deny(path, mode, "path could not be canonicalized")),
        };

        match self.mode {
            FsMode::Allowlist => {
                if self.allowed_roots.iter().any(|root| canonical.starts_with(root)) {
                    Ok(())
                } else {
                    Err(self.deny(path, mode, "path is not under an allowed root"))
                }
            }
            FsMode::Denylist => {
                if self.denied_roots.iter().any(|root| canonical.starts_with(root)) {
                    Err(self.deny(path, mode, "path is under a denied root"))
                } else {
                    Ok(())
                }
            }
            FsMode::Disabled | FsMode::ReadOnly => unreachable!("handled above"),
        }
    }

    /// Check, then open through `OpenOptions` on allow.
    pub fn try_open(&self, path: &Path, mode: OpenMode) -> worm_core::Result<File> {
        self.check(path, mode)?;
        let mut options = OpenOptions::new();
        options
            .read(mode.read || !mode.is_write())
            .write(mode.write && !mode.append)
            .append(mode.append)
            .create(mode.create)
            .truncate(mode.truncate);
        let file = options
            .open(path)
            .map_err(|e| WormError::AccessDenied {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        Ok(file)
    }

    fn deny(&self, path: &Path, mode: OpenMode, detail: &str) -> WormError {
        self.sink
            .filesystem_denied(path, &mode.describe(), &self.mode.to_string());
        debug!(path = %path.display(), mode = %mode.describe(), detail, "Filesystem open denied");
        WormError::AccessDenied {
            path: path.display().to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Canonicalize the open target. For a not-yet-existing file in a
/// write/create mode, the parent is canonicalized and the final
/// component re-appended; any other failure is a deny.
fn canonicalize_target(path: &Path, allow_missing: bool) -> Option<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(p) => Some(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            let parent = path.parent()?;
            let name = path.file_name()?;
            let parent = if parent.as_os_str().is_empty() {
                std::fs::canonicalize(".").ok()?
            } else {
                std::fs::canonicalize(parent).ok()?
            };
            Some(parent.join(name))
        }
        Err(_) => None,
    }
}

fn canonical_roots(roots: &[PathBuf], warn_on_drop: bool) -> Vec<PathBuf> {
    roots
        .iter()
        .filter_map(|root| match std::fs::canonicalize(root) {
            Ok(p) => Some(p),
            Err(e) => {
                if warn_on_drop {
                    warn!(root = %root.display(), error = %e, "Dropping unresolvable denylist root");
                }
                None
            }
        })
        .collect()
}
