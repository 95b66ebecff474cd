//! Worm launcher.
//!
//! Thin front-end over the library crates. Stdout is reserved for
//! command output and written through explicit locked handles; the
//! direct output primitive is the IoC pattern this tool hunts for, so
//! it appears nowhere in this codebase.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::error;

use worm_audit::{AuditFilter, AuditLogReader, AuditSink};
use worm_core::EventType;
use worm_monitor::{format_alert, IntegrityMonitor};
use worm_policy::{FilesystemPolicy, PolicyProfile, WormConfig};
use worm_sandbox::{SeccompStatus, SyscallFilter};
use worm_session::{RunOutcome, SandboxSession};

#[derive(Parser)]
#[command(name = "worm")]
#[command(about = "Worm — run scripts with network denial and integrity monitoring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script inside a sandboxed session
    Run {
        /// Security profile: strict|moderate|relaxed|disabled
        #[arg(short, long)]
        profile: Option<String>,
        /// Config file (default: <worm dir>/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Allow filesystem access under this root (repeatable;
        /// switches the filesystem policy to allowlist mode)
        #[arg(long = "allow-root")]
        allow_roots: Vec<PathBuf>,
        /// Script to execute
        script: PathBuf,
        /// Arguments passed to the script
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Scan files for indicators of compromise
    Scan {
        /// Scan a single file
        #[arg(short, long, conflicts_with = "dir")]
        file: Option<PathBuf>,
        /// Scan a directory tree
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Glob pattern for directory scans, relative to the directory
        #[arg(long, default_value = "**/*.py")]
        pattern: String,
    },
    /// Read or follow the audit log
    Audit {
        /// Only this event type (e.g. blocked_import, IOC_DETECTED)
        #[arg(long)]
        event_type: Option<String>,
        /// Only records at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
        /// Only this session id
        #[arg(long)]
        session: Option<String>,
        /// Keep following the log for new records
        #[arg(short = 'F', long)]
        follow: bool,
        /// Audit log path (default: <worm dir>/audit.log)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Show profiles, paths, and syscall-filter status
    Info,
}

#[tokio::main]
async fn main() {
    let worm_dir = worm_policy::worm_dir();
    worm_logging::init_logger(worm_dir.join("logs"), "info");

    let cli = Cli::parse();
    let code = match dispatch(cli, &worm_dir).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli, worm_dir: &Path) -> Result<i32> {
    match cli.command {
        Commands::Run {
            profile,
            config,
            allow_roots,
            script,
            args,
        } => cmd_run(worm_dir, profile, config, allow_roots, &script, &args),
        Commands::Scan { file, dir, pattern } => cmd_scan(worm_dir, file, dir, &pattern),
        Commands::Audit {
            event_type,
            since,
            session,
            follow,
            log_file,
        } => cmd_audit(worm_dir, event_type, since, session, follow, log_file).await,
        Commands::Info => cmd_info(worm_dir),
    }
}

fn cmd_run(
    worm_dir: &Path,
    profile: Option<String>,
    config_path: Option<PathBuf>,
    allow_roots: Vec<PathBuf>,
    script: &Path,
    args: &[String],
) -> Result<i32> {
    let config_path = config_path.unwrap_or_else(|| worm_policy::config_file_path(worm_dir));
    let mut config: WormConfig = worm_policy::load_config(&config_path)?;
    if profile.is_some() {
        config.profile = profile;
    }
    if !allow_roots.is_empty() {
        config.filesystem = Some(FilesystemPolicy::allowlist(allow_roots));
    }

    let mut session = SandboxSession::new(&config)?;
    session.install_layers()?;
    match session.run_script(script, args)? {
        RunOutcome::Exited(code) => Ok(code),
        RunOutcome::MissingScript => {
            let stderr = std::io::stderr();
            let mut err = stderr.lock();
            writeln!(err, "worm: script not found: {}", script.display())?;
            Ok(2)
        }
    }
}

fn cmd_scan(
    worm_dir: &Path,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    pattern: &str,
) -> Result<i32> {
    let log = worm_policy::default_audit_log(worm_dir);
    let sink = std::sync::Arc::new(AuditSink::new(log, format!("scan_{}", std::process::id())));
    let monitor = IntegrityMonitor::new(sink);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    // A missing scan target is exit 2, distinct from "findings exist".
    let (files_scanned, findings) = match (file, dir) {
        (Some(file), None) => {
            if !file.is_file() {
                return missing_path(&file);
            }
            (1, monitor.scan_file(&file)?)
        }
        (None, Some(dir)) => {
            if !dir.is_dir() {
                return missing_path(&dir);
            }
            let summary = monitor.scan_dir(&dir, pattern)?;
            (summary.files_scanned, summary.findings)
        }
        _ => bail!("exactly one of --file or --dir is required"),
    };

    for finding in &findings {
        writeln!(out, "{}", finding.describe())?;
    }
    writeln!(
        out,
        "{} file(s) scanned, {} finding(s)",
        files_scanned,
        findings.len()
    )?;
    Ok(if findings.is_empty() { 0 } else { 1 })
}

fn missing_path(path: &Path) -> Result<i32> {
    let stderr = std::io::stderr();
    let mut err = stderr.lock();
    writeln!(err, "worm: path not found: {}", path.display())?;
    Ok(2)
}

async fn cmd_audit(
    worm_dir: &Path,
    event_type: Option<String>,
    since: Option<String>,
    session: Option<String>,
    follow: bool,
    log_file: Option<PathBuf>,
) -> Result<i32> {
    let log = log_file.unwrap_or_else(|| worm_policy::default_audit_log(worm_dir));

    let mut filter = AuditFilter::default();
    if let Some(t) = event_type {
        let parsed = t.parse::<EventType>().map_err(|e| anyhow::anyhow!(e))?;
        filter = filter.event_type(parsed);
    }
    if let Some(ts) = since {
        let since = ts
            .parse::<DateTime<Utc>>()
            .with_context(|| format!("invalid --since timestamp '{ts}'"))?;
        filter = filter.since(since);
    }
    if let Some(sid) = session {
        filter = filter.session(sid);
    }

    let reader = AuditLogReader::new(&log);
    let mut ioc_count = 0usize;
    {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in reader.read(&filter) {
            if event.event_type == EventType::IocDetected {
                ioc_count += 1;
            }
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
    }

    if follow {
        // Cancel with Ctrl-C; the tail poll interval bounds the latency.
        let tail = reader.tail(&filter, |event| {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(out, "{line}");
            }
            if event.event_type == EventType::IocDetected {
                ioc_count += 1;
                let stderr = std::io::stderr();
                let mut err = stderr.lock();
                let _ = writeln!(err, "{}", format_alert(&event));
            }
        });
        tokio::select! {
            _ = tail => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    // IoC records on the trail are a nonzero exit, matching the scan
    // subcommand's contract.
    Ok(if ioc_count > 0 { 1 } else { 0 })
}

fn cmd_info(worm_dir: &Path) -> Result<i32> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "worm directory:  {}", worm_dir.display())?;
    writeln!(
        out,
        "config file:     {}",
        worm_policy::config_file_path(worm_dir).display()
    )?;
    writeln!(
        out,
        "audit log:       {}",
        worm_policy::default_audit_log(worm_dir).display()
    )?;
    writeln!(
        out,
        "syscall filter:  available={} status={:?}",
        SyscallFilter::is_available(),
        SyscallFilter::status()
    )?;
    if SyscallFilter::status() == SeccompStatus::Filter {
        writeln!(out, "                 (a filter is active in this process)")?;
    }

    writeln!(out)?;
    writeln!(
        out,
        "{:<10} {:>8} {:>12} {:>12} {:>8}  {:<10}",
        "profile", "cpu(s)", "memory", "file size", "files", "code eval"
    )?;
    for profile in [
        PolicyProfile::Strict,
        PolicyProfile::Moderate,
        PolicyProfile::Relaxed,
        PolicyProfile::Disabled,
    ] {
        let limits = profile.limits();
        writeln!(
            out,
            "{:<10} {:>8} {:>12} {:>12} {:>8}  {:<10}",
            profile.to_string(),
            fmt_limit(limits.cpu_seconds),
            fmt_bytes(limits.memory_bytes),
            fmt_bytes(limits.file_size_bytes),
            fmt_limit(u64::from(limits.max_open_files)),
            if profile.allows_code_evaluation() {
                "allowed"
            } else {
                "denied"
            },
        )?;
    }
    Ok(0)
}

fn fmt_limit(value: u64) -> String {
    if value == 0 {
        "-".to_string()
    } else {
        value.to_string()
    }
}

fn fmt_bytes(value: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if value == 0 {
        "-".to_string()
    } else if value % (1024 * MIB) == 0 {
        format!("{} GiB", value / (1024 * MIB))
    } else {
        format!("{} MiB", value / MIB)
    }
}
