//! Syscall filter — kernel-level backstop against network access.
//!
//! A classic seccomp-BPF program: deny-listed syscalls return EPERM,
//! everything else passes through. The filter is process-wide,
//! irreversible, and inherited across fork and exec, so it holds even
//! for code that never goes through the in-process gates. Installation
//! is one-shot; repeated installs are no-ops rather than stacked
//! filters.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};
use worm_core::WormError;

/// Filter mode reported by the kernel for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeccompStatus {
    /// No filter installed.
    Disabled,
    /// Legacy strict mode (read/write/exit only). Never set by us.
    Strict,
    /// A BPF filter is active.
    Filter,
    /// The kernel did not report a mode (non-Linux, or /proc missing).
    Unknown,
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

pub struct SyscallFilter {
    denied: Vec<i64>,
}

impl Default for SyscallFilter {
    fn default() -> Self {
        SyscallFilter {
            denied: default_denied_syscalls(),
        }
    }
}

impl SyscallFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter over an explicit syscall-number list. Numbers must be
    /// valid for the running architecture.
    pub fn with_denied(denied: Vec<i64>) -> Self {
        SyscallFilter { denied }
    }

    pub fn denied_syscalls(&self) -> &[i64] {
        &self.denied
    }

    /// Whether this platform can install the filter at all.
    pub fn is_available() -> bool {
        cfg!(target_os = "linux")
    }

    /// True once a filter has been installed in this process.
    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::SeqCst)
    }

    /// Install the filter into the calling process. Requires
    /// NO_NEW_PRIVS, which is set first. Idempotent: a second call
    /// returns Ok without touching the kernel, so the active filter is
    /// never weakened or stacked.
    #[cfg(target_os = "linux")]
    pub fn install(&self) -> worm_core::Result<()> {
        // Jump offsets are 8-bit; an oversized list would silently
        // wrap them into a filter with wrong targets.
        if self.denied.len() > MAX_DENIED_SYSCALLS {
            return Err(WormError::ConfigError(format!(
                "syscall deny list too long: {} entries (max {MAX_DENIED_SYSCALLS})",
                self.denied.len()
            )));
        }
        if INSTALLED.swap(true, Ordering::SeqCst) {
            debug!("Syscall filter already installed, skipping");
            return Ok(());
        }

        let program = build_program(&self.denied);

        // SAFETY: prctl with valid constant arguments.
        let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if rc != 0 {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(WormError::IntegrityViolation(format!(
                "PR_SET_NO_NEW_PRIVS failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let prog = libc::sock_fprog {
            len: program.len() as u16,
            filter: program.as_ptr() as *mut libc::sock_filter,
        };
        // SAFETY: prog points at a program that outlives the call.
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const libc::sock_fprog,
            )
        };
        if rc != 0 {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(WormError::IntegrityViolation(format!(
                "SECCOMP_MODE_FILTER failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        info!(denied = self.denied.len(), "Syscall filter installed");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn install(&self) -> worm_core::Result<()> {
        Err(WormError::IntegrityViolation(
            "seccomp filtering requires Linux".to_string(),
        ))
    }

    /// Read the kernel's view of this process's seccomp mode from
    /// /proc/self/status.
    pub fn status() -> SeccompStatus {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return SeccompStatus::Unknown;
        };
        parse_seccomp_mode(&status)
    }
}

fn parse_seccomp_mode(status: &str) -> SeccompStatus {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Seccomp:") {
            return match rest.trim() {
                "0" => SeccompStatus::Disabled,
                "1" => SeccompStatus::Strict,
                "2" => SeccompStatus::Filter,
                _ => SeccompStatus::Unknown,
            };
        }
    }
    SeccompStatus::Unknown
}

/// Network-reaching syscalls for the running architecture. Numbers
/// come from libc per target, never from a hand-written table.
#[cfg(target_os = "linux")]
fn default_denied_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_socket,
        libc::SYS_socketpair,
        libc::SYS_connect,
        libc::SYS_accept,
        libc::SYS_accept4,
        libc::SYS_bind,
        libc::SYS_listen,
        libc::SYS_sendto,
        libc::SYS_recvfrom,
        libc::SYS_sendmsg,
        libc::SYS_recvmsg,
        libc::SYS_sendmmsg,
        libc::SYS_recvmmsg,
        libc::SYS_setsockopt,
        libc::SYS_getsockopt,
        libc::SYS_shutdown,
    ]
    .into_iter()
    .map(|n| n as i64)
    .collect()
}

#[cfg(not(target_os = "linux"))]
fn default_denied_syscalls() -> Vec<i64> {
    Vec::new()
}

/// Largest deny list whose jump offsets still fit in the 8-bit
/// `jt`/`jf` fields (the arch-mismatch jump is `n + 2`).
const MAX_DENIED_SYSCALLS: usize = u8::MAX as usize - 2;

// Classic BPF opcodes; the bpf headers are not exposed through libc.
const BPF_LD_W_ABS: u16 = 0x20;
const BPF_JMP_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const EPERM: u32 = 1;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_CURRENT: u32 = 0xc000_003e;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH_CURRENT: u32 = 0xc000_00b7;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const AUDIT_ARCH_CURRENT: u32 = 0;

// seccomp_data field offsets.
const OFF_NR: u32 = 0;
const OFF_ARCH: u32 = 4;

#[cfg(target_os = "linux")]
fn bpf_stmt(code: u16, k: u32) -> libc::sock_filter {
    libc::sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

#[cfg(target_os = "linux")]
fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Program layout for n denied syscalls (n + 5 instructions):
///
/// ```text
/// 0      ld   arch
/// 1      jeq  AUDIT_ARCH_CURRENT  else -> [n+4] errno
/// 2      ld   nr
/// 3+i    jeq  denied[i]           hit  -> [n+4] errno
/// n+3    ret  ALLOW
/// n+4    ret  ERRNO(EPERM)
/// ```
///
/// An architecture mismatch means the syscall numbers being compared
/// are meaningless, so it fails closed.
#[cfg(target_os = "linux")]
fn build_program(denied: &[i64]) -> Vec<libc::sock_filter> {
    let n = denied.len();
    let mut program = Vec::with_capacity(n + 5);

    program.push(bpf_stmt(BPF_LD_W_ABS, OFF_ARCH));
    program.push(bpf_jump(
        BPF_JMP_JEQ_K,
        AUDIT_ARCH_CURRENT,
        0,
        (n + 2) as u8,
    ));
    program.push(bpf_stmt(BPF_LD_W_ABS, OFF_NR));
    for (i, nr) in denied.iter().enumerate() {
        program.push(bpf_jump(BPF_JMP_JEQ_K, *nr as u32, (n - i) as u8, 0));
    }
    program.push(bpf_stmt(BPF_RET_K, SECCOMP_RET_ALLOW));
    program.push(bpf_stmt(BPF_RET_K, SECCOMP_RET_ERRNO | EPERM));

    program
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests only build and inspect the program. Installing a filter is
    // irreversible for the whole test process, so no test does it.

    #[cfg(target_os = "linux")]
    #[test]
    fn program_has_expected_shape() {
        let denied = vec![41_i64, 42, 49, 50];
        let program = build_program(&denied);
        assert_eq!(program.len(), denied.len() + 5);

        assert_eq!(program[0].code, BPF_LD_W_ABS);
        assert_eq!(program[0].k, OFF_ARCH);
        assert_eq!(program[1].code, BPF_JMP_JEQ_K);
        assert_eq!(program[1].jf as usize, denied.len() + 2);
        assert_eq!(program[2].code, BPF_LD_W_ABS);
        assert_eq!(program[2].k, OFF_NR);

        let allow = &program[denied.len() + 3];
        let errno = &program[denied.len() + 4];
        assert_eq!(allow.code, BPF_RET_K);
        assert_eq!(allow.k, SECCOMP_RET_ALLOW);
        assert_eq!(errno.code, BPF_RET_K);
        assert_eq!(errno.k, SECCOMP_RET_ERRNO | EPERM);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn every_deny_entry_jumps_to_the_errno_return() {
        let denied = vec![10_i64, 20, 30];
        let program = build_program(&denied);
        let errno_index = denied.len() + 4;
        for (i, nr) in denied.iter().enumerate() {
            let insn = &program[3 + i];
            assert_eq!(insn.code, BPF_JMP_JEQ_K);
            assert_eq!(insn.k, *nr as u32);
            // Relative jump target: index + 1 + jt.
            assert_eq!(3 + i + 1 + insn.jt as usize, errno_index);
            assert_eq!(insn.jf, 0);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn default_deny_list_covers_socket_creation_and_connect() {
        let filter = SyscallFilter::new();
        assert!(filter.denied_syscalls().contains(&(libc::SYS_socket as i64)));
        assert!(filter.denied_syscalls().contains(&(libc::SYS_connect as i64)));
        assert!(!filter.denied_syscalls().contains(&(libc::SYS_read as i64)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn oversized_deny_list_is_rejected_before_any_kernel_change() {
        let filter = SyscallFilter::with_denied((0..300).collect());
        assert!(matches!(
            filter.install(),
            Err(worm_core::WormError::ConfigError(_))
        ));
        // The one-shot flag stays clear: a later, valid filter can
        // still be installed.
        assert!(!SyscallFilter::is_installed());
    }

    #[test]
    fn seccomp_mode_parses_from_proc_status() {
        let status = "Name:\tworm\nSeccomp:\t2\nSeccomp_filters:\t1\n";
        assert_eq!(parse_seccomp_mode(status), SeccompStatus::Filter);
        assert_eq!(parse_seccomp_mode("Seccomp:\t0\n"), SeccompStatus::Disabled);
        assert_eq!(parse_seccomp_mode("Name:\tworm\n"), SeccompStatus::Unknown);
    }
}
