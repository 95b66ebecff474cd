//! Fixed deny sets for the capability and command gates.
//!
//! These sets are fixed at build time — they are not runtime
//! configurable except by selecting a different rule set. Keeping them
//! out of the config file means a compromised config cannot widen the
//! network surface.

use std::collections::HashSet;

/// Capability-providing units that must never be materialized.
///
/// Names are dotted identifiers; denying a root also denies every
/// dotted sub-name (`net` denies `net.tcp`).
const DENIED_CAPABILITIES: &[&str] = &[
    // Raw sockets and the stdlib network surface
    "net",
    "socket",
    // Application protocols
    "http",
    "https",
    "websocket",
    "ftp",
    "smtp",
    "pop3",
    "imap",
    "telnet",
    // Name resolution and transport security (useless without a
    // socket, but denied outright so probes fail early)
    "dns",
    "tls",
    // RPC stacks
    "rpc",
    "grpc",
];

/// External commands blocked by base executable name.
const BLOCKED_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "netcat", "telnet", "ssh", "scp", "sftp",
    "ftp", "ping", "nmap", "nslookup", "dig", "host", "traceroute",
    "tracert", "route", "netstat", "ss", "ip", "ifconfig", "tcpdump",
    "wireshark", "iptables", "firewall-cmd", "ufw",
];

/// Substrings (protocol markers) that deny a command when found in the
/// lower-cased joined command line.
const BLOCKED_SUBSTRINGS: &[&str] = &["://", "http", "https", "ftp", "ssh"];

/// The fixed capability deny set.
pub fn denied_capabilities() -> HashSet<&'static str> {
    DENIED_CAPABILITIES.iter().copied().collect()
}

/// The fixed command base-name deny set.
pub fn blocked_commands() -> HashSet<&'static str> {
    BLOCKED_COMMANDS.iter().copied().collect()
}

/// Protocol markers checked against the joined command string.
pub fn blocked_substrings() -> &'static [&'static str] {
    BLOCKED_SUBSTRINGS
}
