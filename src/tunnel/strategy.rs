//! Tunnel strategy selection.
//!
//! The selector is a pure function of the configuration and the server
//! identification string. It runs once per connect and is never re-evaluated
//! while the tunnel is open.

use std::fmt;

use tracing::debug;

use crate::config::{DEFAULT_SOCKET_PATH, TargetKind, TunnelConfig};

/// Remote command that speaks the engine protocol over its own stdio.
pub const DIAL_STDIO_COMMAND: &str = "docker system dial-stdio";

/// Address direct TCP forwards are opened against.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Marker in the server identification string of Windows-hosted servers.
const WINDOWS_MARKER: &str = "windows";

/// How the tunnel reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStrategy {
    /// Forward to the engine's TCP listener on the remote loopback interface.
    DirectTcp {
        /// The engine's TCP port.
        port: u16,
    },
    /// Bridge the socket through a helper container and forward to its
    /// published port.
    HelperForward {
        /// The engine socket the helper bridges to.
        socket_path: String,
    },
    /// Forward directly to the engine's Unix socket.
    DirectStreamLocal {
        /// The engine socket path on the remote host.
        socket_path: String,
    },
    /// Run the engine's stdio dialer and use its stdio as the stream.
    ExecDialer {
        /// File sourced into the remote shell before the dialer runs.
        source_file: Option<String>,
    },
}

impl TunnelStrategy {
    /// Returns true when a helper container must run before the channel opens.
    #[must_use]
    pub const fn requires_helper(&self) -> bool {
        matches!(self, Self::HelperForward { .. })
    }
}

impl fmt::Display for TunnelStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectTcp { .. } => "direct-tcp",
            Self::HelperForward { .. } => "helper-forward",
            Self::DirectStreamLocal { .. } => "direct-streamlocal",
            Self::ExecDialer { .. } => "exec-dialer",
        };
        f.write_str(name)
    }
}

/// Choose the tunnel strategy for a configuration.
///
/// Precedence, highest first:
/// 1. direct TCP when requested;
/// 2. the helper when requested, or when the socket path is the well-known
///    default and the server runs on Windows, where Unix sockets cannot be
///    forwarded directly;
/// 3. direct Unix socket forwarding when requested;
/// 4. the stdio dialer.
#[must_use]
pub fn select_strategy(config: &TunnelConfig, server_version: &str) -> TunnelStrategy {
    let bridged = needs_helper_bridge(config, server_version);
    let strategy = match (config.target_kind(), bridged) {
        (TargetKind::Tcp, _) => TunnelStrategy::DirectTcp {
            port: config.effective_tcp_port(),
        },
        (TargetKind::ForcedHelper, _) | (TargetKind::UnixSocket | TargetKind::ExecDialer, true) => {
            TunnelStrategy::HelperForward {
                socket_path: config.socket_path.clone(),
            }
        }
        (TargetKind::UnixSocket, false) => TunnelStrategy::DirectStreamLocal {
            socket_path: config.socket_path.clone(),
        },
        (TargetKind::ExecDialer, false) => TunnelStrategy::ExecDialer {
            source_file: config.source_file().map(String::from),
        },
    };
    debug!(strategy = %strategy, server_version, "selected tunnel strategy");
    strategy
}

/// Windows servers cannot forward the engine's default Unix socket.
fn needs_helper_bridge(config: &TunnelConfig, server_version: &str) -> bool {
    config.socket_path.eq_ignore_ascii_case(DEFAULT_SOCKET_PATH)
        && is_windows_server(server_version)
}

/// Returns true when the identification string names a Windows host.
#[must_use]
pub fn is_windows_server(server_version: &str) -> bool {
    server_version.to_ascii_lowercase().contains(WINDOWS_MARKER)
}

/// The stdio dialer command, prefixed with a source step when configured.
#[must_use]
pub fn dial_stdio_command(source_file: Option<&str>) -> String {
    with_source_prefix(source_file, DIAL_STDIO_COMMAND)
}

/// Prefix a remote command with ` source <file> && ` when a file is given.
pub(crate) fn with_source_prefix(source_file: Option<&str>, command: &str) -> String {
    match source_file.map(str::trim).filter(|file| !file.is_empty()) {
        Some(file) => format!(" source {file} && {command}"),
        None => String::from(command),
    }
}
