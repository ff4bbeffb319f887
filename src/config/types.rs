//! Configuration data types.

use std::fmt;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::error::ConfigError;

/// Well-known path of the engine socket on the remote host.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Documented default port of the engine's plain TCP listener.
pub const DEFAULT_TCP_PORT: u16 = 2375;

/// Image used for the helper container unless configured otherwise.
pub const DEFAULT_HELPER_IMAGE: &str = "alpine/socat";

/// Bound for each helper start or stop round trip, in milliseconds.
pub const DEFAULT_HELPER_TIMEOUT_MS: u64 = 30_000;

/// The explicit target kind requested by a configuration.
///
/// Several selector flags may be set at once; [`TunnelConfig::target_kind`]
/// resolves them to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Direct TCP forwarding to the engine's TCP listener.
    Tcp,
    /// The helper container path was requested explicitly.
    ForcedHelper,
    /// Direct forwarding of the engine's Unix socket.
    UnixSocket,
    /// No explicit kind: run the engine's stdio dialer.
    ExecDialer,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::ForcedHelper => "forced-helper",
            Self::UnixSocket => "unix-socket",
            Self::ExecDialer => "exec-dialer",
        };
        f.write_str(name)
    }
}

/// Tunnel configuration.
///
/// This structure is loaded from configuration files and environment
/// variables with layered precedence (lowest to highest): defaults,
/// configuration file, environment variables.
///
/// Configuration files are discovered in this order:
/// 1. An explicit path passed by the caller
/// 2. Path specified via `DOCKERSSH_CONFIG_PATH`
/// 3. `.dockerssh.toml` in the current working directory or home directory
/// 4. `~/.config/dockerssh/config.toml` (XDG default)
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(
    prefix = "DOCKERSSH",
    post_merge_hook,
    discovery(
        app_name = "dockerssh",
        env_var = "DOCKERSSH_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".dockerssh.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct TunnelConfig {
    /// The `ssh://[user@]host[:port]` address of the engine host.
    pub docker_host: Option<String>,

    /// Forward directly to the engine's TCP listener.
    #[ortho_config(skip_cli)]
    pub use_tcp: bool,

    /// Port of the engine's TCP listener; 2375 when unset.
    #[ortho_config(skip_cli)]
    pub tcp_port: Option<u16>,

    /// Forward the engine's Unix socket directly.
    #[ortho_config(skip_cli)]
    pub use_socket: bool,

    /// Path of the engine's Unix socket on the remote host.
    #[default(String::from(DEFAULT_SOCKET_PATH))]
    #[ortho_config(skip_cli)]
    pub socket_path: String,

    /// Always bridge the socket through a helper container.
    #[ortho_config(skip_cli)]
    pub use_helper: bool,

    /// Extra flags appended verbatim to the helper launch command.
    pub helper_flags: Option<String>,

    /// Image used to run the helper container.
    #[default(String::from(DEFAULT_HELPER_IMAGE))]
    #[ortho_config(skip_cli)]
    pub helper_image: String,

    /// File sourced into the remote shell before each remote command.
    pub source_file: Option<String>,

    /// Bound on the connect handshake in milliseconds; zero waits forever.
    #[ortho_config(skip_cli)]
    pub connect_timeout_ms: u64,

    /// Read timeout offered to the HTTP layer in milliseconds; zero disables it.
    #[ortho_config(skip_cli)]
    pub read_timeout_ms: u64,

    /// Bound on each helper start or stop round trip in milliseconds.
    #[default(DEFAULT_HELPER_TIMEOUT_MS)]
    #[ortho_config(skip_cli)]
    pub helper_timeout_ms: u64,
}

impl TunnelConfig {
    /// Request direct TCP forwarding, optionally overriding the port.
    #[must_use]
    pub const fn with_tcp(mut self, port: Option<u16>) -> Self {
        self.use_tcp = true;
        self.tcp_port = port;
        self
    }

    /// Request direct forwarding of the given Unix socket path.
    #[must_use]
    pub fn with_socket(mut self, socket_path: impl Into<String>) -> Self {
        self.use_socket = true;
        self.socket_path = socket_path.into();
        self
    }

    /// Force the helper container path, with optional extra launch flags.
    #[must_use]
    pub fn with_helper(mut self, flags: Option<String>) -> Self {
        self.use_helper = true;
        self.helper_flags = flags;
        self
    }

    /// Source the given file into the remote shell before each command.
    #[must_use]
    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Set the SSH address of the engine host.
    #[must_use]
    pub fn with_docker_host(mut self, docker_host: impl Into<String>) -> Self {
        self.docker_host = Some(docker_host.into());
        self
    }

    /// Set the connect handshake bound; [`Duration::ZERO`] waits forever.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Set the read timeout offered to the HTTP layer.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Set the bound applied to each helper start or stop round trip.
    #[must_use]
    pub fn with_helper_timeout(mut self, timeout: Duration) -> Self {
        self.helper_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Resolve the selector flags to exactly one target kind.
    ///
    /// Precedence: TCP, then the forced helper, then the Unix socket, then the
    /// stdio dialer.
    #[must_use]
    pub const fn target_kind(&self) -> TargetKind {
        if self.use_tcp {
            TargetKind::Tcp
        } else if self.use_helper {
            TargetKind::ForcedHelper
        } else if self.use_socket {
            TargetKind::UnixSocket
        } else {
            TargetKind::ExecDialer
        }
    }

    /// Port used for direct TCP forwarding.
    #[must_use]
    pub fn effective_tcp_port(&self) -> u16 {
        self.tcp_port.unwrap_or(DEFAULT_TCP_PORT)
    }

    /// The file to source before remote commands, if one is configured.
    ///
    /// Empty and whitespace-only values are treated as unset.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file
            .as_deref()
            .map(str::trim)
            .filter(|file| !file.is_empty())
    }

    /// The extra helper launch flags, if any are configured.
    #[must_use]
    pub fn helper_flags(&self) -> Option<&str> {
        self.helper_flags
            .as_deref()
            .map(str::trim)
            .filter(|flags| !flags.is_empty())
    }

    /// Connect handshake bound; [`Duration::ZERO`] means wait forever.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read timeout for the HTTP layer, or `None` when disabled.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.read_timeout_ms))
        }
    }

    /// Bound applied to each helper start or stop round trip.
    #[must_use]
    pub const fn helper_timeout(&self) -> Duration {
        Duration::from_millis(self.helper_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the TCP port is zero, the
    /// socket path is empty or relative, the helper image is empty, the helper
    /// timeout is zero, or the helper flags would change how the bridge is
    /// exposed on the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp_port == Some(0) {
            return Err(invalid("tcp_port", "must be non-zero"));
        }
        if self.socket_path.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: String::from("socket_path"),
            });
        }
        if !self.socket_path.starts_with('/') {
            return Err(invalid("socket_path", "must be an absolute path"));
        }
        if self.helper_image.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: String::from("helper_image"),
            });
        }
        if self.helper_timeout_ms == 0 {
            return Err(invalid("helper_timeout_ms", "must be non-zero"));
        }
        if let Some(flag) = self.helper_flags().and_then(exposure_flag) {
            return Err(invalid(
                "helper_flags",
                &format!("'{flag}' would change the helper's network exposure"),
            ));
        }
        Ok(())
    }
}

impl PostMergeHook for TunnelConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // Blank optional strings from files or the environment mean "unset".
        if self.source_file().is_none() {
            self.source_file = None;
        }
        if self.helper_flags().is_none() {
            self.helper_flags = None;
        }
        Ok(())
    }
}

/// Find the first helper flag that publishes ports or joins the host network.
fn exposure_flag(flags: &str) -> Option<String> {
    let mut previous: Option<&str> = None;
    for token in flags.split_whitespace() {
        let publishes = matches!(token, "-p" | "-P" | "--publish" | "--publish-all")
            || token.starts_with("--publish=")
            || token.starts_with("--publish-all=")
            || token
                .strip_prefix("-p")
                .and_then(|rest| rest.chars().next())
                .is_some_and(|next| !next.is_ascii_alphabetic());
        if publishes {
            return Some(String::from(token));
        }
        if matches!(token, "--network=host" | "--net=host") {
            return Some(String::from(token));
        }
        if let Some(option @ ("--network" | "--net")) = previous
            && token == "host"
        {
            return Some(format!("{option} host"));
        }
        previous = Some(token);
    }
    None
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: String::from(field),
        reason: String::from(reason),
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
