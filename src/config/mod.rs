//! Configuration for the SSH tunnel transport.
//!
//! This module provides the [`TunnelConfig`] structure and its layered loader.
//! Loading and precedence merging is handled by the `ortho_config` crate:
//! environment variables override configuration files, which override
//! defaults.
//!
//! The configuration file is expected at `~/.config/dockerssh/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! docker_host = "ssh://deploy@build-host:22"
//! use_socket = true
//! socket_path = "/run/docker.sock"
//! source_file = "/etc/profile.d/docker-env.sh"
//! connect_timeout_ms = 20000
//! helper_timeout_ms = 30000
//! ```

mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use loader::{CONFIG_PATH_ENV, env_var_names, load_config};
pub use types::{
    DEFAULT_HELPER_IMAGE, DEFAULT_HELPER_TIMEOUT_MS, DEFAULT_SOCKET_PATH, DEFAULT_TCP_PORT,
    TargetKind, TunnelConfig,
};
