//! Semantic error types for the dockerssh transport.
//!
//! This module defines the error hierarchy for the crate, following the
//! principle of using semantic error enums (via `thiserror`) for conditions the
//! caller might inspect or retry, while leaving opaque reporting (such as
//! `eyre::Report`) to the application that embeds the transport.
//!
//! Failures raised by the SSH library never cross the tunnel boundary raw:
//! [`SshError`] is always wrapped in a [`TunnelError`], [`HelperStartError`] or
//! [`HelperStopError`] before it reaches the caller.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by an SSH session adapter.
#[derive(Debug, Error)]
pub enum SshError {
    /// The TCP connection to the SSH server could not be established.
    #[error("failed to connect to SSH server {host}: {message}")]
    ConnectFailed {
        /// The `host:port` that was dialled.
        host: String,
        /// A description of the failure.
        message: String,
    },

    /// The SSH protocol handshake failed.
    #[error("SSH handshake failed: {message}")]
    HandshakeFailed {
        /// A description of the failure.
        message: String,
    },

    /// The server refused or failed to open a channel.
    #[error("failed to open {request} channel: {message}")]
    ChannelOpenFailed {
        /// A description of the requested channel.
        request: String,
        /// A description of the failure.
        message: String,
    },

    /// A remote command could not be executed.
    #[error("failed to execute remote command '{command}': {message}")]
    ExecFailed {
        /// The command that was sent.
        command: String,
        /// A description of the failure.
        message: String,
    },
}

/// Errors raised while opening or driving a tunnel channel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The SSH channel could not be opened.
    #[error("failed to open tunnel to {target}")]
    OpenFailed {
        /// The channel target that was requested.
        target: String,
        /// The underlying transport failure.
        #[source]
        source: SshError,
    },

    /// The connect handshake did not complete in time.
    #[error("tunnel to {target} did not connect within {millis} ms")]
    ConnectTimeout {
        /// The channel target that was requested.
        target: String,
        /// The timeout that elapsed, in milliseconds.
        millis: u128,
    },

    /// The helper-forward strategy was wired without a running helper.
    #[error("helper-forward tunnel requested but no helper container is running")]
    HelperNotStarted,

    /// The socket is not in a state that allows the requested operation.
    #[error("cannot {operation} a tunnel socket that is {phase}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The socket phase at the time of the attempt.
        phase: String,
    },
}

/// Errors raised while launching the remote helper container.
#[derive(Debug, Error)]
pub enum HelperStartError {
    /// The launch command could not be sent to the remote host.
    #[error("failed to send helper launch command")]
    Transport(#[source] SshError),

    /// The launch command exited with a failure status.
    #[error("helper launch exited with status {status}: {stderr}")]
    LaunchFailed {
        /// The reported exit status, or `unknown` when none was sent.
        status: String,
        /// Standard error captured from the remote command.
        stderr: String,
    },

    /// The launch command did not finish within the configured bound.
    #[error("helper launch did not complete within {millis} ms")]
    Timeout {
        /// The bound that elapsed, in milliseconds.
        millis: u128,
    },

    /// The engine output did not contain a published `address:port` pair.
    #[error("could not resolve published port of helper '{container_id}' from output: {output}")]
    PortUnresolved {
        /// The helper container identifier, if one was reported.
        container_id: String,
        /// The output that failed to parse.
        output: String,
    },
}

/// Errors raised while removing the remote helper container.
#[derive(Debug, Error)]
pub enum HelperStopError {
    /// The remove command could not be sent to the remote host.
    #[error("failed to send remove command for helper '{container_id}'")]
    Transport {
        /// The helper container identifier.
        container_id: String,
        /// The underlying transport failure.
        #[source]
        source: SshError,
    },

    /// The engine refused to remove the helper.
    #[error("failed to remove helper '{container_id}' (status {status}): {stderr}")]
    RemoveFailed {
        /// The helper container identifier.
        container_id: String,
        /// The reported exit status, or `unknown` when none was sent.
        status: String,
        /// Standard error captured from the remote command.
        stderr: String,
    },

    /// The remove command did not finish within the configured bound.
    #[error("removing helper '{container_id}' did not complete within {millis} ms")]
    Timeout {
        /// The helper container identifier.
        container_id: String,
        /// The bound that elapsed, in milliseconds.
        millis: u128,
    },
}

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error while merging layers.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Top-level error type for the dockerssh crate.
///
/// Aggregates the domain-specific errors so callers can use a single `Result`
/// alias while still matching on the failing component.
#[derive(Debug, Error)]
pub enum DockerSshError {
    /// An error occurred in the SSH session adapter.
    #[error(transparent)]
    Ssh(#[from] SshError),

    /// An error occurred while opening or driving the tunnel channel.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The remote helper container failed to start.
    #[error(transparent)]
    HelperStart(#[from] HelperStartError),

    /// The remote helper container could not be removed.
    #[error(transparent)]
    HelperStop(#[from] HelperStopError),

    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<DockerSshError> for std::io::Error {
    fn from(error: DockerSshError) -> Self {
        let kind = match &error {
            DockerSshError::Tunnel(TunnelError::ConnectTimeout { .. })
            | DockerSshError::HelperStart(HelperStartError::Timeout { .. })
            | DockerSshError::HelperStop(HelperStopError::Timeout { .. }) => {
                std::io::ErrorKind::TimedOut
            }
            DockerSshError::Tunnel(TunnelError::OpenFailed { .. })
            | DockerSshError::Ssh(SshError::ConnectFailed { .. }) => {
                std::io::ErrorKind::ConnectionRefused
            }
            DockerSshError::Config(_) => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, error)
    }
}

/// A specialised `Result` type for dockerssh operations.
pub type Result<T> = std::result::Result<T, DockerSshError>;
