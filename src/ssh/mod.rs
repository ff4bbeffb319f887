//! The SSH session seam used by the tunnel.
//!
//! The tunnel never talks to an SSH library directly. It asks an
//! [`SshSession`] for channels described by a [`ChannelRequest`] and for
//! single command round trips, so the tunnelling logic can be unit-tested
//! without a live server. [`RusshSession`] implements the seam on top of an
//! authenticated `russh` client handle.

mod host;
mod ident;
mod russh_session;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SshError;

pub use host::{DEFAULT_SSH_PORT, DockerHost, HostResolver};
pub use ident::{IdentCapture, ServerIdent};
pub use russh_session::RusshSession;

/// Duplex byte stream carried by an open SSH channel.
pub trait ChannelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChannelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed channel stream handed out by [`SshSession::open_channel`].
pub type ChannelIo = Box<dyn ChannelStream>;

/// Boxed future type returned by [`SshSession::open_channel`].
pub type OpenChannelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChannelIo, SshError>> + Send + 'a>>;

/// Boxed future type returned by [`SshSession::exec`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecOutput, SshError>> + Send + 'a>>;

/// A channel of a named kind, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// A `direct-tcpip` forward to a TCP endpoint on the remote host.
    DirectTcp {
        /// Host the server should connect to.
        host: String,
        /// Port the server should connect to.
        port: u16,
    },
    /// A `direct-streamlocal@openssh.com` forward to a Unix socket.
    DirectStreamLocal {
        /// Path of the socket on the remote host.
        socket_path: String,
    },
    /// A session channel running a command whose stdio is the stream.
    Exec {
        /// The command line passed to the remote shell.
        command: String,
    },
}

impl fmt::Display for ChannelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectTcp { host, port } if host.contains(':') => {
                write!(f, "direct-tcpip [{host}]:{port}")
            }
            Self::DirectTcp { host, port } => write!(f, "direct-tcpip {host}:{port}"),
            Self::DirectStreamLocal { socket_path } => {
                write!(f, "direct-streamlocal {socket_path}")
            }
            Self::Exec { command } => write!(f, "exec {command}"),
        }
    }
}

/// Output collected from one remote command round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output, decoded lossily as UTF-8.
    pub stdout: String,
    /// Standard error, decoded lossily as UTF-8.
    pub stderr: String,
    /// Exit status, when the server reported one.
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Returns true when the command reported exit status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_status, Some(0))
    }

    /// The exit status rendered for error messages.
    #[must_use]
    pub fn status_label(&self) -> String {
        self.exit_status
            .map_or_else(|| String::from("unknown"), |status| status.to_string())
    }
}

/// Behaviour required from an authenticated SSH session.
///
/// Implementations must allow several channels to be open at once, so that
/// distinct tunnels over one session stay independent.
pub trait SshSession: Send + Sync {
    /// The identification string the server sent during the handshake.
    fn server_version(&self) -> String;

    /// Open a channel of the requested kind.
    fn open_channel(&self, request: &ChannelRequest) -> OpenChannelFuture<'_>;

    /// Run one command to completion and collect its output.
    fn exec(&self, command: &str) -> ExecFuture<'_>;
}
