//! [`SshSession`] implementation backed by a `russh` client handle.

use std::sync::Arc;

use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::net::TcpStream;
use tracing::debug;

use super::{
    ChannelIo, ChannelRequest, DockerHost, ExecFuture, ExecOutput, IdentCapture,
    OpenChannelFuture, SshSession,
};
use crate::error::SshError;

/// Originator reported to the server for forwarded channels.
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";

/// Extended data stream number carrying standard error.
const STDERR_STREAM: u32 = 1;

/// An SSH session driven by `russh`.
///
/// Authentication is left to the caller: obtain the session with
/// [`RusshSession::handshake`], authenticate through
/// [`RusshSession::handle_mut`], then share it with tunnels through an `Arc`.
pub struct RusshSession<H: client::Handler> {
    handle: Handle<H>,
    server_version: String,
}

impl<H> RusshSession<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    /// Wrap an existing handle whose identification string is already known.
    #[must_use]
    pub const fn from_handle(handle: Handle<H>, server_version: String) -> Self {
        Self {
            handle,
            server_version,
        }
    }

    /// Dial the host, run the SSH handshake and record the server
    /// identification line.
    ///
    /// # Errors
    ///
    /// Returns `SshError::ConnectFailed` when the TCP connection cannot be
    /// established and `SshError::HandshakeFailed` when the SSH handshake or
    /// host key check fails.
    pub async fn handshake(
        config: Arc<client::Config>,
        host: &DockerHost,
        handler: H,
    ) -> Result<Self, SshError> {
        let address = host.address();
        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|e| SshError::ConnectFailed {
                host: address.clone(),
                message: e.to_string(),
            })?;
        let (stream, ident) = IdentCapture::new(tcp);

        let handle = client::connect_stream(config, stream, handler)
            .await
            .map_err(|e| SshError::HandshakeFailed {
                message: format!("{e:?}"),
            })?;

        let server_version = ident.get().unwrap_or_default();
        debug!(host = %address, server_version = %server_version, "SSH handshake complete");
        Ok(Self::from_handle(handle, server_version))
    }

    /// The underlying handle, for authentication and other requests.
    pub const fn handle_mut(&mut self) -> &mut Handle<H> {
        &mut self.handle
    }

    /// Returns true once the connection to the server has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Politely end the session.
    ///
    /// # Errors
    ///
    /// Returns `SshError::HandshakeFailed` if the disconnect message cannot be
    /// sent.
    pub async fn disconnect(&self) -> Result<(), SshError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| SshError::HandshakeFailed {
                message: e.to_string(),
            })
    }

    async fn open(&self, request: &ChannelRequest) -> Result<ChannelIo, russh::Error> {
        let channel = match request {
            ChannelRequest::DirectTcp { host, port } => {
                self.handle
                    .channel_open_direct_tcpip(
                        host.as_str(),
                        u32::from(*port),
                        ORIGINATOR_ADDRESS,
                        0,
                    )
                    .await?
            }
            ChannelRequest::DirectStreamLocal { socket_path } => {
                self.handle
                    .channel_open_direct_streamlocal(socket_path.as_str())
                    .await?
            }
            ChannelRequest::Exec { command } => {
                let session = self.handle.channel_open_session().await?;
                session.exec(true, command.as_str()).await?;
                session
            }
        };
        Ok(Box::new(channel.into_stream()))
    }
}

impl<H> SshSession for RusshSession<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    fn server_version(&self) -> String {
        self.server_version.clone()
    }

    fn open_channel(&self, request: &ChannelRequest) -> OpenChannelFuture<'_> {
        let request_owned = request.clone();
        Box::pin(async move {
            debug!(request = %request_owned, "opening SSH channel");
            self.open(&request_owned)
                .await
                .map_err(|e| SshError::ChannelOpenFailed {
                    request: request_owned.to_string(),
                    message: e.to_string(),
                })
        })
    }

    fn exec(&self, command: &str) -> ExecFuture<'_> {
        let command_owned = String::from(command);
        Box::pin(async move {
            let failed = |e: russh::Error| SshError::ExecFailed {
                command: command_owned.clone(),
                message: e.to_string(),
            };
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(failed)?;
            channel
                .exec(true, command_owned.as_str())
                .await
                .map_err(failed)?;
            Ok(collect_output(&mut channel).await)
        })
    }
}

/// Drain an exec channel until the server closes it.
///
/// The exit status may arrive before or after EOF, so messages are read until
/// the channel yields nothing more.
async fn collect_output(channel: &mut Channel<Msg>) -> ExecOutput {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    while let Some(message) = channel.wait().await {
        match message {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } if ext == STDERR_STREAM => {
                stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus {
                exit_status: status,
            } => exit_status = Some(status),
            _ => {}
        }
    }

    ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    }
}
