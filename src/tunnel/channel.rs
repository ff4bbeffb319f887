//! Channel wiring: one SSH channel exposed as a pair of byte streams.
//!
//! A [`TunnelChannel`] hands out its client streams as soon as it is opened.
//! They are the ends of an in-memory pipe; once [`TunnelChannel::connect`]
//! has opened the SSH channel, a pump task relays bytes between the pipe and
//! the channel. Disconnecting stops the pump, so a reader blocked on the
//! input stream sees end of file instead of hanging.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::helper::HelperContainer;
use super::strategy::{LOOPBACK_ADDRESS, TunnelStrategy, dial_stdio_command};
use crate::error::TunnelError;
use crate::ssh::{ChannelIo, ChannelRequest, SshSession};

/// Capacity of the in-memory pipe between the client and the pump.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Time allowed for the SSH side to acknowledge shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Read half handed to the client: bytes arriving from the engine.
pub type TunnelReader = ReadHalf<DuplexStream>;

/// Write half handed to the client: bytes sent to the engine.
pub type TunnelWriter = WriteHalf<DuplexStream>;

/// Connectivity flags shared between a channel, its pump and its owner.
#[derive(Debug, Default)]
pub struct ChannelStatus {
    connected: AtomicBool,
    closed: AtomicBool,
}

impl ChannelStatus {
    /// Returns true while the channel is open and has not been closed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.is_closed()
    }

    /// Returns true once the channel has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }
}

/// The SSH channel backing a tunnel socket.
#[derive(Debug)]
pub struct TunnelChannel {
    request: ChannelRequest,
    input: Option<TunnelReader>,
    output: Option<TunnelWriter>,
    pump_end: Option<DuplexStream>,
    status: Arc<ChannelStatus>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl TunnelChannel {
    /// Prepare the channel for a strategy without touching the network.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::HelperNotStarted` for the helper strategy when no
    /// helper container is supplied.
    pub fn open(
        strategy: &TunnelStrategy,
        helper: Option<&HelperContainer>,
        status: Arc<ChannelStatus>,
    ) -> Result<Self, TunnelError> {
        let request = channel_request(strategy, helper)?;
        let (client_end, pump_end) = tokio::io::duplex(PIPE_CAPACITY);
        let (input, output) = tokio::io::split(client_end);
        debug!(strategy = %strategy, channel = %request, "prepared tunnel channel");
        Ok(Self {
            request,
            input: Some(input),
            output: Some(output),
            pump_end: Some(pump_end),
            status,
            cancel: CancellationToken::new(),
            pump: None,
        })
    }

    /// The channel request this tunnel opens.
    #[must_use]
    pub const fn request(&self) -> &ChannelRequest {
        &self.request
    }

    /// Take the stream carrying bytes from the engine. Yields once.
    pub const fn input_stream(&mut self) -> Option<TunnelReader> {
        self.input.take()
    }

    /// Take the stream carrying bytes to the engine. Yields once.
    pub const fn output_stream(&mut self) -> Option<TunnelWriter> {
        self.output.take()
    }

    /// Open the SSH channel and start relaying bytes.
    ///
    /// A zero `timeout` waits for the channel indefinitely; otherwise only the
    /// open handshake is bounded, never the stream that follows.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::InvalidState` when the channel was already
    /// connected or disconnected, `TunnelError::ConnectTimeout` when the
    /// bound elapses, and `TunnelError::OpenFailed` wrapping the SSH failure
    /// otherwise.
    pub async fn connect<S>(&mut self, session: &S, timeout: Duration) -> Result<(), TunnelError>
    where
        S: SshSession + ?Sized,
    {
        let Some(pump_end) = self.pump_end.take() else {
            return Err(TunnelError::InvalidState {
                operation: "connect",
                phase: String::from(if self.is_closed() {
                    "closed"
                } else {
                    "connected"
                }),
            });
        };

        let open = session.open_channel(&self.request);
        let opened = if timeout.is_zero() {
            open.await
        } else {
            tokio::time::timeout(timeout, open)
                .await
                .map_err(|_| TunnelError::ConnectTimeout {
                    target: self.request.to_string(),
                    millis: timeout.as_millis(),
                })?
        };
        let remote = opened.map_err(|source| TunnelError::OpenFailed {
            target: self.request.to_string(),
            source,
        })?;

        self.status.mark_connected();
        debug!(channel = %self.request, "tunnel channel connected");
        self.pump = Some(tokio::spawn(relay(
            pump_end,
            remote,
            self.cancel.clone(),
            Arc::clone(&self.status),
            self.request.to_string(),
        )));
        Ok(())
    }

    /// Returns true while the SSH channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Returns true once the channel has been closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    /// Stop relaying, shut the SSH stream down and mark the channel closed.
    ///
    /// Calling this more than once, or before `connect`, is harmless.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        self.pump_end = None;
        if let Some(pump) = self.pump.take()
            && let Err(error) = pump.await
        {
            warn!(channel = %self.request, error = %error, "tunnel pump ended abnormally");
        }
        self.status.mark_closed();
    }
}

impl Drop for TunnelChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the channel request for a strategy.
fn channel_request(
    strategy: &TunnelStrategy,
    helper: Option<&HelperContainer>,
) -> Result<ChannelRequest, TunnelError> {
    let request = match strategy {
        TunnelStrategy::DirectTcp { port } => ChannelRequest::DirectTcp {
            host: String::from(LOOPBACK_ADDRESS),
            port: *port,
        },
        TunnelStrategy::DirectStreamLocal { socket_path } => ChannelRequest::DirectStreamLocal {
            socket_path: socket_path.clone(),
        },
        TunnelStrategy::HelperForward { .. } => helper
            .ok_or(TunnelError::HelperNotStarted)?
            .channel_request(),
        TunnelStrategy::ExecDialer { source_file } => ChannelRequest::Exec {
            command: dial_stdio_command(source_file.as_deref()),
        },
    };
    Ok(request)
}

/// Relay bytes between the client pipe and the SSH channel until either side
/// finishes or a disconnect is requested.
async fn relay(
    mut local: DuplexStream,
    mut remote: ChannelIo,
    cancel: CancellationToken,
    status: Arc<ChannelStatus>,
    channel: String,
) {
    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut local, &mut remote) => match result {
            Ok((sent, received)) => {
                debug!(channel = %channel, sent, received, "tunnel stream finished");
            }
            Err(error) => debug!(channel = %channel, error = %error, "tunnel stream failed"),
        },
        () = cancel.cancelled() => debug!(channel = %channel, "tunnel disconnect requested"),
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, remote.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(channel = %channel, error = %error, "SSH stream shutdown failed"),
        Err(_) => debug!(channel = %channel, "SSH stream shutdown timed out"),
    }
    status.mark_closed();
}
