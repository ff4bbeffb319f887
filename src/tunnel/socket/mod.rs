//! Transport facade: the socket handed to the HTTP client layer.
//!
//! [`TunnelSocket`] composes strategy selection, the optional helper
//! container and the channel into one object with socket-like semantics.
//! `connect` and `close` are serialised; the stream halves and the status
//! queries never wait on them, so a close issued from another task ends an
//! in-flight read instead of queueing behind it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::channel::{ChannelStatus, TunnelChannel, TunnelReader, TunnelWriter};
use super::helper::{HelperContainer, HelperLease, HelperRequest, start_helper};
use super::strategy::{TunnelStrategy, select_strategy};
use crate::config::TunnelConfig;
use crate::error::{DockerSshError, Result, TunnelError};
use crate::ssh::SshSession;

/// Lifecycle phase of a [`TunnelSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPhase {
    /// Created, `connect` not yet called.
    Unconnected,
    /// `connect` in progress.
    Connecting,
    /// The tunnel is open.
    Connected,
    /// Closed, or a connect attempt failed.
    Closed,
}

impl fmt::Display for SocketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Resources mutated by `connect` and `close`.
#[derive(Debug, Default)]
struct Resources {
    channel: Option<TunnelChannel>,
    lease: Option<HelperLease>,
}

/// State readable without waiting for `connect` or `close`.
#[derive(Debug)]
struct View {
    phase: SocketPhase,
    strategy: Option<TunnelStrategy>,
    helper: Option<HelperContainer>,
    input: Option<TunnelReader>,
    output: Option<TunnelWriter>,
}

/// A socket tunnelled through an SSH session to the container engine.
pub struct TunnelSocket<S: SshSession + ?Sized> {
    session: Arc<S>,
    config: TunnelConfig,
    status: Arc<ChannelStatus>,
    resources: tokio::sync::Mutex<Resources>,
    view: parking_lot::Mutex<View>,
}

impl<S: SshSession + ?Sized> TunnelSocket<S> {
    /// Create an unconnected socket over a shared session.
    #[must_use]
    pub fn new(session: Arc<S>, config: TunnelConfig) -> Self {
        Self {
            session,
            config,
            status: Arc::new(ChannelStatus::default()),
            resources: tokio::sync::Mutex::new(Resources::default()),
            view: parking_lot::Mutex::new(View {
                phase: SocketPhase::Unconnected,
                strategy: None,
                helper: None,
                input: None,
                output: None,
            }),
        }
    }

    /// Create a socket and connect it in one step.
    ///
    /// # Errors
    ///
    /// Returns any error reported by [`TunnelSocket::connect`].
    pub async fn open(session: Arc<S>, config: TunnelConfig, timeout: Duration) -> Result<Self> {
        let socket = Self::new(session, config);
        socket.connect(timeout).await?;
        Ok(socket)
    }

    /// Select a strategy, start a helper if one is needed, and open the
    /// tunnel.
    ///
    /// A zero `timeout` waits for the channel indefinitely. The helper round
    /// trips are bounded separately by the configured helper timeout. On
    /// failure any helper already started is removed and the socket is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::InvalidState` unless the socket is unconnected,
    /// `ConfigError` when the configuration is invalid, `HelperStartError`
    /// when the helper cannot be started, and `TunnelError` when the channel
    /// cannot be opened.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let mut resources = self.resources.lock().await;
        self.begin_connect()?;

        match self.establish(&mut resources, timeout).await {
            Ok(()) => {
                self.set_phase(SocketPhase::Connected);
                info!(strategy = ?self.strategy(), "tunnel connected");
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "tunnel connect failed");
                self.roll_back(&mut resources).await;
                Err(error)
            }
        }
    }

    /// Close the tunnel.
    ///
    /// The helper, if any, is removed first; the channel is disconnected even
    /// when that fails, and the removal failure is returned afterwards.
    /// Closing an already closed socket does nothing.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` wrapping the `HelperStopError` when the helper
    /// could not be removed.
    pub async fn close(&self) -> io::Result<()> {
        let mut resources = self.resources.lock().await;

        let stopped = match resources.lease.take() {
            Some(lease) => lease.release(self.session.as_ref()).await,
            None => Ok(()),
        };
        if let Err(error) = &stopped {
            warn!(error = %error, "helper removal failed; disconnecting tunnel anyway");
        }

        if let Some(channel) = resources.channel.as_mut() {
            channel.disconnect().await;
        }
        self.status.mark_closed();
        self.finish_close();
        debug!("tunnel closed");

        stopped.map_err(|error| io::Error::from(DockerSshError::from(error)))
    }

    /// Take the stream carrying bytes from the engine. Yields once, after a
    /// successful connect.
    #[must_use]
    pub fn input_stream(&self) -> Option<TunnelReader> {
        self.view.lock().input.take()
    }

    /// Take the stream carrying bytes to the engine. Yields once, after a
    /// successful connect.
    #[must_use]
    pub fn output_stream(&self) -> Option<TunnelWriter> {
        self.view.lock().output.take()
    }

    /// Returns true while the tunnel channel is open. False before connect.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Returns true once the socket or its channel has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status.is_closed() || self.phase() == SocketPhase::Closed
    }

    /// The current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SocketPhase {
        self.view.lock().phase
    }

    /// The strategy chosen by the last connect attempt.
    #[must_use]
    pub fn strategy(&self) -> Option<TunnelStrategy> {
        self.view.lock().strategy.clone()
    }

    /// The helper container in use, if the strategy needed one.
    #[must_use]
    pub fn helper(&self) -> Option<HelperContainer> {
        self.view.lock().helper.clone()
    }

    /// Read timeout the HTTP layer should apply, if configured.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        self.config.read_timeout()
    }

    /// The configuration this socket was created with.
    #[must_use]
    pub const fn config(&self) -> &TunnelConfig {
        &self.config
    }

    fn begin_connect(&self) -> Result<()> {
        let mut view = self.view.lock();
        if view.phase != SocketPhase::Unconnected {
            return Err(TunnelError::InvalidState {
                operation: "connect",
                phase: view.phase.to_string(),
            }
            .into());
        }
        view.phase = SocketPhase::Connecting;
        Ok(())
    }

    async fn establish(&self, resources: &mut Resources, timeout: Duration) -> Result<()> {
        self.config.validate()?;
        let strategy = select_strategy(&self.config, &self.session.server_version());
        self.view.lock().strategy = Some(strategy.clone());

        let helper = if strategy.requires_helper() {
            let request = HelperRequest::from_config(&self.config);
            let container = start_helper(self.session.as_ref(), &request).await?;
            resources.lease = Some(HelperLease::new(container.clone(), &request));
            self.view.lock().helper = Some(container.clone());
            Some(container)
        } else {
            None
        };

        let mut channel = TunnelChannel::open(&strategy, helper.as_ref(), Arc::clone(&self.status))?;
        {
            let mut view = self.view.lock();
            view.input = channel.input_stream();
            view.output = channel.output_stream();
        }
        resources
            .channel
            .insert(channel)
            .connect(self.session.as_ref(), timeout)
            .await?;
        Ok(())
    }

    /// Undo a failed connect: remove the helper, then drop the channel.
    async fn roll_back(&self, resources: &mut Resources) {
        if let Some(lease) = resources.lease.take()
            && let Err(error) = lease.release(self.session.as_ref()).await
        {
            warn!(error = %error, "failed to remove helper after connect failure");
        }
        if let Some(channel) = resources.channel.as_mut() {
            channel.disconnect().await;
        }
        self.status.mark_closed();
        self.finish_close();
    }

    fn set_phase(&self, phase: SocketPhase) {
        self.view.lock().phase = phase;
    }

    fn finish_close(&self) {
        let mut view = self.view.lock();
        view.phase = SocketPhase::Closed;
        view.helper = None;
        view.input = None;
        view.output = None;
    }
}

impl<S: SshSession + ?Sized> fmt::Debug for TunnelSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSocket")
            .field("phase", &self.phase())
            .field("strategy", &self.strategy())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
