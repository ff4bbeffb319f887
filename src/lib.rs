//! Container engine transport over SSH.
//!
//! `dockerssh` lets an HTTP client for a Docker-compatible engine reach a
//! remote daemon through an already authenticated SSH session. It hands the
//! client a [`TunnelSocket`] whose input and output streams carry the engine
//! protocol through one SSH channel.
//!
//! # Strategies
//!
//! Each connect picks exactly one way of reaching the engine:
//!
//! - direct TCP forwarding to the engine's loopback listener;
//! - a helper container bridging the engine socket to a published TCP port,
//!   used when Unix sockets cannot be forwarded (Windows servers) or when
//!   requested explicitly;
//! - direct forwarding of the engine's Unix socket;
//! - the engine's `docker system dial-stdio` command.
//!
//! # Modules
//!
//! - [`config`]: Layered configuration (env > file > defaults)
//! - [`error`]: Semantic error types
//! - [`ssh`]: The SSH session seam and its `russh` implementation
//! - [`tunnel`]: Strategy selection, helper bootstrap, channel wiring and the
//!   socket facade

pub mod config;
pub mod error;
pub mod ssh;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::{DockerSshError, Result};
pub use ssh::{ChannelRequest, SshSession};
pub use tunnel::{SocketPhase, TunnelSocket, TunnelStrategy};
