//! SSH tunnel to the container engine.
//!
//! The pieces, in the order a connect uses them:
//!
//! - [`strategy`] picks how the engine is reached;
//! - [`helper`] starts the bridging container when the strategy needs one;
//! - [`channel`] opens the SSH channel and exposes it as byte streams;
//! - [`socket`] composes them behind a socket-like facade.

pub mod channel;
pub mod helper;
pub mod socket;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use channel::{ChannelStatus, TunnelChannel, TunnelReader, TunnelWriter};
pub use helper::{HelperContainer, HelperLease, HelperRequest, start_helper, stop_helper};
pub use socket::{SocketPhase, TunnelSocket};
pub use strategy::{TunnelStrategy, dial_stdio_command, select_strategy};
