//! Step definitions for tunnel socket lifecycle scenarios.

mod fake_session;

use std::sync::Arc;
use std::time::Duration;

use dockerssh::error::{DockerSshError, TunnelError};
use dockerssh::ssh::ChannelRequest;
use dockerssh::tunnel::{TunnelReader, TunnelWriter};
use dockerssh::{TunnelConfig, TunnelSocket};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, then, when};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;

pub use fake_session::FakeSession;

/// Step result type for BDD tests.
pub type StepResult<T> = Result<T, String>;

/// Outcome of the most recent connect attempt.
#[derive(Clone, Debug)]
pub enum ConnectOutcome {
    /// The tunnel opened.
    Connected,
    /// The channel could not be opened.
    OpenFailed,
    /// The socket was not in a connectable phase.
    Rejected(String),
    /// Any other failure.
    Failed(String),
}

/// State shared across lifecycle scenarios.
#[derive(Default, ScenarioState)]
pub struct LifecycleState {
    runtime: Slot<Arc<Runtime>>,
    session: Slot<Arc<FakeSession>>,
    socket: Slot<Arc<TunnelSocket<FakeSession>>>,
    outcome: Slot<ConnectOutcome>,
    received: Slot<String>,
    reader: Slot<TunnelReader>,
    writer: Slot<TunnelWriter>,
}

/// Fixture providing a fresh lifecycle state.
#[fixture]
pub fn lifecycle_state() -> LifecycleState {
    LifecycleState::default()
}

fn runtime(state: &LifecycleState) -> StepResult<Arc<Runtime>> {
    if let Some(existing) = state.runtime.get() {
        return Ok(existing);
    }
    let created = Arc::new(Runtime::new().map_err(|e| format!("runtime: {e}"))?);
    state.runtime.set(Arc::clone(&created));
    Ok(created)
}

fn session(state: &LifecycleState) -> StepResult<Arc<FakeSession>> {
    state
        .session
        .get()
        .ok_or_else(|| String::from("session should be set"))
}

fn socket(state: &LifecycleState) -> StepResult<Arc<TunnelSocket<FakeSession>>> {
    if let Some(existing) = state.socket.get() {
        return Ok(existing);
    }
    let created = Arc::new(TunnelSocket::new(session(state)?, TunnelConfig::default()));
    state.socket.set(Arc::clone(&created));
    Ok(created)
}

fn classify(error: &DockerSshError) -> ConnectOutcome {
    match error {
        DockerSshError::Tunnel(TunnelError::OpenFailed { .. }) => ConnectOutcome::OpenFailed,
        DockerSshError::Tunnel(TunnelError::InvalidState { phase, .. }) => {
            ConnectOutcome::Rejected(phase.clone())
        }
        other => ConnectOutcome::Failed(other.to_string()),
    }
}

#[given("a Linux SSH server")]
#[expect(
    clippy::unnecessary_wraps,
    reason = "rstest-bdd step functions must return StepResult for consistency"
)]
fn linux_server(lifecycle_state: &LifecycleState) -> StepResult<()> {
    lifecycle_state.session.set(Arc::new(FakeSession::linux()));
    Ok(())
}

#[given("a Windows SSH server publishing the helper on port {port}")]
fn windows_server(lifecycle_state: &LifecycleState, port: String) -> StepResult<()> {
    let parsed = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{port}': {e}"))?;
    lifecycle_state
        .session
        .set(Arc::new(FakeSession::windows(parsed)));
    Ok(())
}

#[given("the server refuses channels")]
fn server_refuses_channels(lifecycle_state: &LifecycleState) -> StepResult<()> {
    session(lifecycle_state)?.refuse_channels();
    Ok(())
}

#[when("the socket connects")]
fn socket_connects(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let rt = runtime(lifecycle_state)?;
    let target = socket(lifecycle_state)?;
    let outcome = match rt.block_on(target.connect(Duration::from_secs(5))) {
        Ok(()) => ConnectOutcome::Connected,
        Err(error) => classify(&error),
    };
    lifecycle_state.outcome.set(outcome);
    Ok(())
}

#[when("the socket closes")]
fn socket_closes(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let rt = runtime(lifecycle_state)?;
    let target = socket(lifecycle_state)?;
    rt.block_on(target.close())
        .map_err(|e| format!("close failed: {e}"))
}

#[when("the client sends {text}")]
fn client_sends(lifecycle_state: &LifecycleState, text: String) -> StepResult<()> {
    let rt = runtime(lifecycle_state)?;
    let target = socket(lifecycle_state)?;
    let mut output = match lifecycle_state.writer.take() {
        Some(held) => held,
        None => target
            .output_stream()
            .ok_or_else(|| String::from("output stream should be available"))?,
    };
    let mut input = match lifecycle_state.reader.take() {
        Some(held) => held,
        None => target
            .input_stream()
            .ok_or_else(|| String::from("input stream should be available"))?,
    };
    let received = rt.block_on(async {
        output.write_all(text.as_bytes()).await?;
        let mut buffer = vec![0_u8; text.len()];
        input.read_exact(&mut buffer).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&buffer).into_owned())
    });
    // Dropping both halves would end the tunnel, so the scenario keeps them.
    lifecycle_state.writer.set(output);
    lifecycle_state.reader.set(input);
    lifecycle_state
        .received
        .set(received.map_err(|e| format!("relay failed: {e}"))?);
    Ok(())
}

#[then("the client receives {text}")]
fn client_receives(lifecycle_state: &LifecycleState, text: String) -> StepResult<()> {
    let received = lifecycle_state
        .received
        .get()
        .ok_or_else(|| String::from("nothing was received"))?;
    assert_eq!(received, text);
    Ok(())
}

#[then("the channel targets {address}")]
fn channel_targets(lifecycle_state: &LifecycleState, address: String) -> StepResult<()> {
    let channels = session(lifecycle_state)?.channels();
    let Some(ChannelRequest::DirectTcp { host, port }) = channels.first() else {
        return Err(format!("expected a direct TCP channel, got {channels:?}"));
    };
    assert_eq!(format!("{host}:{port}"), address);
    Ok(())
}

#[then("the helper container was removed {count} time")]
fn helper_removed(lifecycle_state: &LifecycleState, count: String) -> StepResult<()> {
    let expected = count
        .parse::<usize>()
        .map_err(|e| format!("invalid count '{count}': {e}"))?;
    assert_eq!(session(lifecycle_state)?.removals(), expected);
    Ok(())
}

#[then("no remote commands were run")]
fn no_remote_commands(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let commands = session(lifecycle_state)?.commands();
    assert!(commands.is_empty(), "unexpected commands: {commands:?}");
    Ok(())
}

#[then("the connect fails to open the tunnel")]
fn connect_fails_to_open(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let outcome = lifecycle_state
        .outcome
        .get()
        .ok_or_else(|| String::from("connect should have been attempted"))?;
    assert!(
        matches!(outcome, ConnectOutcome::OpenFailed),
        "unexpected outcome: {outcome:?}"
    );
    Ok(())
}

#[then("the connect is rejected as closed")]
fn connect_rejected(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let outcome = lifecycle_state
        .outcome
        .get()
        .ok_or_else(|| String::from("connect should have been attempted"))?;
    assert!(
        matches!(outcome, ConnectOutcome::Rejected(ref phase) if phase == "closed"),
        "unexpected outcome: {outcome:?}"
    );
    Ok(())
}

#[then("the socket is connected")]
fn socket_is_connected(lifecycle_state: &LifecycleState) -> StepResult<()> {
    assert!(socket(lifecycle_state)?.is_connected());
    Ok(())
}

#[then("the socket is closed")]
fn socket_is_closed(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let target = socket(lifecycle_state)?;
    assert!(target.is_closed());
    assert!(!target.is_connected());
    Ok(())
}
