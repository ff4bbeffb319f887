//! Step definitions for tunnel strategy selection scenarios.

use dockerssh::config::TunnelConfig;
use dockerssh::tunnel::{TunnelStrategy, dial_stdio_command, select_strategy};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, then, when};

/// Step result type for BDD tests, using a static string for errors.
pub type StepResult<T> = Result<T, &'static str>;

/// State shared across selection scenarios.
#[derive(Default, ScenarioState)]
pub struct SelectionState {
    /// The configuration under test.
    config: Slot<TunnelConfig>,
    /// The strategy chosen by the selector.
    strategy: Slot<TunnelStrategy>,
}

/// Fixture providing a fresh selection state.
#[fixture]
pub fn selection_state() -> SelectionState {
    SelectionState::default()
}

fn current_config(state: &SelectionState) -> StepResult<TunnelConfig> {
    state.config.get().ok_or("configuration should be set")
}

fn selected(state: &SelectionState) -> StepResult<TunnelStrategy> {
    state.strategy.get().ok_or("strategy should be selected")
}

#[given("a default tunnel configuration")]
#[expect(
    clippy::unnecessary_wraps,
    reason = "rstest-bdd step functions must return StepResult for consistency"
)]
fn default_configuration(selection_state: &SelectionState) -> StepResult<()> {
    selection_state.config.set(TunnelConfig::default());
    Ok(())
}

#[given("the helper container is requested")]
fn helper_requested(selection_state: &SelectionState) -> StepResult<()> {
    let config = current_config(selection_state)?;
    selection_state.config.set(config.with_helper(None));
    Ok(())
}

#[given("TCP forwarding is requested on port {port}")]
fn tcp_requested(selection_state: &SelectionState, port: String) -> StepResult<()> {
    let parsed = port.parse::<u16>().map_err(|_| "port should be a number")?;
    let config = current_config(selection_state)?;
    selection_state.config.set(config.with_tcp(Some(parsed)));
    Ok(())
}

#[given("the socket {path} is requested")]
fn socket_requested(selection_state: &SelectionState, path: String) -> StepResult<()> {
    let config = current_config(selection_state)?;
    selection_state.config.set(config.with_socket(path));
    Ok(())
}

#[given("the remote environment is sourced from {file}")]
fn environment_sourced(selection_state: &SelectionState, file: String) -> StepResult<()> {
    let config = current_config(selection_state)?;
    selection_state.config.set(config.with_source_file(file));
    Ok(())
}

#[when("the strategy is selected for server {version}")]
fn strategy_selected(selection_state: &SelectionState, version: String) -> StepResult<()> {
    let config = current_config(selection_state)?;
    selection_state
        .strategy
        .set(select_strategy(&config, &version));
    Ok(())
}

#[then("the selected strategy is {name}")]
fn selected_strategy_is(selection_state: &SelectionState, name: String) -> StepResult<()> {
    let strategy = selected(selection_state)?;
    assert_eq!(
        strategy.to_string(),
        name,
        "Expected strategy '{name}', got {strategy:?}"
    );
    Ok(())
}

#[then("the forwarded port is {port}")]
fn forwarded_port_is(selection_state: &SelectionState, port: String) -> StepResult<()> {
    let expected = port.parse::<u16>().map_err(|_| "port should be a number")?;
    let TunnelStrategy::DirectTcp { port: actual } = selected(selection_state)? else {
        return Err("strategy should be direct TCP");
    };
    assert_eq!(actual, expected);
    Ok(())
}

#[then("a helper container is needed")]
fn helper_needed(selection_state: &SelectionState) -> StepResult<()> {
    assert!(selected(selection_state)?.requires_helper());
    Ok(())
}

#[then("no helper container is needed")]
fn helper_not_needed(selection_state: &SelectionState) -> StepResult<()> {
    assert!(!selected(selection_state)?.requires_helper());
    Ok(())
}

#[then("the dialer command sources {file}")]
fn dialer_sources(selection_state: &SelectionState, file: String) -> StepResult<()> {
    let TunnelStrategy::ExecDialer { source_file } = selected(selection_state)? else {
        return Err("strategy should be the stdio dialer");
    };
    assert_eq!(source_file.as_deref(), Some(file.as_str()));
    assert_eq!(
        dial_stdio_command(source_file.as_deref()),
        format!(" source {file} && docker system dial-stdio")
    );
    Ok(())
}
