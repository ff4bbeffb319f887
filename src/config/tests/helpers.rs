//! Shared fixtures and helper functions for config tests.

use std::sync::Arc;

use mockable::MockEnv;
use ortho_config::MergeComposer;
use rstest::fixture;

use crate::config::TunnelConfig;

/// Fixture providing a `TunnelConfig` parsed from a full TOML example.
#[fixture]
pub fn tunnel_config_from_full_toml() -> TunnelConfig {
    let toml = r#"
        docker_host = "ssh://deploy@build-host:2222"
        use_tcp = false
        use_socket = true
        socket_path = "/run/docker.sock"
        use_helper = true
        helper_flags = "--memory 64m"
        helper_image = "registry.local/socat:1"
        source_file = "/etc/profile.d/docker.sh"
        connect_timeout_ms = 20000
        read_timeout_ms = 5000
        helper_timeout_ms = 15000
    "#;

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Fixture providing a `TunnelConfig` parsed from a minimal TOML example.
#[fixture]
pub fn tunnel_config_from_partial_toml() -> TunnelConfig {
    let toml = r"
        use_tcp = true
    ";

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Fixture providing a `MockEnv` that returns `None` for every variable.
#[fixture]
pub fn empty_env() -> MockEnv {
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    env
}

/// Helper: Builds a `MockEnv` answering from the given mappings.
pub fn env_with_vars(mappings: &[(&str, &str)]) -> MockEnv {
    let owned: Vec<(String, String)> = mappings
        .iter()
        .map(|(key, value)| (String::from(*key), String::from(*value)))
        .collect();
    let mut env = MockEnv::new();
    env.expect_string().returning(move |key| {
        owned
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    });
    env
}

/// Helper: Creates a `MergeComposer` with defaults layer already pushed.
pub fn create_composer_with_defaults() -> Result<MergeComposer, serde_json::Error> {
    let mut composer = MergeComposer::new();
    let defaults = ortho_config::serde_json::to_value(TunnelConfig::default())?;
    composer.push_defaults(defaults);
    Ok(composer)
}

/// Helper: Merges layers from a composer into `TunnelConfig`.
pub fn merge_config(
    composer: MergeComposer,
) -> Result<TunnelConfig, Arc<ortho_config::OrthoError>> {
    TunnelConfig::merge_from_layers(composer.layers())
}

/// Helper: Asserts that the selector flags all hold their defaults.
pub fn assert_selector_defaults(config: &TunnelConfig) {
    assert!(!config.use_tcp, "use_tcp should default to false");
    assert!(!config.use_socket, "use_socket should default to false");
    assert!(!config.use_helper, "use_helper should default to false");
    assert!(config.tcp_port.is_none(), "tcp_port should default to None");
}
