//! Configuration loading with layered precedence.
//!
//! This module loads a [`TunnelConfig`] with the precedence order (lowest to
//! highest): application defaults, configuration file, environment variables.
//! Layers are composed manually with `MergeComposer` so that environment
//! values can be read through a `mockable::Env` and rejected when typed values
//! fail to parse, rather than silently falling back to defaults.
//!
//! # Environment Variable Handling
//!
//! String fields (e.g. `DOCKERSSH_SOCKET_PATH`) are always accepted. Typed
//! fields such as booleans (`DOCKERSSH_USE_TCP`) or integers
//! (`DOCKERSSH_TCP_PORT`) must carry valid values or loading fails.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};

use crate::config::TunnelConfig;
use crate::error::{ConfigError, Result};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "DOCKERSSH_CONFIG_PATH";

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Boolean value (`true`/`false`).
    Bool,
    /// TCP port in the range 1..=65535.
    Port,
    /// Unsigned 64-bit integer.
    U64,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    /// The environment variable name (e.g. `DOCKERSSH_USE_TCP`).
    env_var: &'static str,
    /// The configuration key the value is stored under.
    key: &'static str,
    /// The expected value type.
    var_type: EnvVarType,
}

/// Table of all environment variables and their configuration keys.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    EnvVarSpec {
        env_var: "DOCKERSSH_DOCKER_HOST",
        key: "docker_host",
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_USE_TCP",
        key: "use_tcp",
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_TCP_PORT",
        key: "tcp_port",
        var_type: EnvVarType::Port,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_USE_SOCKET",
        key: "use_socket",
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_SOCKET_PATH",
        key: "socket_path",
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_USE_HELPER",
        key: "use_helper",
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_HELPER_FLAGS",
        key: "helper_flags",
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_HELPER_IMAGE",
        key: "helper_image",
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_SOURCE_FILE",
        key: "source_file",
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_CONNECT_TIMEOUT_MS",
        key: "connect_timeout_ms",
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_READ_TIMEOUT_MS",
        key: "read_timeout_ms",
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "DOCKERSSH_HELPER_TIMEOUT_MS",
        key: "helper_timeout_ms",
        var_type: EnvVarType::U64,
    },
];

/// Returns the environment variable names recognised by the loader.
///
/// Tests use this to clear every `DOCKERSSH_*` variable without keeping a
/// second hard-coded list in sync.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
fn load_config_file(path: &Utf8Path, composer: &mut MergeComposer) -> Result<()> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| current_dir.as_path());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir
        .read_to_string(file_name)
        .map_err(|e| ConfigError::ParseError {
            message: format!("failed to read {path}: {e}"),
        })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    composer.push_file(value, Some(path.to_path_buf()));
    Ok(())
}

/// Pick the configuration file to load, if any.
///
/// An explicit path wins, then `DOCKERSSH_CONFIG_PATH`, then the first
/// existing dotfile or XDG candidate.
fn discover_config_path<E: mockable::Env>(
    env: &E,
    explicit: Option<&Utf8Path>,
) -> Option<Utf8PathBuf> {
    explicit
        .map(Utf8Path::to_path_buf)
        .or_else(|| {
            env.string(CONFIG_PATH_ENV)
                .filter(|value| !value.is_empty())
                .map(Utf8PathBuf::from)
        })
        .or_else(|| {
            let discovery = ConfigDiscovery::builder("dockerssh")
                .config_file_name("config.toml")
                .dotfile_name(".dockerssh.toml")
                .build();
            discovery
                .candidates()
                .into_iter()
                .filter(|p| p.exists())
                .find_map(|p| Utf8PathBuf::try_from(p).ok())
        })
}

/// Load tunnel configuration with full layer precedence.
///
/// 1. Application defaults
/// 2. Configuration file (explicit path, `DOCKERSSH_CONFIG_PATH`, or discovery)
/// 3. Environment variables prefixed with `DOCKERSSH_`
///
/// Later sources override earlier ones, and the merged result is validated.
///
/// # Errors
///
/// Returns `ConfigError` if the configuration file cannot be read or parsed,
/// a typed environment variable is malformed, the layers fail to merge, or the
/// merged configuration is invalid.
pub fn load_config<E: mockable::Env>(
    env: &E,
    config_path: Option<&Utf8Path>,
) -> Result<TunnelConfig> {
    let mut composer = MergeComposer::new();

    let defaults =
        serde_json::to_value(TunnelConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    if let Some(path) = discover_config_path(env, config_path) {
        load_config_file(&path, &mut composer)?;
    }

    let env_values = collect_env_vars(env)?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let config =
        TunnelConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;
    config.validate()?;
    Ok(config)
}

/// Collect `DOCKERSSH_*` environment variables into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed variable has an unparseable
/// value.
fn collect_env_vars<E: mockable::Env>(env: &E) -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Some(raw_value) = env.string(spec.env_var) else {
            continue;
        };
        let json_value = parse_env_value(spec, &raw_value)?;
        root.insert(spec.key.to_owned(), json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

fn parse_env_value(spec: &EnvVarSpec, raw_value: &str) -> Result<Value> {
    let rejected = |expected: &str| ConfigError::InvalidValue {
        field: spec.env_var.to_owned(),
        reason: format!("expected {expected}, got '{raw_value}'"),
    };

    let value = match spec.var_type {
        EnvVarType::String => Value::String(raw_value.to_owned()),
        EnvVarType::Bool => raw_value
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| rejected("bool (true/false)"))?,
        EnvVarType::Port => raw_value
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .map(|port| Value::Number(port.into()))
            .ok_or_else(|| rejected("port number (1-65535)"))?,
        EnvVarType::U64 => raw_value
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| rejected("unsigned integer"))?,
    };
    Ok(value)
}
