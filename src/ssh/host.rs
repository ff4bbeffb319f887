//! Resolution of the `ssh://` address of the engine host.
//!
//! The address comes from configuration first and then from the environment
//! variables container clients conventionally honour. Only `ssh://` values
//! are considered: a `unix://` or `tcp://` `DOCKER_HOST` describes a local
//! engine, which this transport has no business reaching.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::config::TunnelConfig;
use crate::error::ConfigError;

/// Environment variable names checked in fallback order after configuration.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Port used when an `ssh://` address does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

const SSH_SCHEME: &str = "ssh";
const SSH_PREFIX: &str = "ssh://";

/// A parsed `ssh://[user@]host[:port]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerHost {
    user: Option<String>,
    host: String,
    port: u16,
}

impl DockerHost {
    /// Parse an `ssh://` address.
    ///
    /// IPv6 literals must be bracketed (`ssh://[::1]:2222`). A trailing `/` is
    /// tolerated; any other path is rejected. Percent-escaped user names are
    /// decoded.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the address is not a URL, the
    /// scheme is not `ssh`, the host is empty, the user is empty, a password
    /// is present, the port is zero, or a path, query or fragment is present.
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let trimmed = address.trim();
        let url = Url::parse(trimmed).map_err(|error| rejected(address, &error.to_string()))?;
        if url.scheme() != SSH_SCHEME {
            return Err(rejected(address, "expected an ssh:// address"));
        }
        if !matches!(url.path(), "" | "/") {
            return Err(rejected(address, "paths are not supported"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(rejected(address, "queries and fragments are not supported"));
        }
        if url.password().is_some() {
            return Err(rejected(address, "passwords are not supported"));
        }

        let host = url
            .host_str()
            .map(|name| {
                name.strip_prefix('[')
                    .and_then(|inner| inner.strip_suffix(']'))
                    .unwrap_or(name)
            })
            .filter(|name| !name.is_empty())
            .ok_or_else(|| rejected(address, "host is empty"))?;

        let user = match url.username() {
            "" if names_empty_user(trimmed) => {
                return Err(rejected(address, "user name is empty"));
            }
            "" => None,
            encoded => Some(
                percent_decode_str(encoded)
                    .decode_utf8()
                    .map_err(|_| rejected(address, "user name is not valid UTF-8"))?
                    .into_owned(),
            ),
        };

        let port = match url.port() {
            Some(0) => return Err(rejected(address, "port must be between 1 and 65535")),
            Some(value) => value,
            None => DEFAULT_SSH_PORT,
        };

        Ok(Self {
            user,
            host: String::from(host),
            port,
        })
    }

    /// The user named in the address, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The host name or address, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The SSH port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` pair suitable for dialling.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for DockerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SSH_PREFIX)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.address())
    }
}

/// `ssh://@host` parses as an address without a user, so the empty user
/// is detected on the raw text.
fn names_empty_user(address: &str) -> bool {
    address
        .split_once("://")
        .is_some_and(|(_, authority)| authority.starts_with('@'))
}

fn rejected(address: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: String::from("docker_host"),
        reason: format!("{reason}: '{address}'"),
    }
}

/// Resolves the engine host address from configuration and environment.
///
/// # Type Parameters
///
/// * `E` - An environment provider implementing the `mockable::Env` trait,
///   allowing for testable environment variable access.
pub struct HostResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> HostResolver<'a, E> {
    /// Creates a new host resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves an `ssh://` address from fallback environment variables.
    ///
    /// Checks `DOCKER_HOST`, `CONTAINER_HOST` and `PODMAN_HOST` in order and
    /// returns the first value using the `ssh://` scheme.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .map(|value| String::from(value.trim()))
            .find(|value| value.starts_with(SSH_PREFIX))
    }

    /// Resolves and parses the engine host for a configuration.
    ///
    /// A non-blank `docker_host` in the configuration wins over the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingRequired` when no address is configured
    /// or present in the environment, and `ConfigError::InvalidValue` when the
    /// chosen address does not parse.
    pub fn resolve(&self, config: &TunnelConfig) -> Result<DockerHost, ConfigError> {
        let configured = config
            .docker_host
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from);

        let address = configured
            .or_else(|| self.resolve_from_env())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: String::from("docker_host"),
            })?;
        DockerHost::parse(&address)
    }
}
