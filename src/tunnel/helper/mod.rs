//! Remote forwarder bootstrap.
//!
//! When a Unix socket cannot be forwarded directly, a short-lived helper
//! container on the remote engine bridges the socket to a TCP port published
//! on the remote loopback interface. The tunnel then forwards to that port.
//!
//! Each helper belongs to exactly one socket. It is started immediately before
//! the tunnel opens and removed when the socket closes, including when the
//! connect attempt fails part-way. [`HelperLease`] carries that ownership.

use std::time::Duration;

use tracing::{info, warn};

use super::strategy::{LOOPBACK_ADDRESS, with_source_prefix};
use crate::config::TunnelConfig;
use crate::error::{HelperStartError, HelperStopError, SshError};
use crate::ssh::{ChannelRequest, ExecOutput, SshSession};

/// Label attached to every helper so stray ones can be found by operators.
pub const HELPER_LABEL: &str = "dockerssh.helper=true";

/// Port the helper listens on inside its container.
pub const HELPER_PORT: u16 = 2375;

/// Engine message reported when removing a container that no longer exists.
const NOT_FOUND_MARKER: &str = "no such container";

/// A running helper container and the endpoint it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperContainer {
    id: String,
    address: String,
    port: u16,
}

impl HelperContainer {
    /// Describe a helper container.
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// The container identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The published address, as seen from the remote host.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The published port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The direct TCP forward reaching this helper.
    #[must_use]
    pub fn channel_request(&self) -> ChannelRequest {
        ChannelRequest::DirectTcp {
            host: self.address.clone(),
            port: self.port,
        }
    }
}

/// Everything needed to launch and later remove one helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperRequest {
    socket_path: String,
    image: String,
    flags: Option<String>,
    source_file: Option<String>,
    timeout: Duration,
}

impl HelperRequest {
    /// Build a request from the tunnel configuration.
    #[must_use]
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            image: config.helper_image.clone(),
            flags: config.helper_flags().map(String::from),
            source_file: config.source_file().map(String::from),
            timeout: config.helper_timeout(),
        }
    }

    /// The file sourced before each helper command, if any.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Bound applied to each helper round trip.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The remote command that launches the helper container.
    ///
    /// A detached `docker run` prints the new container id on stdout. No
    /// shell variables are used, so the command runs unchanged under POSIX
    /// shells, `cmd.exe` and PowerShell.
    #[must_use]
    pub fn launch_command(&self) -> String {
        let socket = shell_quote(&self.socket_path);
        let mut run = format!(
            "docker run -d --rm --label {HELPER_LABEL} -v {socket}:{socket} -p {LOOPBACK_ADDRESS}::{HELPER_PORT}"
        );
        if let Some(flags) = &self.flags {
            run.push(' ');
            run.push_str(flags);
        }
        run.push_str(&format!(
            " {} tcp-listen:{HELPER_PORT},fork,reuseaddr unix-connect:{socket}",
            shell_quote(&self.image)
        ));
        with_source_prefix(self.source_file(), &run)
    }

    /// The remote command that reports where a started helper is published.
    #[must_use]
    pub fn port_command(&self, container_id: &str) -> String {
        with_source_prefix(
            self.source_file(),
            &format!("docker port {} {HELPER_PORT}/tcp", shell_quote(container_id)),
        )
    }
}

/// Start a helper container and wait until its published port is known.
///
/// Two round trips are made: `docker run` yields the container id on its
/// last non-empty stdout line, then `docker port` yields the published
/// address.
///
/// # Errors
///
/// Returns `HelperStartError::Transport` when a command cannot be sent,
/// `Timeout` when one does not finish within the request's bound,
/// `LaunchFailed` when one exits unsuccessfully, and `PortUnresolved` when no
/// container id or published port can be parsed. Once a container id is
/// known, the helper is removed before any failure is returned.
pub async fn start_helper<S>(
    session: &S,
    request: &HelperRequest,
) -> Result<HelperContainer, HelperStartError>
where
    S: SshSession + ?Sized,
{
    info!(image = %request.image, socket_path = %request.socket_path, "starting helper container");
    let launched = bounded_exec(session, &request.launch_command(), request.timeout)
        .await
        .map_err(|failure| start_failure(failure, request.timeout))?;
    if !launched.succeeded() {
        return Err(launch_failed(&launched));
    }

    let container_id = launched
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from);
    let Some(id) = container_id else {
        return Err(HelperStartError::PortUnresolved {
            container_id: String::new(),
            output: launched.stdout,
        });
    };

    let ported = match bounded_exec(session, &request.port_command(&id), request.timeout).await {
        Ok(output) => output,
        Err(failure) => {
            discard(session, &id, request).await;
            return Err(start_failure(failure, request.timeout));
        }
    };
    if !ported.succeeded() {
        discard(session, &id, request).await;
        return Err(launch_failed(&ported));
    }

    if let Some((address, port)) = ported.stdout.lines().map(str::trim).find_map(parse_published) {
        info!(container_id = %id, address = %address, port, "helper container started");
        return Ok(HelperContainer { id, address, port });
    }

    discard(session, &id, request).await;
    Err(HelperStartError::PortUnresolved {
        container_id: id,
        output: ported.stdout,
    })
}

/// Forcibly remove a helper container.
///
/// A container that is already gone counts as removed.
///
/// # Errors
///
/// Returns `HelperStopError::Transport` when the command cannot be sent,
/// `Timeout` when it does not finish in time, and `RemoveFailed` when the
/// engine reports any other failure.
pub async fn stop_helper<S>(
    session: &S,
    container_id: &str,
    source_file: Option<&str>,
    timeout: Duration,
) -> Result<(), HelperStopError>
where
    S: SshSession + ?Sized,
{
    let command = with_source_prefix(
        source_file,
        &format!("docker rm -f {}", shell_quote(container_id)),
    );
    let output = bounded_exec(session, &command, timeout)
        .await
        .map_err(|failure| match failure {
            ExecFailure::Timeout => HelperStopError::Timeout {
                container_id: String::from(container_id),
                millis: timeout.as_millis(),
            },
            ExecFailure::Transport(source) => HelperStopError::Transport {
                container_id: String::from(container_id),
                source,
            },
        })?;

    if output.succeeded() {
        info!(container_id, "helper container removed");
        return Ok(());
    }
    if reports_not_found(&output) {
        info!(container_id, "helper container already gone");
        return Ok(());
    }
    Err(HelperStopError::RemoveFailed {
        container_id: String::from(container_id),
        status: output.status_label(),
        stderr: String::from(output.stderr.trim()),
    })
}

/// Exclusive ownership of a running helper.
///
/// The lease is released exactly once: [`HelperLease::release`] consumes it.
/// Dropping an unreleased lease cannot reach the remote engine, so it only
/// logs the container id left behind.
#[derive(Debug)]
pub struct HelperLease {
    container: Option<HelperContainer>,
    source_file: Option<String>,
    timeout: Duration,
}

impl HelperLease {
    /// Take ownership of a started helper.
    #[must_use]
    pub fn new(container: HelperContainer, request: &HelperRequest) -> Self {
        Self {
            container: Some(container),
            source_file: request.source_file.clone(),
            timeout: request.timeout,
        }
    }

    /// The leased helper.
    #[must_use]
    pub const fn container(&self) -> Option<&HelperContainer> {
        self.container.as_ref()
    }

    /// Remove the helper.
    ///
    /// # Errors
    ///
    /// Returns the `HelperStopError` reported by [`stop_helper`].
    pub async fn release<S>(mut self, session: &S) -> Result<(), HelperStopError>
    where
        S: SshSession + ?Sized,
    {
        let Some(container) = self.container.take() else {
            return Ok(());
        };
        stop_helper(
            session,
            container.id(),
            self.source_file.as_deref(),
            self.timeout,
        )
        .await
    }
}

impl Drop for HelperLease {
    fn drop(&mut self) {
        if let Some(container) = &self.container {
            warn!(
                container_id = %container.id(),
                label = HELPER_LABEL,
                "helper container lease dropped without removing the container"
            );
        }
    }
}

enum ExecFailure {
    Timeout,
    Transport(SshError),
}

fn start_failure(failure: ExecFailure, timeout: Duration) -> HelperStartError {
    match failure {
        ExecFailure::Timeout => HelperStartError::Timeout {
            millis: timeout.as_millis(),
        },
        ExecFailure::Transport(source) => HelperStartError::Transport(source),
    }
}

fn launch_failed(output: &ExecOutput) -> HelperStartError {
    HelperStartError::LaunchFailed {
        status: output.status_label(),
        stderr: String::from(output.stderr.trim()),
    }
}

async fn bounded_exec<S>(
    session: &S,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, ExecFailure>
where
    S: SshSession + ?Sized,
{
    tokio::time::timeout(timeout, session.exec(command))
        .await
        .map_err(|_| ExecFailure::Timeout)?
        .map_err(ExecFailure::Transport)
}

/// Remove a helper that could not be handed to the caller.
async fn discard<S>(session: &S, container_id: &str, request: &HelperRequest)
where
    S: SshSession + ?Sized,
{
    if let Err(error) =
        stop_helper(session, container_id, request.source_file(), request.timeout).await
    {
        warn!(container_id, error = %error, "failed to remove helper after a failed start");
    }
}

fn reports_not_found(output: &ExecOutput) -> bool {
    [&output.stderr, &output.stdout]
        .iter()
        .any(|text| text.to_ascii_lowercase().contains(NOT_FOUND_MARKER))
}

/// Parse one line of `docker port` output into an `(address, port)` pair.
///
/// Wildcard addresses are rewritten to the loopback address, since the
/// tunnel connects from the remote host itself.
fn parse_published(line: &str) -> Option<(String, u16)> {
    let (address, raw_port) = line.rsplit_once(':')?;
    let port = raw_port.parse::<u16>().ok().filter(|value| *value != 0)?;
    let unbracketed = address
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(address);
    let reachable = match unbracketed {
        "" | "0.0.0.0" | "::" => LOOPBACK_ADDRESS,
        other => other,
    };
    Some((String::from(reachable), port))
}

/// Quote a word for a POSIX shell unless it is plainly safe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:,=@+%".contains(c));
    if safe {
        String::from(word)
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
