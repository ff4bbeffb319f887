//! An in-process SSH session standing in for a remote engine host.

use std::sync::atomic::{AtomicBool, Ordering};

use dockerssh::error::SshError;
use dockerssh::ssh::{
    ChannelIo, ChannelRequest, ExecFuture, ExecOutput, OpenChannelFuture, SshSession,
};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

const HELPER_ID: &str = "c0ffee15bad";

/// Records every request and answers like a small engine host.
#[derive(Debug, Default)]
pub struct FakeSession {
    server_version: String,
    helper_port: Option<u16>,
    refuse_channels: AtomicBool,
    commands: Mutex<Vec<String>>,
    channels: Mutex<Vec<ChannelRequest>>,
}

impl FakeSession {
    /// A Linux server with no helper support configured.
    pub fn linux() -> Self {
        Self {
            server_version: String::from("SSH-2.0-OpenSSH_9.6p1 Debian-4"),
            ..Self::default()
        }
    }

    /// A Windows server whose helper publishes on `port`.
    pub fn windows(port: u16) -> Self {
        Self {
            server_version: String::from("SSH-2.0-OpenSSH_for_Windows_8.1"),
            helper_port: Some(port),
            ..Self::default()
        }
    }

    /// Refuse every channel opened from now on.
    pub fn refuse_channels(&self) {
        self.refuse_channels.store(true, Ordering::Release);
    }

    /// Commands run so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Channel requests received so far.
    pub fn channels(&self) -> Vec<ChannelRequest> {
        self.channels.lock().clone()
    }

    /// Number of helper removals requested.
    pub fn removals(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| command.starts_with("docker rm -f"))
            .count()
    }

    fn answer(&self, command: &str) -> ExecOutput {
        if command.contains("docker run") {
            return self.helper_port.map_or_else(
                || ExecOutput {
                    stderr: String::from("docker: command not found"),
                    exit_status: Some(127),
                    ..ExecOutput::default()
                },
                |_| ExecOutput {
                    stdout: format!("{HELPER_ID}\n"),
                    exit_status: Some(0),
                    ..ExecOutput::default()
                },
            );
        }
        if command.starts_with("docker port") {
            return self.helper_port.map_or_else(
                || ExecOutput {
                    stderr: format!("Error: No such container: {HELPER_ID}"),
                    exit_status: Some(1),
                    ..ExecOutput::default()
                },
                |port| ExecOutput {
                    stdout: format!("127.0.0.1:{port}\n"),
                    exit_status: Some(0),
                    ..ExecOutput::default()
                },
            );
        }
        ExecOutput {
            stdout: String::from(HELPER_ID),
            exit_status: Some(0),
            ..ExecOutput::default()
        }
    }
}

impl SshSession for FakeSession {
    fn server_version(&self) -> String {
        self.server_version.clone()
    }

    fn open_channel(&self, request: &ChannelRequest) -> OpenChannelFuture<'_> {
        self.channels.lock().push(request.clone());
        let refused = self.refuse_channels.load(Ordering::Acquire);
        let description = request.to_string();
        Box::pin(async move {
            if refused {
                return Err(SshError::ChannelOpenFailed {
                    request: description,
                    message: String::from("administratively prohibited"),
                });
            }
            let (near, far) = tokio::io::duplex(1024);
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(far);
                if tokio::io::copy(&mut reader, &mut writer).await.is_ok() {
                    let _shutdown = writer.shutdown().await;
                }
            });
            Ok(Box::new(near) as ChannelIo)
        })
    }

    fn exec(&self, command: &str) -> ExecFuture<'_> {
        self.commands.lock().push(String::from(command));
        let output = self.answer(command);
        Box::pin(async move { Ok(output) })
    }
}
