//! Shared mocks and fixtures for tunnel unit tests.

use mockall::mock;
use rstest::fixture;
use tokio::io::AsyncWriteExt;

use crate::ssh::{ChannelIo, ChannelRequest, ExecFuture, ExecOutput, OpenChannelFuture, SshSession};

mock! {
    pub Session {}

    impl SshSession for Session {
        fn server_version(&self) -> String;
        fn open_channel(&self, request: &ChannelRequest) -> OpenChannelFuture<'_>;
        fn exec(&self, command: &str) -> ExecFuture<'_>;
    }
}

pub type RuntimeFixture = std::io::Result<tokio::runtime::Runtime>;

#[fixture]
pub fn runtime() -> RuntimeFixture {
    tokio::runtime::Runtime::new()
}

/// A channel whose far end echoes every byte back. Must be called inside a
/// runtime.
pub fn echo_channel() -> ChannelIo {
    let (near, far) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(far);
        if tokio::io::copy(&mut reader, &mut writer).await.is_ok() {
            let _shutdown = writer.shutdown().await;
        }
    });
    Box::new(near)
}

/// Exec output for a command that succeeded.
pub fn exec_ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::from(stdout),
        stderr: String::new(),
        exit_status: Some(0),
    }
}

/// Exec output for a command that failed.
pub fn exec_failed(status: u32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: String::from(stderr),
        exit_status: Some(status),
    }
}
