//! Capture of the server identification line.
//!
//! `russh` consumes the `SSH-2.0-...` line during its handshake without
//! exposing it. [`IdentCapture`] sits between the TCP stream and the client
//! and records that line as it passes through, so the tunnel can tell
//! Windows-hosted servers apart.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Longest identification line permitted by RFC 4253, excluding CR LF.
const MAX_IDENT_LEN: usize = 255;

/// Bytes inspected before giving up on finding an identification line.
const MAX_SCAN_LEN: usize = 64 * 1024;

/// Shared view of the identification line recorded by an [`IdentCapture`].
#[derive(Debug, Clone, Default)]
pub struct ServerIdent(Arc<Mutex<Option<String>>>);

impl ServerIdent {
    /// The recorded identification line, once the server has sent it.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    fn set(&self, ident: String) {
        *self.0.lock() = Some(ident);
    }
}

/// Stream wrapper that records the first `SSH-` line read from the server.
///
/// Banner lines sent before the identification are skipped. Once the line is
/// seen, or after a bounded number of bytes, reads pass through untouched.
#[derive(Debug)]
pub struct IdentCapture<S> {
    inner: S,
    line: Vec<u8>,
    scanned: usize,
    done: bool,
    ident: ServerIdent,
}

impl<S> IdentCapture<S> {
    /// Wrap a stream, returning the wrapper and a handle to the captured line.
    #[must_use]
    pub fn new(inner: S) -> (Self, ServerIdent) {
        let ident = ServerIdent::default();
        let capture = Self {
            inner,
            line: Vec::new(),
            scanned: 0,
            done: false,
            ident: ident.clone(),
        };
        (capture, ident)
    }

    /// Unwrap the inner stream.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn observe(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.done {
                return;
            }
            self.scanned += 1;
            if byte == b'\n' {
                self.finish_line();
            } else if self.line.len() < MAX_IDENT_LEN {
                self.line.push(byte);
            }
            if self.scanned >= MAX_SCAN_LEN {
                self.done = true;
            }
        }
    }

    fn finish_line(&mut self) {
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        if self.line.starts_with(b"SSH-") {
            self.ident
                .set(String::from_utf8_lossy(&self.line).into_owned());
            self.done = true;
        }
        self.line.clear();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdentCapture<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if !this.done
            && let Poll::Ready(Ok(())) = poll
            && let Some(fresh) = buf.filled().get(before..)
        {
            this.observe(fresh);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdentCapture<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
