//! Pipeline stage that logs all traffic at `trace` level.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::connection::BoxedStream;

const PREVIEW_LIMIT: usize = 64;

/// Logs every read, write and shutdown passing through it.
pub struct Wiretap {
    inner: BoxedStream,
    label: String,
}

impl Wiretap {
    pub fn new(inner: BoxedStream, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }

    /// Stage constructor usable with `Connection::map_stream`.
    pub fn stage(label: impl Into<String>) -> impl FnOnce(BoxedStream) -> BoxedStream {
        let label = label.into();
        move |inner: BoxedStream| -> BoxedStream { Box::new(Wiretap::new(inner, label)) }
    }
}

fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
    let mut text = String::from_utf8_lossy(shown).escape_debug().to_string();
    if bytes.len() > PREVIEW_LIMIT {
        text.push('…');
    }
    text
}

impl AsyncRead for Wiretap {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        match &result {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                if read.is_empty() {
                    tracing::trace!(target: "tcp_runtime::wiretap", conn = %self.label, "READ EOF");
                } else {
                    tracing::trace!(
                        target: "tcp_runtime::wiretap",
                        conn = %self.label,
                        bytes = read.len(),
                        data = %preview(read),
                        "READ"
                    );
                }
            }
            Poll::Ready(Err(e)) => {
                tracing::trace!(target: "tcp_runtime::wiretap", conn = %self.label, error = %e, "READ failed");
            }
            Poll::Pending => {}
        }
        result
    }
}

impl AsyncWrite for Wiretap {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, data);
        if let Poll::Ready(Ok(written)) = &result {
            tracing::trace!(
                target: "tcp_runtime::wiretap",
                conn = %self.label,
                bytes = *written,
                data = %preview(&data[..*written]),
                "WRITE"
            );
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_shutdown(cx);
        if result.is_ready() {
            tracing::trace!(target: "tcp_runtime::wiretap", conn = %self.label, "SHUTDOWN");
        }
        result
    }
}
