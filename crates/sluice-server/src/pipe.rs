//! Bounded in-memory byte pipe connecting a request handler (writer) to a
//! store-driver task (reader).
//!
//! Built on `tokio::io::simplex`, which already gives matched blocking
//! read/write over a fixed buffer, and that buffer is the back-pressure
//! bound. What simplex lacks is error propagation: dropping a write half
//! always looks like clean EOF. The `watch` channel added here carries an
//! abort reason to whichever side is still alive, so an error on either end
//! fails the other instead of silently truncating the object.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf, ReadHalf, SimplexStream, WriteHalf};
use tokio::sync::watch;

/// Buffer size of the pipe; the only per-session memory the stream engine
/// holds regardless of object size.
pub const PIPE_CAPACITY: usize = 64 * 1024;

pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader, PipeAbort) {
    let (read_half, write_half) = tokio::io::simplex(capacity);
    let (tx, rx) = watch::channel(None::<String>);
    let abort = PipeAbort {
        tx: Arc::new(tx),
    };
    (
        PipeWriter {
            half: write_half,
            abort: abort.clone(),
            abort_rx: rx.clone(),
        },
        PipeReader {
            half: read_half,
            abort_rx: rx,
        },
        abort,
    )
}

/// Handle that can fail the pipe from outside the write path (the sweeper
/// uses this to break a session whose writer is blocked).
#[derive(Clone)]
pub struct PipeAbort {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl PipeAbort {
    /// Record an abort reason and wake both sides. The first reason sticks.
    pub fn close_with_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }
}

pub struct PipeWriter {
    half: WriteHalf<SimplexStream>,
    abort: PipeAbort,
    abort_rx: watch::Receiver<Option<String>>,
}

impl PipeWriter {
    /// Write the whole buffer, blocking on the reader's pace. Fails if the
    /// pipe was aborted (even while blocked) or the read end is gone.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(reason) = self.abort.reason() {
            return Err(io::Error::other(reason));
        }
        tokio::select! {
            res = self.half.write_all(buf) => res,
            _ = self.abort_rx.changed() => {
                let reason = self.abort.reason().unwrap_or_else(|| "pipe closed".to_string());
                Err(io::Error::other(reason))
            }
        }
    }

    /// Close the write end cleanly; the reader observes EOF.
    pub async fn close(mut self) -> io::Result<()> {
        self.half.shutdown().await
    }

    /// Close the write end with an error; the reader observes the error
    /// instead of EOF.
    pub fn close_with_error(self, reason: impl Into<String>) {
        self.abort.close_with_error(reason);
        // Dropping the half wakes a reader blocked on an empty pipe.
    }
}

pub struct PipeReader {
    half: ReadHalf<SimplexStream>,
    abort_rx: watch::Receiver<Option<String>>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(reason) = this.abort_rx.borrow().clone() {
            return Poll::Ready(Err(io::Error::other(reason)));
        }
        let before = buf.filled().len();
        match Pin::new(&mut this.half).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                // An aborted writer is dropped, which surfaces here as EOF;
                // distinguish it from a clean close.
                if buf.filled().len() == before {
                    if let Some(reason) = this.abort_rx.borrow().clone() {
                        return Poll::Ready(Err(io::Error::other(reason)));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
