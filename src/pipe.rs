//! In-process byte pipe with a one-shot terminal outcome.
//!
//! ```text
//!   PipeWriter ──▶ [mpsc<Bytes>, one chunk in flight] ──▶ PipeReader
//!       │                                                    │
//!   Settle ──▶ [watch<Option<Result<()>>>] ──▶ Status ───────┘
//!                ├── writer blocks until the reader takes the chunk
//!                ├── drop reader → writer fails with BrokenPipe
//!                └── settle → outcome stored, then the write end is released,
//!                    so the reader sees end-of-data or the stored error
//! ```
//!
//! The outcome is published before the `Settle` handle drops its writer. A reader
//! that observes the channel closing therefore always finds the outcome in place.

use bytes::Bytes;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::PollSender;

use crate::error::{Error, Result};

/// Chunks buffered between writer and reader before the writer blocks.
const CHUNK_CAPACITY: usize = 1;

type Outcome = Option<Result<()>>;

/// Create a pipe: the settle handle (owning the write side) and the read end.
pub(crate) fn pipe() -> (Settle, PipeReader) {
    let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);
    let (outcome_tx, outcome_rx) = watch::channel(None);

    let settle = Settle {
        writer: PipeWriter {
            tx: PollSender::new(tx),
        },
        outcome: outcome_tx,
    };
    let reader = PipeReader {
        rx,
        pending: Bytes::new(),
        status: Status { rx: outcome_rx },
    };
    (settle, reader)
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
}

/// Writing end of a pipe.
///
/// Cloning yields another handle onto the same pipe; the reader sees end-of-data
/// only once every handle is gone and the pipe has been settled.
#[derive(Clone)]
pub struct PipeWriter {
    tx: PollSender<Bytes>,
}

impl PipeWriter {
    /// Hand a chunk to the reader without copying it.
    ///
    /// Waits until the reader has room for it, or fails with `BrokenPipe` when the
    /// reader has been dropped.
    pub async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        poll_fn(|cx| self.tx.poll_reserve(cx))
            .await
            .map_err(|_| broken_pipe())?;
        self.tx.send_item(chunk).map_err(|_| broken_pipe())
    }

    /// Copy `reader` into the pipe, one chunk at a time.
    ///
    /// Every chunk is handed over before the next read, so bytes that precede a
    /// failing read still reach the reader. Returns the number of bytes copied.
    pub async fn forward<R>(&mut self, reader: R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunks = ReaderStream::new(reader);
        let mut copied = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            copied += chunk.len() as u64;
            self.send(chunk).await?;
        }
        Ok(copied)
    }

    /// Whether the reading end has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.get_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if ready!(self.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(broken_pipe()));
        }
        self.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owner of a pipe's write side and its terminal outcome.
pub(crate) struct Settle {
    writer: PipeWriter,
    outcome: watch::Sender<Outcome>,
}

impl Settle {
    /// Another handle onto the write side.
    #[cfg(test)]
    pub(crate) fn writer(&self) -> PipeWriter {
        self.writer.clone()
    }

    /// Mutable access to the settle handle's own writer.
    pub(crate) fn writer_mut(&mut self) -> &mut PipeWriter {
        &mut self.writer
    }

    /// Publish the terminal outcome, then release the write side.
    pub(crate) fn finish(self, outcome: Result<()>) {
        self.outcome.send_replace(Some(outcome));
    }
}

/// Reading end of a pipe.
///
/// After the writer settles, reads return end-of-data forever on success and the
/// stored error forever on failure.
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    status: Status,
}

impl PipeReader {
    /// The completion signal of the pipe this reader belongs to.
    pub fn status(&self) -> Status {
        self.status.clone()
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let this = &mut *self;

        while this.pending.is_empty() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => this.pending = chunk,
                None => {
                    return Poll::Ready(match this.status.try_get() {
                        Some(Ok(())) => Ok(()),
                        Some(Err(e)) => Err(e.into()),
                        None => Err(Error::ChannelClosed.into()),
                    })
                }
            }
        }

        let n = buf.remaining().min(this.pending.len());
        buf.put_slice(&this.pending.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Cloneable completion signal of a stream.
///
/// Any number of observers, on any task, may wait on it; once settled every one
/// of them sees the same outcome.
#[derive(Clone, Debug)]
pub struct Status {
    rx: watch::Receiver<Outcome>,
}

impl Status {
    /// A status that is already settled with `outcome`.
    pub(crate) fn settled(outcome: Result<()>) -> Self {
        let (_, rx) = watch::channel(Some(outcome));
        Self { rx }
    }

    /// Wait until the producer has finished and return its outcome.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => Option::clone(&outcome),
            Err(_) => None,
        };
        settled.unwrap_or(Err(Error::ChannelClosed))
    }

    /// The outcome, if the producer has finished.
    pub fn try_get(&self) -> Option<Result<()>> {
        let current = Option::clone(&self.rx.borrow());
        match current {
            Some(outcome) => Some(outcome),
            None if self.rx.has_changed().is_err() => Some(
                Option::clone(&self.rx.borrow()).unwrap_or(Err(Error::ChannelClosed)),
            ),
            None => None,
        }
    }

    /// Whether the producer has finished.
    pub fn is_settled(&self) -> bool {
        self.try_get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_basic_write_read() {
        let (settle, mut reader) = pipe();
        let mut writer = settle.writer();

        let write_task = tokio::spawn(async move {
            writer.write_all(b"hello").await.unwrap();
            drop(writer);
            settle.finish(Ok(()));
        });

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn test_settled_error_reaches_reader() {
        let (settle, mut reader) = pipe();
        let mut writer = settle.writer();

        tokio::spawn(async move {
            writer.write_all(b"partial").await.unwrap();
            drop(writer);
            settle.finish(Err(Error::custom("upstream exploded")));
        });

        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(buf, b"partial");
        assert_eq!(Error::from(err).to_string(), "upstream exploded");

        // The failure is sticky
        let mut byte = [0u8; 1];
        assert!(reader.read(&mut byte).await.is_err());
        assert!(reader.read(&mut byte).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_is_sticky() {
        let (settle, mut reader) = pipe();
        settle.finish(Ok(()));

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_pipe_on_reader_drop() {
        let (mut settle, reader) = pipe();
        drop(reader);

        let err = settle
            .writer_mut()
            .send(Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(settle.writer().is_closed());
    }

    #[tokio::test]
    async fn test_writer_open_while_reader_alive() {
        let (settle, reader) = pipe();
        let writer = settle.writer();
        assert!(!writer.is_closed());

        drop(reader);
        assert!(writer.is_closed());
        settle.finish(Ok(()));
    }

    #[tokio::test]
    async fn test_forward_keeps_bytes_before_read_error() {
        let (settle, mut reader) = pipe();
        let mut writer = settle.writer();

        tokio::spawn(async move {
            let failing = tokio_test::io::Builder::new()
                .read(b"first ")
                .read(b"second")
                .read_error(io::Error::new(io::ErrorKind::Other, "device gone"))
                .build();
            let outcome = writer.forward(failing).await.map(|_| ());
            drop(writer);
            settle.finish(outcome.map_err(Error::from));
        });

        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(buf, b"first second");
        assert_eq!(Error::from(err).to_string(), "device gone");
    }

    #[tokio::test]
    async fn test_reader_drop_while_writer_blocked() {
        let (settle, reader) = pipe();
        let mut writer = settle.writer();

        let write_task = tokio::spawn(async move {
            let data = vec![0u8; 64];
            loop {
                if let Err(e) = writer.write_all(&data).await {
                    assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
                    return;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(reader);

        let result = tokio::time::timeout(Duration::from_secs(2), write_task).await;
        assert!(result.is_ok(), "writer hung after reader dropped");
        drop(settle);
    }

    #[tokio::test]
    async fn test_unsettled_pipe_reports_closed() {
        let (settle, mut reader) = pipe();
        let status = reader.status();
        drop(settle);

        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::ChannelClosed));
        assert!(matches!(status.wait().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_status_shared_by_observers() {
        let (settle, reader) = pipe();
        let status = reader.status();
        assert!(!status.is_settled());

        let observers: Vec<_> = (0..4)
            .map(|_| {
                let status = status.clone();
                tokio::spawn(async move { status.wait().await })
            })
            .collect();

        settle.finish(Err(Error::custom("done badly")));

        for observer in observers {
            let outcome = observer.await.unwrap();
            assert_eq!(outcome.unwrap_err().to_string(), "done badly");
        }
        assert_eq!(
            status.try_get().unwrap().unwrap_err().to_string(),
            "done badly"
        );
    }

    #[tokio::test]
    async fn test_settled_status_is_immediate() {
        let status = Status::settled(Err(Error::custom("already failed")));
        assert!(status.is_settled());
        assert!(status.wait().await.is_err());
    }
}
