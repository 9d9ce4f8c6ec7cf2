//! The byte stream: bytes that will eventually be produced, plus a terminal error.
//!
//! A [`ByteStream`] is either backed by a producer running on its own task, or is
//! already settled (empty, or failed with a stored error). Background work starts
//! when the stream is constructed; bytes are delivered as the stream is read.

use futures::FutureExt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{panic_message, Error, Result};
use crate::pipe::{pipe, PipeReader, PipeWriter, Status};
use crate::traits::Producer;
use crate::util;

/// A pull-based byte stream with a terminal error.
///
/// Reading returns the producer's bytes in order. After the producer succeeds,
/// reads return end-of-data forever; after it fails, every read returns that error.
///
/// Constructors that launch work call `tokio::spawn` and must run inside a tokio
/// runtime. Dropping a stream before it is drained makes its producer's next
/// write fail with a broken pipe, so abandoned producers wind down.
pub struct ByteStream {
    reader: Option<PipeReader>,
    status: Option<Status>,
    err: Option<Error>,
}

impl ByteStream {
    /// A stream that is already exhausted.
    pub fn empty() -> Self {
        Self {
            reader: None,
            status: None,
            err: None,
        }
    }

    /// A stream that has already failed with `err`.
    ///
    /// Reads and [`wait`](Self::wait) return the error immediately.
    pub fn fail(err: impl Into<Error>) -> Self {
        Self {
            reader: None,
            status: None,
            err: Some(err.into()),
        }
    }

    /// Run `producer` on its own task and stream whatever it writes.
    ///
    /// The producer's returned result becomes the stream's terminal error. A
    /// panicking producer settles the stream with [`Error::Panicked`].
    pub fn from_producer<P: Producer>(mut producer: P) -> Self {
        let (mut settle, reader) = pipe();

        #[cfg(feature = "metrics")]
        metrics::counter!("procweld_producers_started_total").increment(1);
        debug!(producer = producer.name(), "starting producer");

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(producer.produce(settle.writer_mut()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))));

            debug!(
                producer = producer.name(),
                ok = outcome.is_ok(),
                "producer finished"
            );
            settle.finish(outcome);
        });

        Self::from_pipe(reader)
    }

    /// Run a closure as the stream's producer.
    ///
    /// ```rust
    /// use procweld::prelude::*;
    /// use tokio::io::AsyncWriteExt;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<()> {
    /// let stream = ByteStream::from_fn(|mut sink: PipeWriter| async move {
    ///     sink.write_all(b"hello\n").await?;
    ///     Ok(())
    /// });
    /// assert_eq!(stream.text().await?, "hello\n");
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(PipeWriter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_producer(util::from_fn(f))
    }

    pub(crate) fn from_pipe(reader: PipeReader) -> Self {
        Self {
            status: Some(reader.status()),
            reader: Some(reader),
            err: None,
        }
    }

    /// Wait for the producer to finish and return its terminal outcome.
    ///
    /// Returns immediately for streams without a producer. May be called any
    /// number of times; once settled it always returns the same outcome.
    pub async fn wait(&self) -> Result<()> {
        match &self.status {
            Some(status) => status.wait().await,
            None => self.settled(),
        }
    }

    /// A cloneable handle onto the stream's completion signal.
    ///
    /// Use this to observe the outcome from other tasks while the stream itself
    /// is being read.
    pub fn status(&self) -> Status {
        match &self.status {
            Some(status) => status.clone(),
            None => Status::settled(self.settled()),
        }
    }

    /// Whether the stream is backed by a running (or finished) producer.
    pub fn is_async(&self) -> bool {
        self.status.is_some()
    }

    fn settled(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Read the whole stream.
    ///
    /// On failure the terminal error is returned instead of the partial data.
    pub async fn output(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Read the whole stream as UTF-8 text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.output().await?;
        String::from_utf8(bytes)
            .map_err(|e| Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::empty()
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => match &this.err {
                Some(err) => Poll::Ready(Err(err.clone().into())),
                None => Poll::Ready(Ok(())),
            },
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("async", &self.is_async())
            .field("err", &self.err)
            .finish()
    }
}
