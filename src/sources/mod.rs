//! Byte sources and concatenation.
//!
//! A [`Source`] is one of a closed set of shapes a stream can be built from. The
//! [`Concat`] producer drains a list of them back-to-back into a single stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::pipe::PipeWriter;
use crate::stream::ByteStream;
use crate::traits::Producer;

/// Something bytes can be drained from.
pub enum Source {
    /// Any async reader
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A raw byte buffer
    Bytes(Bytes),
    /// A text value
    Text(String),
    /// Another stream, including its terminal error
    Stream(ByteStream),
}

impl Source {
    /// Wrap an async reader
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Source::Reader(Box::new(reader))
    }

    fn kind(&self) -> &'static str {
        match self {
            Source::Reader(_) => "reader",
            Source::Bytes(_) => "bytes",
            Source::Text(_) => "text",
            Source::Stream(_) => "stream",
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Reader(_) => write!(f, "Reader(..)"),
            Source::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Source::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Source::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

impl From<Bytes> for Source {
    fn from(bytes: Bytes) -> Self {
        Source::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Source {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Source {
    fn from(bytes: &'static [u8]) -> Self {
        Source::Bytes(Bytes::from_static(bytes))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Source {
    fn from(bytes: &'static [u8; N]) -> Self {
        Source::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Text(text)
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::Text(text.to_string())
    }
}

impl From<ByteStream> for Source {
    fn from(stream: ByteStream) -> Self {
        Source::Stream(stream)
    }
}

/// A producer that drains sources in order, stopping at the first failure.
///
/// Source *i*+1 is not touched until source *i* has been fully drained.
pub struct Concat {
    sources: VecDeque<Source>,
}

impl Concat {
    /// Create a new concatenation of `sources`
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Source>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of sources not yet drained
    pub fn remaining(&self) -> usize {
        self.sources.len()
    }
}

#[async_trait]
impl Producer for Concat {
    async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()> {
        while let Some(source) = self.sources.pop_front() {
            trace!(kind = source.kind(), "draining source");
            match source {
                Source::Bytes(bytes) => sink.send(bytes).await?,
                Source::Text(text) => sink.send(Bytes::from(text)).await?,
                Source::Reader(mut reader) => {
                    sink.forward(&mut reader).await?;
                }
                Source::Stream(mut stream) => {
                    sink.forward(&mut stream).await?;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "concat"
    }
}

impl ByteStream {
    /// A stream yielding every source's bytes back-to-back, in order.
    ///
    /// Fails with the first source failure; later sources are left untouched.
    /// An empty list yields an empty stream that settles successfully.
    pub fn concat<I>(sources: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Source>,
    {
        Self::from_producer(Concat::new(sources))
    }

    /// Wrap an async reader, copying it on a background task.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::concat([Source::reader(reader)])
    }

    /// This stream followed by `more`.
    pub fn cat<I>(self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Source>,
    {
        let sources = std::iter::once(Source::from(self)).chain(more.into_iter().map(Into::into));
        Self::concat(sources)
    }
}
