//! Sinks that consume streams.
//!
//! [`Discard`] drains a stream the way redirecting to a null device would,
//! keeping nothing but the stream's terminal error.

use async_trait::async_trait;

use crate::error::Result;
use crate::pipe::PipeWriter;
use crate::stream::ByteStream;
use crate::traits::Producer;

/// A producer that drains a stream and writes nothing.
#[derive(Debug)]
pub struct Discard {
    stream: Option<ByteStream>,
}

impl Discard {
    /// Create a new discard sink for `stream`
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl Producer for Discard {
    async fn produce(&mut self, _sink: &mut PipeWriter) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let discarded = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
            trace!(bytes = discarded, "discarded stream");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discard"
    }
}

impl ByteStream {
    /// Drain this stream in the background, keeping only its terminal error.
    ///
    /// The returned stream yields no bytes.
    pub fn discard(self) -> ByteStream {
        ByteStream::from_producer(Discard::new(self))
    }

    /// Drain this stream and wait for its outcome.
    pub async fn run(self) -> Result<()> {
        self.discard().wait().await
    }
}
