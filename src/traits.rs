//! Core trait for byte producers.
//!
//! A producer writes its bytes into a sink and reports how it finished. Turning a
//! producer into a [`ByteStream`](crate::stream::ByteStream) runs it on its own
//! task against an in-process pipe.

use async_trait::async_trait;

use crate::error::Result;
use crate::pipe::PipeWriter;

/// A producer writes bytes into a sink, then reports its terminal outcome.
///
/// Whatever the producer writes becomes the readable bytes of the resulting
/// stream, and the returned result becomes that stream's terminal error.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use procweld::error::Result;
/// use procweld::pipe::PipeWriter;
/// use procweld::traits::Producer;
/// use tokio::io::AsyncWriteExt;
///
/// struct Countdown {
///     from: u32,
/// }
///
/// #[async_trait]
/// impl Producer for Countdown {
///     async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()> {
///         for n in (1..=self.from).rev() {
///             sink.write_all(format!("{}\n", n).as_bytes()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Producer: Send + 'static {
    /// Write output into `sink`.
    ///
    /// Writes wait until the reading side has taken the previous chunk, and fail
    /// with a broken pipe once the reading side has been dropped.
    async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()>;

    /// Short label used when logging the producer's lifecycle.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
