//! Utility functions and helper types.

use async_trait::async_trait;
use std::future::Future;

use crate::error::{Error, Result};
use crate::pipe::PipeWriter;
use crate::traits::Producer;

/// Helper function to create a producer from a closure.
///
/// The closure receives its own handle onto the sink and runs at most once.
pub fn from_fn<F, Fut>(f: F) -> FnProducer<F>
where
    F: FnOnce(PipeWriter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnProducer { f: Some(f) }
}

/// A producer created from a closure
pub struct FnProducer<F> {
    f: Option<F>,
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: FnOnce(PipeWriter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()> {
        match self.f.take() {
            Some(f) => f(sink.clone()).await,
            None => Err(Error::custom("producer closure already ran")),
        }
    }

    fn name(&self) -> &'static str {
        "from_fn"
    }
}
