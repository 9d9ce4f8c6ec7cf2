//! Line mapping with bounded work-ahead.
//!
//! ```text
//!   upstream ──▶ scan task ──f(line)──▶ [queue, capacity N] ──▶ drain ──▶ result
//!                 └── waits for a free slot before calling f on the next line
//! ```
//!
//! The scan task starts every derived stream as soon as there is room for it, so
//! up to N derived streams make progress concurrently. The drain copies them into
//! the result strictly in line order.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::error::{Error, Result};
use crate::pipe::PipeWriter;
use crate::stream::ByteStream;
use crate::traits::Producer;

/// Derived streams queued by default before the scanner waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Configuration for line mapping
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MapConfig {
    /// Maximum number of derived streams waiting to be drained
    pub queue_capacity: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MapConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// A producer that drains mapped line streams in order.
///
/// Owns the scan task feeding its queue; dropping the mapper stops the scan.
pub struct LineMapper {
    queue: mpsc::Receiver<ByteStream>,
    scanner: Option<JoinHandle<Result<()>>>,
}

impl LineMapper {
    /// Start scanning `upstream`, mapping each line with `f`.
    pub fn new<F>(upstream: ByteStream, config: MapConfig, f: F) -> Self
    where
        F: FnMut(String) -> ByteStream + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let scanner = tokio::spawn(scan_lines(upstream, tx, f));
        Self {
            queue: rx,
            scanner: Some(scanner),
        }
    }
}

async fn scan_lines<F>(
    upstream: ByteStream,
    queue: mpsc::Sender<ByteStream>,
    mut f: F,
) -> Result<()>
where
    F: FnMut(String) -> ByteStream + Send + 'static,
{
    let mut lines = LinesStream::new(BufReader::new(upstream).lines());
    while let Some(line) = lines.next().await {
        let line = line.map_err(Error::scan)?;
        if queue.capacity() == 0 {
            trace!("line queue full; scanner waiting");
        }
        let Ok(slot) = queue.reserve().await else {
            // The drain has stopped; its outcome decides the result.
            return Ok(());
        };
        slot.send(f(line));
    }
    Ok(())
}

#[async_trait]
impl Producer for LineMapper {
    async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()> {
        let mut copied = Ok(());
        while let Some(mut mapped) = self.queue.recv().await {
            if let Err(e) = sink.forward(&mut mapped).await {
                copied = Err(Error::from(e));
                break;
            }
        }

        // Pending derived streams are dropped, which winds down their producers.
        self.queue.close();
        while self.queue.try_recv().is_ok() {}

        let scanned = match self.scanner.take() {
            Some(scanner) if copied.is_ok() || scanner.is_finished() => match scanner.await {
                Ok(result) => result,
                Err(e) => Err(Error::from(e)),
            },
            Some(scanner) => {
                scanner.abort();
                Ok(())
            }
            None => Ok(()),
        };
        scanned.and(copied)
    }

    fn name(&self) -> &'static str {
        "map_lines"
    }
}

impl Drop for LineMapper {
    fn drop(&mut self) {
        if let Some(scanner) = self.scanner.take() {
            scanner.abort();
        }
    }
}

impl ByteStream {
    /// Map every line of this stream to a new stream and concatenate the results.
    ///
    /// Lines are split on `\n` with the delimiter (and a preceding `\r`) removed.
    /// `f` is called as lines are scanned, at most
    /// [`DEFAULT_QUEUE_CAPACITY`] streams ahead of the one being drained; output
    /// order always matches input order.
    pub fn map_lines<F>(self, f: F) -> ByteStream
    where
        F: FnMut(String) -> ByteStream + Send + 'static,
    {
        self.map_lines_with(MapConfig::default(), f)
    }

    /// Like [`map_lines`](Self::map_lines) with an explicit configuration.
    pub fn map_lines_with<F>(self, config: MapConfig, f: F) -> ByteStream
    where
        F: FnMut(String) -> ByteStream + Send + 'static,
    {
        ByteStream::from_producer(LineMapper::new(self, config, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::PipeWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn echo_line(line: String) -> ByteStream {
        ByteStream::concat([format!("{}\n", line)])
    }

    #[tokio::test]
    async fn test_map_preserves_order_under_skew() {
        let out = crate::cat!["a\nb\nc\n"]
            .map_lines(|line| {
                let delay = if line == "a" { 50 } else { 0 };
                ByteStream::from_fn(move |mut sink: PipeWriter| async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    sink.write_all(line.to_uppercase().as_bytes()).await?;
                    Ok(())
                })
            })
            .text()
            .await
            .unwrap();
        assert_eq!(out, "ABC");
    }

    #[tokio::test]
    async fn test_map_strips_delimiters() {
        let out = crate::cat!["one\r\ntwo\nthree"]
            .map_lines(|line| ByteStream::concat([format!("[{}]", line)]))
            .text()
            .await
            .unwrap();
        assert_eq!(out, "[one][two][three]");
    }

    #[tokio::test]
    async fn test_map_empty_upstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = ByteStream::empty().map_lines(move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            echo_line(line)
        });

        assert!(stream.output().await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_map_bounds_work_ahead() {
        let input: String = (0..100).map(|i| format!("{}\n", i)).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let stream = crate::cat![input].map_lines(move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            echo_line(line)
        });

        // Nobody reads the result, so the scanner must stall.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stalled_at = calls.load(Ordering::SeqCst);
        // Queued entries, plus the one being drained and the one already drained
        // into the result pipe.
        assert!(
            stalled_at <= DEFAULT_QUEUE_CAPACITY + 2,
            "scanner ran ahead to {} lines",
            stalled_at
        );

        let out = stream.text().await.unwrap();
        let expected: String = (0..100).map(|i| format!("{}\n", i)).collect();
        assert_eq!(out, expected);
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_map_queue_capacity_is_configurable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let input: String = (0..50).map(|i| format!("{}\n", i)).collect();

        let config = MapConfig::new().queue_capacity(2);
        let stream = crate::cat![input.clone()].map_lines_with(config, move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            echo_line(line)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(calls.load(Ordering::SeqCst) <= 4);
        assert_eq!(stream.text().await.unwrap(), input);
    }

    #[tokio::test]
    async fn test_map_first_copy_error_wins() {
        let out = crate::cat!["ok\nbad\nlater\n"].map_lines(|line| {
            if line == "bad" {
                ByteStream::fail("mapping failed")
            } else {
                echo_line(line)
            }
        });

        let mut data = Vec::new();
        let mut out = out;
        let err = tokio::io::AsyncReadExt::read_to_end(&mut out, &mut data)
            .await
            .unwrap_err();
        assert_eq!(data, b"ok\n");
        assert_eq!(Error::from(err).to_string(), "mapping failed");
    }

    #[tokio::test]
    async fn test_map_keeps_partial_output_of_failing_stream() {
        let out = crate::cat!["only\n"].map_lines(|_line| {
            let failing = tokio_test::io::Builder::new()
                .read(b"half ")
                .read(b"written")
                .read_error(std::io::Error::new(std::io::ErrorKind::Other, "cut short"))
                .build();
            ByteStream::from_reader(failing)
        });

        let mut data = Vec::new();
        let mut out = out;
        let err = tokio::io::AsyncReadExt::read_to_end(&mut out, &mut data)
            .await
            .unwrap_err();
        assert_eq!(data, b"half written");
        assert_eq!(Error::from(err).to_string(), "cut short");
    }

    #[tokio::test]
    async fn test_map_upstream_error_surfaces() {
        let upstream = crate::cat!["a\nb\n", ByteStream::fail("upstream failed")];
        let stream = upstream.map_lines(echo_line);
        assert_eq!(stream.output().await.unwrap_err().to_string(), "upstream failed");
    }

    #[tokio::test]
    async fn test_map_invalid_utf8_is_scan_error() {
        let upstream = crate::cat![vec![b'o', b'k', b'\n', 0xff, b'\n']];
        let stream = upstream.map_lines(echo_line);
        assert!(matches!(stream.output().await, Err(Error::Scan(_))));
    }

    #[test]
    fn test_config_defaults() {
        assert_eq!(MapConfig::default().queue_capacity, 10);
        assert_eq!(MapConfig::new().queue_capacity(0).queue_capacity, 1);
    }
}
