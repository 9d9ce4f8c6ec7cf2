//! Fan-out: broadcasting one stream to several identical branches.
//!
//! A single task copies the source into every branch. A chunk counts as written
//! only once every branch has taken it, so the branches advance in lockstep and
//! the slowest reader paces all of them.
//!
//! # Deadlock hazard
//!
//! A branch that is kept alive but never read stalls the copy for every other
//! branch, forever. Drop branches you do not need: a dropped branch fails the
//! copy with a broken pipe, and every remaining branch observes that error.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::pipe::{pipe, Settle};
use crate::stream::ByteStream;

const CHUNK_SIZE: usize = 8 * 1024;

/// The write sides of a set of fan-out branches.
pub(crate) struct Broadcast {
    branches: Vec<Settle>,
}

impl Broadcast {
    /// Create `n` branches: the broadcaster and the branch streams.
    pub(crate) fn new(n: usize) -> (Self, Vec<ByteStream>) {
        let (branches, streams) = (0..n)
            .map(|_| {
                let (settle, reader) = pipe();
                (settle, ByteStream::from_pipe(reader))
            })
            .unzip();
        (Self { branches }, streams)
    }

    /// Copy `source` into every branch, then settle them all with the same outcome.
    pub(crate) async fn run(mut self, mut source: ByteStream) {
        let outcome = self.copy_to_all(&mut source).await;
        debug!(
            branches = self.branches.len(),
            ok = outcome.is_ok(),
            "fan-out finished"
        );
        for branch in self.branches {
            branch.finish(outcome.clone());
        }
    }

    async fn copy_to_all(&mut self, source: &mut ByteStream) -> Result<()> {
        loop {
            let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);
            if source.read_buf(&mut chunk).await? == 0 {
                return Ok(());
            }
            let chunk = chunk.freeze();
            for branch in self.branches.iter_mut() {
                branch.writer_mut().send(chunk.clone()).await?;
            }
        }
    }
}

impl ByteStream {
    /// Split this stream into `n` branches that each yield the same bytes.
    ///
    /// Every branch ends with the source's terminal outcome. See the
    /// [module documentation](crate::dispatcher) for the lockstep hazard.
    /// With `n == 0` the source is drained in the background.
    pub fn tee(self, n: usize) -> Vec<ByteStream> {
        let (broadcast, branches) = Broadcast::new(n);
        debug!(branches = n, "fanning out");
        tokio::spawn(broadcast.run(self));
        branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_tee_identity() {
        let source = pattern(10 * 1024);
        let branches = ByteStream::concat([source.clone()]).tee(3);
        assert_eq!(branches.len(), 3);

        let readers: Vec<_> = branches
            .into_iter()
            .map(|branch| tokio::spawn(branch.output()))
            .collect();

        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), source);
        }
    }

    #[tokio::test]
    async fn test_tee_shares_failure() {
        let failing = crate::cat!["some bytes", ByteStream::fail("source failed")];
        let branches = failing.tee(2);

        let readers: Vec<_> = branches
            .into_iter()
            .map(|branch| tokio::spawn(branch.output()))
            .collect();
        for reader in readers {
            let err = reader.await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), "source failed");
        }
    }

    #[tokio::test]
    async fn test_tee_lockstep() {
        let mut branches = ByteStream::concat([pattern(64 * 1024)]).tee(2);
        let slow = branches.pop().unwrap();
        let fast = branches.pop().unwrap();
        let fast_status = fast.status();

        let fast_reader = tokio::spawn(fast.output());

        // With the slow branch unread, the fast branch cannot finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fast_status.is_settled());

        let slow_out = slow.output().await.unwrap();
        let fast_out = fast_reader.await.unwrap().unwrap();
        assert_eq!(slow_out, fast_out);
    }

    #[tokio::test]
    async fn test_dropped_branch_fails_the_rest() {
        let mut branches = ByteStream::concat([pattern(64 * 1024)]).tee(2);
        drop(branches.pop());
        let survivor = branches.pop().unwrap();

        let err = survivor.output().await.unwrap_err();
        assert!(err.is_broken_pipe(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_tee_zero_drains_source() {
        let source = ByteStream::concat([pattern(32 * 1024)]);
        let status = source.status();
        assert!(source.tee(0).is_empty());

        let outcome = tokio::time::timeout(Duration::from_secs(2), status.wait())
            .await
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_tee_of_failed_stream() {
        let branches = ByteStream::fail(Error::custom("never started")).tee(2);
        for branch in branches {
            assert_eq!(branch.wait().await.unwrap_err().to_string(), "never started");
        }
    }
}
