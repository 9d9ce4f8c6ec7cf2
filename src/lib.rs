//! # Composable byte-stream pipelines for Rust
//!
//! This crate models "a stream of bytes that will eventually be produced" as a
//! single value, [`ByteStream`], and builds shell-like pipelines by composing
//! those values instead of wiring up tasks and channels by hand.
//!
//! ## Core Concepts
//!
//! - **ByteStream**: Pull-based reader with a terminal error and a completion signal
//! - **Producer**: Writes bytes into a sink on its own task
//! - **Concatenation**: Drains several byte sources back-to-back
//! - **Command**: Runs a child process fed from an upstream stream
//! - **Line mapper**: Turns each upstream line into a stream, in order, with bounded work-ahead
//! - **Fan-out**: Splits one stream into identical branches that advance in lockstep
//! - **Discard**: Drains a stream and keeps only its error
//!
//! ## Example
//!
//! ```rust,no_run
//! use procweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let shouted = cat!["hello\n", "world\n"]
//!         .pipe("tr", ["a-z", "A-Z"])
//!         .map_lines(|line| cat![format!("<{}>\n", line)])
//!         .text()
//!         .await?;
//!
//!     assert_eq!(shouted, "<HELLO>\n<WORLD>\n");
//!     Ok(())
//! }
//! ```

#[macro_use]
mod tracing_support;

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod pipe;
pub mod processors;
pub mod sinks;
pub mod sources;
pub mod stream;
pub mod traits;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::cat;
    pub use crate::command::Command;
    pub use crate::error::{Error, Result};
    pub use crate::pipe::{PipeWriter, Status};
    pub use crate::processors::MapConfig;
    pub use crate::sources::Source;
    pub use crate::stream::ByteStream;
    pub use crate::traits::Producer;
}

// Re-export main types
pub use error::{Error, Result};
pub use stream::ByteStream;

/// Concatenate byte sources of mixed shapes into one stream.
///
/// Each argument may be anything that converts into a [`Source`](sources::Source):
/// text, byte buffers, or other streams. With no arguments the result is an
/// empty stream that settles successfully.
///
/// ```rust
/// use procweld::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let greeting = cat!["hello", b", ".to_vec(), cat!["world"]];
/// assert_eq!(greeting.text().await?, "hello, world");
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! cat {
    ($($source:expr),* $(,)?) => {{
        let sources: ::std::vec::Vec<$crate::sources::Source> =
            ::std::vec![$($crate::sources::Source::from($source)),*];
        $crate::stream::ByteStream::concat(sources)
    }};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
