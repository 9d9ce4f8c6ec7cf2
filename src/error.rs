//! Error types for byte-stream pipelines.
//!
//! Every failure surfaces through a stream's terminal error slot, so the error
//! type is cheap to clone and is handed out to any number of observers.

use std::io;
use std::sync::Arc;

/// The main error type for byte-stream pipelines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Copying bytes between a source and a sink failed
    #[error("{0}")]
    Io(Arc<io::Error>),

    /// The operating system could not start a child process
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: Arc<io::Error>,
    },

    /// Waiting on a started child process failed
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        source: Arc<io::Error>,
    },

    /// First line a child process wrote to its diagnostic stream
    #[error("{0}")]
    Diagnostic(String),

    /// Splitting an upstream into lines failed
    #[error("line scan failed: {0}")]
    Scan(Arc<io::Error>),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),

    /// A producer task panicked before settling its stream
    #[error("producer panicked: {0}")]
    Panicked(String),

    /// A producer went away without settling its stream
    #[error("producer finished without reporting an outcome")]
    ChannelClosed,
}

// Convenience constructors
impl Error {
    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Create a diagnostic error from a line of child stderr
    pub fn diagnostic<S: Into<String>>(line: S) -> Self {
        Error::Diagnostic(line.into())
    }

    pub(crate) fn spawn(program: &str, source: io::Error) -> Self {
        Error::Spawn {
            program: program.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn wait(program: &str, source: io::Error) -> Self {
        Error::Wait {
            program: program.to_string(),
            source: Arc::new(source),
        }
    }

    /// Lift a line-reading failure, keeping upstream terminal errors intact.
    pub(crate) fn scan(err: io::Error) -> Self {
        match Error::from(err) {
            Error::Io(inner) => Error::Scan(inner),
            other => other,
        }
    }

    /// Whether this error was caused by the reading side of a pipe going away.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}

// Errors travel through `AsyncRead`/`AsyncWrite` wrapped in `io::Error`; unwrap
// them on the way back out so downstream stages see the original value.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            return inner.clone();
        }
        Error::Io(Arc::new(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Error::Panicked(panic_message(err.into_panic()))
        } else {
            Error::ChannelClosed
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
