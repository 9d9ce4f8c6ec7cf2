//! Running child processes as stream stages.
//!
//! The child's stdin is fed from an upstream stream, its stdout becomes the
//! stream's bytes, and its stderr is captured privately. Anything written to
//! stderr fails the stream with the first line of that output; the numeric exit
//! status is never consulted.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;

use crate::error::{Error, Result};
use crate::pipe::PipeWriter;
use crate::stream::ByteStream;
use crate::traits::Producer;

const STDIN_CHUNK: usize = 8 * 1024;

/// A child process stage.
///
/// The program is resolved with the host's usual executable search rules.
#[derive(Debug)]
pub struct Command {
    program: String,
    args: Vec<String>,
    stdin: Option<ByteStream>,
}

impl Command {
    /// Create a new command with no arguments and an empty stdin
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Add a single argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `upstream` to the child's stdin
    pub fn stdin(mut self, upstream: ByteStream) -> Self {
        self.stdin = Some(upstream);
        self
    }

    /// The program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start the command as a stream
    pub fn spawn(self) -> ByteStream {
        ByteStream::from_producer(self)
    }
}

#[async_trait]
impl Producer for Command {
    async fn produce(&mut self, sink: &mut PipeWriter) -> Result<()> {
        let upstream = self.stdin.take().unwrap_or_default();

        let spawned = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %self.program, error = %e, "failed to start child");
                // Releasing the upstream winds down its producer
                drop(upstream);
                return Err(Error::spawn(&self.program, e));
            }
        };

        #[cfg(feature = "metrics")]
        metrics::counter!("procweld_processes_spawned_total").increment(1);
        debug!(program = %self.program, args = ?self.args, pid = ?child.id(), "started child");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Each pipe end is owned by its future so it closes as soon as that
        // future finishes.
        let feed = feed_stdin(upstream, stdin);
        let pump = async move {
            match stdout {
                Some(mut stdout) => sink.forward(&mut stdout).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let capture = async move {
            let mut diagnostics = Vec::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_end(&mut diagnostics).await?;
            }
            Ok::<_, std::io::Error>(diagnostics)
        };

        let (fed, pumped, captured) = tokio::join!(feed, pump, capture);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::wait(&self.program, e))?;
        debug!(program = %self.program, %status, "child exited");

        if let Some(line) = first_line(&captured?) {
            debug!(program = %self.program, diagnostic = %line, "child wrote diagnostics");
            return Err(Error::Diagnostic(line));
        }
        pumped?;
        fed
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Copy `upstream` into the child's stdin, then close it.
///
/// If the child stops reading, the upstream is dropped on the spot, which stops
/// its producer with a broken pipe. Only a failure reading the upstream is
/// reported.
async fn feed_stdin<R>(mut upstream: R, stdin: Option<ChildStdin>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        let n = upstream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if stdin.write_all(&buf[..n]).await.is_err() {
            trace!("child closed stdin early; releasing upstream");
            return Ok(());
        }
    }
}

/// The first line of captured stderr, if anything was written at all.
fn first_line(diagnostics: &[u8]) -> Option<String> {
    if diagnostics.is_empty() {
        return None;
    }
    let line = diagnostics
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some(String::from_utf8_lossy(line).into_owned())
}

impl ByteStream {
    /// Run `program` with `args` on an empty stdin.
    pub fn command<S, I, A>(program: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Command::new(program).args(args).spawn()
    }

    /// Run `program` with `args`, feeding this stream to its stdin.
    ///
    /// The stream is consumed as the child's input until end-of-data, or until
    /// the child stops reading it or cannot be started. It is then dropped.
    pub fn pipe<S, I, A>(self, program: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Command::new(program).args(args).stdin(self).spawn()
    }
}
