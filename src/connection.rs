//! Transport seam and the per-host connection that drives it.
//!
//! A [`Connection`] owns exactly one transport session. The session is
//! established lazily on first use, with capped exponential backoff on the
//! initial connect, and must never be driven by two concurrent callers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tokio::time::sleep;

use crate::command::ExecOptions;
use crate::result::{CommandResult, ResultError};

/// Bound on initial-connect attempts before failing fatally.
pub const CONNECT_ATTEMPTS: u32 = 7;
/// First backoff delay after a failed connect.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Ceiling on the doubled backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// One chunk of remote output, tagged by stream, in arrival order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutputChunk {
    /// Chunk read from the remote stdout stream.
    Stdout(String),
    /// Chunk read from the remote stderr stream.
    Stderr(String),
}

/// Raw outcome of one remote execution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransportOutput {
    /// Output chunks in the order they arrived.
    pub chunks: Vec<OutputChunk>,
    /// Exit code reported by the remote channel, if any.
    pub exit_code: Option<i32>,
}

/// Parameters for one remote execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecRequest<'a> {
    /// Literal command line to run.
    pub command: &'a str,
    /// Whether to allocate a pseudo-terminal.
    pub pty: bool,
    /// Bytes written to remote stdin before end-of-input is signalled.
    /// Some remote programs act only on stdin-EOF.
    pub stdin: Option<&'a [u8]>,
}

/// Errors raised by a transport implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the remote endpoint cannot be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// Raised when an established session fails mid-operation.
    #[error("session failure: {0}")]
    Session(String),
    /// Raised when a file transfer fails.
    #[error("transfer failure: {0}")]
    Transfer(String),
}

/// Minimal interface implemented by concrete transports (SSH and friends).
pub trait Transport: Send + Sync {
    /// Establishes the session. Called once per connection lifetime.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Runs a command and returns its interleaved output and exit code.
    fn exec<'a>(&'a self, request: ExecRequest<'a>) -> TransportFuture<'a, TransportOutput>;

    /// Copies a local file or directory to the remote side.
    fn copy_to<'a>(
        &'a self,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
        recursive: bool,
    ) -> TransportFuture<'a, ()>;

    /// Copies a remote file or directory to the local side.
    fn copy_from<'a>(
        &'a self,
        source: &'a Utf8Path,
        destination: &'a Utf8Path,
        recursive: bool,
    ) -> TransportFuture<'a, ()>;
}

/// Errors raised while driving a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Raised when the initial connect keeps failing past the attempt bound.
    #[error("connection to '{host}' failed after {attempts} attempts: {message}")]
    ConnectExhausted {
        /// Host the connection belongs to.
        host: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transport error observed.
        message: String,
    },
    /// Raised when an established session fails during execution.
    #[error("session on '{host}' failed")]
    Session {
        /// Host the connection belongs to.
        host: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },
    /// Raised when the remote channel closes without reporting an exit code.
    #[error("command on '{host}' finished without an exit code")]
    MissingExitCode {
        /// Host the connection belongs to.
        host: String,
    },
    /// Raised when result bookkeeping is violated.
    #[error(transparent)]
    Result(#[from] ResultError),
}

/// One transport session bound to a single host.
///
/// Not safe for concurrent use by two callers; ownership is enforced by the
/// owning [`Host`](crate::host::Host).
pub struct Connection {
    host: String,
    transport: Arc<dyn Transport>,
    established: bool,
    connect_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("established", &self.established)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an unestablished connection over `transport`.
    #[must_use]
    pub fn new(host: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            host: host.into(),
            transport,
            established: false,
            connect_attempts: CONNECT_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Overrides the connect retry bounds. Primarily used by tests to keep
    /// backoff scenarios fast.
    #[must_use]
    pub const fn with_connect_retry(
        mut self,
        attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        self.connect_attempts = attempts;
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Returns `true` once a session has been established.
    #[must_use]
    pub const fn is_established(&self) -> bool {
        self.established
    }

    /// Runs `command_line` on the remote side.
    ///
    /// With `opts.dry_run` the transport is not touched at all and an empty
    /// successful result is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectExhausted`] when the session cannot
    /// be established, [`ConnectionError::Session`] on mid-command transport
    /// failure, and [`ConnectionError::MissingExitCode`] when the channel
    /// closes without a status.
    pub async fn execute(
        &mut self,
        command_line: &str,
        opts: &ExecOptions,
    ) -> Result<CommandResult, ConnectionError> {
        let mut result = CommandResult::new(self.host.clone(), command_line);
        if opts.dry_run {
            result.finalize(0)?;
            return Ok(result);
        }

        self.ensure_established().await?;
        let request = ExecRequest {
            command: command_line,
            pty: opts.pty,
            stdin: opts.stdin.as_deref(),
        };
        let output = self
            .transport
            .exec(request)
            .await
            .map_err(|source| ConnectionError::Session {
                host: self.host.clone(),
                source,
            })?;

        for chunk in &output.chunks {
            match chunk {
                OutputChunk::Stdout(text) => result.append_stdout(text)?,
                OutputChunk::Stderr(text) => result.append_stderr(text)?,
            }
        }
        let exit_code = output
            .exit_code
            .ok_or_else(|| ConnectionError::MissingExitCode {
                host: self.host.clone(),
            })?;
        result.finalize(exit_code)?;
        Ok(result)
    }

    /// Copies a local path to the remote side.
    ///
    /// Transfer protocols cannot report a real exit code, so the returned
    /// result is synthetic: exit 0 on completion, exit 1 with the literal
    /// error message on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectExhausted`] when the session cannot
    /// be established.
    pub async fn copy_to(
        &mut self,
        source: &Utf8Path,
        destination: &Utf8Path,
        recursive: bool,
    ) -> Result<CommandResult, ConnectionError> {
        self.ensure_established().await?;
        let outcome = self.transport.copy_to(source, destination, recursive).await;
        self.synthetic_transfer_result(format!("copy {source} -> {destination}"), outcome)
    }

    /// Copies a remote path to the local side. Same result semantics as
    /// [`Connection::copy_to`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectExhausted`] when the session cannot
    /// be established.
    pub async fn copy_from(
        &mut self,
        source: &Utf8Path,
        destination: &Utf8Path,
        recursive: bool,
    ) -> Result<CommandResult, ConnectionError> {
        self.ensure_established().await?;
        let outcome = self
            .transport
            .copy_from(source, destination, recursive)
            .await;
        self.synthetic_transfer_result(format!("copy {source} <- {destination}"), outcome)
    }

    /// Drops the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.established = false;
    }

    async fn ensure_established(&mut self) -> Result<(), ConnectionError> {
        if self.established {
            return Ok(());
        }
        let mut delay = self.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.connect().await {
                Ok(()) => {
                    self.established = true;
                    return Ok(());
                }
                Err(err) if attempt >= self.connect_attempts => {
                    return Err(ConnectionError::ConnectExhausted {
                        host: self.host.clone(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::debug!(host = %self.host, attempt, error = %err, "connect failed, backing off");
                    sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.max_backoff);
                }
            }
        }
    }

    fn synthetic_transfer_result(
        &self,
        command: String,
        outcome: Result<(), TransportError>,
    ) -> Result<CommandResult, ConnectionError> {
        let mut result = CommandResult::new(self.host.clone(), command);
        match outcome {
            Ok(()) => result.finalize(0)?,
            Err(err) => {
                result.append_stderr(&err.to_string())?;
                result.finalize(1)?;
            }
        }
        Ok(result)
    }
}
