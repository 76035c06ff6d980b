//! Mutable-until-closed record of a single command execution.
//!
//! A [`CommandResult`] accumulates output chunks while a command runs and is
//! sealed exactly once with [`CommandResult::finalize`]. After sealing, both
//! the buffers and the exit code are read-only.

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors raised when a result is mutated after it has been sealed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResultError {
    /// Raised when output is appended or an exit code is set after
    /// [`CommandResult::finalize`] has run.
    #[error("result for host '{host}' is already finalized")]
    AlreadyFinalized {
        /// Host that owns the sealed result.
        host: String,
    },
}

/// Outcome record for one command on one host.
///
/// The `output` buffer preserves the order in which stdout and stderr chunks
/// arrived, which the separate per-stream buffers cannot reconstruct.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResult {
    host: String,
    command: String,
    stdout: String,
    stderr: String,
    output: String,
    exit_code: Option<i32>,
}

impl CommandResult {
    /// Creates an open result for `command` running on `host`.
    #[must_use]
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            stdout: String::new(),
            stderr: String::new(),
            output: String::new(),
            exit_code: None,
        }
    }

    /// Name of the host the command ran on.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Literal command line that produced this result.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Accumulated standard output.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Accumulated standard error.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Combined output preserving stdout/stderr arrival interleaving.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Exit code, or `None` while the command is still running.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns `true` once the result has been sealed with an exit code.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Returns `true` when the sealed exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Returns `true` when the sealed exit code is a member of `codes`.
    ///
    /// An unsealed result never matches.
    #[must_use]
    pub fn exit_code_in(&self, codes: &BTreeSet<i32>) -> bool {
        self.exit_code.is_some_and(|code| codes.contains(&code))
    }

    /// Appends a stdout chunk, normalising line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ResultError::AlreadyFinalized`] when the result is sealed.
    pub fn append_stdout(&mut self, chunk: &str) -> Result<(), ResultError> {
        self.ensure_open()?;
        let normalised = normalise_line_endings(chunk);
        self.stdout.push_str(&normalised);
        self.output.push_str(&normalised);
        Ok(())
    }

    /// Appends a stderr chunk, normalising line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ResultError::AlreadyFinalized`] when the result is sealed.
    pub fn append_stderr(&mut self, chunk: &str) -> Result<(), ResultError> {
        self.ensure_open()?;
        let normalised = normalise_line_endings(chunk);
        self.stderr.push_str(&normalised);
        self.output.push_str(&normalised);
        Ok(())
    }

    /// Seals the result with the exit code reported by the remote channel.
    ///
    /// # Errors
    ///
    /// Returns [`ResultError::AlreadyFinalized`] on a second call.
    pub fn finalize(&mut self, exit_code: i32) -> Result<(), ResultError> {
        self.ensure_open()?;
        self.exit_code = Some(exit_code);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ResultError> {
        if self.is_finalized() {
            return Err(ResultError::AlreadyFinalized {
                host: self.host.clone(),
            });
        }
        Ok(())
    }
}

/// Rewrites `\r\n` pairs and bare `\r` to `\n` so buffers compare stably
/// across remote platforms.
fn normalise_line_endings(chunk: &str) -> String {
    chunk.replace("\r\n", "\n").replace('\r', "\n")
}
