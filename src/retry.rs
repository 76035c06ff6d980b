//! Repeats a command until a desired exit code appears or attempts run out.
//!
//! Retry is an explicit state machine returned as a value, not an exception
//! used for control flow. Exhaustion is reported distinctly from a command
//! failure: it means "the polled condition never became true", not "the
//! command is malformed".

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::command::{Command, ExecOptions};
use crate::context::RunContext;
use crate::host::{ExecError, Host};
use crate::result::CommandResult;

/// Default bound on retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 60;
/// Default sleep between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal outcome of a retry loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetryOutcome {
    /// An attempt matched the desired exit-code set; carries that result.
    Succeeded(CommandResult),
    /// All attempts were used; carries the last result.
    Exhausted(CommandResult),
}

/// Errors raised by [`retry_on`].
#[derive(Debug, Error)]
pub enum RetryError {
    /// Raised when the desired exit code never appeared. After
    /// `max_retries` mismatches following the first attempt, exactly
    /// `max_retries + 1` executions have run.
    #[error(
        "command `{command}` on '{host}' never returned a desired exit code \
         after {attempts} attempts (last: {last_exit:?})"
    )]
    Exhausted {
        /// Host the command ran on.
        host: String,
        /// Command template that was retried.
        command: String,
        /// Total executions performed.
        attempts: u32,
        /// Exit code of the final attempt.
        last_exit: Option<i32>,
    },
    /// Raised when an attempt fails below the exit-code level (transport,
    /// missing connection). Distinct from exhaustion.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Bounded retry loop over a single command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Exit codes that end the loop successfully. Defaults to `{0}`.
    pub desired_exit_codes: BTreeSet<i32>,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Sleep between attempts.
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            desired_exit_codes: BTreeSet::from([0]),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Replaces the desired exit-code set.
    #[must_use]
    pub fn with_desired_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.desired_exit_codes = codes.into_iter().collect();
        self
    }

    /// Sets the retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the sleep between attempts.
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Runs `command` on `host` until an attempt matches the desired set or
    /// the bound is hit, returning the terminal state as a value.
    ///
    /// Each attempt runs with `accept_all_exit_codes` so a mismatch is not
    /// itself fatal. A first match returns immediately; the loop never
    /// retries past it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when an attempt fails below the exit-code
    /// level.
    pub async fn run(
        &self,
        host: &mut Host,
        command: &Command,
        ctx: &RunContext,
    ) -> Result<RetryOutcome, ExecError> {
        let opts = ExecOptions::default().with_accept_all_exit_codes(true);
        let mut result = host.exec(command, &opts, ctx).await?;
        let mut retries = 0;
        loop {
            if result.exit_code_in(&self.desired_exit_codes) {
                return Ok(RetryOutcome::Succeeded(result));
            }
            if retries == self.max_retries {
                return Ok(RetryOutcome::Exhausted(result));
            }
            retries += 1;
            sleep(self.retry_interval).await;
            result = host.exec(command, &opts, ctx).await?;
        }
    }
}

/// Convenience wrapper: runs the policy and converts exhaustion into
/// [`RetryError::Exhausted`].
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] when the desired exit code never
/// appeared, or [`RetryError::Exec`] on lower-level failure.
pub async fn retry_on(
    host: &mut Host,
    command: &Command,
    policy: &RetryPolicy,
    ctx: &RunContext,
) -> Result<CommandResult, RetryError> {
    match policy.run(host, command, ctx).await? {
        RetryOutcome::Succeeded(result) => Ok(result),
        RetryOutcome::Exhausted(result) => Err(RetryError::Exhausted {
            host: result.host().to_owned(),
            command: command.template().to_owned(),
            attempts: policy.max_retries + 1,
            last_exit: result.exit_code(),
        }),
    }
}
