//! Observability sink for command results.

use crate::result::CommandResult;

/// Receives every non-silent command result before exit codes are checked,
/// so failing commands remain visible even when they raise.
pub trait ReportSink: Send + Sync {
    /// Records one finalized result.
    fn report(&self, result: &CommandResult);
}

/// Default sink that emits results through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, result: &CommandResult) {
        tracing::info!(
            host = result.host(),
            command = result.command(),
            exit_code = result.exit_code(),
            output = result.output(),
            "command finished"
        );
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn report(&self, _result: &CommandResult) {}
}
