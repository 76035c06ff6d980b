//! Explicit per-run state threaded through every call.
//!
//! Replaces ambient process-wide flags: the dry-run switch, the report sink,
//! and the run-outcome recorder all travel inside a cloneable [`RunContext`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::report::{ReportSink, TracingSink};

/// Shared run state: dry-run switch, observability sink, and a record of
/// whether any command failure occurred during the run.
///
/// Clones share the same failure record and sink.
#[derive(Clone)]
pub struct RunContext {
    dry_run: bool,
    sink: Arc<dyn ReportSink>,
    failed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("dry_run", &self.dry_run)
            .field("failed", &self.has_failures())
            .finish_non_exhaustive()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Creates a context with the tracing sink and dry-run disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Creates a context using the supplied sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            dry_run: false,
            sink,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enables or disables the run-wide dry-run switch.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the run-wide dry-run switch.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Sink receiving non-silent command results.
    #[must_use]
    pub fn sink(&self) -> &dyn ReportSink {
        self.sink.as_ref()
    }

    /// Records that the run observed a failure. Consumed by the
    /// preserve-hosts policy at cleanup time.
    pub fn record_failure(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` when any failure has been recorded.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}
