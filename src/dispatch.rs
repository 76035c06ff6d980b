//! Target resolution and single/parallel command dispatch.
//!
//! Parallel dispatch runs one task per host and always joins every task
//! before surfacing an error (join-then-raise, never fail-fast), so no host
//! is torn down while a sibling is mid-command. Results come back in input
//! order regardless of completion order.

use std::sync::Arc;

use thiserror::Error;

use crate::command::{Command, ExecOptions};
use crate::context::RunContext;
use crate::host::{ExecError, Role, SharedHost};
use crate::result::CommandResult;

/// Dispatch target: one host, an explicit list, or a role tag resolved
/// against the ambient inventory.
#[derive(Clone)]
pub enum Target {
    /// A single host.
    Host(SharedHost),
    /// An explicit host list, dispatched in list order.
    Hosts(Vec<SharedHost>),
    /// Every inventory host carrying the role.
    Role(Role),
}

/// Optional per-result callback, letting callers write inline assertions
/// without re-fetching state.
#[derive(Clone)]
pub enum ResultHook {
    /// One-argument form: receives each finalized result.
    Inspect(Arc<dyn Fn(&CommandResult) -> Result<(), String> + Send + Sync>),
    /// Zero-argument form: runs once per result with no arguments.
    Ambient(Arc<dyn Fn() -> Result<(), String> + Send + Sync>),
}

impl ResultHook {
    /// Wraps a one-argument callback.
    #[must_use]
    pub fn inspect<F>(hook: F) -> Self
    where
        F: Fn(&CommandResult) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Inspect(Arc::new(hook))
    }

    /// Wraps a zero-argument callback.
    #[must_use]
    pub fn ambient<F>(hook: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Ambient(Arc::new(hook))
    }

    fn invoke(&self, result: &CommandResult) -> Result<(), String> {
        match self {
            Self::Inspect(hook) => hook(result),
            Self::Ambient(hook) => hook(),
        }
    }
}

/// Errors raised by dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Raised when a role target matches no inventory host.
    #[error("unknown role '{role}'")]
    UnknownRole {
        /// Role that failed to resolve.
        role: Role,
    },
    /// Raised when execution fails on a host.
    #[error("dispatch to '{host}' failed")]
    Exec {
        /// Host the failure occurred on.
        host: String,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when a result hook rejects a result.
    #[error("hook failed for '{host}': {message}")]
    Hook {
        /// Host whose result was rejected.
        host: String,
        /// Message returned by the hook.
        message: String,
    },
    /// Raised when a dispatch task panics or is aborted.
    #[error("dispatch task failed: {message}")]
    Join {
        /// Join error description.
        message: String,
    },
    /// Raised when a single-host dispatch resolves to zero or several hosts.
    #[error("target resolved to {count} hosts, expected exactly one")]
    AmbiguousTarget {
        /// Number of hosts the target resolved to.
        count: usize,
    },
}

/// Resolves targets against a host inventory and applies operations,
/// sequentially or in parallel.
pub struct Dispatcher {
    hosts: Vec<SharedHost>,
}

impl Dispatcher {
    /// Creates a dispatcher over the run's host inventory.
    #[must_use]
    pub const fn new(hosts: Vec<SharedHost>) -> Self {
        Self { hosts }
    }

    /// The full inventory, in declaration order.
    #[must_use]
    pub fn hosts(&self) -> &[SharedHost] {
        &self.hosts
    }

    /// Resolves `target` to concrete hosts, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownRole`] when a role matches nothing.
    pub async fn resolve(&self, target: &Target) -> Result<Vec<SharedHost>, DispatchError> {
        match target {
            Target::Host(host) => Ok(vec![Arc::clone(host)]),
            Target::Hosts(hosts) => Ok(hosts.clone()),
            Target::Role(role) => {
                let mut matched = Vec::new();
                for shared in &self.hosts {
                    if shared.lock().await.has_role(role) {
                        matched.push(Arc::clone(shared));
                    }
                }
                if matched.is_empty() {
                    return Err(DispatchError::UnknownRole { role: role.clone() });
                }
                Ok(matched)
            }
        }
    }

    /// Dispatches `command` to every resolved host and returns the results
    /// in input order.
    ///
    /// Sequential by default; `opts.run_in_parallel` switches to one task
    /// per host. A parallel dispatch blocks until every task has completed
    /// and only then re-raises the first error in task-start order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on resolution, execution, or hook failure.
    pub async fn dispatch(
        &self,
        target: &Target,
        command: &Command,
        opts: &ExecOptions,
        hook: Option<&ResultHook>,
        ctx: &RunContext,
    ) -> Result<Vec<CommandResult>, DispatchError> {
        let resolved = self.resolve(target).await?;
        if opts.run_in_parallel {
            dispatch_parallel(&resolved, command, opts, hook, ctx).await
        } else {
            dispatch_sequential(&resolved, command, opts, hook, ctx).await
        }
    }

    /// Dispatches to a target that must resolve to exactly one host.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AmbiguousTarget`] when the target resolves
    /// to zero or several hosts, otherwise [`DispatchError`] as for
    /// [`Dispatcher::dispatch`].
    pub async fn dispatch_one(
        &self,
        target: &Target,
        command: &Command,
        opts: &ExecOptions,
        ctx: &RunContext,
    ) -> Result<CommandResult, DispatchError> {
        let resolved = self.resolve(target).await?;
        let [host] = resolved.as_slice() else {
            return Err(DispatchError::AmbiguousTarget {
                count: resolved.len(),
            });
        };
        run_one(host, command, opts, None, ctx).await
    }
}

async fn run_one(
    shared: &SharedHost,
    command: &Command,
    opts: &ExecOptions,
    hook: Option<&ResultHook>,
    ctx: &RunContext,
) -> Result<CommandResult, DispatchError> {
    let mut host = shared.lock().await;
    let name = host.name().to_owned();
    let result = host
        .exec(command, opts, ctx)
        .await
        .map_err(|source| DispatchError::Exec {
            host: name.clone(),
            source,
        })?;
    drop(host);

    if let Some(hook) = hook {
        hook.invoke(&result)
            .map_err(|message| DispatchError::Hook {
                host: name,
                message,
            })?;
    }
    Ok(result)
}

async fn dispatch_sequential(
    hosts: &[SharedHost],
    command: &Command,
    opts: &ExecOptions,
    hook: Option<&ResultHook>,
    ctx: &RunContext,
) -> Result<Vec<CommandResult>, DispatchError> {
    let mut results = Vec::with_capacity(hosts.len());
    for shared in hosts {
        results.push(run_one(shared, command, opts, hook, ctx).await?);
    }
    Ok(results)
}

async fn dispatch_parallel(
    hosts: &[SharedHost],
    command: &Command,
    opts: &ExecOptions,
    hook: Option<&ResultHook>,
    ctx: &RunContext,
) -> Result<Vec<CommandResult>, DispatchError> {
    let mut handles = Vec::with_capacity(hosts.len());
    for shared in hosts {
        let shared = Arc::clone(shared);
        let command = command.clone();
        let opts = opts.clone();
        let hook = hook.cloned();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            run_one(&shared, &command, &opts, hook.as_ref(), &ctx).await
        }));
    }

    // Indexed slots: awaiting handles in spawn order keeps results in input
    // order and guarantees every task joins before any error surfaces.
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(result)) => results.push(result),
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(DispatchError::Join {
                        message: join_err.to_string(),
                    });
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}
