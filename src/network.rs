//! Groups hosts by backend, drives provisioning, and enforces the
//! preserve-hosts cleanup policy.

use std::str::FromStr;

use thiserror::Error;

use crate::context::RunContext;
use crate::host::{Host, SharedHost, shared};
use crate::hypervisor::{BackendKind, HypervisorDriver, ProvisioningError};

/// Run-outcome-conditioned decision on whether provisioned resources are
/// torn down.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PreservePolicy {
    /// Never tear down.
    Always,
    /// Always tear down.
    #[default]
    Never,
    /// Tear down only when the run recorded a failure.
    OnFail,
    /// Tear down only when the run recorded no failure.
    OnPass,
}

impl PreservePolicy {
    /// Whether driver cleanup should run, given the recorded run outcome.
    #[must_use]
    pub const fn should_clean_up(self, run_failed: bool) -> bool {
        match self {
            Self::Always => false,
            Self::Never => true,
            Self::OnFail => run_failed,
            Self::OnPass => !run_failed,
        }
    }
}

impl std::fmt::Display for PreservePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::OnFail => "onfail",
            Self::OnPass => "onpass",
        };
        f.write_str(name)
    }
}

impl FromStr for PreservePolicy {
    type Err = PolicyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "onfail" => Ok(Self::OnFail),
            "onpass" => Ok(Self::OnPass),
            other => Err(PolicyParseError {
                value: other.to_owned(),
            }),
        }
    }
}

/// Raised when a preserve-hosts policy string is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown preserve-hosts policy '{value}'")]
pub struct PolicyParseError {
    /// Value that failed to parse.
    pub value: String,
}

/// Raised when teardown fails for a host batch. Later errors in the same
/// cleanup are logged only; the first one wins.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("cleanup of backend '{backend}' failed: {message}")]
pub struct CleanupError {
    /// Backend whose teardown failed first.
    pub backend: BackendKind,
    /// Description of the first failure.
    pub message: String,
}

/// Builds one driver per backend group. The seam keeps driver construction
/// (and its service credentials) out of the coordination layer.
pub trait DriverFactory {
    /// Builds a driver for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::UnknownBackend`] when the factory does
    /// not support the backend.
    fn build(&self, kind: BackendKind) -> Result<Box<dyn HypervisorDriver>, ProvisioningError>;
}

struct ProvisionedGroup {
    kind: BackendKind,
    driver: Box<dyn HypervisorDriver>,
    hosts: Vec<SharedHost>,
}

/// Coordination layer: partitions hosts by backend, drives each group's
/// driver, and applies the preserve-hosts policy at cleanup.
pub struct NetworkManager<F> {
    factory: F,
    policy: PreservePolicy,
    groups: Vec<ProvisionedGroup>,
    torn_down: bool,
}

impl<F: DriverFactory> NetworkManager<F> {
    /// Creates a manager with the given driver factory and cleanup policy.
    #[must_use]
    pub const fn new(factory: F, policy: PreservePolicy) -> Self {
        Self {
            factory,
            policy,
            groups: Vec::new(),
            torn_down: false,
        }
    }

    /// Provisions the declared hosts and returns them in declaration order.
    ///
    /// Hosts are partitioned by backend (group order is backend first
    /// appearance; within a group, declaration order is preserved). Driver
    /// construction for every group happens before any provisioning, so an
    /// unknown backend fails fast. Groups provision concurrently, one task
    /// per group; every group joins before the first error (in group order)
    /// is surfaced, and successfully provisioned groups stay registered for
    /// cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError`] when any group's provisioning fails.
    pub async fn provision(
        &mut self,
        hosts: Vec<Host>,
    ) -> Result<Vec<SharedHost>, ProvisioningError> {
        let mut partitions: Vec<(BackendKind, Vec<SharedHost>)> = Vec::new();
        for host in hosts {
            let kind = host.backend();
            let shared_host = shared(host);
            match partitions.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, group)) => group.push(shared_host),
                None => partitions.push((kind, vec![shared_host])),
            }
        }

        let mut pending = Vec::with_capacity(partitions.len());
        for (kind, group) in partitions {
            let driver = self.factory.build(kind)?;
            pending.push((kind, driver, group));
        }

        let mut tasks = Vec::with_capacity(pending.len());
        for (kind, mut driver, group) in pending {
            tasks.push(tokio::spawn(async move {
                let outcome = driver.provision(&group).await;
                (kind, driver, group, outcome)
            }));
        }

        let mut first_error = None;
        for task in tasks {
            match task.await {
                Ok((kind, driver, group, outcome)) => {
                    self.groups.push(ProvisionedGroup {
                        kind,
                        driver,
                        hosts: group,
                    });
                    if let Err(err) = outcome {
                        tracing::warn!(backend = %kind, error = %err, "group provisioning failed");
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(ProvisioningError::Service(
                            crate::hypervisor::ServiceError::new(join_err.to_string()),
                        ));
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(self.hosts())
    }

    /// Every provisioned host, flattened in declaration order.
    #[must_use]
    pub fn hosts(&self) -> Vec<SharedHost> {
        self.groups
            .iter()
            .flat_map(|group| group.hosts.iter().cloned())
            .collect()
    }

    /// Closes every open connection, then tears down each backend group if
    /// the preserve-hosts policy calls for it given the recorded run
    /// outcome.
    ///
    /// Teardown is attempted for every group even after a failure; only the
    /// first error is returned, the rest are logged. A second call performs
    /// no further destructive work (connections are still closed).
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError`] describing the first teardown failure.
    pub async fn cleanup(&mut self, ctx: &RunContext) -> Result<(), CleanupError> {
        for group in &self.groups {
            for shared_host in &group.hosts {
                shared_host.lock().await.close_connection();
            }
        }

        if !self.policy.should_clean_up(ctx.has_failures()) {
            tracing::info!(policy = %self.policy, "preserving hosts; skipping teardown");
            return Ok(());
        }
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let mut first_error = None;
        for group in &mut self.groups {
            if let Err(err) = group.driver.cleanup(&group.hosts).await {
                tracing::warn!(backend = %group.kind, error = %err, "teardown failed");
                if first_error.is_none() {
                    first_error = Some(CleanupError {
                        backend: group.kind,
                        message: err.to_string(),
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
