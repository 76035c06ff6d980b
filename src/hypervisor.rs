//! Provisioning backend contract shared by all driver variants.
//!
//! The driver set is closed: a backend is selected by name through
//! [`BackendKind`], never by runtime type inspection. Every driver mutates
//! its hosts' connection-relevant fields during `provision` and offers an
//! idempotent, best-effort `cleanup`.

pub mod cloud;
pub mod container;
pub mod pooled;
pub mod snapshot;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::SharedHost;

/// The closed set of provisioning strategies.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// Lease a pre-existing host from an external pool service.
    Pooled,
    /// Revert a VM to a named snapshot, or clone it from a template.
    SnapshotClone,
    /// Create an instance through a cloud API.
    CloudCreate,
    /// Build and start a container.
    Container,
}

impl BackendKind {
    /// Canonical backend key used in host inventories.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Pooled => "pooled",
            Self::SnapshotClone => "snapshot",
            Self::CloudCreate => "cloud",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ProvisioningError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pooled" => Ok(Self::Pooled),
            "snapshot" => Ok(Self::SnapshotClone),
            "cloud" => Ok(Self::CloudCreate),
            "container" => Ok(Self::Container),
            other => Err(ProvisioningError::UnknownBackend {
                name: other.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = ProvisioningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(value: BackendKind) -> Self {
        value.key().to_owned()
    }
}

/// Per-host lifecycle as tracked by a driver within one run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProvisionState {
    /// No allocation attempted yet.
    #[default]
    Unprovisioned,
    /// Allocation request in flight.
    Allocating,
    /// Allocated, waiting for readiness.
    AwaitingReady,
    /// Ready for use.
    Ready,
    /// Allocation or readiness failed.
    Failed,
    /// Resources released.
    CleanedUp,
}

/// Errors raised while provisioning a batch of hosts. Always fatal for the
/// whole batch: a partial host set is treated as unusable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisioningError {
    /// Raised when a declared backend key is not in the supported set.
    #[error("unknown backend '{name}'")]
    UnknownBackend {
        /// Key as declared in the inventory.
        name: String,
    },
    /// Raised when a host lacks configuration its backend requires.
    #[error("host '{host}' is missing required config field '{field}'")]
    MissingConfig {
        /// Host being provisioned.
        host: String,
        /// Name of the absent field.
        field: String,
    },
    /// Raised when pooled templates never became available within the poll
    /// bound.
    #[error("pool exhausted; templates never became available: {templates:?}")]
    PoolExhausted {
        /// Templates that were never filled.
        templates: Vec<String>,
    },
    /// Raised when neither an existing VM nor a clone template exists.
    #[error("no VM named '{name}' and no template to clone from")]
    VmNotFound {
        /// VM name that was looked up.
        name: String,
    },
    /// Raised when a named snapshot is absent from the VM's snapshot tree.
    #[error("snapshot '{snapshot}' not found on VM '{vm}'")]
    SnapshotNotFound {
        /// VM whose tree was searched.
        vm: String,
        /// Snapshot name that was requested.
        snapshot: String,
    },
    /// Raised when a container platform has no known bootstrap recipe.
    #[error("no bootstrap recipe for platform '{platform}'")]
    UnsupportedPlatform {
        /// Platform string from the host config.
        platform: String,
    },
    /// Raised when a bounded readiness poll is exhausted.
    #[error("timed out waiting for {action} on host '{host}'")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Host that never became ready.
        host: String,
    },
    /// Wrapper for external service failures.
    #[error("provisioning service error: {0}")]
    Service(#[from] ServiceError),
}

/// Opaque failure reported by an external pool/cloud/VM/container service.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct ServiceError {
    /// Message returned by the service.
    pub message: String,
}

impl ServiceError {
    /// Wraps a service failure message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProvisioningError>> + Send + 'a>>;

/// Future returned by external service contracts.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Allocate/ready/cleanup contract implemented by every backend driver.
pub trait HypervisorDriver: Send {
    /// Provisions every host in the batch, mutating connection-relevant
    /// fields and marking each host ready or failed. An error aborts the
    /// whole batch.
    fn provision<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()>;

    /// Releases resources. Idempotent and best-effort: a failure on one
    /// host's teardown must not prevent attempting the rest, and is logged
    /// rather than propagated past the batch (the first error is returned
    /// after every host has been attempted).
    fn cleanup<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_keys_round_trip() {
        for kind in [
            BackendKind::Pooled,
            BackendKind::SnapshotClone,
            BackendKind::CloudCreate,
            BackendKind::Container,
        ] {
            assert_eq!(kind.key().parse::<BackendKind>().expect("known key"), kind);
        }
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = "vagrant".parse::<BackendKind>().expect_err("unsupported");
        assert_eq!(
            err,
            ProvisioningError::UnknownBackend {
                name: String::from("vagrant")
            }
        );
    }
}
