//! Host inventory value object consumed from external configuration.
//!
//! File formats and multi-source merging are external collaborators; this
//! module only defines the deserialised shape and turns it into hosts with
//! fully merged configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use thiserror::Error;

use crate::host::{ConfigLayer, Host, HostConfig, HostError, Role};
use crate::hypervisor::{BackendKind, ProvisioningError};

/// One declared host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct HostSpec {
    /// Unique host name (inventory key).
    pub name: String,
    /// Backend key (`pooled`, `snapshot`, `cloud`, `container`).
    pub backend: String,
    /// Role tags; unordered.
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    /// Per-host configuration overrides (highest precedence).
    #[serde(default)]
    pub config: ConfigLayer,
}

/// Full inventory: global defaults, backend-type defaults, and declared
/// hosts in declaration order.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Inventory {
    /// Global defaults (lowest precedence).
    pub global: ConfigLayer,
    /// Defaults per backend key (middle precedence).
    pub backend_defaults: BTreeMap<String, ConfigLayer>,
    /// Declared hosts; order is preserved through provisioning.
    pub hosts: Vec<HostSpec>,
}

/// Errors raised while validating an inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Raised when two hosts share a name.
    #[error("duplicate host name '{name}'")]
    DuplicateHost {
        /// Name declared more than once.
        name: String,
    },
    /// Raised when a host declares an unsupported backend key.
    #[error("host '{host}': {source}")]
    Backend {
        /// Host with the bad key.
        host: String,
        /// Underlying parse failure.
        #[source]
        source: ProvisioningError,
    },
    /// Raised when configuration merging fails.
    #[error(transparent)]
    Host(#[from] HostError),
}

impl Inventory {
    /// Builds hosts with merged configuration, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] on duplicate names, unknown backend keys,
    /// or incomplete configuration.
    pub fn build_hosts(&self) -> Result<Vec<Host>, InventoryError> {
        let mut seen = BTreeSet::new();
        let mut hosts = Vec::with_capacity(self.hosts.len());
        let empty = ConfigLayer::default();

        for spec in &self.hosts {
            if !seen.insert(spec.name.clone()) {
                return Err(InventoryError::DuplicateHost {
                    name: spec.name.clone(),
                });
            }
            let backend: BackendKind =
                spec.backend
                    .parse()
                    .map_err(|source| InventoryError::Backend {
                        host: spec.name.clone(),
                        source,
                    })?;
            let backend_defaults = self.backend_defaults.get(&spec.backend).unwrap_or(&empty);
            let config =
                HostConfig::from_layers(&spec.name, &self.global, backend_defaults, &spec.config)?;
            hosts.push(Host::new(
                spec.name.clone(),
                backend,
                spec.roles.clone(),
                config,
            ));
        }
        Ok(hosts)
    }
}
