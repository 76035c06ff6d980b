//! Driver that leases pre-existing hosts from an external pool service.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::sleep;

use crate::host::SharedHost;
use crate::hypervisor::{
    DriverFuture, HypervisorDriver, ProvisionState, ProvisioningError, ServiceFuture,
};

/// Default delay between lease polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on lease polls per host.
pub const MAX_POLLS: u32 = 24;

/// Response to a lease request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PoolResponse {
    /// A host has been assigned.
    Ready {
        /// Hostname assigned by the pool.
        hostname: String,
        /// Token used to return the lease.
        token: String,
    },
    /// No host of the requested template is available yet.
    NotReady,
}

/// External lease/return API supplying hosts by template name.
pub trait PoolService: Send + Sync {
    /// Requests a host of `template`; may answer not-ready.
    fn request<'a>(&'a self, template: &'a str) -> ServiceFuture<'a, PoolResponse>;

    /// Returns a leased host to the pool.
    fn release<'a>(&'a self, token: &'a str) -> ServiceFuture<'a, ()>;
}

/// Pooled-lease driver. Cleanup returns tokens rather than destroying
/// anything.
pub struct PooledDriver<S> {
    service: S,
    poll_interval: Duration,
    max_polls: u32,
    leases: BTreeMap<String, String>,
    states: BTreeMap<String, ProvisionState>,
}

impl<S: PoolService> PooledDriver<S> {
    /// Creates a driver over `service` with default poll bounds.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self {
            service,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            leases: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    /// Overrides the poll bounds. Primarily used by tests.
    #[must_use]
    pub const fn with_poll_bounds(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Lifecycle state recorded for `host`.
    #[must_use]
    pub fn state(&self, host: &str) -> ProvisionState {
        self.states.get(host).copied().unwrap_or_default()
    }

    /// Tokens currently held, keyed by host name.
    #[must_use]
    pub const fn leases(&self) -> &BTreeMap<String, String> {
        &self.leases
    }

    async fn allocate(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        let mut unfilled = Vec::new();
        for shared in hosts {
            let mut host = shared.lock().await;
            let name = host.name().to_owned();
            let template = host.config().template.clone().ok_or_else(|| {
                ProvisioningError::MissingConfig {
                    host: name.clone(),
                    field: String::from("template"),
                }
            })?;

            self.states
                .insert(name.clone(), ProvisionState::Allocating);
            let mut leased = false;
            for poll in 1..=self.max_polls {
                match self.service.request(&template).await? {
                    PoolResponse::Ready { hostname, token } => {
                        tracing::info!(host = %name, %hostname, "pool lease granted");
                        host.set_assigned_hostname(hostname);
                        self.leases.insert(name.clone(), token);
                        self.states.insert(name.clone(), ProvisionState::Ready);
                        leased = true;
                        break;
                    }
                    PoolResponse::NotReady if poll < self.max_polls => {
                        sleep(self.poll_interval).await;
                    }
                    PoolResponse::NotReady => {}
                }
            }
            if !leased {
                self.states.insert(name, ProvisionState::Failed);
                unfilled.push(template);
            }
        }

        if unfilled.is_empty() {
            Ok(())
        } else {
            Err(ProvisioningError::PoolExhausted {
                templates: unfilled,
            })
        }
    }

    async fn release_all(&mut self) -> Result<(), ProvisioningError> {
        let mut first_error = None;
        // Draining makes a second cleanup a no-op per lease.
        for (name, token) in std::mem::take(&mut self.leases) {
            match self.service.release(&token).await {
                Ok(()) => {
                    self.states.insert(name, ProvisionState::CleanedUp);
                }
                Err(err) => {
                    tracing::warn!(host = %name, error = %err, "pool release failed");
                    if first_error.is_none() {
                        first_error = Some(ProvisioningError::Service(err));
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<S: PoolService> HypervisorDriver for PooledDriver<S> {
    fn provision<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.allocate(hosts))
    }

    fn cleanup<'a>(&'a mut self, _hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.release_all())
    }
}
