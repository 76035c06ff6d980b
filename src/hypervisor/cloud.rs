//! Driver that creates instances through a cloud API.
//!
//! Port-exposure rules are derived from declared roles, and the shared
//! hosts-file fragment is only generated once every host in the batch has
//! reported an address.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::sleep;

use crate::host::{Role, SharedHost};
use crate::hosts_file::{self, HostsEntry};
use crate::hypervisor::{
    DriverFuture, HypervisorDriver, ProvisionState, ProvisioningError, ServiceFuture,
};

/// Default delay between address polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on address polls per host.
pub const MAX_POLLS: u32 = 60;

/// SSH, exposed on every instance.
pub const SSH_PORT: u16 = 22;
/// Control-plane port exposed for master hosts.
pub const CONTROL_PLANE_PORT: u16 = 8140;
/// HTTPS port exposed for dashboard hosts.
pub const HTTPS_PORT: u16 = 443;
/// Data ports exposed for database hosts.
pub const DATABASE_PORTS: [u16; 2] = [8081, 8433];

/// Ports to expose for a host with `roles`, unioned across roles.
#[must_use]
pub fn exposed_ports(roles: &BTreeSet<Role>) -> BTreeSet<u16> {
    let mut ports = BTreeSet::from([SSH_PORT]);
    for role in roles {
        match role {
            Role::Master => {
                ports.insert(CONTROL_PLANE_PORT);
            }
            Role::Dashboard => {
                ports.insert(HTTPS_PORT);
            }
            Role::Database => {
                ports.extend(DATABASE_PORTS);
            }
            Role::Agent | Role::Custom(_) => {}
        }
    }
    ports
}

/// Request passed to the cloud create API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateSpec {
    /// Instance name.
    pub name: String,
    /// Boot image, resolved from the platform when not configured.
    pub image: String,
    /// Commercial flavor, resolved from the platform when not configured.
    pub flavor: String,
    /// Ports opened in the instance's security rules.
    pub exposed_ports: BTreeSet<u16>,
    /// Free-form tags attached to the instance.
    pub tags: Vec<String>,
}

/// Handle returned by the create API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudHandle {
    /// Provider-specific instance identifier.
    pub id: String,
}

/// Cloud create/terminate contract.
pub trait CloudService: Send + Sync {
    /// Creates an instance; its address becomes available later.
    fn create<'a>(&'a self, spec: &'a CreateSpec) -> ServiceFuture<'a, CloudHandle>;

    /// Address assigned to the instance, if any yet.
    fn address<'a>(&'a self, handle: &'a CloudHandle) -> ServiceFuture<'a, Option<IpAddr>>;

    /// Terminates and deletes the instance.
    fn terminate<'a>(&'a self, handle: &'a CloudHandle) -> ServiceFuture<'a, ()>;
}

/// Cloud-create driver with a full-batch readiness barrier.
pub struct CloudCreateDriver<S> {
    service: S,
    poll_interval: Duration,
    max_polls: u32,
    handles: BTreeMap<String, CloudHandle>,
    states: BTreeMap<String, ProvisionState>,
    hosts_fragment: Option<String>,
}

impl<S: CloudService> CloudCreateDriver<S> {
    /// Creates a driver over `service` with default poll bounds.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self {
            service,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            handles: BTreeMap::new(),
            states: BTreeMap::new(),
            hosts_fragment: None,
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

    /// The generated hosts-file fragment, present only after the whole
    /// batch became ready.
    #[must_use]
    pub fn hosts_file(&self) -> Option<&str> {
        self.hosts_fragment.as_deref()
    }

    async fn create_all(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        for shared in hosts {
            let host = shared.lock().await;
            let name = host.name().to_owned();
            let spec = CreateSpec {
                name: name.clone(),
                image: host
                    .config()
                    .image
                    .clone()
                    .unwrap_or_else(|| host.config().platform.clone()),
                flavor: host
                    .config()
                    .flavor
                    .clone()
                    .unwrap_or_else(|| flavor_for_platform(&host.config().platform)),
                exposed_ports: exposed_ports(host.roles()),
                tags: vec![format!("polihon-host-{name}")],
            };
            drop(host);

            self.states
                .insert(name.clone(), ProvisionState::Allocating);
            let handle = self.service.create(&spec).await?;
            tracing::info!(host = %name, instance = %handle.id, "instance created");
            self.handles.insert(name, handle);
        }
        Ok(())
    }

    async fn await_addresses(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        for shared in hosts {
            let mut host = shared.lock().await;
            let name = host.name().to_owned();
            let Some(handle) = self.handles.get(&name) else {
                continue;
            };
            self.states
                .insert(name.clone(), ProvisionState::AwaitingReady);

            let mut address = None;
            for poll in 1..=self.max_polls {
                if let Some(ip) = self.service.address(handle).await? {
                    address = Some(ip);
                    break;
                }
                if poll < self.max_polls {
                    sleep(self.poll_interval).await;
                }
            }
            let Some(ip) = address else {
                self.states.insert(name.clone(), ProvisionState::Failed);
                return Err(ProvisioningError::Timeout {
                    action: String::from("assigned address"),
                    host: name,
                });
            };
            host.set_ip(ip);
            self.states.insert(name, ProvisionState::Ready);
        }
        Ok(())
    }

    /// Runs after the readiness barrier: every host has an address, so the
    /// shared fragment can be generated and distributed.
    async fn distribute_hosts_file(&mut self, hosts: &[SharedHost]) {
        let mut entries = Vec::with_capacity(hosts.len());
        for shared in hosts {
            let host = shared.lock().await;
            if let Some(address) = host.ip() {
                entries.push(HostsEntry {
                    address,
                    fqdn: host.fqdn().to_owned(),
                    short_name: host.short_name().to_owned(),
                });
            }
        }
        let fragment = hosts_file::fragment(&entries);
        for shared in hosts {
            let mut host = shared.lock().await;
            host.set_hosts_file(fragment.clone());
        }
        self.hosts_fragment = Some(fragment);
    }

    async fn provision_batch(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        self.create_all(hosts).await?;
        self.await_addresses(hosts).await?;
        self.distribute_hosts_file(hosts).await;
        Ok(())
    }

    async fn terminate_all(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        let mut preserved = BTreeSet::new();
        for shared in hosts {
            let host = shared.lock().await;
            if host.config().preserve {
                preserved.insert(host.name().to_owned());
            }
        }

        let mut first_error = None;
        // Draining makes a second cleanup a no-op per instance.
        for (name, handle) in std::mem::take(&mut self.handles) {
            if preserved.contains(&name) {
                tracing::info!(host = %name, instance = %handle.id, "preserving instance");
                continue;
            }
            match self.service.terminate(&handle).await {
                Ok(()) => {
                    self.states.insert(name, ProvisionState::CleanedUp);
                }
                Err(err) => {
                    tracing::warn!(host = %name, error = %err, "terminate failed");
                    if first_error.is_none() {
                        first_error = Some(ProvisioningError::Service(err));
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Default flavor by platform family; small x86 unless the platform says
/// otherwise.
fn flavor_for_platform(platform: &str) -> String {
    if platform.contains("arm") || platform.contains("aarch64") {
        String::from("a1.small")
    } else {
        String::from("m1.small")
    }
}

impl<S: CloudService> HypervisorDriver for CloudCreateDriver<S> {
    fn provision<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.provision_batch(hosts))
    }

    fn cleanup<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.terminate_all(hosts))
    }
}
