//! Driver that reverts VMs to named snapshots or clones them from
//! templates.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::sleep;

use crate::host::{Host, SharedHost};
use crate::hypervisor::{
    DriverFuture, HypervisorDriver, ProvisionState, ProvisioningError, ServiceFuture,
};

/// Default delay between guest readiness polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on guest readiness polls per host.
pub const MAX_POLLS: u32 = 60;

/// A node in a VM's snapshot tree. Snapshots nest arbitrarily deep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmSnapshot {
    name: String,
    children: Vec<VmSnapshot>,
}

impl VmSnapshot {
    /// Creates a leaf snapshot.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Attaches child snapshots.
    #[must_use]
    pub fn with_children(mut self, children: Vec<VmSnapshot>) -> Self {
        self.children = children;
        self
    }

    /// Snapshot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Walks a snapshot tree depth-first and returns the first node matching
/// `name`, or `None` when nothing matches. Never raises on a miss.
#[must_use]
pub fn find_snapshot<'a>(roots: &'a [VmSnapshot], name: &str) -> Option<&'a VmSnapshot> {
    for snapshot in roots {
        if snapshot.name == name {
            return Some(snapshot);
        }
        if let Some(found) = find_snapshot(&snapshot.children, name) {
            return Some(found);
        }
    }
    None
}

/// Handle to a backing VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmHandle {
    /// Provider-specific identifier.
    pub id: String,
    /// VM name as shown by the hypervisor.
    pub name: String,
}

/// Hypervisor API consumed by the snapshot-clone driver.
pub trait VmService: Send + Sync {
    /// Locates a VM by name.
    fn find_vm<'a>(&'a self, name: &'a str) -> ServiceFuture<'a, Option<VmHandle>>;

    /// Lists the VM's snapshot tree roots.
    fn snapshots<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, Vec<VmSnapshot>>;

    /// Reverts the VM to the named snapshot.
    fn revert<'a>(&'a self, vm: &'a VmHandle, snapshot: &'a str) -> ServiceFuture<'a, ()>;

    /// Clones a new VM named `name` from `template`.
    fn clone_from_template<'a>(
        &'a self,
        template: &'a str,
        name: &'a str,
    ) -> ServiceFuture<'a, VmHandle>;

    /// Powers the VM on.
    fn power_on<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()>;

    /// Powers the VM off.
    fn power_off<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()>;

    /// Destroys a VM entirely.
    fn destroy<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, ()>;

    /// Address reported by the guest agent once networking is up.
    fn guest_address<'a>(&'a self, vm: &'a VmHandle) -> ServiceFuture<'a, Option<IpAddr>>;
}

/// Snapshot-revert / template-clone driver.
///
/// A missing VM, template, or snapshot aborts the whole batch: a partially
/// provisioned declared host set is unusable.
pub struct SnapshotCloneDriver<S> {
    service: S,
    poll_interval: Duration,
    max_polls: u32,
    handles: BTreeMap<String, VmHandle>,
    cloned: BTreeSet<String>,
    states: BTreeMap<String, ProvisionState>,
}

impl<S: VmService> SnapshotCloneDriver<S> {
    /// Creates a driver over `service` with default poll bounds.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self {
            service,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            handles: BTreeMap::new(),
            cloned: BTreeSet::new(),
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

    async fn provision_all(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        for shared in hosts {
            let mut host = shared.lock().await;
            let name = host.name().to_owned();
            self.states
                .insert(name.clone(), ProvisionState::Allocating);

            let vm = match self.locate_or_clone(&name, host.config().template.as_deref()).await {
                Ok(vm) => vm,
                Err(err) => {
                    self.states.insert(name, ProvisionState::Failed);
                    return Err(err);
                }
            };
            // Registered before any readiness work so that teardown can
            // reach the VM even when provisioning fails mid-way.
            self.handles.insert(name.clone(), vm.clone());
            self.states
                .insert(name.clone(), ProvisionState::AwaitingReady);

            if let Err(err) = self.bring_up(&mut host, &vm).await {
                self.states.insert(name, ProvisionState::Failed);
                return Err(err);
            }
            self.states.insert(name, ProvisionState::Ready);
        }
        Ok(())
    }

    async fn bring_up(&self, host: &mut Host, vm: &VmHandle) -> Result<(), ProvisioningError> {
        if let Some(snapshot_name) = host.config().snapshot.clone() {
            let tree = self.service.snapshots(vm).await?;
            if find_snapshot(&tree, &snapshot_name).is_none() {
                return Err(ProvisioningError::SnapshotNotFound {
                    vm: vm.name.clone(),
                    snapshot: snapshot_name,
                });
            }
            self.service.revert(vm, &snapshot_name).await?;
        }

        self.service.power_on(vm).await?;

        let mut address = None;
        for poll in 1..=self.max_polls {
            if let Some(ip) = self.service.guest_address(vm).await? {
                address = Some(ip);
                break;
            }
            if poll < self.max_polls {
                sleep(self.poll_interval).await;
            }
        }
        let Some(ip) = address else {
            return Err(ProvisioningError::Timeout {
                action: String::from("guest networking"),
                host: host.name().to_owned(),
            });
        };
        host.set_ip(ip);
        Ok(())
    }

    async fn locate_or_clone(
        &mut self,
        name: &str,
        template: Option<&str>,
    ) -> Result<VmHandle, ProvisioningError> {
        if let Some(vm) = self.service.find_vm(name).await? {
            return Ok(vm);
        }
        let Some(template_name) = template else {
            return Err(ProvisioningError::VmNotFound {
                name: name.to_owned(),
            });
        };
        tracing::info!(host = %name, template = %template_name, "cloning VM from template");
        let vm = self.service.clone_from_template(template_name, name).await?;
        self.cloned.insert(name.to_owned());
        Ok(vm)
    }

    async fn teardown(&mut self) -> Result<(), ProvisioningError> {
        let mut first_error = None;
        // Draining makes a second cleanup a no-op per VM.
        for (name, vm) in std::mem::take(&mut self.handles) {
            if let Err(err) = self.service.power_off(&vm).await {
                tracing::warn!(host = %name, error = %err, "power off failed");
                if first_error.is_none() {
                    first_error = Some(ProvisioningError::Service(err));
                }
                continue;
            }
            // Only VMs this driver cloned are destroyed; reverted VMs stay
            // powered off for the next run.
            if self.cloned.remove(&name) {
                if let Err(err) = self.service.destroy(&vm).await {
                    tracing::warn!(host = %name, error = %err, "destroy failed");
                    if first_error.is_none() {
                        first_error = Some(ProvisioningError::Service(err));
                    }
                    continue;
                }
            }
            self.states.insert(name, ProvisionState::CleanedUp);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<S: VmService> HypervisorDriver for SnapshotCloneDriver<S> {
    fn provision<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.provision_all(hosts))
    }

    fn cleanup<'a>(&'a mut self, _hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.teardown())
    }
}
