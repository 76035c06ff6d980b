//! Driver that builds a bootstrap image and runs each host as a container.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::time::sleep;
use uuid::Uuid;

use crate::host::SharedHost;
use crate::hypervisor::{
    DriverFuture, HypervisorDriver, ProvisionState, ProvisioningError, ServiceFuture,
};

/// Default delay between port-mapping inspections.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default bound on port-mapping inspections per container.
pub const MAX_POLLS: u32 = 20;

/// Containers expose sshd on this internal port; the host-side mapping is
/// discovered from inspection.
pub const CONTAINER_SSH_PORT: u16 = 22;

/// Build recipe for a per-platform bootstrap image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSpec {
    /// Base image the bootstrap steps run on.
    pub base_image: String,
    /// Package-manager bootstrap commands baked in as build steps.
    pub build_steps: Vec<String>,
}

/// Runtime options for one container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Image identifier returned by the build.
    pub image: String,
    /// Container name.
    pub name: String,
    /// Container ports published to the host side.
    pub published_ports: Vec<u16>,
    /// Run privileged.
    pub privileged: bool,
    /// Bind-mounted volumes, `host:container` form.
    pub volumes: Vec<String>,
}

/// Handle to a running container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerHandle {
    /// Runtime-specific container identifier.
    pub id: String,
}

/// Container runtime contract (build, run, inspect, remove).
pub trait ContainerRuntime: Send + Sync {
    /// Builds a bootstrap image and returns its identifier.
    fn build<'a>(&'a self, spec: &'a ImageSpec) -> ServiceFuture<'a, String>;

    /// Creates and starts a container.
    fn create_and_start<'a>(&'a self, spec: &'a ContainerSpec) -> ServiceFuture<'a, ContainerHandle>;

    /// Host-side port mapped to the container's SSH port, once assigned.
    fn ssh_port<'a>(&'a self, handle: &'a ContainerHandle) -> ServiceFuture<'a, Option<u16>>;

    /// Kills a running container.
    fn kill<'a>(&'a self, handle: &'a ContainerHandle) -> ServiceFuture<'a, ()>;

    /// Deletes a stopped container.
    fn remove_container<'a>(&'a self, handle: &'a ContainerHandle) -> ServiceFuture<'a, ()>;

    /// Deletes a built image.
    fn remove_image<'a>(&'a self, image: &'a str) -> ServiceFuture<'a, ()>;
}

/// Package-manager bootstrap commands for `platform`, baked into the image
/// build.
///
/// # Errors
///
/// Returns [`ProvisioningError::UnsupportedPlatform`] when no recipe exists
/// for the platform family.
pub fn bootstrap_steps(platform: &str) -> Result<Vec<String>, ProvisioningError> {
    let install = if platform.starts_with("ubuntu") || platform.starts_with("debian") {
        "apt-get update && apt-get install -y openssh-server openssh-client"
    } else if platform.starts_with("el")
        || platform.starts_with("centos")
        || platform.starts_with("redhat")
        || platform.starts_with("fedora")
    {
        "dnf install -y openssh-server openssh-clients"
    } else if platform.starts_with("sles") || platform.starts_with("opensuse") {
        "zypper --non-interactive install openssh"
    } else {
        return Err(ProvisioningError::UnsupportedPlatform {
            platform: platform.to_owned(),
        });
    };
    Ok(vec![
        install.to_owned(),
        String::from("mkdir -p /var/run/sshd"),
        String::from("sed -i 's/^#\\?PermitRootLogin.*/PermitRootLogin yes/' /etc/ssh/sshd_config"),
    ])
}

/// Container driver: build image, run container, discover the dynamic SSH
/// port from inspection.
pub struct ContainerDriver<R> {
    runtime: R,
    poll_interval: Duration,
    max_polls: u32,
    containers: BTreeMap<String, ContainerHandle>,
    images: BTreeMap<String, String>,
    states: BTreeMap<String, ProvisionState>,
}

impl<R: ContainerRuntime> ContainerDriver<R> {
    /// Creates a driver over `runtime` with default poll bounds.
    #[must_use]
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            containers: BTreeMap::new(),
            images: BTreeMap::new(),
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

            let base_image = host
                .config()
                .image
                .clone()
                .unwrap_or_else(|| host.config().platform.clone());
            let image_spec = ImageSpec {
                base_image,
                build_steps: bootstrap_steps(&host.config().platform)?,
            };
            let image = self.runtime.build(&image_spec).await?;
            self.images.insert(name.clone(), image.clone());

            let mut published_ports = host.config().published_ports.clone();
            if !published_ports.contains(&CONTAINER_SSH_PORT) {
                published_ports.push(CONTAINER_SSH_PORT);
            }
            let spec = ContainerSpec {
                image,
                name: format!("polihon-{}-{}", host.short_name(), Uuid::new_v4()),
                published_ports,
                privileged: host.config().privileged,
                volumes: host.config().volumes.clone(),
            };
            let handle = self.runtime.create_and_start(&spec).await?;
            tracing::info!(host = %name, container = %handle.id, "container started");
            self.containers.insert(name.clone(), handle.clone());
            self.states
                .insert(name.clone(), ProvisionState::AwaitingReady);

            let mut ssh_port = None;
            for poll in 1..=self.max_polls {
                if let Some(port) = self.runtime.ssh_port(&handle).await? {
                    ssh_port = Some(port);
                    break;
                }
                if poll < self.max_polls {
                    sleep(self.poll_interval).await;
                }
            }
            let Some(port) = ssh_port else {
                self.states.insert(name.clone(), ProvisionState::Failed);
                return Err(ProvisioningError::Timeout {
                    action: String::from("published SSH port"),
                    host: name,
                });
            };

            host.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
            host.set_port(port);
            self.states.insert(name, ProvisionState::Ready);
        }
        Ok(())
    }

    async fn teardown(&mut self, hosts: &[SharedHost]) -> Result<(), ProvisioningError> {
        let mut preserved = std::collections::BTreeSet::new();
        for shared in hosts {
            let host = shared.lock().await;
            if host.config().preserve {
                preserved.insert(host.name().to_owned());
            }
        }

        let mut first_error = None;
        // Draining makes a second cleanup a no-op per container.
        for (name, handle) in std::mem::take(&mut self.containers) {
            if let Err(err) = self.runtime.kill(&handle).await {
                tracing::warn!(host = %name, error = %err, "kill failed");
                if first_error.is_none() {
                    first_error = Some(ProvisioningError::Service(err));
                }
            }
            if let Err(err) = self.runtime.remove_container(&handle).await {
                tracing::warn!(host = %name, error = %err, "container removal failed");
                if first_error.is_none() {
                    first_error = Some(ProvisioningError::Service(err));
                }
                continue;
            }
            self.states.insert(name, ProvisionState::CleanedUp);
        }
        for (name, image) in std::mem::take(&mut self.images) {
            if preserved.contains(&name) {
                tracing::info!(host = %name, %image, "preserving image");
                continue;
            }
            if let Err(err) = self.runtime.remove_image(&image).await {
                tracing::warn!(host = %name, error = %err, "image removal failed");
                if first_error.is_none() {
                    first_error = Some(ProvisioningError::Service(err));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<R: ContainerRuntime> HypervisorDriver for ContainerDriver<R> {
    fn provision<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.provision_all(hosts))
    }

    fn cleanup<'a>(&'a mut self, hosts: &'a [SharedHost]) -> DriverFuture<'a, ()> {
        Box::pin(self.teardown(hosts))
    }
}
