//! Host identity, layered configuration, and command execution.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::command::{Command, ExecOptions};
use crate::connection::{Connection, ConnectionError};
use crate::context::RunContext;
use crate::hypervisor::BackendKind;
use crate::result::CommandResult;

/// A host shared across dispatch tasks. The mutex enforces that a
/// connection is never driven by two concurrent callers.
pub type SharedHost = Arc<Mutex<Host>>;

/// Role tag used for targeting and port-exposure rules.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Control-plane host.
    Master,
    /// Managed agent host.
    Agent,
    /// Web dashboard host.
    Dashboard,
    /// Database host.
    Database,
    /// Any other tag, carried verbatim.
    Custom(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "master" => Self::Master,
            "agent" => Self::Agent,
            "dashboard" => Self::Dashboard,
            "database" => Self::Database,
            _ => Self::Custom(value),
        }
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Agent => write!(f, "agent"),
            Self::Dashboard => write!(f, "dashboard"),
            Self::Database => write!(f, "database"),
            Self::Custom(tag) => write!(f, "{tag}"),
        }
    }
}

/// One precedence layer of host configuration. All fields optional; unset
/// fields defer to lower-precedence layers.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigLayer {
    /// Platform string (for example `ubuntu-24.04-amd64`).
    pub platform: Option<String>,
    /// Remote user to connect as.
    pub user: Option<String>,
    /// SSH port exposed by the host.
    pub ssh_port: Option<u16>,
    /// Environment fragments spliced into rendered commands.
    pub env: Option<BTreeMap<String, String>>,
    /// Pool or clone template name.
    pub template: Option<String>,
    /// Snapshot name for the snapshot-clone backend.
    pub snapshot: Option<String>,
    /// Boot image for cloud and container backends.
    pub image: Option<String>,
    /// Instance flavor for the cloud backend.
    pub flavor: Option<String>,
    /// Run the container privileged.
    pub privileged: Option<bool>,
    /// Bind-mounted volumes, `host:container` form.
    pub volumes: Option<Vec<String>>,
    /// Container ports published to the host side.
    pub published_ports: Option<Vec<u16>>,
    /// Preserve this resource at cleanup regardless of policy.
    pub preserve: Option<bool>,
}

impl ConfigLayer {
    fn overlay(&mut self, higher: &Self) {
        merge(&mut self.platform, &higher.platform);
        merge(&mut self.user, &higher.user);
        merge(&mut self.ssh_port, &higher.ssh_port);
        merge(&mut self.env, &higher.env);
        merge(&mut self.template, &higher.template);
        merge(&mut self.snapshot, &higher.snapshot);
        merge(&mut self.image, &higher.image);
        merge(&mut self.flavor, &higher.flavor);
        merge(&mut self.privileged, &higher.privileged);
        merge(&mut self.volumes, &higher.volumes);
        merge(&mut self.published_ports, &higher.published_ports);
        merge(&mut self.preserve, &higher.preserve);
    }
}

fn merge<T: Clone>(slot: &mut Option<T>, higher: &Option<T>) {
    if let Some(value) = higher {
        *slot = Some(value.clone());
    }
}

/// Fully merged host configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostConfig {
    /// Platform string, required by every backend.
    pub platform: String,
    /// Remote user; defaults to `root`.
    pub user: String,
    /// SSH port; defaults to 22.
    pub ssh_port: u16,
    /// Environment fragments spliced into rendered commands.
    pub env: BTreeMap<String, String>,
    /// Pool or clone template name.
    pub template: Option<String>,
    /// Snapshot name for the snapshot-clone backend.
    pub snapshot: Option<String>,
    /// Boot image for cloud and container backends.
    pub image: Option<String>,
    /// Instance flavor for the cloud backend.
    pub flavor: Option<String>,
    /// Run the container privileged.
    pub privileged: bool,
    /// Bind-mounted volumes.
    pub volumes: Vec<String>,
    /// Published container ports.
    pub published_ports: Vec<u16>,
    /// Preserve this resource at cleanup regardless of policy.
    pub preserve: bool,
}

impl HostConfig {
    /// Merges configuration layers, lowest to highest precedence:
    /// global defaults, backend-type defaults, per-host overrides.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingPlatform`] when no layer sets a platform.
    pub fn from_layers(
        host: &str,
        global: &ConfigLayer,
        backend_defaults: &ConfigLayer,
        per_host: &ConfigLayer,
    ) -> Result<Self, HostError> {
        let mut merged = global.clone();
        merged.overlay(backend_defaults);
        merged.overlay(per_host);

        let platform = merged
            .platform
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HostError::MissingPlatform {
                host: host.to_owned(),
            })?
            .to_owned();

        Ok(Self {
            platform,
            user: merged.user.unwrap_or_else(|| String::from("root")),
            ssh_port: merged.ssh_port.unwrap_or(22),
            env: merged.env.unwrap_or_default(),
            template: merged.template,
            snapshot: merged.snapshot,
            image: merged.image,
            flavor: merged.flavor,
            privileged: merged.privileged.unwrap_or(false),
            volumes: merged.volumes.unwrap_or_default(),
            published_ports: merged.published_ports.unwrap_or_default(),
            preserve: merged.preserve.unwrap_or(false),
        })
    }
}

/// Errors raised during host construction or execution.
#[derive(Debug, Error)]
pub enum HostError {
    /// Raised when no configuration layer provides a platform.
    #[error("host '{host}' has no platform configured")]
    MissingPlatform {
        /// Host being configured.
        host: String,
    },
}

/// Errors raised while executing commands against a host.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Raised when a command is executed before provisioning installed a
    /// connection.
    #[error("host '{host}' has no connection installed")]
    NotProvisioned {
        /// Host the command targeted.
        host: String,
    },
    /// Raised when the transport session fails.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Raised when a command exits outside the acceptable set.
    #[error("command `{command}` on '{host}' exited with {exit_code:?}, acceptable: {acceptable:?}")]
    CommandFailure {
        /// Host the command ran on.
        host: String,
        /// Rendered command line.
        command: String,
        /// Exit code observed.
        exit_code: Option<i32>,
        /// Exit codes that would have been accepted.
        acceptable: BTreeSet<i32>,
    },
}

/// A system under test: identity, role tags, merged configuration, and at
/// most one connection.
#[derive(Debug)]
pub struct Host {
    name: String,
    roles: BTreeSet<Role>,
    backend: BackendKind,
    config: HostConfig,
    ip: Option<IpAddr>,
    port: Option<u16>,
    assigned_hostname: Option<String>,
    hosts_file: Option<String>,
    connection: Option<Connection>,
}

impl Host {
    /// Creates a host with no connection installed.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        backend: BackendKind,
        roles: BTreeSet<Role>,
        config: HostConfig,
    ) -> Self {
        Self {
            name: name.into(),
            roles,
            backend,
            config,
            ip: None,
            port: None,
            assigned_hostname: None,
            hosts_file: None,
            connection: None,
        }
    }

    /// Unique host name (inventory key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role tags declared for this host.
    #[must_use]
    pub const fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    /// Returns `true` when `role` is among this host's tags.
    #[must_use]
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Declared provisioning backend.
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Merged configuration record.
    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Address assigned by the backend, if provisioned.
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// SSH port assigned by the backend, falling back to the configured one.
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => self.config.ssh_port,
        }
    }

    /// Hostname assigned by the backend (pool lease or clone name).
    #[must_use]
    pub fn assigned_hostname(&self) -> Option<&str> {
        self.assigned_hostname.as_deref()
    }

    /// Hosts-file fragment distributed after batch provisioning.
    #[must_use]
    pub fn hosts_file(&self) -> Option<&str> {
        self.hosts_file.as_deref()
    }

    /// Fully qualified name: the inventory name if already dotted, else the
    /// backend-assigned hostname, else the bare name.
    #[must_use]
    pub fn fqdn(&self) -> &str {
        if self.name.contains('.') {
            return &self.name;
        }
        self.assigned_hostname().unwrap_or(&self.name)
    }

    /// Name up to the first dot.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Records the backend-assigned address. Only called during provisioning.
    pub const fn set_ip(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    /// Records the backend-assigned port. Only called during provisioning.
    pub const fn set_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// Records the backend-assigned hostname. Only called during
    /// provisioning.
    pub fn set_assigned_hostname(&mut self, hostname: impl Into<String>) {
        self.assigned_hostname = Some(hostname.into());
    }

    /// Stores the shared hosts-file fragment for peer discovery.
    pub fn set_hosts_file(&mut self, fragment: impl Into<String>) {
        self.hosts_file = Some(fragment.into());
    }

    /// Installs the connection created during provisioning. The transport
    /// session itself is still established lazily on first execution.
    pub fn install_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    /// Returns `true` when a connection has been installed.
    #[must_use]
    pub const fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Closes the connection if one is open. Safe to call repeatedly.
    pub fn close_connection(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close();
        }
    }

    /// Renders and executes `command` on this host.
    ///
    /// Unless `opts.silent`, the finalized result is reported to the context
    /// sink before the exit-code check runs, so failures stay visible even
    /// when they raise. `opts.accept_all_exit_codes` or membership in
    /// `opts.acceptable_exit_codes` suppresses the failure.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotProvisioned`] when no connection is
    /// installed, [`ExecError::Connection`] on transport failure, and
    /// [`ExecError::CommandFailure`] on a non-acceptable exit code.
    pub async fn exec(
        &mut self,
        command: &Command,
        opts: &ExecOptions,
        ctx: &RunContext,
    ) -> Result<CommandResult, ExecError> {
        let line = command.render(self);
        let mut effective = opts.clone();
        effective.dry_run = opts.dry_run || ctx.dry_run();

        let name = self.name.clone();
        let connection = self
            .connection
            .as_mut()
            .ok_or(ExecError::NotProvisioned { host: name })?;
        let result = connection.execute(&line, &effective).await?;

        if !opts.silent {
            ctx.sink().report(&result);
        }
        if opts.accept_all_exit_codes || result.exit_code_in(&opts.acceptable_exit_codes) {
            return Ok(result);
        }
        ctx.record_failure();
        Err(ExecError::CommandFailure {
            host: self.name.clone(),
            command: line,
            exit_code: result.exit_code(),
            acceptable: opts.acceptable_exit_codes.clone(),
        })
    }

    /// Copies a local path to this host, returning the synthetic transfer
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotProvisioned`] or [`ExecError::Connection`].
    pub async fn copy_to(
        &mut self,
        source: &Utf8Path,
        destination: &Utf8Path,
        recursive: bool,
        ctx: &RunContext,
    ) -> Result<CommandResult, ExecError> {
        let name = self.name.clone();
        let connection = self
            .connection
            .as_mut()
            .ok_or(ExecError::NotProvisioned { host: name })?;
        let result = connection.copy_to(source, destination, recursive).await?;
        ctx.sink().report(&result);
        Ok(result)
    }

    /// Copies a path from this host, returning the synthetic transfer
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NotProvisioned`] or [`ExecError::Connection`].
    pub async fn copy_from(
        &mut self,
        source: &Utf8Path,
        destination: &Utf8Path,
        recursive: bool,
        ctx: &RunContext,
    ) -> Result<CommandResult, ExecError> {
        let name = self.name.clone();
        let connection = self
            .connection
            .as_mut()
            .ok_or(ExecError::NotProvisioned { host: name })?;
        let result = connection.copy_from(source, destination, recursive).await?;
        ctx.sink().report(&result);
        Ok(result)
    }
}

/// Wraps a host for shared use across dispatch tasks.
#[must_use]
pub fn shared(host: Host) -> SharedHost {
    Arc::new(Mutex::new(host))
}
