//! Host and connection fixtures shared across integration tests.

#![expect(
    dead_code,
    reason = "each test binary uses a subset of the shared fixtures"
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use polihon::connection::Connection;
use polihon::host::{ConfigLayer, Host, HostConfig, Role, SharedHost, shared};
use polihon::hypervisor::BackendKind;
use polihon::test_support::ScriptedTransport;

/// Merged configuration with only a platform set.
pub fn config(platform: &str) -> HostConfig {
    config_with(platform, ConfigLayer::default())
}

/// Merged configuration from a platform plus per-host overrides.
pub fn config_with(platform: &str, mut per_host: ConfigLayer) -> HostConfig {
    if per_host.platform.is_none() {
        per_host.platform = Some(platform.to_owned());
    }
    HostConfig::from_layers(
        "fixture",
        &ConfigLayer::default(),
        &ConfigLayer::default(),
        &per_host,
    )
    .expect("platform is set")
}

/// Bare unprovisioned host.
pub fn host(name: &str, backend: BackendKind, platform: &str) -> Host {
    Host::new(name, backend, BTreeSet::new(), config(platform))
}

/// Host carrying role tags.
pub fn host_with_roles(name: &str, roles: impl IntoIterator<Item = Role>, platform: &str) -> Host {
    Host::new(
        name,
        BackendKind::CloudCreate,
        roles.into_iter().collect(),
        config(platform),
    )
}

/// Host with a connection over `transport`, using fast retry bounds.
pub fn connected_host(name: &str, platform: &str, transport: &ScriptedTransport) -> Host {
    let mut host = host(name, BackendKind::Pooled, platform);
    host.install_connection(
        Connection::new(name, Arc::new(transport.clone())).with_connect_retry(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
        ),
    );
    host
}

/// Shared variant of [`connected_host`].
pub fn shared_connected_host(
    name: &str,
    platform: &str,
    transport: &ScriptedTransport,
) -> SharedHost {
    shared(connected_host(name, platform, transport))
}
