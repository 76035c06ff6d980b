//! Inventory deserialisation and layered configuration merging.

#[path = "common/test_constants.rs"]
mod test_constants;

use polihon::host::{ConfigLayer, HostConfig, HostError, Role};
use polihon::hypervisor::BackendKind;
use polihon::inventory::{Inventory, InventoryError};
use test_constants::UBUNTU_PLATFORM;

fn layer(platform: Option<&str>, user: Option<&str>) -> ConfigLayer {
    ConfigLayer {
        platform: platform.map(str::to_owned),
        user: user.map(str::to_owned),
        ..ConfigLayer::default()
    }
}

#[test]
fn later_layers_override_earlier_ones_field_by_field() {
    let global = ConfigLayer {
        platform: Some(String::from("debian-12-amd64")),
        user: Some(String::from("admin")),
        ssh_port: Some(2222),
        ..ConfigLayer::default()
    };
    let backend_defaults = layer(Some(UBUNTU_PLATFORM), None);
    let per_host = layer(None, Some("root"));

    let config = HostConfig::from_layers("h1", &global, &backend_defaults, &per_host)
        .expect("platform is set");
    // Backend defaults replaced the platform; the per-host layer replaced
    // the user; the untouched port came through from the global layer.
    assert_eq!(config.platform, UBUNTU_PLATFORM);
    assert_eq!(config.user, "root");
    assert_eq!(config.ssh_port, 2222);
}

#[test]
fn defaults_apply_when_no_layer_sets_a_field() {
    let config = HostConfig::from_layers(
        "h1",
        &layer(Some(UBUNTU_PLATFORM), None),
        &ConfigLayer::default(),
        &ConfigLayer::default(),
    )
    .expect("platform is set");
    assert_eq!(config.user, "root");
    assert_eq!(config.ssh_port, 22);
    assert!(config.env.is_empty());
    assert!(!config.preserve);
}

#[test]
fn a_platformless_host_is_rejected() {
    let err = HostConfig::from_layers(
        "h1",
        &ConfigLayer::default(),
        &ConfigLayer::default(),
        &ConfigLayer::default(),
    )
    .expect_err("no platform anywhere");
    assert!(matches!(err, HostError::MissingPlatform { ref host } if host == "h1"));
}

#[test]
fn inventory_builds_hosts_in_declaration_order() {
    let inventory: Inventory = serde_json::from_str(
        r#"{
            "global": {"platform": "ubuntu-24.04-amd64"},
            "backend_defaults": {
                "pooled": {"template": "ubuntu-pool"}
            },
            "hosts": [
                {"name": "web", "backend": "cloud", "roles": ["dashboard"]},
                {"name": "pool1", "backend": "pooled"},
                {"name": "db", "backend": "cloud", "roles": ["database"],
                 "config": {"user": "postgres"}}
            ]
        }"#,
    )
    .expect("inventory parses");

    let hosts = inventory.build_hosts().expect("inventory is valid");
    assert_eq!(hosts.len(), 3);
    assert_eq!(hosts[0].name(), "web");
    assert_eq!(hosts[0].backend(), BackendKind::CloudCreate);
    assert!(hosts[0].has_role(&Role::Dashboard));
    assert_eq!(hosts[1].backend(), BackendKind::Pooled);
    assert_eq!(
        hosts[1].config().template.as_deref(),
        Some("ubuntu-pool"),
        "backend defaults apply to pooled hosts"
    );
    assert_eq!(hosts[2].config().user, "postgres");
    // The global platform reached every host.
    for host in &hosts {
        assert_eq!(host.config().platform, UBUNTU_PLATFORM);
    }
}

#[test]
fn duplicate_host_names_are_rejected() {
    let inventory: Inventory = serde_json::from_str(
        r#"{
            "global": {"platform": "ubuntu-24.04-amd64"},
            "hosts": [
                {"name": "twin", "backend": "pooled"},
                {"name": "twin", "backend": "cloud"}
            ]
        }"#,
    )
    .expect("inventory parses");
    let err = inventory.build_hosts().expect_err("names collide");
    assert!(matches!(err, InventoryError::DuplicateHost { ref name } if name == "twin"));
}

#[test]
fn unknown_backend_keys_are_rejected() {
    let inventory: Inventory = serde_json::from_str(
        r#"{
            "global": {"platform": "ubuntu-24.04-amd64"},
            "hosts": [{"name": "h1", "backend": "vagrant"}]
        }"#,
    )
    .expect("inventory parses");
    let err = inventory.build_hosts().expect_err("vagrant is unsupported");
    assert!(matches!(err, InventoryError::Backend { ref host, .. } if host == "h1"));
}

#[test]
fn custom_roles_round_trip_through_serde() {
    let role: Role = serde_json::from_str("\"loadbalancer\"").expect("role parses");
    assert_eq!(role, Role::Custom(String::from("loadbalancer")));
    assert_eq!(
        serde_json::to_string(&role).expect("role serialises"),
        "\"loadbalancer\""
    );
    let master: Role = serde_json::from_str("\"master\"").expect("role parses");
    assert_eq!(master, Role::Master);
}
