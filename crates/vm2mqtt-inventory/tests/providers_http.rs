//! HTTP-level tests for the Proxmox and Portainer providers against a
//! `wiremock` server.

use serde_json::json;
use vm2mqtt_core::Unit;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vm2mqtt_inventory::{
    InventoryError, InventoryProvider, PortainerConfig, PortainerProvider, ProxmoxConfig,
    ProxmoxProvider,
};

const PVE_AUTH: &str = "PVEAPIToken=root@pam!bridge=secret";

fn proxmox_config() -> ProxmoxConfig {
    ProxmoxConfig::new("pve.local", "root@pam", "bridge", "secret").with_vmids([100, 200])
}

async fn proxmox(server: &MockServer) -> ProxmoxProvider {
    ProxmoxProvider::with_base_url(&proxmox_config(), format!("{}/api2/json", server.uri()))
        .unwrap()
}

async fn mount_inventory(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes"))
        .and(header("authorization", PVE_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"node": "pve1", "status": "online"},
                {"node": "pve2", "status": "offline"}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"vmid": "100", "name": "web", "status": "running"},
                {"vmid": "300", "name": "not-managed", "status": "running"}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/qemu"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"vmid": 200, "name": "db", "status": "stopped"}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn proxmox_lists_allowed_guests_on_online_nodes() {
    let server = MockServer::start().await;
    mount_inventory(&server).await;
    let provider = proxmox(&server).await;

    let mut listing = provider.list_vms().await.unwrap();
    listing.sort_by(|a, b| a.unit.cmp(&b.unit));

    assert_eq!(listing.len(), 2);

    let web = &listing[0];
    assert_eq!(web.unit.unique_key(), "proxmox@pve.local/pve1/lxc/100");
    assert_eq!(web.unit.display_name(), "web");
    assert!(web.powered_on);

    let db = &listing[1];
    assert_eq!(db.unit.unique_key(), "proxmox@pve.local/pve1/qemu/200");
    assert!(!db.powered_on);
}

#[tokio::test]
async fn proxmox_listing_fails_as_a_whole() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"node": "pve1", "status": "online"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/qemu"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let provider = proxmox(&server).await;
    let result = provider.list_vms().await;
    assert!(matches!(result, Err(InventoryError::BackendUnavailable(_))));
}

#[tokio::test]
async fn proxmox_start_and_shutdown_hit_kind_specific_paths() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/qemu/200/status/start"))
        .and(header("authorization", PVE_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "UPID:pve1:..."})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc/100/status/shutdown"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "UPID:pve1:..."})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = proxmox(&server).await;
    let key = proxmox_config().manager_key();
    let db = Unit::with_kind_path(key.clone(), ["pve1", "qemu"], "200", "db");
    let web = Unit::with_kind_path(key, ["pve1", "lxc"], "100", "web");

    provider.start(&db).await.unwrap();
    provider.shutdown(&web).await.unwrap();
}

#[tokio::test]
async fn proxmox_control_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    let provider = proxmox(&server).await;
    let unit = Unit::with_kind_path(proxmox_config().manager_key(), ["pve1", "lxc"], "100", "web");
    assert!(matches!(
        provider.start(&unit).await,
        Err(InventoryError::BackendUnavailable(_))
    ));
}

#[tokio::test]
async fn portainer_lists_stacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stacks"))
        .and(header("x-api-key", "ptr_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Id": 1, "Name": "media", "EndpointId": 2, "Status": 1},
            {"Id": 4, "Name": "backup", "EndpointId": 2, "Status": 2}
        ])))
        .mount(&server)
        .await;

    let config = PortainerConfig::new(server.uri(), "ptr_token");
    let provider = PortainerProvider::new(&config).unwrap();
    let listing = provider.list_vms().await.unwrap();

    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].unit.display_name(), "media");
    assert!(listing[0].powered_on);
    assert!(!listing[1].powered_on);
    assert_eq!(
        listing[1].unit.unique_key(),
        format!("{}/stack/4", config.manager_key().unwrap())
    );
}

#[tokio::test]
async fn portainer_start_stop_pass_endpoint_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stacks/1/start"))
        .and(query_param("endpointId", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/stacks/1/stop"))
        .and(query_param("endpointId", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let config = PortainerConfig::new(server.uri(), "ptr_token");
    let provider = PortainerProvider::new(&config).unwrap();
    let unit = Unit::with_kind_path(config.manager_key().unwrap(), ["stack"], "1", "media")
        .annotate("endpoint_id", "2");

    provider.start(&unit).await.unwrap();
    provider.shutdown(&unit).await.unwrap();
}

#[tokio::test]
async fn portainer_requires_endpoint_annotation() {
    let server = MockServer::start().await;
    let config = PortainerConfig::new(server.uri(), "ptr_token");
    let provider = PortainerProvider::new(&config).unwrap();
    let unit = Unit::with_kind_path(config.manager_key().unwrap(), ["stack"], "1", "media");

    assert!(matches!(
        provider.start(&unit).await,
        Err(InventoryError::UnsupportedUnit(_))
    ));
}

#[tokio::test]
async fn portainer_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stacks"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let provider = PortainerProvider::new(&PortainerConfig::new(server.uri(), "t")).unwrap();
    assert!(matches!(
        provider.list_vms().await,
        Err(InventoryError::BackendUnavailable(_))
    ));
}
