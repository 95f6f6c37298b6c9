//! Proxmox VE provider.
//!
//! Lists LXC containers and QEMU virtual machines on every online node and
//! keeps the ones whose VM id is on the configured allow-list. Both guest
//! kinds share the same REST shape and differ only in the URL segment, so the
//! kind is carried as a tag in the unit's kind path: `[node, "lxc" | "qemu"]`.
//!
//! API reference: <https://pve.proxmox.com/pve-docs/api-viewer/index.html>

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use vm2mqtt_core::{ManagerKey, Unit, UnitStatus};

use crate::error::{InventoryError, Result};
use crate::http;
use crate::provider::InventoryProvider;

/// Default port of the Proxmox VE API.
pub const DEFAULT_PORT: u16 = 8006;

/// Connection settings for a Proxmox VE cluster.
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// API host name or address, without scheme or port.
    pub host: String,
    /// API port.
    pub port: u16,
    /// User the API token belongs to (e.g. `root@pam`).
    pub user: String,
    /// Token id.
    pub token_name: String,
    /// Token secret.
    pub token_value: String,
    /// VM ids to manage. Guests not on this list are invisible to the bridge.
    pub vmids: BTreeSet<u32>,
    /// Whether to verify the server's TLS certificate.
    pub verify_ssl: bool,
}

impl ProxmoxConfig {
    /// Create a config with the default port, TLS verification on, and an
    /// empty allow-list.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        token_name: impl Into<String>,
        token_value: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            token_name: token_name.into(),
            token_value: token_value.into(),
            vmids: BTreeSet::new(),
            verify_ssl: true,
        }
    }

    /// Replace the allow-list.
    #[must_use]
    pub fn with_vmids(mut self, vmids: impl IntoIterator<Item = u32>) -> Self {
        self.vmids = vmids.into_iter().collect();
        self
    }

    /// The API root, e.g. `https://pve.local:8006/api2/json`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }

    /// The provider identity: `proxmox@{host}`.
    #[must_use]
    pub fn manager_key(&self) -> ManagerKey {
        ManagerKey::new(format!("proxmox@{}", self.host))
    }

    fn auth_header(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_value
        )
    }
}

/// The two Proxmox guest kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestKind {
    /// LXC container.
    Lxc,
    /// QEMU/KVM virtual machine.
    Qemu,
}

impl GuestKind {
    /// Every guest kind, in listing order.
    pub const ALL: [Self; 2] = [Self::Lxc, Self::Qemu];

    /// The URL and kind-path segment for this kind.
    #[must_use]
    pub const fn as_segment(self) -> &'static str {
        match self {
            Self::Lxc => "lxc",
            Self::Qemu => "qemu",
        }
    }

    /// Parse a kind-path segment.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "lxc" => Some(Self::Lxc),
            "qemu" => Some(Self::Qemu),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    node: String,
    #[serde(default)]
    status: Option<String>,
}

/// LXC listings have returned `vmid` as a string on some releases.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Vmid {
    Number(u32),
    Text(String),
}

impl Vmid {
    fn value(&self) -> Option<u32> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GuestEntry {
    vmid: Vmid,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Map a Proxmox guest status to a power state.
#[must_use]
pub fn is_running(status: Option<&str>) -> bool {
    status == Some("running")
}

/// Inventory provider backed by the Proxmox VE REST API.
#[derive(Debug, Clone)]
pub struct ProxmoxProvider {
    client: reqwest::Client,
    base_url: String,
    key: ManagerKey,
    vmids: BTreeSet<u32>,
}

impl ProxmoxProvider {
    /// Create a provider talking to `config.base_url()`.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Config` if the token cannot be used as a
    /// header value or the HTTP client cannot be built.
    pub fn new(config: &ProxmoxConfig) -> Result<Self> {
        Self::with_base_url(config, config.base_url())
    }

    /// Create a provider talking to an explicit API root.
    ///
    /// The manager key is still derived from `config.host`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_base_url(config: &ProxmoxConfig, base_url: impl Into<String>) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&config.auth_header())
            .map_err(|e| InventoryError::Config(format!("invalid Proxmox API token: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        Ok(Self {
            client: http::build_client(headers, config.verify_ssl)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: config.manager_key(),
            vmids: config.vmids.clone(),
        })
    }

    /// The API root this provider talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_nodes(&self) -> Result<Vec<String>> {
        let url = format!("{}/nodes", self.base_url);
        let nodes: Envelope<Vec<NodeEntry>> = http::send_json(self.client.get(&url)).await?;

        Ok(nodes
            .data
            .into_iter()
            .filter(|n| n.status.as_deref() == Some("online"))
            .map(|n| n.node)
            .collect())
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<UnitStatus>> {
        let url = format!("{}/nodes/{node}/{}", self.base_url, kind.as_segment());
        let guests: Envelope<Vec<GuestEntry>> = http::send_json(self.client.get(&url)).await?;

        let mut result = Vec::new();
        for guest in guests.data {
            let Some(vmid) = guest.vmid.value() else {
                tracing::warn!(node = %node, kind = kind.as_segment(), "Skipping guest with unparseable vmid");
                continue;
            };
            if !self.vmids.contains(&vmid) {
                continue;
            }
            let name = guest.name.unwrap_or_else(|| vmid.to_string());
            let unit = Unit::with_kind_path(
                self.key.clone(),
                [node, kind.as_segment()],
                vmid.to_string(),
                name,
            );
            result.push(UnitStatus::new(unit, is_running(guest.status.as_deref())));
        }
        Ok(result)
    }

    /// Resolve the node and guest kind from a unit's kind path.
    fn locate<'a>(&self, unit: &'a Unit) -> Result<(&'a str, GuestKind)> {
        match unit.kind_path() {
            [node, kind] => GuestKind::from_segment(kind)
                .map(|kind| (node.as_str(), kind))
                .ok_or_else(|| {
                    InventoryError::UnsupportedUnit(format!(
                        "unknown Proxmox guest kind '{kind}' for {}",
                        unit.unique_key()
                    ))
                }),
            _ => Err(InventoryError::UnsupportedUnit(format!(
                "{} is not a Proxmox guest",
                unit.unique_key()
            ))),
        }
    }

    async fn post_status(&self, unit: &Unit, action: &str) -> Result<()> {
        let (node, kind) = self.locate(unit)?;
        let url = format!(
            "{}/nodes/{node}/{}/{}/status/{action}",
            self.base_url,
            kind.as_segment(),
            unit.natural_id()
        );

        http::send(self.client.post(&url)).await?;
        tracing::debug!(unit = %unit.unique_key(), action, "Proxmox status request accepted");
        Ok(())
    }
}

#[async_trait]
impl InventoryProvider for ProxmoxProvider {
    fn manager_key(&self) -> &ManagerKey {
        &self.key
    }

    fn display_name(&self) -> &str {
        "Proxmox"
    }

    async fn list_vms(&self) -> Result<Vec<UnitStatus>> {
        // Any failing request fails the whole snapshot: a partial listing
        // would look like vanished guests to the bridge.
        let mut result = Vec::new();
        for node in self.list_nodes().await? {
            for kind in GuestKind::ALL {
                result.extend(self.list_guests(&node, kind).await?);
            }
        }
        Ok(result)
    }

    async fn start(&self, unit: &Unit) -> Result<()> {
        self.post_status(unit, "start").await
    }

    async fn shutdown(&self, unit: &Unit) -> Result<()> {
        self.post_status(unit, "shutdown").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxmoxConfig {
        ProxmoxConfig::new("pve.local", "root@pam", "bridge", "secret").with_vmids([100, 200])
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.verify_ssl);
        assert_eq!(config.base_url(), "https://pve.local:8006/api2/json");
        assert_eq!(config.manager_key().as_str(), "proxmox@pve.local");
        assert_eq!(config.auth_header(), "PVEAPIToken=root@pam!bridge=secret");
    }

    #[test]
    fn guest_kind_segments() {
        for kind in GuestKind::ALL {
            assert_eq!(GuestKind::from_segment(kind.as_segment()), Some(kind));
        }
        assert_eq!(GuestKind::from_segment("stack"), None);
    }

    #[test]
    fn vmid_accepts_number_or_string() {
        let n: Vmid = serde_json::from_str("101").unwrap();
        let s: Vmid = serde_json::from_str("\"102\"").unwrap();
        let bad: Vmid = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(n.value(), Some(101));
        assert_eq!(s.value(), Some(102));
        assert_eq!(bad.value(), None);
    }

    #[test]
    fn running_status() {
        assert!(is_running(Some("running")));
        assert!(!is_running(Some("stopped")));
        assert!(!is_running(None));
    }

    #[test]
    fn locate_rejects_foreign_units() {
        let provider = ProxmoxProvider::new(&config()).unwrap();
        let key = config().manager_key();

        let guest = Unit::with_kind_path(key.clone(), ["node1", "qemu"], "100", "vm");
        assert_eq!(provider.locate(&guest).unwrap(), ("node1", GuestKind::Qemu));

        let stack = Unit::with_kind_path(key.clone(), ["stack"], "1", "s");
        assert!(matches!(
            provider.locate(&stack),
            Err(InventoryError::UnsupportedUnit(_))
        ));

        let odd = Unit::with_kind_path(key, ["node1", "docker"], "1", "s");
        assert!(matches!(
            provider.locate(&odd),
            Err(InventoryError::UnsupportedUnit(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = ProxmoxProvider::with_base_url(&config(), "http://127.0.0.1:1/api2/json/")
            .unwrap();
        assert_eq!(provider.base_url(), "http://127.0.0.1:1/api2/json");
    }
}
