//! Portainer stack provider.
//!
//! Exposes every Portainer stack as a unit. Portainer needs the stack's
//! endpoint id to start or stop it; that id is not part of the stack's
//! identity, so it travels as the `endpoint_id` annotation on the unit.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use vm2mqtt_core::{ManagerKey, Unit, UnitStatus};

use crate::error::{InventoryError, Result};
use crate::http;
use crate::provider::InventoryProvider;

/// Unit annotation holding the Portainer endpoint id.
pub const ENDPOINT_ANNOTATION: &str = "endpoint_id";

/// Kind-path segment for stacks.
pub const STACK_SEGMENT: &str = "stack";

/// Portainer's status code for an active stack.
const STATUS_ACTIVE: u8 = 1;

/// Connection settings for a Portainer instance.
#[derive(Debug, Clone)]
pub struct PortainerConfig {
    /// Base URL of the Portainer instance, e.g. `https://portainer.local:9443`.
    pub url: String,
    /// API access token.
    pub token: String,
    /// Whether to verify the server's TLS certificate.
    pub verify_ssl: bool,
}

impl PortainerConfig {
    /// Create a config with TLS verification on.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            verify_ssl: true,
        }
    }

    /// The provider identity: `portainer-{h}`, where `h` is the signed
    /// 32-bit murmur3 hash (seed 0) of the URL exactly as configured.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Config` if the URL cannot be hashed.
    pub fn manager_key(&self) -> Result<ManagerKey> {
        let hash = murmur3::murmur3_32(&mut self.url.as_bytes(), 0)
            .map_err(|e| InventoryError::Config(format!("cannot hash Portainer URL: {e}")))?;
        // Reinterpret as signed; existing topics carry the signed decimal.
        #[allow(clippy::cast_possible_wrap)]
        let hash = hash as i32;
        Ok(ManagerKey::new(format!("portainer-{hash}")))
    }

    fn api_root(&self) -> String {
        format!("{}/api", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackEntry {
    id: u64,
    name: String,
    endpoint_id: u64,
    status: u8,
}

/// Inventory provider backed by the Portainer REST API.
#[derive(Debug, Clone)]
pub struct PortainerProvider {
    client: reqwest::Client,
    api_root: String,
    key: ManagerKey,
}

impl PortainerProvider {
    /// Create a provider for the given Portainer instance.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Config` if the token cannot be used as a
    /// header value or the HTTP client cannot be built.
    pub fn new(config: &PortainerConfig) -> Result<Self> {
        let mut token = HeaderValue::from_str(&config.token)
            .map_err(|e| InventoryError::Config(format!("invalid Portainer token: {e}")))?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-api-key"), token);

        Ok(Self {
            client: http::build_client(headers, config.verify_ssl)?,
            api_root: config.api_root(),
            key: config.manager_key()?,
        })
    }

    fn stack_from(&self, entry: StackEntry) -> UnitStatus {
        let unit = Unit::with_kind_path(
            self.key.clone(),
            [STACK_SEGMENT],
            entry.id.to_string(),
            entry.name,
        )
        .annotate(ENDPOINT_ANNOTATION, entry.endpoint_id.to_string());
        UnitStatus::new(unit, entry.status == STATUS_ACTIVE)
    }

    async fn post_stack(&self, unit: &Unit, action: &str) -> Result<()> {
        let endpoint_id = unit.annotation(ENDPOINT_ANNOTATION).ok_or_else(|| {
            InventoryError::UnsupportedUnit(format!(
                "{} has no Portainer endpoint id",
                unit.unique_key()
            ))
        })?;
        let url = format!("{}/stacks/{}/{action}", self.api_root, unit.natural_id());

        http::send(
            self.client
                .post(&url)
                .query(&[("endpointId", endpoint_id)]),
        )
        .await?;
        tracing::debug!(unit = %unit.unique_key(), action, "Portainer stack request accepted");
        Ok(())
    }
}

#[async_trait]
impl InventoryProvider for PortainerProvider {
    fn manager_key(&self) -> &ManagerKey {
        &self.key
    }

    fn display_name(&self) -> &str {
        "Portainer"
    }

    async fn list_vms(&self) -> Result<Vec<UnitStatus>> {
        let url = format!("{}/stacks", self.api_root);
        let stacks: Vec<StackEntry> = http::send_json(self.client.get(&url)).await?;
        Ok(stacks.into_iter().map(|s| self.stack_from(s)).collect())
    }

    async fn start(&self, unit: &Unit) -> Result<()> {
        self.post_stack(unit, "start").await
    }

    async fn shutdown(&self, unit: &Unit) -> Result<()> {
        self.post_stack(unit, "stop").await
    }
}
