//! Broker topic layout and discovery payloads.
//!
//! With discovery prefix `D` and bridge prefix `B`:
//!
//! | Purpose   | Topic                                   |
//! |-----------|-----------------------------------------|
//! | discovery | `D/switch/vm2mqtt/{external_id}/config` |
//! | state     | `B/switch/{unique_key}/state`           |
//! | command   | `B/switch/{unique_key}/set`             |
//! | reset     | `D/status`                              |

use serde::Serialize;
use vm2mqtt_core::{ExternalId, Unit};

/// Home Assistant component every unit is announced as.
pub const COMPONENT: &str = "switch";

/// Node id segment of discovery topics.
pub const NODE_ID: &str = "vm2mqtt";

const COMMAND_SUFFIX: &str = "set";
const STATE_SUFFIX: &str = "state";

/// Builds and parses the topics for one pair of prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    discovery_prefix: String,
    bridge_prefix: String,
}

impl TopicScheme {
    /// Create a scheme from the discovery and bridge prefixes.
    #[must_use]
    pub fn new(discovery_prefix: impl Into<String>, bridge_prefix: impl Into<String>) -> Self {
        Self {
            discovery_prefix: discovery_prefix.into(),
            bridge_prefix: bridge_prefix.into(),
        }
    }

    /// The discovery prefix (`D`).
    #[must_use]
    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    /// The bridge prefix (`B`).
    #[must_use]
    pub fn bridge_prefix(&self) -> &str {
        &self.bridge_prefix
    }

    /// `B/switch/{unique_key}`, the `~` base of a unit's topics.
    #[must_use]
    pub fn root_topic(&self, unit: &Unit) -> String {
        format!("{}/{COMPONENT}/{}", self.bridge_prefix, unit.unique_key())
    }

    /// `B/switch/{unique_key}/state`
    #[must_use]
    pub fn state_topic(&self, unit: &Unit) -> String {
        format!("{}/{STATE_SUFFIX}", self.root_topic(unit))
    }

    /// `B/switch/{unique_key}/set`
    #[must_use]
    pub fn command_topic(&self, unit: &Unit) -> String {
        format!("{}/{COMMAND_SUFFIX}", self.root_topic(unit))
    }

    /// `D/switch/vm2mqtt/{external_id}/config`
    #[must_use]
    pub fn discovery_topic(&self, external_id: &ExternalId) -> String {
        format!(
            "{}/{COMPONENT}/{NODE_ID}/{external_id}/config",
            self.discovery_prefix
        )
    }

    /// `D/status`, where the consumer announces it came online.
    #[must_use]
    pub fn reset_topic(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    /// Extract the unique key from a command topic.
    ///
    /// Returns `None` for anything that is not `B/switch/{key}/set` with a
    /// non-empty key. Unique keys contain slashes, so the key is everything
    /// between the component segment and the final `/set`.
    #[must_use]
    pub fn parse_command_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic
            .strip_prefix(self.bridge_prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(COMPONENT)?
            .strip_prefix('/')?;
        let key = rest.strip_suffix(COMMAND_SUFFIX)?.strip_suffix('/')?;
        (!key.is_empty()).then_some(key)
    }

    /// Render the discovery config for a unit.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only happens if `serde_json`
    /// itself fails.
    pub fn discovery_payload(
        &self,
        unit: &Unit,
        external_id: &ExternalId,
        provider_name: &str,
    ) -> serde_json::Result<String> {
        let payload = DiscoveryPayload {
            base: self.root_topic(unit),
            name: unit.display_name(),
            cmd_t: "~/set",
            stat_t: "~/state",
            uniq_id: external_id.to_hex(),
            device: DeviceInfo {
                identifiers: [unit.manager_key().as_str()],
                name: provider_name,
            },
        };
        serde_json::to_string(&payload)
    }
}

#[derive(Serialize)]
struct DiscoveryPayload<'a> {
    #[serde(rename = "~")]
    base: String,
    name: &'a str,
    cmd_t: &'static str,
    stat_t: &'static str,
    uniq_id: String,
    device: DeviceInfo<'a>,
}

#[derive(Serialize)]
struct DeviceInfo<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
}
