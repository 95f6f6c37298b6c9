//! Bridge configuration.
//!
//! Everything is read from environment variables. Loading goes through a
//! lookup function so tests can feed a map instead of the process
//! environment.

use std::str::FromStr;
use std::time::Duration;

use vm2mqtt_inventory::{PortainerConfig, ProxmoxConfig};

use crate::error::ConfigError;
use crate::topics::TopicScheme;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username, if the broker requires authentication.
    pub username: Option<String>,
    /// Password for `username`.
    pub password: Option<String>,
    /// MQTT client id.
    pub client_id: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_seconds: u64,
    /// How long to wait for the first CONNACK, in seconds.
    pub connect_timeout_seconds: u64,
    /// How long a publish or subscribe may wait for room in the request
    /// queue, in seconds.
    pub request_timeout_seconds: u64,
}

impl MqttConfig {
    const DEFAULT_PORT: u16 = 1883;

    /// Create a config for `host` with defaults for everything else.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: None,
            password: None,
            client_id: Self::generate_client_id(),
            keep_alive_seconds: 60,
            connect_timeout_seconds: 10,
            request_timeout_seconds: 10,
        }
    }

    fn generate_client_id() -> String {
        format!("vm2mqtt-{}", uuid::Uuid::new_v4().simple())
    }

    /// Get the keep-alive interval as a `Duration`.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,
    /// Prefix of the bridge's own state and command topics.
    pub bridge_prefix: String,
    /// Seconds between refresh cycles.
    pub refresh_interval_seconds: u64,
    /// Retract units that vanish from a successful listing.
    pub retract_missing: bool,
}

impl BridgeConfig {
    /// Get the refresh interval as a `Duration`.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// The topic scheme for these prefixes.
    #[must_use]
    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(&self.discovery_prefix, &self.bridge_prefix)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            bridge_prefix: "vm2mqtt".to_string(),
            refresh_interval_seconds: 60,
            retract_missing: true,
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker connection.
    pub mqtt: MqttConfig,
    /// Engine settings.
    pub bridge: BridgeConfig,
    /// Proxmox provider, enabled by `PROXMOX_HOST`.
    pub proxmox: Option<ProxmoxConfig>,
    /// Portainer provider, enabled by `PORTAINER_URL`.
    pub portainer: Option<PortainerConfig>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mut mqtt = MqttConfig::new(env.required("MQTT_HOST")?);
        if let Some(port) = env.parsed("MQTT_PORT")? {
            mqtt.port = port;
        }
        mqtt.username = env.get("MQTT_USER");
        mqtt.password = env.get("MQTT_PASS");
        if let Some(client_id) = env.get("MQTT_CLIENT_ID") {
            mqtt.client_id = client_id;
        }
        if let Some(seconds) = env.parsed("MQTT_REQUEST_TIMEOUT_SECONDS")? {
            mqtt.request_timeout_seconds = seconds;
        }

        let mut bridge = BridgeConfig::default();
        if let Some(prefix) = env.get("HA_DISCOVERY_PREFIX") {
            bridge.discovery_prefix = prefix;
        }
        if let Some(prefix) = env.get("BRIDGE_TOPIC_PREFIX") {
            bridge.bridge_prefix = prefix;
        }
        if let Some(seconds) = env.parsed::<u64>("REFRESH_INTERVAL_SECONDS")? {
            if seconds == 0 {
                return Err(ConfigError::Invalid {
                    var: "REFRESH_INTERVAL_SECONDS",
                    reason: "must be greater than zero".to_string(),
                });
            }
            bridge.refresh_interval_seconds = seconds;
        }
        if let Some(retract) = env.flag("RETRACT_MISSING")? {
            bridge.retract_missing = retract;
        }

        let proxmox = env.get("PROXMOX_HOST").map(|host| proxmox_config(&env, host)).transpose()?;
        let portainer = env
            .get("PORTAINER_URL")
            .map(|url| portainer_config(&env, url))
            .transpose()?;

        Ok(Self {
            mqtt,
            bridge,
            proxmox,
            portainer,
        })
    }
}

fn proxmox_config<F>(env: &Env<F>, host: String) -> Result<ProxmoxConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ProxmoxConfig::new(
        host,
        env.required("PROXMOX_USER")?,
        env.required("PROXMOX_TOKEN_NAME")?,
        env.required("PROXMOX_TOKEN_VALUE")?,
    )
    .with_vmids(parse_vmids(&env.required("PROXMOX_VMIDS")?)?);

    if let Some(port) = env.parsed("PROXMOX_PORT")? {
        config.port = port;
    }
    if let Some(verify) = env.flag("PROXMOX_VERIFY_SSL")? {
        config.verify_ssl = verify;
    }
    Ok(config)
}

fn portainer_config<F>(env: &Env<F>, url: String) -> Result<PortainerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = PortainerConfig::new(url, env.required("PORTAINER_TOKEN")?);
    if let Some(verify) = env.flag("PORTAINER_VERIFY_SSL")? {
        config.verify_ssl = verify;
    }
    Ok(config)
}

/// Parse a comma-separated VM id allow-list.
fn parse_vmids(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let vmids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|e| ConfigError::Invalid {
                var: "PROXMOX_VMIDS",
                reason: format!("'{s}' is not a VM id: {e}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if vmids.is_empty() {
        return Err(ConfigError::Invalid {
            var: "PROXMOX_VMIDS",
            reason: "no VM ids listed".to_string(),
        });
    }
    Ok(vmids)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        self.get(var)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(ConfigError::Invalid {
                    var,
                    reason: format!("expected true or false, got '{other}'"),
                }),
            })
            .transpose()
    }
}
