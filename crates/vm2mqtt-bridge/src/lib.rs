//! Bridge between VM inventories and an MQTT broker.
//!
//! Every unit listed by an [`InventoryProvider`](vm2mqtt_inventory::InventoryProvider)
//! is announced to Home Assistant as a switch. Its power state is published
//! on a retained state topic, and `ON`/`OFF` commands on its command topic
//! are turned into backend start/shutdown calls.
//!
//! # Architecture
//!
//! ```text
//!   ┌───────────┐  ┌────────────┐
//!   │  Proxmox  │  │ Portainer  │    InventoryProvider
//!   └─────┬─────┘  └─────┬──────┘
//!         └───────┬──────┘
//!                 ▼
//!   ┌──────────────────────────────┐
//!   │            Bridge            │  status table + IdentityMapper
//!   │  hook · refresh · command ·  │  behind one mutex
//!   │  discovery reset · shutdown  │
//!   └──────────────┬───────────────┘
//!                  ▼
//!   ┌──────────────────────────────┐
//!   │  BrokerGateway (MqttGateway) │
//!   └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vm2mqtt_bridge::{AppConfig, Bridge, MqttGateway};
//! use vm2mqtt_inventory::ProxmoxProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env()?;
//! let (gateway, inbound) = MqttGateway::connect(&config.mqtt).await?;
//! let bridge = Bridge::new(Arc::new(gateway), config.bridge.clone());
//!
//! if let Some(proxmox) = &config.proxmox {
//!     bridge.hook(Arc::new(ProxmoxProvider::new(proxmox)?)).await?;
//! }
//! bridge.start().await?;
//! bridge.run(inbound, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod lifecycle;
pub mod mqtt;
pub mod topics;

pub use config::{AppConfig, BridgeConfig, MqttConfig};
pub use engine::{Bridge, RefreshReport};
pub use error::{BridgeError, ConfigError, Result};
pub use gateway::{BrokerGateway, GatewayError, GatewayResult, InboundMessage};
pub use identity::{compute_external_id, IdentityMapper};
pub use mqtt::MqttGateway;
pub use topics::TopicScheme;

#[cfg(any(test, feature = "test-utils"))]
pub use gateway::mock::{GatewayCall, RecordingGateway};
