//! Inventory providers for vm2mqtt.
//!
//! This crate provides the [`InventoryProvider`] trait and the concrete
//! backends the bridge can be pointed at:
//!
//! - [`ProxmoxProvider`]: LXC containers and QEMU VMs on a Proxmox VE cluster,
//!   filtered by an allow-list of VM ids
//! - [`PortainerProvider`]: stacks managed by Portainer
//!
//! # Example
//!
//! ```no_run
//! use vm2mqtt_inventory::{InventoryProvider, ProxmoxConfig, ProxmoxProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxmoxConfig::new("pve.local", "root@pam", "bridge", "secret")
//!     .with_vmids([100, 101]);
//! let provider = ProxmoxProvider::new(&config)?;
//!
//! for status in provider.list_vms().await? {
//!     println!("{} on={}", status.unit.display_name(), status.powered_on);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for [`MockProvider`], an in-memory
//! provider whose inventory can be changed between polls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
mod http;
pub mod portainer;
pub mod provider;
pub mod proxmox;

pub use error::{InventoryError, Result};
pub use portainer::{PortainerConfig, PortainerProvider};
pub use provider::InventoryProvider;
pub use proxmox::{GuestKind, ProxmoxConfig, ProxmoxProvider};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::mock::{ControlCall, MockProvider};
