//! Core types for vm2mqtt.
//!
//! This crate provides the foundational types shared by the inventory
//! providers and the bridge engine:
//!
//! - **Identifiers**: [`ManagerKey`] for providers, [`ExternalId`] for the
//!   broker-facing identity of a unit
//! - **Unit model**: [`Unit`] and [`UnitStatus`]
//!
//! # Example
//!
//! ```
//! use vm2mqtt_core::{ExternalId, ManagerKey, Unit};
//!
//! let manager = ManagerKey::new("proxmox@pve.local");
//! let unit = Unit::with_kind_path(manager, ["node1", "lxc"], "100", "web");
//!
//! assert_eq!(unit.unique_key(), "proxmox@pve.local/node1/lxc/100");
//! assert_eq!(unit.external_id(), ExternalId::for_key(unit.unique_key()));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod unit;

pub use ids::{ExternalId, IdError, ManagerKey};
pub use unit::{Unit, UnitStatus};
