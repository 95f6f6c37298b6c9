//! Error types for the bridge engine.

use thiserror::Error;
use vm2mqtt_core::ExternalId;
use vm2mqtt_inventory::InventoryError;

use crate::gateway::GatewayError;

/// A result type using `BridgeError`.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A command addressed an external id the bridge does not track.
    #[error("unknown unit: {0}")]
    UnknownUnit(ExternalId),

    /// Two distinct units mapped to the same external id.
    #[error("external id {external_id} is already assigned to {existing}, cannot assign it to {incoming}")]
    DuplicateIdentity {
        /// The contested id.
        external_id: ExternalId,
        /// Unique key of the unit already holding the id.
        existing: String,
        /// Unique key of the unit that was being registered.
        incoming: String,
    },

    /// The broker gateway failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// An inventory backend failed.
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// A discovery payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Whether this error should abort the operation that raised it.
    ///
    /// An identity collision breaks the one-to-one mapping between units and
    /// broker topics; everything else is recoverable on a later cycle.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateIdentity { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_collisions_are_fatal() {
        let id = ExternalId::for_key("a");
        let collision = BridgeError::DuplicateIdentity {
            external_id: id,
            existing: "a".into(),
            incoming: "b".into(),
        };
        assert!(collision.is_fatal());
        assert!(!BridgeError::UnknownUnit(id).is_fatal());
        assert!(!BridgeError::Gateway(GatewayError::Closed).is_fatal());
    }

    #[test]
    fn unknown_unit_message_carries_hex() {
        let id = ExternalId::for_key("a");
        let msg = BridgeError::UnknownUnit(id).to_string();
        assert!(msg.contains(&id.to_hex()));
    }
}
