//! Bijection between units and their broker-facing ids.

use std::collections::HashMap;

use vm2mqtt_core::{ExternalId, Unit};

use crate::error::{BridgeError, Result};

/// The external id of a unit: the SHA-1 digest of its unique key.
///
/// Deterministic across restarts so retained messages from a previous run
/// stay addressable.
#[must_use]
pub fn compute_external_id(unit: &Unit) -> ExternalId {
    unit.external_id()
}

/// Two-way map between tracked units and their external ids.
///
/// Both directions are updated together; `by_unit` and `by_id` always hold
/// the same pairs.
#[derive(Debug, Default)]
pub struct IdentityMapper {
    by_unit: HashMap<Unit, ExternalId>,
    by_id: HashMap<ExternalId, Unit>,
}

impl IdentityMapper {
    /// Create an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit and return its external id.
    ///
    /// Registering the same unit again returns the same id.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::DuplicateIdentity` if a different unit already
    /// holds the computed id.
    pub fn register(&mut self, unit: &Unit) -> Result<ExternalId> {
        self.register_with(unit, compute_external_id(unit))
    }

    fn register_with(&mut self, unit: &Unit, external_id: ExternalId) -> Result<ExternalId> {
        if let Some(existing) = self.by_id.get(&external_id) {
            if existing == unit {
                return Ok(external_id);
            }
            return Err(BridgeError::DuplicateIdentity {
                external_id,
                existing: existing.unique_key().to_string(),
                incoming: unit.unique_key().to_string(),
            });
        }

        self.by_unit.insert(unit.clone(), external_id);
        self.by_id.insert(external_id, unit.clone());
        Ok(external_id)
    }

    /// Look up the unit behind an external id.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::UnknownUnit` if the id is not registered.
    pub fn resolve(&self, external_id: &ExternalId) -> Result<&Unit> {
        self.by_id
            .get(external_id)
            .ok_or(BridgeError::UnknownUnit(*external_id))
    }

    /// Remove a unit from both directions, returning its id if it was present.
    pub fn unregister(&mut self, unit: &Unit) -> Option<ExternalId> {
        let external_id = self.by_unit.remove(unit)?;
        self.by_id.remove(&external_id);
        Some(external_id)
    }

    /// Swap the stored copy of a registered unit for `unit`.
    ///
    /// Identity is by unique key, so this only picks up a newer display name
    /// or annotations. Returns false if the unit is not registered.
    pub fn update(&mut self, unit: &Unit) -> bool {
        let Some(external_id) = self.by_unit.remove(unit) else {
            return false;
        };
        self.by_unit.insert(unit.clone(), external_id);
        self.by_id.insert(external_id, unit.clone());
        true
    }

    /// The id of a registered unit.
    #[must_use]
    pub fn external_id(&self, unit: &Unit) -> Option<ExternalId> {
        self.by_unit.get(unit).copied()
    }

    /// Check if a unit is registered.
    #[must_use]
    pub fn contains(&self, unit: &Unit) -> bool {
        self.by_unit.contains_key(unit)
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    /// Check if no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    /// Every registered unit with its id.
    pub fn iter(&self) -> impl Iterator<Item = (&Unit, &ExternalId)> {
        self.by_unit.iter()
    }

    /// Every registered unit.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.by_unit.keys()
    }
}

#[cfg(test)]
mod tests {
    use vm2mqtt_core::ManagerKey;

    use super::*;

    fn unit(id: &str) -> Unit {
        Unit::with_kind_path(ManagerKey::new("proxmox@pve"), ["n1", "lxc"], id, "vm")
    }

    #[test]
    fn external_id_is_deterministic() {
        assert_eq!(compute_external_id(&unit("100")), compute_external_id(&unit("100")));
        assert_ne!(compute_external_id(&unit("100")), compute_external_id(&unit("101")));
    }

    #[test]
    fn display_name_does_not_affect_id() {
        let a = unit("100");
        let b = Unit::with_kind_path(ManagerKey::new("proxmox@pve"), ["n1", "lxc"], "100", "renamed");
        assert_eq!(compute_external_id(&a), compute_external_id(&b));
    }

    #[test]
    fn register_resolve_unregister() {
        let mut mapper = IdentityMapper::new();
        let web = unit("100");

        let id = mapper.register(&web).unwrap();
        assert_eq!(mapper.resolve(&id).unwrap(), &web);
        assert_eq!(mapper.external_id(&web), Some(id));
        assert_eq!(mapper.len(), 1);

        assert_eq!(mapper.unregister(&web), Some(id));
        assert!(mapper.is_empty());
        assert!(matches!(mapper.resolve(&id), Err(BridgeError::UnknownUnit(_))));
        assert_eq!(mapper.unregister(&web), None);
    }

    #[test]
    fn register_twice_is_idempotent() {
        let mut mapper = IdentityMapper::new();
        let web = unit("100");
        let first = mapper.register(&web).unwrap();
        let second = mapper.register(&web).unwrap();
        assert_eq!(first, second);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn update_replaces_stored_details() {
        let mut mapper = IdentityMapper::new();
        let web = unit("100");
        let id = mapper.register(&web).unwrap();

        let renamed = Unit::with_kind_path(ManagerKey::new("proxmox@pve"), ["n1", "lxc"], "100", "web")
            .annotate("endpoint_id", "2");
        assert!(mapper.update(&renamed));

        let stored = mapper.resolve(&id).unwrap();
        assert_eq!(stored.display_name(), "web");
        assert_eq!(stored.annotation("endpoint_id"), Some("2"));
        assert_eq!(mapper.units().next().map(Unit::display_name), Some("web"));
        assert_eq!(mapper.len(), 1);

        assert!(!mapper.update(&unit("999")));
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn collision_is_rejected() {
        let mut mapper = IdentityMapper::new();
        let a = unit("100");
        let b = unit("200");
        let contested = ExternalId::from_bytes([7u8; ExternalId::LEN]);

        mapper.register_with(&a, contested).unwrap();
        let err = mapper.register_with(&b, contested).unwrap_err();

        assert!(err.is_fatal());
        match err {
            BridgeError::DuplicateIdentity {
                existing, incoming, ..
            } => {
                assert_eq!(existing, a.unique_key());
                assert_eq!(incoming, b.unique_key());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!mapper.contains(&b));
        assert_eq!(mapper.len(), 1);
    }
}
