//! The controllable unit model.
//!
//! A [`Unit`] is one VM, container or stack exposed by an inventory provider.
//! Units are immutable values; two units are the same entity iff their
//! [`Unit::unique_key`] is equal, regardless of display name or annotations.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::ids::{ExternalId, ManagerKey};

/// One controllable compute entity.
#[derive(Debug, Clone)]
pub struct Unit {
    manager_key: ManagerKey,
    natural_id: String,
    display_name: String,
    kind_path: Vec<String>,
    annotations: BTreeMap<String, String>,
    unique_key: String,
}

impl Unit {
    /// Create a unit with no kind path and no annotations.
    #[must_use]
    pub fn new(
        manager_key: ManagerKey,
        natural_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self::with_kind_path(manager_key, Vec::<String>::new(), natural_id, display_name)
    }

    /// Create a unit whose identity includes the given kind path segments.
    #[must_use]
    pub fn with_kind_path<I, S>(
        manager_key: ManagerKey,
        kind_path: I,
        natural_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind_path: Vec<String> = kind_path.into_iter().map(Into::into).collect();
        let natural_id = natural_id.into();
        let unique_key = compose_key(&manager_key, &kind_path, &natural_id);
        Self {
            manager_key,
            natural_id,
            display_name: display_name.into(),
            kind_path,
            annotations: BTreeMap::new(),
            unique_key,
        }
    }

    /// Attach a provider-private annotation. Annotations never affect identity.
    #[must_use]
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// The key of the provider that owns this unit.
    #[must_use]
    pub fn manager_key(&self) -> &ManagerKey {
        &self.manager_key
    }

    /// Provider-local identifier.
    #[must_use]
    pub fn natural_id(&self) -> &str {
        &self.natural_id
    }

    /// Human-readable label.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Backend-specific disambiguating segments.
    #[must_use]
    pub fn kind_path(&self) -> &[String] {
        &self.kind_path
    }

    /// Look up a provider-private annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Every provider-private annotation.
    #[must_use]
    pub const fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// The slash-joined identity: `manager_key/kind_path.../natural_id`.
    #[must_use]
    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    /// The broker-facing identifier derived from the unique key.
    #[must_use]
    pub fn external_id(&self) -> ExternalId {
        ExternalId::for_key(&self.unique_key)
    }
}

fn compose_key(manager_key: &ManagerKey, kind_path: &[String], natural_id: &str) -> String {
    let mut key = String::from(manager_key.as_str());
    for segment in kind_path {
        key.push('/');
        key.push_str(segment);
    }
    key.push('/');
    key.push_str(natural_id);
    key
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.unique_key == other.unique_key
    }
}

impl Eq for Unit {}

impl Hash for Unit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_key.hash(state);
    }
}

impl PartialOrd for Unit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Unit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.unique_key.cmp(&other.unique_key)
    }
}

/// A unit paired with its observed power state, as produced by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// The unit.
    pub unit: Unit,
    /// Whether the unit is currently powered on.
    pub powered_on: bool,
}

impl UnitStatus {
    /// Pair a unit with its power state.
    #[must_use]
    pub const fn new(unit: Unit, powered_on: bool) -> Self {
        Self { unit, powered_on }
    }
}
