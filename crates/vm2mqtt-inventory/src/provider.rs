//! The inventory provider capability.
//!
//! Every management backend is exposed to the bridge through the
//! [`InventoryProvider`] trait. Providers are selected at configuration time;
//! the bridge only ever sees `Arc<dyn InventoryProvider>`.

use async_trait::async_trait;
use vm2mqtt_core::{ManagerKey, Unit, UnitStatus};

use crate::error::Result;

/// Trait for a backend that lists units and controls their power state.
///
/// Filtering (for example an allow-list of VM ids) is the provider's own
/// business and invisible to callers.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Stable identity of this provider instance.
    fn manager_key(&self) -> &ManagerKey;

    /// Human-readable provider name, used as the device name on the broker.
    fn display_name(&self) -> &str;

    /// Take a full snapshot of the managed units and their power state.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::BackendUnavailable` if the backend cannot be
    /// queried this cycle.
    async fn list_vms(&self) -> Result<Vec<UnitStatus>>;

    /// Power on a unit. Best-effort: the next listing reveals the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued or was rejected.
    async fn start(&self, unit: &Unit) -> Result<()>;

    /// Gracefully shut down a unit. Best-effort, like [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued or was rejected.
    async fn shutdown(&self, unit: &Unit) -> Result<()>;
}

/// An in-memory provider for testing without a real backend.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::InventoryError;

    /// A control call received by [`MockProvider`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ControlCall {
        /// `start` was called for the unit.
        Start(Unit),
        /// `shutdown` was called for the unit.
        Shutdown(Unit),
    }

    /// A provider whose inventory lives in memory.
    ///
    /// `start`/`shutdown` flip the stored power state like a real backend
    /// would, unless control failures are switched on.
    #[derive(Debug)]
    pub struct MockProvider {
        key: ManagerKey,
        name: String,
        units: Mutex<Vec<UnitStatus>>,
        calls: Mutex<Vec<ControlCall>>,
        list_calls: AtomicUsize,
        fail_listing: AtomicBool,
        fail_control: AtomicBool,
    }

    impl MockProvider {
        /// Create an empty mock provider.
        #[must_use]
        pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                key: ManagerKey::new(key),
                name: name.into(),
                units: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                list_calls: AtomicUsize::new(0),
                fail_listing: AtomicBool::new(false),
                fail_control: AtomicBool::new(false),
            }
        }

        /// Build a unit owned by this provider.
        #[must_use]
        pub fn unit(&self, natural_id: &str) -> Unit {
            Unit::new(self.key.clone(), natural_id, format!("unit {natural_id}"))
        }

        /// Add or replace a unit in the simulated backend.
        ///
        /// Replacing keeps the unit's position but takes its new name and
        /// annotations.
        pub fn put(&self, unit: Unit, powered_on: bool) {
            let mut units = self.units.lock();
            if let Some(existing) = units.iter_mut().find(|s| s.unit == unit) {
                *existing = UnitStatus::new(unit, powered_on);
            } else {
                units.push(UnitStatus::new(unit, powered_on));
            }
        }

        /// Change the power state of a unit behind the bridge's back.
        pub fn set_power(&self, unit: &Unit, powered_on: bool) {
            if let Some(existing) = self.units.lock().iter_mut().find(|s| &s.unit == unit) {
                existing.powered_on = powered_on;
            }
        }

        /// Remove a unit from the simulated backend.
        pub fn remove(&self, unit: &Unit) {
            self.units.lock().retain(|s| &s.unit != unit);
        }

        /// Make subsequent listings fail with `BackendUnavailable`.
        pub fn fail_listing(&self, fail: bool) {
            self.fail_listing.store(fail, Ordering::SeqCst);
        }

        /// Make subsequent control calls fail without changing state.
        pub fn fail_control(&self, fail: bool) {
            self.fail_control.store(fail, Ordering::SeqCst);
        }

        /// Current power state of a unit in the simulated backend.
        #[must_use]
        pub fn power_of(&self, unit: &Unit) -> Option<bool> {
            self.units
                .lock()
                .iter()
                .find(|s| &s.unit == unit)
                .map(|s| s.powered_on)
        }

        /// Number of times `list_vms` has been called.
        #[must_use]
        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        /// All control calls received so far.
        #[must_use]
        pub fn control_calls(&self) -> Vec<ControlCall> {
            self.calls.lock().clone()
        }

        fn control(&self, call: ControlCall, powered_on: bool) -> Result<()> {
            let unit = match &call {
                ControlCall::Start(unit) | ControlCall::Shutdown(unit) => unit.clone(),
            };
            self.calls.lock().push(call);
            if self.fail_control.load(Ordering::SeqCst) {
                return Err(InventoryError::BackendUnavailable(
                    "mock control failure".to_string(),
                ));
            }
            self.set_power(&unit, powered_on);
            Ok(())
        }
    }

    #[async_trait]
    impl InventoryProvider for MockProvider {
        fn manager_key(&self) -> &ManagerKey {
            &self.key
        }

        fn display_name(&self) -> &str {
            &self.name
        }

        async fn list_vms(&self) -> Result<Vec<UnitStatus>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(InventoryError::BackendUnavailable(
                    "mock listing failure".to_string(),
                ));
            }
            Ok(self.units.lock().clone())
        }

        async fn start(&self, unit: &Unit) -> Result<()> {
            self.control(ControlCall::Start(unit.clone()), true)
        }

        async fn shutdown(&self, unit: &Unit) -> Result<()> {
            self.control(ControlCall::Shutdown(unit.clone()), false)
        }
    }
}
