//! The reconciliation engine.
//!
//! [`Bridge`] owns the status table, the identity mapper and the hooked
//! providers behind a single async mutex, so a command never interleaves with
//! a half-applied refresh. Every broker side effect goes through the
//! [`BrokerGateway`]; every backend call goes through an
//! [`InventoryProvider`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use vm2mqtt_core::{ExternalId, ManagerKey, Unit, UnitStatus};
use vm2mqtt_inventory::InventoryProvider;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::gateway::{BrokerGateway, InboundMessage};
use crate::identity::IdentityMapper;
use crate::lifecycle::{self, CommandAction, DesiredPower, Reconcile};
use crate::topics::TopicScheme;

/// Counts from one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Units seen for the first time and announced.
    pub announced: usize,
    /// Tracked units whose state changed and was republished.
    pub updated: usize,
    /// Tracked units with no change.
    pub unchanged: usize,
    /// Units retracted because their provider no longer lists them.
    pub retracted: usize,
    /// Providers whose listing failed this cycle.
    pub failed_providers: Vec<ManagerKey>,
}

impl RefreshReport {
    /// Number of broker publishes the cycle caused, excluding retractions.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.announced + self.updated
    }
}

#[derive(Default)]
struct BridgeState {
    providers: BTreeMap<ManagerKey, Arc<dyn InventoryProvider>>,
    status: HashMap<Unit, bool>,
    identities: IdentityMapper,
}

impl BridgeState {
    fn provider_name(&self, key: &ManagerKey) -> String {
        self.providers
            .get(key)
            .map_or_else(|| key.to_string(), |p| p.display_name().to_string())
    }
}

/// Synchronizes provider inventories with the broker.
pub struct Bridge<G: BrokerGateway> {
    gateway: Arc<G>,
    topics: TopicScheme,
    config: BridgeConfig,
    state: Mutex<BridgeState>,
}

impl<G: BrokerGateway> Bridge<G> {
    /// Create a bridge publishing through `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<G>, config: BridgeConfig) -> Self {
        Self {
            gateway,
            topics: config.topics(),
            config,
            state: Mutex::new(BridgeState::default()),
        }
    }

    /// Get a reference to the gateway.
    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Get the topic scheme.
    #[must_use]
    pub const fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Every tracked unit, sorted by unique key.
    pub async fn tracked_units(&self) -> Vec<Unit> {
        let state = self.state.lock().await;
        let mut units: Vec<Unit> = state.status.keys().cloned().collect();
        units.sort();
        units
    }

    /// The recorded power state of a unit, if tracked.
    pub async fn status_of(&self, unit: &Unit) -> Option<bool> {
        self.state.lock().await.status.get(unit).copied()
    }

    /// Subscribe to the discovery status topic.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Gateway` if the subscription fails.
    pub async fn start(&self) -> Result<()> {
        let topic = self.topics.reset_topic();
        self.gateway.subscribe(&topic).await?;
        tracing::info!(topic = %topic, "Listening for discovery resets");
        Ok(())
    }

    /// Hook a provider and announce everything it lists.
    ///
    /// Hooking a provider whose manager key is already hooked does nothing.
    /// If the initial listing fails the provider stays hooked and its units
    /// are announced by a later refresh. Returns the number of units
    /// announced.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::DuplicateIdentity` on an id collision and
    /// `BridgeError::Gateway` if announcing fails.
    pub async fn hook(&self, provider: Arc<dyn InventoryProvider>) -> Result<usize> {
        let key = provider.manager_key().clone();
        let mut state = self.state.lock().await;

        if state.providers.contains_key(&key) {
            tracing::debug!(provider = %key, "Provider already hooked");
            return Ok(0);
        }
        state.providers.insert(key.clone(), Arc::clone(&provider));
        tracing::info!(provider = %key, name = provider.display_name(), "Hooked inventory provider");

        let listing = match provider.list_vms().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(provider = %key, error = %e, "Initial listing failed, will retry on refresh");
                return Ok(0);
            }
        };

        let mut announced = 0;
        for UnitStatus { unit, powered_on } in listing {
            if state.status.contains_key(&unit) {
                continue;
            }
            self.add_unit(&mut state, &unit, powered_on).await?;
            announced += 1;
        }

        tracing::info!(provider = %key, units = announced, "Initial inventory announced");
        Ok(announced)
    }

    /// Poll every provider and publish what changed.
    ///
    /// Providers are listed concurrently; results are applied one provider
    /// at a time under the state lock. A failing provider is skipped for
    /// this cycle and reported.
    pub async fn refresh(&self) -> RefreshReport {
        let mut state = self.state.lock().await;
        let providers: Vec<Arc<dyn InventoryProvider>> = state.providers.values().cloned().collect();

        let listings = join_all(providers.iter().map(|provider| async move {
            (provider.manager_key().clone(), provider.list_vms().await)
        }))
        .await;

        let mut report = RefreshReport::default();
        for (key, listing) in listings {
            match listing {
                Ok(listing) => {
                    self.apply_listing(&mut state, &key, listing, &mut report)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(provider = %key, error = %e, "Listing failed, skipping provider this cycle");
                    report.failed_providers.push(key);
                }
            }
        }

        tracing::debug!(
            announced = report.announced,
            updated = report.updated,
            unchanged = report.unchanged,
            retracted = report.retracted,
            failed = report.failed_providers.len(),
            "Refresh complete"
        );
        report
    }

    async fn apply_listing(
        &self,
        state: &mut BridgeState,
        key: &ManagerKey,
        listing: Vec<UnitStatus>,
        report: &mut RefreshReport,
    ) {
        let mut seen = HashSet::with_capacity(listing.len());

        for UnitStatus { unit, powered_on } in listing {
            if !seen.insert(unit.clone()) {
                continue;
            }

            if let Err(e) = self.update_details(state, &unit).await {
                tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to re-announce renamed unit");
            }

            match lifecycle::reconcile(state.status.get(&unit).copied(), powered_on) {
                Reconcile::Unchanged => report.unchanged += 1,
                Reconcile::Update => match self.publish_status(&unit, Some(powered_on)).await {
                    Ok(()) => {
                        tracing::info!(unit = %unit.unique_key(), powered_on, "Power state changed");
                        state.status.insert(unit, powered_on);
                        report.updated += 1;
                    }
                    Err(e) => {
                        tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to publish state change");
                    }
                },
                Reconcile::Announce => match self.add_unit(state, &unit, powered_on).await {
                    Ok(()) => report.announced += 1,
                    Err(e) => {
                        tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to announce unit");
                    }
                },
            }
        }

        if !self.config.retract_missing {
            return;
        }

        let mut missing: Vec<Unit> = state
            .status
            .keys()
            .filter(|unit| unit.manager_key() == key && !seen.contains(*unit))
            .cloned()
            .collect();
        missing.sort();

        for unit in missing {
            match self.retract_unit(state, &unit, true).await {
                Ok(()) => report.retracted += 1,
                Err(e) => {
                    tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to retract unit");
                }
            }
        }
    }

    /// Apply a command to the unit behind `external_id`.
    ///
    /// `ON` requests power on, any other payload power off. The provider is
    /// only called when the recorded state differs from the requested one. A
    /// failed provider call is logged and the requested state is recorded
    /// anyway; the resulting state is always republished.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::UnknownUnit` if the id is not tracked and
    /// `BridgeError::Gateway` if the state cannot be published.
    pub async fn handle_command(&self, external_id: &ExternalId, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        let unit = state.identities.resolve(external_id)?.clone();

        if !DesiredPower::is_recognized(payload) {
            tracing::warn!(
                unit = %unit.unique_key(),
                payload = %String::from_utf8_lossy(payload),
                "Unrecognized command payload, treating it as OFF"
            );
        }

        let current = state.status.get(&unit).copied().unwrap_or(false);
        let action = lifecycle::plan_command(DesiredPower::parse(payload), current);
        tracing::debug!(unit = %unit.unique_key(), ?action, current, "Handling command");

        if action.calls_backend() {
            match state.providers.get(unit.manager_key()).cloned() {
                Some(provider) => {
                    let result = if action == CommandAction::Start {
                        provider.start(&unit).await
                    } else {
                        provider.shutdown(&unit).await
                    };
                    if let Err(e) = result {
                        tracing::warn!(
                            unit = %unit.unique_key(),
                            ?action,
                            error = %e,
                            "Backend call failed, next refresh will reconcile"
                        );
                    }
                }
                None => {
                    tracing::error!(unit = %unit.unique_key(), provider = %unit.manager_key(), "No provider hooked for unit");
                }
            }
        }

        let new_state = action.resulting_state();
        state.status.insert(unit.clone(), new_state);
        self.publish_status(&unit, Some(new_state)).await
    }

    /// Republish discovery for every tracked unit.
    ///
    /// Status and subscriptions are left alone. A unit whose publish fails is
    /// logged and skipped. Returns the number of units re-announced.
    pub async fn handle_discovery_reset(&self) -> usize {
        let state = self.state.lock().await;
        let mut count = 0;
        for (unit, external_id) in state.identities.iter() {
            let provider_name = state.provider_name(unit.manager_key());
            match self.publish_discovery(unit, external_id, &provider_name).await {
                Ok(()) => count += 1,
                Err(e) => {
                    tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to re-announce unit");
                }
            }
        }
        tracing::info!(units = count, tracked = state.identities.len(), "Re-announced discovery");
        count
    }

    /// Withdraw every unit and disconnect from the broker.
    ///
    /// A unit that fails to withdraw is logged and skipped so the rest still
    /// go out.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Gateway` if the disconnect fails.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut units: Vec<Unit> = state.status.keys().cloned().collect();
        units.sort();

        tracing::info!(units = units.len(), "Withdrawing all units");
        for unit in &units {
            if let Err(e) = self.retract_unit(&mut state, unit, false).await {
                tracing::error!(unit = %unit.unique_key(), error = %e, "Failed to withdraw unit");
            }
        }
        drop(state);

        self.gateway.disconnect().await?;
        tracing::info!("Bridge shut down");
        Ok(())
    }

    /// Route one inbound message. Errors are logged, never returned.
    pub async fn handle_message(&self, message: &InboundMessage) {
        tracing::debug!(
            topic = %message.topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "Received message"
        );

        if message.topic == self.topics.reset_topic() {
            if message.payload == lifecycle::ONLINE.as_bytes() {
                self.handle_discovery_reset().await;
            }
            return;
        }

        let Some(key) = self.topics.parse_command_topic(&message.topic) else {
            tracing::debug!(topic = %message.topic, "Ignoring message on unrelated topic");
            return;
        };

        let external_id = ExternalId::for_key(key);
        match self.handle_command(&external_id, &message.payload).await {
            Ok(()) => {}
            Err(e @ BridgeError::UnknownUnit(_)) => {
                tracing::error!(topic = %message.topic, error = %e, "Command for unknown unit");
            }
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Command dropped");
            }
        }
    }

    /// Run the event loop until `shutdown_signal` resolves or the inbound
    /// channel closes, then [`shutdown`](Self::shutdown).
    ///
    /// Refreshes every `refresh_interval`, starting one interval from now.
    ///
    /// # Errors
    ///
    /// Returns the error from the final shutdown.
    pub async fn run<F>(
        &self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        shutdown_signal: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let period = self.config.refresh_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown_signal);

        tracing::info!(interval = ?period, "Bridge running");
        loop {
            tokio::select! {
                () = &mut shutdown_signal => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(&message).await,
                    None => {
                        tracing::warn!("Inbound channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }

    /// Register, announce, subscribe and publish the initial state.
    ///
    /// Nothing is left in the tables if any step fails, so the next refresh
    /// tries again from scratch.
    async fn add_unit(&self, state: &mut BridgeState, unit: &Unit, powered_on: bool) -> Result<()> {
        let external_id = state.identities.register(unit)?;
        let provider_name = state.provider_name(unit.manager_key());

        if let Err(e) = self
            .announce(unit, &external_id, &provider_name, powered_on)
            .await
        {
            state.identities.unregister(unit);
            return Err(e);
        }

        state.status.insert(unit.clone(), powered_on);
        tracing::info!(
            unit = %unit.unique_key(),
            external_id = %external_id,
            powered_on,
            "Announced unit"
        );
        Ok(())
    }

    async fn announce(
        &self,
        unit: &Unit,
        external_id: &ExternalId,
        provider_name: &str,
        powered_on: bool,
    ) -> Result<()> {
        self.publish_discovery(unit, external_id, provider_name)
            .await?;
        self.gateway
            .subscribe(&self.topics.command_topic(unit))
            .await?;
        self.publish_status(unit, Some(powered_on)).await
    }

    /// Withdraw the state, clear discovery and forget the unit.
    ///
    /// The unit is only forgotten once every broker call succeeded, so a
    /// failed retraction is attempted again by the next refresh.
    async fn retract_unit(&self, state: &mut BridgeState, unit: &Unit, unsubscribe: bool) -> Result<()> {
        let Some(external_id) = state.identities.external_id(unit) else {
            return Ok(());
        };

        self.publish_status(unit, None).await?;
        self.gateway
            .publish(&self.topics.discovery_topic(&external_id), b"", false)
            .await?;
        if unsubscribe {
            self.gateway
                .unsubscribe(&self.topics.command_topic(unit))
                .await?;
        }

        state.identities.unregister(unit);
        state.status.remove(unit);
        tracing::info!(unit = %unit.unique_key(), external_id = %external_id, "Retracted unit");
        Ok(())
    }

    /// Take a listed unit's current name and annotations into both tables.
    ///
    /// A rename is re-announced first and only recorded once the discovery
    /// publish went out.
    async fn update_details(&self, state: &mut BridgeState, unit: &Unit) -> Result<()> {
        let Some((stored, _)) = state.status.get_key_value(unit) else {
            return Ok(());
        };
        let renamed = stored.display_name() != unit.display_name();
        if !renamed && stored.annotations() == unit.annotations() {
            return Ok(());
        }
        let previous_name = stored.display_name().to_string();

        if renamed {
            if let Some(external_id) = state.identities.external_id(unit) {
                let provider_name = state.provider_name(unit.manager_key());
                self.publish_discovery(unit, &external_id, &provider_name)
                    .await?;
            }
            tracing::info!(
                unit = %unit.unique_key(),
                from = %previous_name,
                to = unit.display_name(),
                "Unit renamed"
            );
        }

        state.identities.update(unit);
        if let Some(powered_on) = state.status.remove(unit) {
            state.status.insert(unit.clone(), powered_on);
        }
        Ok(())
    }

    async fn publish_discovery(
        &self,
        unit: &Unit,
        external_id: &ExternalId,
        provider_name: &str,
    ) -> Result<()> {
        let payload = self
            .topics
            .discovery_payload(unit, external_id, provider_name)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.gateway
            .publish(
                &self.topics.discovery_topic(external_id),
                payload.as_bytes(),
                false,
            )
            .await?;
        Ok(())
    }

    async fn publish_status(&self, unit: &Unit, state: Option<bool>) -> Result<()> {
        self.gateway
            .publish(
                &self.topics.state_topic(unit),
                lifecycle::state_payload(state).as_bytes(),
                true,
            )
            .await?;
        Ok(())
    }
}
