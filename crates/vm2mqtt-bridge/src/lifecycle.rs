//! Unit lifecycle decisions.
//!
//! Everything here is pure: the engine feeds in what it knows and executes
//! the returned action. Keeping the decisions out of the engine lets them be
//! tested without a broker or a backend.
//!
//! # Unit states
//!
//! ```text
//!   Untracked ──(listing / hook)──▶ Announced(on|off) ──(vanished / shutdown)──▶ Retracted
//!                                     │        ▲
//!                                     └────────┘
//!                              (refresh delta / command)
//! ```

/// Payload for a powered-on unit.
pub const ON: &str = "ON";

/// Payload for a powered-off unit.
pub const OFF: &str = "OFF";

/// Payload for a unit the bridge no longer manages.
pub const WITHDRAWN: &str = "";

/// Discovery birth payload that triggers a re-announce.
pub const ONLINE: &str = "online";

/// The power state a command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredPower {
    /// Turn the unit on.
    On,
    /// Turn the unit off.
    Off,
}

impl DesiredPower {
    /// Interpret a command payload. Only the exact bytes `ON` mean on.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        if payload == ON.as_bytes() {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Whether the payload is one of the two documented tokens.
    #[must_use]
    pub fn is_recognized(payload: &[u8]) -> bool {
        payload == ON.as_bytes() || payload == OFF.as_bytes()
    }
}

/// What to do with a command, given the unit's recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Call the provider's start.
    Start,
    /// Call the provider's shutdown.
    Shutdown,
    /// Already on; only re-publish.
    AlreadyOn,
    /// Already off; only re-publish.
    AlreadyOff,
}

impl CommandAction {
    /// Whether the action needs a backend call.
    #[must_use]
    pub const fn calls_backend(self) -> bool {
        matches!(self, Self::Start | Self::Shutdown)
    }

    /// The state recorded and published after the action.
    ///
    /// This is the requested state, not a confirmed one: the next refresh
    /// corrects it if the backend disagrees.
    #[must_use]
    pub const fn resulting_state(self) -> bool {
        matches!(self, Self::Start | Self::AlreadyOn)
    }
}

/// Decide how to apply a command.
#[must_use]
pub const fn plan_command(desired: DesiredPower, current: bool) -> CommandAction {
    match (desired, current) {
        (DesiredPower::On, false) => CommandAction::Start,
        (DesiredPower::On, true) => CommandAction::AlreadyOn,
        (DesiredPower::Off, true) => CommandAction::Shutdown,
        (DesiredPower::Off, false) => CommandAction::AlreadyOff,
    }
}

/// Outcome of comparing a listed status against the recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Not tracked yet: announce it.
    Announce,
    /// Tracked with a different state: publish the new state.
    Update,
    /// Tracked with the same state: nothing to publish.
    Unchanged,
}

/// Compare a recorded state (if any) with an observed one.
#[must_use]
pub const fn reconcile(previous: Option<bool>, observed: bool) -> Reconcile {
    match previous {
        None => Reconcile::Announce,
        Some(previous) if previous == observed => Reconcile::Unchanged,
        Some(_) => Reconcile::Update,
    }
}

/// The state-topic payload for a unit. `None` means withdrawn.
#[must_use]
pub const fn state_payload(state: Option<bool>) -> &'static str {
    match state {
        Some(true) => ON,
        Some(false) => OFF,
        None => WITHDRAWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_on_is_on() {
        assert_eq!(DesiredPower::parse(b"ON"), DesiredPower::On);
        assert_eq!(DesiredPower::parse(b"OFF"), DesiredPower::Off);
        assert_eq!(DesiredPower::parse(b"on"), DesiredPower::Off);
        assert_eq!(DesiredPower::parse(b"ON "), DesiredPower::Off);
        assert_eq!(DesiredPower::parse(b""), DesiredPower::Off);
    }

    #[test]
    fn recognized_tokens() {
        assert!(DesiredPower::is_recognized(b"ON"));
        assert!(DesiredPower::is_recognized(b"OFF"));
        assert!(!DesiredPower::is_recognized(b"toggle"));
    }

    #[test]
    fn command_plan_table() {
        use CommandAction::{AlreadyOff, AlreadyOn, Shutdown, Start};

        assert_eq!(plan_command(DesiredPower::On, false), Start);
        assert_eq!(plan_command(DesiredPower::On, true), AlreadyOn);
        assert_eq!(plan_command(DesiredPower::Off, true), Shutdown);
        assert_eq!(plan_command(DesiredPower::Off, false), AlreadyOff);

        assert!(Start.calls_backend() && Shutdown.calls_backend());
        assert!(!AlreadyOn.calls_backend() && !AlreadyOff.calls_backend());
        assert!(Start.resulting_state() && AlreadyOn.resulting_state());
        assert!(!Shutdown.resulting_state() && !AlreadyOff.resulting_state());
    }

    #[test]
    fn reconcile_table() {
        assert_eq!(reconcile(None, true), Reconcile::Announce);
        assert_eq!(reconcile(None, false), Reconcile::Announce);
        assert_eq!(reconcile(Some(true), true), Reconcile::Unchanged);
        assert_eq!(reconcile(Some(false), false), Reconcile::Unchanged);
        assert_eq!(reconcile(Some(true), false), Reconcile::Update);
        assert_eq!(reconcile(Some(false), true), Reconcile::Update);
    }

    #[test]
    fn state_payloads() {
        assert_eq!(state_payload(Some(true)), "ON");
        assert_eq!(state_payload(Some(false)), "OFF");
        assert_eq!(state_payload(None), "");
    }
}
