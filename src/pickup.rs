//! Parameter pickup (soft takeover)
//!
//! After a preset load the engine's values and the physical knob positions
//! disagree. A knob is only allowed to drive its parameter again once it
//! has been moved to within [`PICKUP_TOLERANCE`] of the engine's value, so
//! the parameter never jumps.

use std::collections::HashMap;
use tracing::trace;

/// Maximum distance between knob and engine value that counts as picked up
pub const PICKUP_TOLERANCE: f64 = 0.03;

/// Per-controller synchronisation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Physical value is being forwarded
    #[default]
    Locked,
    /// Movement withheld, engine value is at or above the knob
    PendingUp,
    /// Movement withheld, engine value is below the knob
    PendingDown,
}

/// Outcome of one controller movement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickupDecision {
    /// Forward the value; the mirror had nothing to reconcile
    Forward(f64),
    /// Forward the value and drop the mirrored engine value, it has been picked up
    PickedUp(f64),
    /// Swallow the movement
    Hold(SyncState),
}

impl PickupDecision {
    /// Value to send to the engine, if any
    pub fn forwarded(&self) -> Option<f64> {
        match *self {
            PickupDecision::Forward(v) | PickupDecision::PickedUp(v) => Some(v),
            PickupDecision::Hold(_) => None,
        }
    }
}

/// Tracks the pickup state of every (unit, controller)
#[derive(Debug, Default)]
pub struct PickupSynchronizer {
    states: HashMap<(u8, u8), SyncState>,
}

impl PickupSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do with a normalized controller movement
    ///
    /// * `current` - mirrored engine value for the bound path (`None` = unknown)
    /// * `incoming` - normalized physical value
    /// * `button` - buttons always pass straight through
    pub fn evaluate(
        &mut self,
        unit: u8,
        controller: u8,
        current: Option<f64>,
        incoming: f64,
        button: bool,
    ) -> PickupDecision {
        let (decision, state) = match current {
            None => (PickupDecision::Forward(incoming), SyncState::Locked),
            Some(_) if button => (PickupDecision::Forward(incoming), SyncState::Locked),
            Some(current) if (current - incoming).abs() <= PICKUP_TOLERANCE => {
                (PickupDecision::PickedUp(incoming), SyncState::Locked)
            }
            Some(current) => {
                let pending = if current < incoming {
                    SyncState::PendingDown
                } else {
                    SyncState::PendingUp
                };
                (PickupDecision::Hold(pending), pending)
            }
        };

        let previous = self.states.insert((unit, controller), state);
        if previous.unwrap_or_default() != state {
            trace!(unit, controller, ?state, "Pickup state changed");
        }
        decision
    }

    /// Current state of a controller (`Locked` if never seen)
    pub fn state(&self, unit: u8, controller: u8) -> SyncState {
        self.states
            .get(&(unit, controller))
            .copied()
            .unwrap_or_default()
    }

    /// Controllers whose movement is currently withheld
    pub fn pending(&self) -> impl Iterator<Item = ((u8, u8), SyncState)> + '_ {
        self.states
            .iter()
            .filter(|(_, s)| **s != SyncState::Locked)
            .map(|(k, s)| (*k, *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_value_forwards() {
        let mut pickup = PickupSynchronizer::new();
        let decision = pickup.evaluate(0, 8, None, 0.75, false);
        assert_eq!(decision, PickupDecision::Forward(0.75));
        assert_eq!(pickup.state(0, 8), SyncState::Locked);
    }

    #[test]
    fn test_button_always_forwards() {
        let mut pickup = PickupSynchronizer::new();
        let decision = pickup.evaluate(0, 2, Some(0.0), 1.0, true);
        assert_eq!(decision, PickupDecision::Forward(1.0));
        assert_eq!(pickup.state(0, 2), SyncState::Locked);
    }

    #[test]
    fn test_within_tolerance_is_picked_up() {
        let mut pickup = PickupSynchronizer::new();
        let decision = pickup.evaluate(1, 7, Some(0.40), 0.41, false);
        assert_eq!(decision, PickupDecision::PickedUp(0.41));
        assert_eq!(decision.forwarded(), Some(0.41));
        assert_eq!(pickup.state(1, 7), SyncState::Locked);
    }

    #[test]
    fn test_knob_above_engine_value_holds_pending_down() {
        let mut pickup = PickupSynchronizer::new();
        let decision = pickup.evaluate(1, 7, Some(0.40), 0.80, false);
        assert_eq!(decision, PickupDecision::Hold(SyncState::PendingDown));
        assert_eq!(decision.forwarded(), None);
        assert_eq!(pickup.state(1, 7), SyncState::PendingDown);
    }

    #[test]
    fn test_knob_below_engine_value_holds_pending_up() {
        let mut pickup = PickupSynchronizer::new();
        let decision = pickup.evaluate(1, 7, Some(0.80), 0.40, false);
        assert_eq!(decision, PickupDecision::Hold(SyncState::PendingUp));
        assert_eq!(pickup.state(1, 7), SyncState::PendingUp);
    }

    #[test]
    fn test_convergence_after_holding() {
        let mut pickup = PickupSynchronizer::new();
        pickup.evaluate(3, 9, Some(0.5), 0.1, false);
        pickup.evaluate(3, 9, Some(0.5), 0.3, false);
        assert_eq!(pickup.state(3, 9), SyncState::PendingUp);

        let decision = pickup.evaluate(3, 9, Some(0.5), 0.48, false);
        assert_eq!(decision, PickupDecision::PickedUp(0.48));
        assert_eq!(pickup.state(3, 9), SyncState::Locked);
    }

    #[test]
    fn test_states_are_per_controller() {
        let mut pickup = PickupSynchronizer::new();
        pickup.evaluate(0, 6, Some(0.9), 0.1, false);
        pickup.evaluate(0, 7, None, 0.1, false);
        pickup.evaluate(1, 6, Some(0.1), 0.9, false);

        assert_eq!(pickup.state(0, 6), SyncState::PendingUp);
        assert_eq!(pickup.state(0, 7), SyncState::Locked);
        assert_eq!(pickup.state(1, 6), SyncState::PendingDown);

        let mut pending: Vec<_> = pickup.pending().collect();
        pending.sort_by_key(|(k, _)| *k);
        assert_eq!(
            pending,
            vec![((0, 6), SyncState::PendingUp), ((1, 6), SyncState::PendingDown)]
        );
    }
}
