//! Preset reload coordination
//!
//! When the engine loads a preset it echoes every parameter value. Those
//! echoes are captured into the registry mirror so pickup can work against
//! the new preset, and once the load is finished the captured button values
//! are pushed back to the hardware.

use tracing::{debug, info, trace};

use crate::hardware::commands::{encode_button_value, BUTTON_COUNT, BUTTON_UNCHANGED};
use crate::hardware::HardwareCommand;
use crate::params::ParameterRegistry;

/// Whether a preset load is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPhase {
    #[default]
    Idle,
    Collecting,
}

/// Owns the process-wide reload phase
#[derive(Debug, Default)]
pub struct PresetReloadCoordinator {
    phase: ReloadPhase,
}

impl PresetReloadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReloadPhase {
        self.phase
    }

    pub fn is_collecting(&self) -> bool {
        self.phase == ReloadPhase::Collecting
    }

    /// Preset load started: forget every mirrored value and start capturing
    ///
    /// A second start while already collecting restarts the capture.
    pub fn begin(&mut self, registry: &mut ParameterRegistry) {
        registry.reset_values();
        self.phase = ReloadPhase::Collecting;
        info!("Preset reload started, capturing parameter values");
    }

    /// Record an engine parameter echo
    ///
    /// Only captured while collecting, and only for bound paths. Returns
    /// true when the mirror was written.
    pub fn capture(&self, registry: &mut ParameterRegistry, path: &str, value: f64) -> bool {
        if !self.is_collecting() {
            return false;
        }
        if !registry.is_bound_path(path) {
            trace!("Ignoring echo for unbound path {}", path);
            return false;
        }
        let captured = registry.set_value(path, value);
        if captured {
            debug!("Captured {} = {:?}", path, registry.value(path));
        }
        captured
    }

    /// Preset load finished
    ///
    /// Returns to `Idle` and yields the button sync commands to send, or
    /// `None` if no reload was in progress.
    pub fn finish(&mut self, registry: &ParameterRegistry) -> Option<Vec<HardwareCommand>> {
        if !self.is_collecting() {
            return None;
        }
        self.phase = ReloadPhase::Idle;
        let commands = button_sync_commands(registry);
        info!(
            "Preset reload finished, syncing buttons on {} unit(s)",
            commands.len()
        );
        Some(commands)
    }
}

/// One button-values command per unit that has at least one known button value
///
/// Buttons that are unbound or whose value is unknown are sent as
/// [`BUTTON_UNCHANGED`].
pub fn button_sync_commands(registry: &ParameterRegistry) -> Vec<HardwareCommand> {
    registry
        .button_values()
        .into_iter()
        .filter(|(_, slots)| slots.iter().any(Option::is_some))
        .map(|(unit, slots)| {
            let mut values = [BUTTON_UNCHANGED; BUTTON_COUNT];
            for (button, slot) in slots.iter().enumerate() {
                if let Some(value) = slot {
                    values[button] = encode_button_value(button, *value);
                }
            }
            HardwareCommand::ButtonValues { unit, values }
        })
        .collect()
}
