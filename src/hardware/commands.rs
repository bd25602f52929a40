//! Outbound hardware commands
//!
//! Every command starts with `0xF0 + unit` followed by a command byte in the
//! 0xE0-0xE6 range and a fixed-size payload.

use std::fmt;

use super::format_hex;

/// Command start byte for unit 0
pub const COMMAND_START: u8 = 0xF0;

pub const CMD_CALIBRATE_MIN: u8 = 0xE0;
pub const CMD_CALIBRATE_CENTER: u8 = 0xE1;
pub const CMD_CALIBRATE_MAX: u8 = 0xE2;
pub const CMD_BUTTON_MODES: u8 = 0xE3;
pub const CMD_CONTROLLER_STATES: u8 = 0xE4;
pub const CMD_BUTTON_VALUES: u8 = 0xE5;
pub const CMD_METER_VALUE: u8 = 0xE6;

/// Buttons per unit (controller indices 0-5)
pub const BUTTON_COUNT: usize = 6;
/// Controllers per unit (buttons plus knobs)
pub const CONTROLLER_COUNT: usize = 14;
/// Entries in the button mode table
pub const BUTTON_MODE_SLOTS: usize = 8;
/// Button value meaning "leave this button as it is"
pub const BUTTON_UNCHANGED: u8 = 15;
/// The stepped button whose value is a step count rather than on/off
pub const STEPPED_BUTTON: usize = 1;
/// The meter module is always addressed as unit 0
pub const METER_UNIT: u8 = 0;

/// Knob position being calibrated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPosition {
    Min,
    Center,
    Max,
}

impl CalibrationPosition {
    fn command_byte(self) -> u8 {
        match self {
            CalibrationPosition::Min => CMD_CALIBRATE_MIN,
            CalibrationPosition::Center => CMD_CALIBRATE_CENTER,
            CalibrationPosition::Max => CMD_CALIBRATE_MAX,
        }
    }
}

/// Command sent from the bridge (or the configuration utility) to a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCommand {
    /// Store the current knob positions as min, center or max
    Calibrate {
        unit: u8,
        position: CalibrationPosition,
    },
    /// Button behaviour table
    ButtonModes {
        unit: u8,
        modes: [u8; BUTTON_MODE_SLOTS],
    },
    /// Enable/disable each controller
    ControllerStates {
        unit: u8,
        states: [u8; CONTROLLER_COUNT],
    },
    /// Restore button LEDs/steps after a preset load
    ButtonValues { unit: u8, values: [u8; BUTTON_COUNT] },
    /// Drive one meter of the meter module
    MeterValue { index: u8, value: u8 },
}

impl HardwareCommand {
    /// Unit this command is addressed to
    pub fn unit(&self) -> u8 {
        match *self {
            HardwareCommand::Calibrate { unit, .. }
            | HardwareCommand::ButtonModes { unit, .. }
            | HardwareCommand::ControllerStates { unit, .. }
            | HardwareCommand::ButtonValues { unit, .. } => unit,
            HardwareCommand::MeterValue { .. } => METER_UNIT,
        }
    }

    /// Encode the command to bus bytes
    pub fn encode(&self) -> Vec<u8> {
        let start = COMMAND_START | (self.unit() & 0x0F);
        match self {
            HardwareCommand::Calibrate { position, .. } => vec![start, position.command_byte()],
            HardwareCommand::ButtonModes { modes, .. } => {
                let mut bytes = vec![start, CMD_BUTTON_MODES];
                bytes.extend_from_slice(modes);
                bytes
            }
            HardwareCommand::ControllerStates { states, .. } => {
                let mut bytes = vec![start, CMD_CONTROLLER_STATES];
                bytes.extend_from_slice(states);
                bytes
            }
            HardwareCommand::ButtonValues { values, .. } => {
                let mut bytes = vec![start, CMD_BUTTON_VALUES];
                bytes.extend_from_slice(values);
                bytes
            }
            HardwareCommand::MeterValue { index, value } => {
                vec![start, CMD_METER_VALUE, *index, *value]
            }
        }
    }
}

impl fmt::Display for HardwareCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareCommand::Calibrate { .. } => "Calibrate",
            HardwareCommand::ButtonModes { .. } => "ButtonModes",
            HardwareCommand::ControllerStates { .. } => "ControllerStates",
            HardwareCommand::ButtonValues { .. } => "ButtonValues",
            HardwareCommand::MeterValue { .. } => "MeterValue",
        };
        write!(f, "{} unit:{} | {}", name, self.unit(), format_hex(&self.encode()))
    }
}

/// Convert a mirrored normalized value into the byte a button expects
///
/// The stepped button takes the number of steps (`1 / value`); every other
/// button is simply on when its value is above zero.
pub fn encode_button_value(button: usize, value: f64) -> u8 {
    if button == STEPPED_BUTTON {
        if value <= 0.0 {
            0
        } else {
            (1.0 / value).round().clamp(0.0, u8::MAX as f64) as u8
        }
    } else if value > 0.0 {
        1
    } else {
        0
    }
}
