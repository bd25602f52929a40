//! Meter feedback deduplication
//!
//! The engine streams meter values much faster than they change at 8-bit
//! resolution; only changes are forwarded to the meter module.

use crate::hardware::HardwareCommand;

/// Meters available on the meter module
pub const METER_COUNT: usize = 2;

/// Scale a normalized meter value to the module's 0-255 range
pub fn scale_meter(value: f64) -> u8 {
    (value * 255.0).trunc().clamp(0.0, 255.0) as u8
}

/// Last value sent per meter
#[derive(Debug, Default)]
pub struct MeterDeduplicator {
    last_sent: [Option<u8>; METER_COUNT],
}

impl MeterDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command to send for a new meter reading, or `None` if unchanged or out of range
    pub fn update(&mut self, index: usize, value: u8) -> Option<HardwareCommand> {
        let slot = self.last_sent.get_mut(index)?;
        if *slot == Some(value) {
            return None;
        }
        *slot = Some(value);
        Some(HardwareCommand::MeterValue {
            index: index as u8,
            value,
        })
    }
}
