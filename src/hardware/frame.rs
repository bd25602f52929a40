//! Hardware bus frame parser
//!
//! Recovers discrete controller and program events from the raw byte stream
//! coming off the RainPots bus. The parser keeps only the partial frame
//! between calls, so bytes can be fed in whatever chunks the transport hands
//! over.

use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

use super::format_hex;

/// First control-change status byte (unit 0)
pub const CONTROL_CHANGE_MIN: u8 = 0xB0;
/// Last control-change status byte (unit 15)
pub const CONTROL_CHANGE_MAX: u8 = 0xBF;
/// First program-change status byte (unit 0)
pub const PROGRAM_CHANGE_MIN: u8 = 0xC0;
/// Last program-change status byte (unit 15)
pub const PROGRAM_CHANGE_MAX: u8 = 0xCF;
/// Explicit "save preset" marker
pub const PRESET_SAVE: u8 = 0xF4;

/// Knob or button movement reported by a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerEvent {
    /// Unit index (0-15), taken from the status byte low nibble
    pub unit: u8,
    /// Controller index within the unit (0-13)
    pub controller: u8,
    /// 14-bit value assembled from the two data bytes
    pub raw_value: u16,
}

/// What a program frame asks the engine to do with a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramCommand {
    Load,
    Save,
}

impl fmt::Display for ProgramCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramCommand::Load => write!(f, "load"),
            ProgramCommand::Save => write!(f, "save"),
        }
    }
}

/// Preset load/save request from the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramEvent {
    pub command: ProgramCommand,
    pub preset: u8,
}

/// A fully decoded hardware frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Controller(ControllerEvent),
    Program(ProgramEvent),
}

/// Framing problems; each one drops the partial frame it interrupted
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected status byte {byte:#04X} inside a {frame} frame")]
    UnexpectedStatus { byte: u8, frame: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    ControlChange { status: u8, data: [u8; 3], len: usize },
    Program { command: ProgramCommand },
}

impl FrameState {
    fn label(&self) -> &'static str {
        match self {
            FrameState::Idle => "idle",
            FrameState::ControlChange { .. } => "control-change",
            FrameState::Program { .. } => "program",
        }
    }
}

/// Incremental decoder for the hardware bus
#[derive(Debug)]
pub struct FrameParser {
    state: FrameState,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
        }
    }

    /// True when no partial frame is pending
    pub fn is_idle(&self) -> bool {
        self.state == FrameState::Idle
    }

    /// Drop any partial frame and go back to scanning for a status byte
    pub fn reset(&mut self) {
        self.state = FrameState::Idle;
    }

    /// Push one byte through the state machine
    ///
    /// Returns `Ok(Some(event))` when the byte completes a frame. A status
    /// byte of either known family always starts a fresh frame, silently
    /// discarding whatever was being collected. Any other status byte is a
    /// framing error if a frame was in progress.
    pub fn push(&mut self, byte: u8) -> Result<Option<HardwareEvent>, FrameError> {
        match byte {
            CONTROL_CHANGE_MIN..=CONTROL_CHANGE_MAX => {
                self.restart(FrameState::ControlChange {
                    status: byte,
                    data: [0; 3],
                    len: 0,
                });
                Ok(None)
            }
            PROGRAM_CHANGE_MIN..=PROGRAM_CHANGE_MAX => {
                self.restart(FrameState::Program {
                    command: ProgramCommand::Load,
                });
                Ok(None)
            }
            PRESET_SAVE => {
                self.restart(FrameState::Program {
                    command: ProgramCommand::Save,
                });
                Ok(None)
            }
            0x80..=0xFF => {
                let interrupted = std::mem::replace(&mut self.state, FrameState::Idle);
                if interrupted == FrameState::Idle {
                    trace!("Ignoring status byte {:#04X} outside a frame", byte);
                    Ok(None)
                } else {
                    Err(FrameError::UnexpectedStatus {
                        byte,
                        frame: interrupted.label(),
                    })
                }
            }
            _ => Ok(self.push_data(byte)),
        }
    }

    /// Feed a chunk of bytes, collecting every completed event
    ///
    /// Framing errors are logged and scanning resumes with the next byte.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<HardwareEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            match self.push(byte) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => debug!("Dropped partial frame ({}) in chunk {}", e, format_hex(bytes)),
            }
        }
        events
    }

    fn restart(&mut self, next: FrameState) {
        if self.state != FrameState::Idle {
            trace!("Discarding partial {} frame", self.state.label());
        }
        self.state = next;
    }

    fn push_data(&mut self, byte: u8) -> Option<HardwareEvent> {
        match &mut self.state {
            FrameState::Idle => {
                trace!("Ignoring stray data byte {:#04X}", byte);
                None
            }
            FrameState::ControlChange { status, data, len } => {
                data[*len] = byte;
                *len += 1;
                if *len < data.len() {
                    return None;
                }
                let event = ControllerEvent {
                    unit: *status & 0x0F,
                    controller: data[0],
                    raw_value: ((data[2] as u16) << 7) | data[1] as u16,
                };
                self.state = FrameState::Idle;
                Some(HardwareEvent::Controller(event))
            }
            FrameState::Program { command } => {
                let event = ProgramEvent {
                    command: *command,
                    preset: byte,
                };
                self.state = FrameState::Idle;
                Some(HardwareEvent::Program(event))
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
