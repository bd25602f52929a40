//! RainPots bridge
//!
//! Connects daisy-chained RainPots control boards on a serial bus to an
//! RNBO synth engine speaking OSC. Knob and button movements become
//! parameter changes (with soft takeover after preset loads), program
//! changes become preset loads and saves, and the engine's meters and
//! button states are mirrored back onto the hardware.

pub mod bridge;
pub mod config;
pub mod configure;
pub mod engine;
pub mod hardware;
pub mod meter;
pub mod params;
pub mod pickup;
pub mod reload;

pub use bridge::{BridgeSettings, ProtocolBridge};
pub use config::BridgeConfig;
