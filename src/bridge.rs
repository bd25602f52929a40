//! Protocol bridge between the RainPots hardware bus and the RNBO engine
//!
//! Two loops run concurrently on one cloned [`ProtocolBridge`]:
//!
//! - the hardware loop reads the serial stream, decodes frames and forwards
//!   controller movements and preset requests to the engine;
//! - the network loop reads OSC datagrams from the engine, maintains the
//!   parameter mirror across preset loads and forwards meter values to the
//!   hardware.
//!
//! Shared components each sit behind their own lock. When more than one is
//! needed the registry is always locked first, and no guard is held across
//! an await point.

use anyhow::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::engine::messages::preset_name;
use crate::engine::patch::load_registry;
use crate::engine::{decode_datagram, EngineCommand, EngineMessage, EngineSink, PatchSource};
use crate::hardware::{
    ControllerEvent, FrameParser, HardwareEvent, HardwareSink, ProgramCommand, ProgramEvent,
};
use crate::meter::{scale_meter, MeterDeduplicator, METER_COUNT};
use crate::params::{is_button, ParameterRegistry};
use crate::pickup::{PickupDecision, PickupSynchronizer};
use crate::reload::{PresetReloadCoordinator, ReloadPhase};

/// Size of one serial read
const READ_CHUNK: usize = 256;

/// Timing and addressing knobs of the bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Wait after the engine reports a finished preset load before syncing buttons
    pub reload_settle: Duration,
    /// Pause between consecutive button sync commands
    pub button_sync_delay: Duration,
    /// Back-off after a serial read returned nothing or failed
    pub retry_interval: Duration,
    /// `host:port` the engine should mirror its traffic to
    pub listener_address: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reload_settle: Duration::from_millis(100),
            button_sync_delay: Duration::from_millis(5),
            retry_interval: Duration::from_millis(1),
            listener_address: "127.0.0.1:9999".to_string(),
        }
    }
}

/// Shared handle on the bridge state; clone it into each loop
#[derive(Clone)]
pub struct ProtocolBridge {
    registry: Arc<Mutex<ParameterRegistry>>,
    pickup: Arc<Mutex<PickupSynchronizer>>,
    reload: Arc<Mutex<PresetReloadCoordinator>>,
    meters: Arc<Mutex<MeterDeduplicator>>,
    hardware: Arc<dyn HardwareSink>,
    engine: Arc<dyn EngineSink>,
    patch_source: Arc<dyn PatchSource>,
    settings: Arc<BridgeSettings>,
}

impl ProtocolBridge {
    /// Create a bridge with an empty registry; call [`refresh_registry`](Self::refresh_registry)
    /// to bind controllers
    pub fn new(
        hardware: Arc<dyn HardwareSink>,
        engine: Arc<dyn EngineSink>,
        patch_source: Arc<dyn PatchSource>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(ParameterRegistry::empty())),
            pickup: Arc::new(Mutex::new(PickupSynchronizer::new())),
            reload: Arc::new(Mutex::new(PresetReloadCoordinator::new())),
            meters: Arc::new(Mutex::new(MeterDeduplicator::new())),
            hardware,
            engine,
            patch_source,
            settings: Arc::new(settings),
        }
    }

    /// Re-fetch the patch description and replace the registry
    ///
    /// A failed fetch leaves the bridge with no controllers bound.
    pub async fn refresh_registry(&self) {
        let registry = load_registry(self.patch_source.as_ref()).await;
        *self.registry.lock() = registry;
    }

    /// Ask the engine to send its parameter and preset traffic to us
    pub async fn register_listener(&self) -> Result<()> {
        info!("Registering as engine listener on {}", self.settings.listener_address);
        self.engine
            .send(&EngineCommand::AddListener(
                self.settings.listener_address.clone(),
            ))
            .await
    }

    /// Number of bound controllers
    pub fn bound_controllers(&self) -> usize {
        self.registry.lock().len()
    }

    /// Mirrored engine value of a path
    pub fn mirrored_value(&self, path: &str) -> Option<f64> {
        self.registry.lock().value(path)
    }

    pub fn is_reloading(&self) -> bool {
        self.reload.lock().is_collecting()
    }

    // ------------------------------------------------------------------
    // Hardware side
    // ------------------------------------------------------------------

    /// Read the serial stream until it closes for good
    ///
    /// Read errors and empty reads are logged and retried after the
    /// configured interval; the loop never ends on its own.
    pub async fn run_hardware_loop<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut parser = FrameParser::new();
        let mut buf = [0u8; READ_CHUNK];
        info!("Hardware loop started");

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    trace!("Serial read returned no data");
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
                Ok(n) => {
                    for event in parser.feed(&buf[..n]) {
                        self.on_hardware_event(event).await;
                    }
                }
                Err(e) => {
                    warn!("Serial read failed: {}", e);
                    parser.reset();
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
            }
        }
    }

    pub async fn on_hardware_event(&self, event: HardwareEvent) {
        match event {
            HardwareEvent::Controller(event) => self.on_controller(event).await,
            HardwareEvent::Program(event) => self.on_program(event).await,
        }
    }

    async fn on_controller(&self, event: ControllerEvent) {
        let ControllerEvent {
            unit,
            controller,
            raw_value,
        } = event;

        let outgoing = {
            let mut registry = self.registry.lock();
            let Some(binding) = registry.binding(unit, controller) else {
                debug!(
                    "Unit {} controller {} not configured (raw {})",
                    unit, controller, raw_value
                );
                return;
            };
            let path = binding.path.clone();
            let Some(normalized) = registry.normalized_value(unit, controller, raw_value) else {
                return;
            };

            if self.reload.lock().is_collecting() {
                debug!("Preset reload in progress, holding {} = {}", path, normalized);
                return;
            }

            let current = registry.value(&path);
            let mut pickup = self.pickup.lock();
            let decision = pickup.evaluate(
                unit,
                controller,
                current,
                normalized,
                is_button(controller),
            );

            match decision {
                PickupDecision::Forward(value) => Some((path, value)),
                PickupDecision::PickedUp(value) => {
                    registry.clear_value(&path);
                    debug!("Picked up {} at {}", path, value);
                    Some((path, value))
                }
                PickupDecision::Hold(state) => {
                    debug!(
                        "Needs pickup: {} engine={:?} knob={} ({:?}), {} controller(s) waiting",
                        path,
                        current,
                        normalized,
                        state,
                        pickup.pending().count()
                    );
                    None
                }
            }
        };

        if let Some((path, value)) = outgoing {
            if let Err(e) = self
                .engine
                .send(&EngineCommand::SetParameter { path, value })
                .await
            {
                warn!("Failed to forward controller movement: {:#}", e);
            }
        }
    }

    async fn on_program(&self, event: ProgramEvent) {
        let command = match event.command {
            ProgramCommand::Save if event.preset == 0 => {
                info!("Refusing to overwrite preset 000");
                return;
            }
            ProgramCommand::Save => EngineCommand::SavePreset(event.preset),
            ProgramCommand::Load => {
                let name = preset_name(event.preset);
                let registry = self.registry.lock();
                let catalogue = registry.presets();
                if !catalogue.is_empty() && !catalogue.contains(&name) {
                    warn!("Preset {} is not known to the engine", name);
                }
                EngineCommand::LoadPreset(event.preset)
            }
        };

        info!("Preset {} {}", event.command, preset_name(event.preset));
        if let Err(e) = self.engine.send(&command).await {
            warn!("Failed to send preset {}: {:#}", event.command, e);
        }
    }

    // ------------------------------------------------------------------
    // Network side
    // ------------------------------------------------------------------

    /// Receive engine datagrams on `socket` forever
    pub async fn run_network_loop(&self, socket: Arc<UdpSocket>) -> Result<()> {
        let mut buf = [0u8; rosc::decoder::MTU];
        info!("Network loop started on {}", socket.local_addr()?);

        loop {
            let (size, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            };
            self.on_datagram(&buf[..size], from).await;
        }
    }

    async fn on_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let messages = match decode_datagram(datagram) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };
        for message in messages {
            match message {
                Ok(message) => self.on_engine_message(message).await,
                Err(e) => debug!("Dropping engine message: {}", e),
            }
        }
    }

    pub async fn on_engine_message(&self, message: EngineMessage) {
        match message {
            EngineMessage::ParameterEcho { path, value } => {
                let mut registry = self.registry.lock();
                self.reload.lock().capture(&mut registry, &path, value);
            }
            EngineMessage::PresetLoadStarted { preset } => {
                info!(
                    "Preset {} load started",
                    preset.as_deref().unwrap_or("(unnamed)")
                );
                let mut registry = self.registry.lock();
                self.reload.lock().begin(&mut registry);
            }
            EngineMessage::PresetLoadFinished => self.finish_reload().await,
            EngineMessage::Response(status) => {
                debug!("Engine response: {:?}", status);
                if status.is_load_complete() {
                    info!("Engine loaded a new patch, reloading parameter bindings");
                    self.refresh_registry().await;
                }
            }
            EngineMessage::Meter { index, value } => self.on_meter(index, value).await,
            EngineMessage::Other { addr } => trace!("Ignoring {}", addr),
        }
    }

    async fn finish_reload(&self) {
        let phase = self.reload.lock().phase();
        if phase != ReloadPhase::Collecting {
            debug!("Preset load finished while {:?}", phase);
            return;
        }

        if !self.settings.reload_settle.is_zero() {
            tokio::time::sleep(self.settings.reload_settle).await;
        }

        let commands = {
            let registry = self.registry.lock();
            self.reload.lock().finish(&registry)
        };
        let Some(commands) = commands else {
            return;
        };

        if let Err(e) = self
            .hardware
            .send_burst(&commands, self.settings.button_sync_delay)
            .await
        {
            warn!("Button sync failed: {:#}", e);
        }
    }

    async fn on_meter(&self, index: i64, value: f64) {
        let index = match usize::try_from(index) {
            Ok(index) if index < METER_COUNT => index,
            _ => {
                debug!("Ignoring meter index {}", index);
                return;
            }
        };

        let command = self.meters.lock().update(index, scale_meter(value));
        if let Some(command) = command {
            if let Err(e) = self.hardware.send(&command).await {
                warn!("Failed to update meter {}: {:#}", index, e);
            }
        }
    }
}

#[cfg(test)]
mod tests;
