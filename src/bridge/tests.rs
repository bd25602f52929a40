//! Tests for the protocol bridge

use super::*;
use crate::engine::ResponseStatus;
use crate::hardware::HardwareCommand;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

const CUTOFF: &str = "/rnbo/inst/0/params/cutoff/normalized";
const RESONANCE: &str = "/rnbo/inst/0/params/resonance/normalized";
const GATE: &str = "/rnbo/inst/0/params/gate/normalized";
const STEPS: &str = "/rnbo/inst/0/params/steps/normalized";
const MUTE: &str = "/rnbo/inst/0/params/fx/mute/normalized";

#[derive(Default)]
struct RecordingHardware {
    sent: Mutex<Vec<HardwareCommand>>,
}

impl RecordingHardware {
    fn sent(&self) -> Vec<HardwareCommand> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl HardwareSink for RecordingHardware {
    async fn send(&self, command: &HardwareCommand) -> Result<()> {
        self.sent.lock().push(command.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingEngine {
    sent: Mutex<Vec<EngineCommand>>,
}

impl RecordingEngine {
    fn sent(&self) -> Vec<EngineCommand> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EngineSink for RecordingEngine {
    async fn send(&self, command: &EngineCommand) -> Result<()> {
        self.sent.lock().push(command.clone());
        Ok(())
    }
}

/// Serves whatever patch is currently set; `None` behaves like an unreachable engine
struct StaticPatchSource {
    patch: Mutex<Option<Value>>,
}

impl StaticPatchSource {
    fn new(patch: Option<Value>) -> Self {
        Self {
            patch: Mutex::new(patch),
        }
    }

    fn set(&self, patch: Option<Value>) {
        *self.patch.lock() = patch;
    }
}

#[async_trait]
impl PatchSource for StaticPatchSource {
    async fn fetch(&self) -> Result<Value> {
        self.patch
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

fn param(path: &str, meta: &str) -> Value {
    json!({ "CONTENTS": {
        "normalized": { "FULL_PATH": path, "TYPE": "f" },
        "meta": { "VALUE": meta }
    }})
}

fn make_patch(params: Value) -> Value {
    json!({
        "CONTENTS": { "rnbo": { "CONTENTS": { "inst": { "CONTENTS": { "0": { "CONTENTS": {
            "params": { "CONTENTS": params },
            "presets": { "CONTENTS": { "entries": { "VALUE": ["000", "001", "002"] } } }
        }}}}}}}
    })
}

fn synth_patch() -> Value {
    make_patch(json!({
        "cutoff": param(CUTOFF, r#"{"rainpots": {"unit": 1, "ctl": 7, "center": 1}}"#),
        "resonance": param(RESONANCE, r#"{"rainpots": {"unit": 1, "ctl": 8}}"#),
        "gate": param(GATE, r#"{"rainpots": {"unit": 1, "ctl": 0}}"#),
        "steps": param(STEPS, r#"{"rainpots": {"unit": 1, "ctl": 1}}"#),
        "fx": { "CONTENTS": {
            "mute": param(MUTE, r#"{"rainpots": {"unit": 3, "ctl": 2}}"#)
        }}
    }))
}

struct Harness {
    bridge: ProtocolBridge,
    hardware: Arc<RecordingHardware>,
    engine: Arc<RecordingEngine>,
    patch: Arc<StaticPatchSource>,
}

async fn make_harness(patch: Option<Value>) -> Harness {
    let hardware = Arc::new(RecordingHardware::default());
    let engine = Arc::new(RecordingEngine::default());
    let patch = Arc::new(StaticPatchSource::new(patch));
    let settings = BridgeSettings {
        reload_settle: Duration::ZERO,
        button_sync_delay: Duration::ZERO,
        retry_interval: Duration::from_millis(1),
        listener_address: "127.0.0.1:9999".to_string(),
    };
    let bridge = ProtocolBridge::new(hardware.clone(), engine.clone(), patch.clone(), settings);
    bridge.refresh_registry().await;
    Harness {
        bridge,
        hardware,
        engine,
        patch,
    }
}

fn knob(unit: u8, controller: u8, raw_value: u16) -> HardwareEvent {
    HardwareEvent::Controller(ControllerEvent {
        unit,
        controller,
        raw_value,
    })
}

fn program(command: ProgramCommand, preset: u8) -> HardwareEvent {
    HardwareEvent::Program(ProgramEvent { command, preset })
}

fn set(path: &str, value: f64) -> EngineCommand {
    EngineCommand::SetParameter {
        path: path.to_string(),
        value,
    }
}

fn echo(path: &str, value: f64) -> EngineMessage {
    EngineMessage::ParameterEcho {
        path: path.to_string(),
        value,
    }
}

/// Run a full preset load carrying `values`
async fn load_preset(bridge: &ProtocolBridge, values: &[(&str, f64)]) {
    bridge
        .on_engine_message(EngineMessage::PresetLoadStarted {
            preset: Some("001".to_string()),
        })
        .await;
    for (path, value) in values {
        bridge.on_engine_message(echo(path, *value)).await;
    }
    bridge
        .on_engine_message(EngineMessage::PresetLoadFinished)
        .await;
}

#[tokio::test]
async fn test_registry_loaded_from_patch() {
    let h = make_harness(Some(synth_patch())).await;
    assert_eq!(h.bridge.bound_controllers(), 5);
}

#[tokio::test]
async fn test_unreachable_patch_runs_with_no_bindings() {
    let h = make_harness(None).await;
    assert_eq!(h.bridge.bound_controllers(), 0);

    h.bridge.on_hardware_event(knob(1, 8, 300)).await;
    assert!(h.engine.sent().is_empty());
}

#[tokio::test]
async fn test_unbound_controller_is_ignored() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge.on_hardware_event(knob(4, 6, 100)).await;
    h.bridge.on_hardware_event(knob(1, 13, 100)).await;

    assert!(h.engine.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_mirror_forwards_movement() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge.on_hardware_event(knob(1, 8, 511)).await;
    h.bridge.on_hardware_event(knob(1, 8, 0)).await;
    // Inside the center dead zone
    h.bridge.on_hardware_event(knob(1, 7, 260)).await;

    assert_eq!(
        h.engine.sent(),
        vec![set(RESONANCE, 1.0), set(RESONANCE, 0.0), set(CUTOFF, 0.5)]
    );
}

#[tokio::test]
async fn test_pickup_holds_until_knob_converges() {
    let h = make_harness(Some(synth_patch())).await;
    load_preset(&h.bridge, &[(RESONANCE, 0.4)]).await;
    assert_eq!(h.bridge.mirrored_value(RESONANCE), Some(0.4));

    // 409 / 511 = 0.800, too far from the engine's 0.4
    h.bridge.on_hardware_event(knob(1, 8, 409)).await;
    assert!(h.engine.sent().is_empty());

    // 210 / 511 = 0.410, within tolerance
    h.bridge.on_hardware_event(knob(1, 8, 210)).await;
    assert_eq!(h.engine.sent(), vec![set(RESONANCE, 0.41)]);
    assert_eq!(h.bridge.mirrored_value(RESONANCE), None);

    // Picked up: everything passes from now on
    h.bridge.on_hardware_event(knob(1, 8, 511)).await;
    assert_eq!(
        h.engine.sent(),
        vec![set(RESONANCE, 0.41), set(RESONANCE, 1.0)]
    );
}

#[tokio::test]
async fn test_buttons_bypass_pickup() {
    let h = make_harness(Some(synth_patch())).await;
    load_preset(&h.bridge, &[(GATE, 0.0)]).await;

    h.bridge.on_hardware_event(knob(1, 0, 511)).await;

    assert_eq!(h.engine.sent(), vec![set(GATE, 1.0)]);
}

#[tokio::test]
async fn test_movements_held_while_reloading() {
    let h = make_harness(Some(synth_patch())).await;
    h.bridge
        .on_engine_message(EngineMessage::PresetLoadStarted { preset: None })
        .await;
    assert!(h.bridge.is_reloading());

    h.bridge.on_hardware_event(knob(1, 8, 300)).await;
    assert!(h.engine.sent().is_empty());

    h.bridge
        .on_engine_message(EngineMessage::PresetLoadFinished)
        .await;
    assert!(!h.bridge.is_reloading());

    h.bridge.on_hardware_event(knob(1, 8, 511)).await;
    assert_eq!(h.engine.sent(), vec![set(RESONANCE, 1.0)]);
}

#[tokio::test]
async fn test_program_change_loads_and_saves_presets() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge
        .on_hardware_event(program(ProgramCommand::Load, 2))
        .await;
    // Not in the catalogue: still forwarded
    h.bridge
        .on_hardware_event(program(ProgramCommand::Load, 42))
        .await;
    h.bridge
        .on_hardware_event(program(ProgramCommand::Save, 2))
        .await;

    assert_eq!(
        h.engine.sent(),
        vec![
            EngineCommand::LoadPreset(2),
            EngineCommand::LoadPreset(42),
            EngineCommand::SavePreset(2),
        ]
    );
}

#[tokio::test]
async fn test_saving_preset_zero_is_refused() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge
        .on_hardware_event(program(ProgramCommand::Save, 0))
        .await;
    assert!(h.engine.sent().is_empty());

    h.bridge
        .on_hardware_event(program(ProgramCommand::Load, 0))
        .await;
    assert_eq!(h.engine.sent(), vec![EngineCommand::LoadPreset(0)]);
}

#[tokio::test]
async fn test_reload_syncs_buttons_per_unit() {
    let h = make_harness(Some(synth_patch())).await;

    load_preset(
        &h.bridge,
        &[
            (GATE, 1.0),
            (STEPS, 0.25),
            (CUTOFF, 0.9),
            (MUTE, 0.0),
            ("/rnbo/inst/0/params/unbound/normalized", 0.3),
        ],
    )
    .await;

    assert_eq!(
        h.hardware.sent(),
        vec![
            HardwareCommand::ButtonValues {
                unit: 1,
                values: [1, 4, 15, 15, 15, 15],
            },
            HardwareCommand::ButtonValues {
                unit: 3,
                values: [15, 15, 0, 15, 15, 15],
            },
        ]
    );
    assert_eq!(h.bridge.mirrored_value(CUTOFF), Some(0.9));
    assert!(h.engine.sent().is_empty());
}

#[tokio::test]
async fn test_new_reload_forgets_previous_values() {
    let h = make_harness(Some(synth_patch())).await;
    load_preset(&h.bridge, &[(CUTOFF, 0.9), (GATE, 1.0)]).await;

    h.bridge
        .on_engine_message(EngineMessage::PresetLoadStarted { preset: None })
        .await;

    assert_eq!(h.bridge.mirrored_value(CUTOFF), None);
    assert_eq!(h.bridge.mirrored_value(GATE), None);
}

#[tokio::test]
async fn test_echo_outside_reload_is_not_captured() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge.on_engine_message(echo(CUTOFF, 0.7)).await;

    assert_eq!(h.bridge.mirrored_value(CUTOFF), None);
}

#[tokio::test]
async fn test_finish_without_start_sends_nothing() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge
        .on_engine_message(EngineMessage::PresetLoadFinished)
        .await;

    assert!(h.hardware.sent().is_empty());
}

#[tokio::test]
async fn test_meter_values_are_deduplicated() {
    let h = make_harness(Some(synth_patch())).await;
    let meter = |index, value| EngineMessage::Meter { index, value };

    h.bridge.on_engine_message(meter(0, 0.5)).await;
    h.bridge.on_engine_message(meter(0, 0.5)).await;
    h.bridge.on_engine_message(meter(1, 0.5)).await;
    h.bridge.on_engine_message(meter(0, 1.0)).await;
    h.bridge.on_engine_message(meter(2, 0.5)).await;
    h.bridge.on_engine_message(meter(-1, 0.5)).await;

    assert_eq!(
        h.hardware.sent(),
        vec![
            HardwareCommand::MeterValue {
                index: 0,
                value: 127
            },
            HardwareCommand::MeterValue {
                index: 1,
                value: 127
            },
            HardwareCommand::MeterValue {
                index: 0,
                value: 255
            },
        ]
    );
}

#[tokio::test]
async fn test_meter_with_nan_index_is_dropped() {
    let h = make_harness(Some(synth_patch())).await;
    let datagram = |index: f32| {
        rosc::encoder::encode(&rosc::OscPacket::Message(rosc::OscMessage {
            addr: crate::engine::messages::METER_ADDR.to_string(),
            args: vec![rosc::OscType::Float(index), rosc::OscType::Float(0.5)],
        }))
        .unwrap()
    };
    let from: SocketAddr = "127.0.0.1:1234".parse().unwrap();

    h.bridge.on_datagram(&datagram(f32::NAN), from).await;
    h.bridge.on_datagram(&datagram(f32::INFINITY), from).await;
    assert!(h.hardware.sent().is_empty());

    h.bridge.on_datagram(&datagram(1.0), from).await;
    assert_eq!(
        h.hardware.sent(),
        vec![HardwareCommand::MeterValue {
            index: 1,
            value: 127
        }]
    );
}

#[tokio::test]
async fn test_patch_reloaded_after_engine_response() {
    let h = make_harness(Some(synth_patch())).await;
    assert_eq!(h.bridge.bound_controllers(), 5);

    h.patch.set(Some(make_patch(json!({
        "drive": param(
            "/rnbo/inst/0/params/drive/normalized",
            r#"{"rainpots": {"unit": 0, "ctl": 6}}"#
        )
    }))));

    h.bridge
        .on_engine_message(EngineMessage::Response(ResponseStatus {
            message: Some("loaded".to_string()),
            progress: Some(50.0),
        }))
        .await;
    assert_eq!(h.bridge.bound_controllers(), 5);

    h.bridge
        .on_engine_message(EngineMessage::Response(ResponseStatus {
            message: Some("loaded".to_string()),
            progress: Some(100.0),
        }))
        .await;
    assert_eq!(h.bridge.bound_controllers(), 1);

    h.bridge.on_hardware_event(knob(0, 6, 511)).await;
    assert_eq!(
        h.engine.sent(),
        vec![set("/rnbo/inst/0/params/drive/normalized", 1.0)]
    );
}

#[tokio::test]
async fn test_register_listener() {
    let h = make_harness(Some(synth_patch())).await;

    h.bridge.register_listener().await.unwrap();

    assert_eq!(
        h.engine.sent(),
        vec![EngineCommand::AddListener("127.0.0.1:9999".to_string())]
    );
}

#[tokio::test]
async fn test_hardware_loop_decodes_serial_stream() {
    use tokio::io::AsyncWriteExt;

    let h = make_harness(Some(synth_patch())).await;
    let (mut serial, reader) = tokio::io::duplex(64);

    let bridge = h.bridge.clone();
    let task = tokio::spawn(async move { bridge.run_hardware_loop(reader).await });

    // Split across writes, with line noise in front
    serial.write_all(&[0x05, 0xB1, 8]).await.unwrap();
    serial.write_all(&[127, 3, 0xC1, 2]).await.unwrap();

    for _ in 0..200 {
        if h.engine.sent().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();

    assert_eq!(
        h.engine.sent(),
        vec![set(RESONANCE, 1.0), EngineCommand::LoadPreset(2)]
    );
}

#[tokio::test]
async fn test_network_loop_handles_engine_datagrams() {
    let h = make_harness(Some(synth_patch())).await;
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let target = socket.local_addr().unwrap();

    let bridge = h.bridge.clone();
    let task = tokio::spawn(async move { bridge.run_network_loop(socket).await });

    let engine = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let meter = rosc::encoder::encode(&rosc::OscPacket::Message(rosc::OscMessage {
        addr: crate::engine::messages::METER_ADDR.to_string(),
        args: vec![rosc::OscType::Int(1), rosc::OscType::Float(1.0)],
    }))
    .unwrap();
    engine.send_to(&[0xde, 0xad], target).await.unwrap();
    engine.send_to(&meter, target).await.unwrap();

    for _ in 0..200 {
        if !h.hardware.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();

    assert_eq!(
        h.hardware.sent(),
        vec![HardwareCommand::MeterValue {
            index: 1,
            value: 255
        }]
    );
}
