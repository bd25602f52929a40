//! OSC messages exchanged with the RNBO engine

use rosc::{OscMessage, OscPacket, OscType};
use serde::Deserialize;
use thiserror::Error;

/// Preset load request (outbound) and "preset load starting" notification (inbound)
pub const PRESET_LOAD_ADDR: &str = "/rnbo/inst/0/presets/load";
pub const PRESET_SAVE_ADDR: &str = "/rnbo/inst/0/presets/save";
/// Sent by the engine once every parameter of a loaded preset has been echoed
pub const RELOAD_END_ADDR: &str = "/rnbo/inst/0/params/reload-config-end";
pub const LISTENER_ADD_ADDR: &str = "/rnbo/listeners/add";
pub const RESPONSE_ADDR: &str = "/rnbo/resp";
pub const METER_ADDR: &str = "/rnbo/inst/0/messages/out/meter";
/// Suffix of the parameter addresses carrying normalized values
pub const NORMALIZED_SUFFIX: &str = "/normalized";

/// Engine preset names are zero-padded 3-digit indices
pub fn preset_name(preset: u8) -> String {
    format!("{:03}", preset)
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("OSC codec error: {0}")]
    Osc(String),
    #[error("{addr}: missing argument {index}")]
    MissingArgument { addr: String, index: usize },
    #[error("{addr}: argument {index} has unexpected type {found:?}")]
    BadArgument {
        addr: String,
        index: usize,
        found: OscType,
    },
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message sent to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    SetParameter { path: String, value: f64 },
    LoadPreset(u8),
    SavePreset(u8),
    /// Ask the engine to mirror its traffic to `host:port`
    AddListener(String),
}

impl EngineCommand {
    pub fn to_packet(&self) -> OscPacket {
        let (addr, args) = match self {
            EngineCommand::SetParameter { path, value } => {
                (path.clone(), vec![OscType::Float(*value as f32)])
            }
            EngineCommand::LoadPreset(preset) => (
                PRESET_LOAD_ADDR.to_string(),
                vec![OscType::String(preset_name(*preset))],
            ),
            EngineCommand::SavePreset(preset) => (
                PRESET_SAVE_ADDR.to_string(),
                vec![OscType::String(preset_name(*preset))],
            ),
            EngineCommand::AddListener(target) => (
                LISTENER_ADD_ADDR.to_string(),
                vec![OscType::String(target.clone())],
            ),
        };
        OscPacket::Message(OscMessage { addr, args })
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        rosc::encoder::encode(&self.to_packet()).map_err(|e| MessageError::Osc(format!("{:?}", e)))
    }
}

/// `result` object of a `/rnbo/resp` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseStatus {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl ResponseStatus {
    /// The engine finished loading a (re-)exported patch
    pub fn is_load_complete(&self) -> bool {
        self.message.as_deref() == Some("loaded") && self.progress == Some(100.0)
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    result: ResponseStatus,
}

/// Message received from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Normalized parameter value echoed by the engine
    ParameterEcho { path: String, value: f64 },
    PresetLoadStarted { preset: Option<String> },
    PresetLoadFinished,
    Response(ResponseStatus),
    Meter { index: i64, value: f64 },
    Other { addr: String },
}

impl EngineMessage {
    pub fn from_osc(msg: &OscMessage) -> Result<Self, MessageError> {
        let addr = msg.addr.as_str();
        match addr {
            PRESET_LOAD_ADDR => {
                let preset = match msg.args.first() {
                    Some(OscType::String(name)) => Some(name.clone()),
                    _ => None,
                };
                Ok(EngineMessage::PresetLoadStarted { preset })
            }
            RELOAD_END_ADDR => Ok(EngineMessage::PresetLoadFinished),
            RESPONSE_ADDR => {
                let payload = match arg(msg, 0)? {
                    OscType::String(s) => s,
                    other => return Err(bad_argument(msg, 0, other)),
                };
                let envelope: ResponseEnvelope = serde_json::from_str(payload)?;
                Ok(EngineMessage::Response(envelope.result))
            }
            METER_ADDR => {
                let index = numeric_arg(msg, 0)?;
                if !index.is_finite() {
                    return Err(bad_argument(msg, 0, &msg.args[0]));
                }
                let value = numeric_arg(msg, 1)?;
                Ok(EngineMessage::Meter {
                    index: index as i64,
                    value,
                })
            }
            _ if addr.ends_with(NORMALIZED_SUFFIX) => Ok(EngineMessage::ParameterEcho {
                path: msg.addr.clone(),
                value: numeric_arg(msg, 0)?,
            }),
            _ => Ok(EngineMessage::Other {
                addr: msg.addr.clone(),
            }),
        }
    }
}

/// Decode one datagram, flattening bundles into their messages
///
/// A message that fails to decode is returned as an error in place so the
/// rest of the bundle is still handled.
pub fn decode_datagram(buf: &[u8]) -> Result<Vec<Result<EngineMessage, MessageError>>, MessageError> {
    let (_, packet) =
        rosc::decoder::decode_udp(buf).map_err(|e| MessageError::Osc(format!("{:?}", e)))?;
    let mut messages = Vec::new();
    flatten(&packet, &mut messages);
    Ok(messages)
}

fn flatten(packet: &OscPacket, out: &mut Vec<Result<EngineMessage, MessageError>>) {
    match packet {
        OscPacket::Message(msg) => out.push(EngineMessage::from_osc(msg)),
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                flatten(inner, out);
            }
        }
    }
}

fn arg(msg: &OscMessage, index: usize) -> Result<&OscType, MessageError> {
    msg.args.get(index).ok_or_else(|| MessageError::MissingArgument {
        addr: msg.addr.clone(),
        index,
    })
}

fn numeric_arg(msg: &OscMessage, index: usize) -> Result<f64, MessageError> {
    match arg(msg, index)? {
        OscType::Float(v) => Ok(*v as f64),
        OscType::Double(v) => Ok(*v),
        OscType::Int(v) => Ok(*v as f64),
        OscType::Long(v) => Ok(*v as f64),
        other => Err(bad_argument(msg, index, other)),
    }
}

fn bad_argument(msg: &OscMessage, index: usize, found: &OscType) -> MessageError {
    MessageError::BadArgument {
        addr: msg.addr.clone(),
        index,
        found: found.clone(),
    }
}
