//! RNBO engine link
//!
//! Parameters, presets and meters travel as OSC over UDP; the patch
//! description is fetched over HTTP.

pub mod messages;
pub mod patch;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

pub use messages::{decode_datagram, EngineCommand, EngineMessage, MessageError, ResponseStatus};
pub use patch::{HttpPatchSource, PatchSource};

/// Write side of the engine link
#[async_trait]
pub trait EngineSink: Send + Sync {
    async fn send(&self, command: &EngineCommand) -> Result<()>;
}

/// Sends OSC datagrams to the engine from the bridge's listening socket
pub struct OscClient {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl OscClient {
    pub fn new(socket: Arc<UdpSocket>, target: SocketAddr) -> Self {
        Self { socket, target }
    }
}

#[async_trait]
impl EngineSink for OscClient {
    async fn send(&self, command: &EngineCommand) -> Result<()> {
        let datagram = command.encode()?;
        self.socket
            .send_to(&datagram, self.target)
            .await
            .with_context(|| format!("Failed to send OSC to {}", self.target))?;
        trace!("Sent to engine: {:?}", command);
        Ok(())
    }
}
