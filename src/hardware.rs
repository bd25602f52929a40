//! RainPots hardware bus
//!
//! Framing for both directions of the serial link and the write side of the
//! transport. Reading is done by the bridge's hardware loop straight from the
//! serial stream.

pub mod commands;
pub mod frame;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

pub use commands::HardwareCommand;
pub use frame::{ControllerEvent, FrameParser, HardwareEvent, ProgramCommand, ProgramEvent};

/// Write side of the hardware bus
///
/// Implementations must write each command as one contiguous burst so
/// frames from the two bridge loops never interleave on the wire.
#[async_trait]
pub trait HardwareSink: Send + Sync {
    async fn send(&self, command: &HardwareCommand) -> Result<()>;

    /// Send several commands, pausing between them for the units' turnaround time
    async fn send_burst(&self, commands: &[HardwareCommand], gap: Duration) -> Result<()> {
        for (i, command) in commands.iter().enumerate() {
            if i > 0 && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            self.send(command).await?;
        }
        Ok(())
    }
}

/// Serialised writer over any async byte sink (normally the serial port)
pub struct SerialWriter<W> {
    writer: Mutex<W>,
}

impl<W> SerialWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> HardwareSink for SerialWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, command: &HardwareCommand) -> Result<()> {
        let bytes = command.encode();
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .context("Failed to write to hardware bus")?;
        writer.flush().await.context("Failed to flush hardware bus")?;
        debug!("Sent to hardware: {}", command);
        Ok(())
    }
}

/// Open the serial port the units are daisy-chained on
pub fn open_serial(port: &str, baud_rate: u32) -> Result<SerialStream> {
    let stream = tokio_serial::new(port, baud_rate)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {} at {} baud", port, baud_rate))?;
    info!("Serial port {} opened at {} baud", port, baud_rate);
    Ok(stream)
}

/// Names of the serial ports visible to the system
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Format bus bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
