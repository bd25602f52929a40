//! Configuration for the RainPots bridge
//!
//! Everything has a default matching a stock Raspberry Pi install, so the
//! YAML file is optional and may only override the parts that differ.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::bridge::BridgeSettings;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Serial link to the daisy-chained units
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Back-off after an empty or failed read
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

/// OSC endpoints
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OscConfig {
    #[serde(default = "default_localhost")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_localhost")]
    pub engine_host: String,
    #[serde(default = "default_engine_port")]
    pub engine_port: u16,
}

/// Patch description endpoint
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PatchConfig {
    #[serde(default = "default_patch_url")]
    pub url: String,
    #[serde(default = "default_patch_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_reload_settle_ms")]
    pub reload_settle_ms: u64,
    #[serde(default = "default_button_sync_delay_ms")]
    pub button_sync_delay_ms: u64,
}

impl BridgeConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BridgeConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from file, or use the defaults if it does not exist
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            anyhow::bail!("serial.port cannot be empty");
        }
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate must be greater than 0");
        }
        if self.osc.listen_port == 0 {
            anyhow::bail!("osc.listen_port must be a fixed port, the engine needs to reach it");
        }
        if self.osc.engine_port == 0 {
            anyhow::bail!("osc.engine_port cannot be 0");
        }
        if self.patch.url.is_empty() {
            anyhow::bail!("patch.url cannot be empty");
        }
        self.listen_addr()?;
        self.engine_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.osc.listen_host, self.osc.listen_port)
    }

    pub fn engine_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.osc.engine_host, self.osc.engine_port)
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            reload_settle: Duration::from_millis(self.timing.reload_settle_ms),
            button_sync_delay: Duration::from_millis(self.timing.button_sync_delay_ms),
            retry_interval: Duration::from_millis(self.serial.retry_interval_ms),
            listener_address: format!("{}:{}", self.osc.listen_host, self.osc.listen_port),
        }
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let host = if host == "localhost" { "127.0.0.1" } else { host };
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid address {}:{}", host, port))
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            listen_host: default_localhost(),
            listen_port: default_listen_port(),
            engine_host: default_localhost(),
            engine_port: default_engine_port(),
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            url: default_patch_url(),
            timeout_ms: default_patch_timeout_ms(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reload_settle_ms: default_reload_settle_ms(),
            button_sync_delay_ms: default_button_sync_delay_ms(),
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud_rate() -> u32 { 380_400 }
fn default_retry_interval_ms() -> u64 { 1 }
fn default_localhost() -> String { "127.0.0.1".to_string() }
fn default_listen_port() -> u16 { 9999 }
fn default_engine_port() -> u16 { 1234 }
fn default_patch_url() -> String { "http://localhost:5678".to_string() }
fn default_patch_timeout_ms() -> u64 { 5000 }
fn default_reload_settle_ms() -> u64 { 100 }
fn default_button_sync_delay_ms() -> u64 { 5 }
