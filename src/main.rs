//! RainPots bridge - serial control surfaces to an RNBO engine over OSC

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rainpots_bridge::engine::{HttpPatchSource, OscClient};
use rainpots_bridge::hardware::{self, SerialWriter};
use rainpots_bridge::{configure, BridgeConfig, ProtocolBridge};

/// RainPots bridge - control an RNBO synth from RainPots boards
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "rainpots.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable debug output (same as --log-level debug)
    #[arg(short, long)]
    debug: bool,

    /// Serial port the boards are connected to
    #[arg(long, env = "RAINPOTS_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,

    /// URL of the engine's patch description
    #[arg(long, env = "RAINPOTS_PATCH_URL")]
    patch_url: Option<String>,

    /// List available serial ports
    #[arg(long)]
    list_ports: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactively calibrate and configure boards
    Configure,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    init_logging(level)?;

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    let mut config = BridgeConfig::load_or_default(&args.config).await?;
    if let Some(port) = args.serial_port {
        config.serial.port = port;
    }
    if let Some(baud_rate) = args.baud_rate {
        config.serial.baud_rate = baud_rate;
    }
    if let Some(url) = args.patch_url {
        config.patch.url = url;
    }
    config.validate()?;

    if let Some(Command::Configure) = args.command {
        return configure::run(&config.serial.port, config.serial.baud_rate).await;
    }

    info!("Starting RainPots bridge...");
    info!("Configuration file: {}", args.config);

    run_app(config, shutdown_signal()).await?;

    info!("RainPots bridge stopped");
    Ok(())
}

async fn run_app(
    config: BridgeConfig,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let serial = hardware::open_serial(&config.serial.port, config.serial.baud_rate)?;
    let (serial_in, serial_out) = tokio::io::split(serial);

    let listen_addr = config.listen_addr()?;
    let socket = Arc::new(
        UdpSocket::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind OSC listener on {}", listen_addr))?,
    );
    info!("Listening for engine messages on {}", listen_addr);

    let engine = Arc::new(OscClient::new(socket.clone(), config.engine_addr()?));
    let patch_source = Arc::new(HttpPatchSource::new(
        config.patch.url.clone(),
        Duration::from_millis(config.patch.timeout_ms),
    )?);
    let bridge = ProtocolBridge::new(
        Arc::new(SerialWriter::new(serial_out)),
        engine,
        patch_source,
        config.bridge_settings(),
    );

    bridge.refresh_registry().await;
    if let Err(e) = bridge.register_listener().await {
        warn!("Failed to register with the engine: {:#}", e);
    }

    let hardware_loop = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run_hardware_loop(serial_in).await })
    };
    let network_loop = {
        let bridge = bridge.clone();
        let socket = socket.clone();
        tokio::spawn(async move { bridge.run_network_loop(socket).await })
    };

    tokio::select! {
        result = hardware_loop => report_exit("Hardware loop", result),
        result = network_loop => report_exit("Network loop", result),
        _ = shutdown => {}
    }

    Ok(())
}

fn report_exit(name: &str, result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => warn!("{} ended", name),
        Ok(Err(e)) => error!("{} failed: {:#}", name, e),
        Err(e) => error!("{} panicked: {}", name, e),
    }
}

fn list_ports_formatted() {
    println!("\n{}", "=== Available Serial Ports ===".bold().cyan());
    match hardware::list_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "No serial ports found".dimmed()),
        Ok(ports) => {
            for port in ports {
                println!("  {}", port.bright_white());
            }
        }
        Err(e) => println!("  {} {:#}", "Failed to enumerate ports:".red(), e),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
