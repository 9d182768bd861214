//! groov-io-bridge - Main Entry Point
//!
//! Builds a bridge from a TOML config against simulated devices, then
//! exchanges flow messages as JSON lines: `{"node": "<id>", "msg": {...}}` on
//! stdin is injected into a node, and every node event is written to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use groov_io_bridge::{
    config::{default_config_path, BridgeConfig, DeviceConfig},
    device::{DeviceApi, SimulatedDevice},
    logging,
    nodes::DEFAULT_EVENT_CAPACITY,
    types::{FlowMessage, NodeId},
    Bridge,
};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "groov-io-bridge", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overriding the config file
    #[arg(long)]
    log_filter: Option<String>,

    /// Latency added to every simulated device response, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Node events buffered before new ones are dropped
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,
}

/// One stdin line
#[derive(Debug, Deserialize)]
struct Injection {
    node: NodeId,
    #[serde(default)]
    msg: FlowMessage,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .or_else(default_config_path)
        .context("No --config given and no platform config directory")?;
    let mut config = BridgeConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(filter) = cli.log_filter {
        config.logging.filter = filter;
    }

    let _log_guard = logging::init(&config.logging)?;
    tracing::info!("Starting groov-io-bridge with {}", path.display());

    let latency = Duration::from_millis(cli.latency_ms);
    let clients = move |device: &DeviceConfig| -> Arc<dyn DeviceApi> {
        tracing::info!("Device {} ({}) is simulated", device.id, device.normalized_address());
        Arc::new(SimulatedDevice::demo_rack().with_latency(latency))
    };

    let (bridge, events) = Bridge::with_event_channel(&config, clients, cli.event_capacity)?;

    // Events are written from a plain thread so a blocked stdout never stalls the runtime
    let writer = std::thread::spawn(move || {
        let stdout = std::io::stdout();
        for event in events.iter() {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Failed to encode event: {}", e);
                    continue;
                }
            };
            let mut out = stdout.lock();
            if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    });

    bridge.start()?;

    // stdin is read on a plain thread; a pending tokio stdin read would hold up runtime shutdown
    let (line_tx, mut line_rx) = mpsc::channel::<std::io::Result<String>>(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    None => {
                        tracing::info!("Input closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Failed to read input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Injection>(&line) {
                    Ok(injection) => {
                        if let Err(e) = bridge.inject(&injection.node, injection.msg).await {
                            tracing::warn!("Message for {} not delivered: {}", injection.node, e);
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring malformed input line: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    bridge.shutdown();
    drop(bridge);

    // Let in-flight requests observe the shutdown before the runtime stops
    tokio::time::sleep(Duration::from_millis(100)).await;

    match tokio::task::spawn_blocking(move || writer.join()).await {
        Ok(Ok(())) => {}
        _ => tracing::warn!("Event writer thread panicked"),
    }
    tracing::info!("Shutting down...");
    Ok(())
}
