//! EMG node simulator for Linux.
//!
//! Runs the same lifecycle as the firmware against a simulated board, with
//! the control endpoint served by axum. The cloud is reached over plain TCP,
//! so point `cloud.host`/`cloud.port` at a local test service.
//!
//! Environment:
//! - `EMG_NODE_CONFIG`: path to a JSON `NodeConfig` (defaults otherwise)
//! - `EMG_CONTROL_ADDR`: control endpoint bind address (default `0.0.0.0:8080`)
//! - `RUST_LOG`: log filter
//!
//! Press Enter to toggle the simulated power button.

mod control;
mod sim;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emg_core::{ControlEndpoint, MeasureTrigger, NodeConfig};
use emg_node::DeviceLifecycle;
use emg_protocol::{TcpTransport, TelemetryReporter};

use crate::sim::{HostNetwork, SimulatedBoard};

const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8080";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Tone frequency of the simulated EMG signal.
const SIMULATED_EMG_HZ: f64 = 120.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,emg_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("EMG node simulator starting...");

    let config = load_config()?;
    let control_addr: SocketAddr = std::env::var("EMG_CONTROL_ADDR")
        .unwrap_or_else(|_| DEFAULT_CONTROL_ADDR.to_string())
        .parse()
        .context("EMG_CONTROL_ADDR is not a socket address")?;

    let trigger = MeasureTrigger::new();
    let button = Arc::new(AtomicBool::new(false));

    // Control endpoint
    let app = control::router(ControlEndpoint::new(trigger.clone()));
    let listener = tokio::net::TcpListener::bind(control_addr).await?;
    tracing::info!("Control endpoint listening on {}", control_addr);
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Control server error: {}", e);
        }
    });

    // Power button on stdin
    let stdin_button = button.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            let held = !stdin_button.fetch_xor(true, Ordering::AcqRel);
            tracing::info!("Power button {}", if held { "held" } else { "released" });
        }
    });

    // Lifecycle on a blocking thread
    let transport = TcpTransport::new(
        CONNECT_TIMEOUT,
        Duration::from_millis(config.cloud.read_timeout_ms),
    );
    let reporter = TelemetryReporter::new(transport, &config.cloud, config.identity_prefix_len);
    let board = SimulatedBoard::new(SIMULATED_EMG_HZ, button);
    let node_handle = tokio::task::spawn_blocking(move || {
        let mut node = DeviceLifecycle::new(config, board, HostNetwork, reporter, trigger);
        node.run();
    });

    tracing::info!("Try: curl http://localhost:{}/measure", control_addr.port());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = http_handle => {
            tracing::warn!("Control server stopped");
        }
        _ = node_handle => {
            tracing::info!("Node is asleep");
        }
    }

    tracing::info!("Shutdown complete");
    // Neither the lifecycle thread nor the stdin reader can be joined.
    std::process::exit(0);
}

fn load_config() -> anyhow::Result<NodeConfig> {
    match std::env::var("EMG_NODE_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            let config = NodeConfig::from_json(&text)
                .with_context(|| format!("Failed to load config file {}", path))?;
            tracing::info!("Loaded configuration from {}", path);
            Ok(config)
        }
        Err(_) => {
            tracing::info!("EMG_NODE_CONFIG not set, using default configuration");
            Ok(NodeConfig::default())
        }
    }
}
