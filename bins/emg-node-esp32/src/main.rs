//! EMG telemetry node firmware for ESP32-S3.
//!
//! This binary requires the ESP32 Rust toolchain and will not compile with
//! the standard Rust toolchain. The lifecycle is the same as the Linux
//! simulator; only the board, network, transport and control server differ.
//!
//! WiFi credentials come from `EMG_WIFI_SSID` / `EMG_WIFI_PASSWORD` at build
//! time.

use esp_idf_hal::gpio::{IOPin, OutputPin};
use esp_idf_hal::prelude::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::info;

use emg_core::{ControlEndpoint, MeasureTrigger, NodeConfig};
use emg_esp32::board::{BoardPins, EspBoard};
use emg_esp32::config::WifiConfig;
use emg_esp32::http::start_control_server;
use emg_esp32::tls::EspTlsTransport;
use emg_esp32::wifi::EspNetwork;
use emg_node::DeviceLifecycle;
use emg_protocol::TelemetryReporter;

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("EMG node starting...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = NodeConfig::default();
    let wifi_config = WifiConfig::from_build_env();

    let pins = peripherals.pins;
    let board = EspBoard::new(
        BoardPins {
            sensor: pins.gpio1,
            battery: pins.gpio8,
            button: pins.gpio9.downgrade(),
            status_led: [
                pins.gpio4.downgrade_output(),
                pins.gpio5.downgrade_output(),
                pins.gpio6.downgrade_output(),
            ],
            signal_led: [
                pins.gpio7.downgrade_output(),
                pins.gpio15.downgrade_output(),
                pins.gpio16.downgrade_output(),
            ],
            buzzer: pins.gpio17.downgrade_output(),
        },
        peripherals.adc1,
        peripherals.ledc,
    )?;

    let network = EspNetwork::new(peripherals.modem, sysloop, Some(nvs), &wifi_config)?;

    let trigger = MeasureTrigger::new();
    let _server = start_control_server(ControlEndpoint::new(trigger.clone()))?;

    let transport = EspTlsTransport::new(config.cloud.read_timeout_ms as u32);
    let reporter = TelemetryReporter::new(transport, &config.cloud, config.identity_prefix_len);

    let mut node = DeviceLifecycle::new(config, board, network, reporter, trigger);
    node.run();

    Ok(())
}
