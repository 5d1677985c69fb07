//! Simulated board and host network.
//!
//! The board produces a two-tone EMG signal, a slowly draining battery and a
//! sensor level that swings across the signal threshold. The power button is
//! shared with the stdin reader in `main`.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use emg_core::{Board, Clock, Network, StatusIndicators};

/// Raw battery reading at start, the calibrated "full" point.
const BATTERY_RAW_FULL: f64 = 4070.0;
/// Raw counts lost per minute of uptime.
const BATTERY_DRAIN_PER_MIN: f64 = 8.0;

pub struct SimulatedBoard {
    origin: Instant,
    emg_hz: f64,
    button: Arc<AtomicBool>,
    shown: StatusIndicators,
}

impl SimulatedBoard {
    pub fn new(emg_hz: f64, button: Arc<AtomicBool>) -> Self {
        Self {
            origin: Instant::now(),
            emg_hz,
            button,
            shown: StatusIndicators::default(),
        }
    }

    fn seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Clock for SimulatedBoard {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl Board for SimulatedBoard {
    fn read_emg(&mut self) -> u16 {
        let t = self.seconds();
        let w = 2.0 * std::f64::consts::PI * t;
        let value = 2048.0 + 900.0 * (w * self.emg_hz).sin() + 250.0 * (w * self.emg_hz * 2.7).sin();
        value.clamp(0.0, 4095.0) as u16
    }

    fn read_signal_level(&mut self) -> u16 {
        // One full swing every 20 s.
        let phase = 2.0 * std::f64::consts::PI * self.seconds() / 20.0;
        (2000.0 + 600.0 * phase.sin()) as u16
    }

    fn read_battery_raw(&mut self) -> u16 {
        let drained = BATTERY_DRAIN_PER_MIN * self.seconds() / 60.0;
        (BATTERY_RAW_FULL - drained).max(0.0) as u16
    }

    fn power_button_held(&mut self) -> bool {
        self.button.load(Ordering::Acquire)
    }

    fn show(&mut self, indicators: &StatusIndicators) {
        if *indicators != self.shown {
            debug!(
                "LEDs primary={:?} secondary={:?}",
                indicators.primary, indicators.secondary
            );
            self.shown = *indicators;
        }
    }

    fn deep_sleep(&mut self) {
        info!("Simulated deep sleep, restart the simulator to wake");
    }
}

/// The host is always associated.
#[derive(Debug, Default)]
pub struct HostNetwork;

impl Network for HostNetwork {
    fn begin(&mut self) {
        debug!("Host network up");
    }

    fn reconnect(&mut self) {}

    fn is_associated(&mut self) -> bool {
        true
    }

    fn local_ip(&self) -> Option<String> {
        // Connecting a UDP socket sends nothing; it only selects a route.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("192.0.2.1:80").ok()?;
        Some(socket.local_addr().ok()?.ip().to_string())
    }

    fn mac_address(&self) -> Option<String> {
        None
    }
}
