//! Hardware abstraction.
//!
//! The core never touches peripherals directly. Each platform provides:
//! - ESP32: ADC oneshot channels, GPIO, LEDC PWM and deep sleep (`emg-esp32`)
//! - Linux: a simulated board (`emg-node-linux`)
//!
//! All methods are synchronous; the lifecycle is a single blocking loop.

use crate::model::StatusIndicators;

/// Monotonic time source.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin.
    fn now_micros(&self) -> u64;

    /// Block for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Board I/O used by the lifecycle and the analyzer.
///
/// Analog reads return raw ADC counts. Nothing is clamped or calibrated here.
pub trait Board: Clock {
    /// EMG input sampled during a measurement.
    fn read_emg(&mut self) -> u16;

    /// Sensor level input driving the signal-strength indicator.
    fn read_signal_level(&mut self) -> u16;

    /// Battery divider input.
    fn read_battery_raw(&mut self) -> u16;

    /// Whether the power button is currently held.
    fn power_button_held(&mut self) -> bool;

    /// Drive the status LEDs and buzzer.
    fn show(&mut self, indicators: &StatusIndicators);

    /// Enter low-power sleep with the power button as wake source.
    ///
    /// On hardware this does not return; a wake is a fresh boot.
    fn deep_sleep(&mut self);
}

/// Network association, delegated to the platform stack.
pub trait Network {
    /// Start (or restart) association with the configured network.
    fn begin(&mut self);

    /// Nudge a pending association.
    fn reconnect(&mut self);

    /// Whether the station is associated and has an address.
    fn is_associated(&mut self) -> bool;

    /// Local IPv4 address, once associated.
    fn local_ip(&self) -> Option<String>;

    /// Station MAC address formatted as `AA-BB-CC-DD-EE-FF`.
    fn mac_address(&self) -> Option<String>;
}

/// Format a MAC address the way the registration body expects it.
pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac([0x00, 0xb0, 0xd0, 0x63, 0xc2, 0x52]),
            "00-B0-D0-63-C2-52"
        );
    }
}
