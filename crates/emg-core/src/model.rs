//! EMG node data model.
//!
//! These are the values the lifecycle owns and the reporter serializes.
//! None of them are persisted: everything is lost on reboot or deep sleep.

use serde::{Serialize, Serializer};

/// Identifier assigned by the cloud service on registration.
///
/// Empty until registration succeeds. The service hands out whatever token
/// sits in its response and expects it back in the same form: a token that
/// arrived as a JSON string goes out as a string, and a bare token goes out
/// as a number only when it is a canonical unsigned integer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
    quoted: bool,
}

impl DeviceIdentity {
    /// A bare token, as it appeared outside quotes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quoted: false,
        }
    }

    /// A token that arrived as a JSON string.
    pub fn quoted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quoted: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// The numeric form, if this token goes on the wire as a number.
    ///
    /// `007` and `+5` parse as integers but would not round-trip, so they
    /// stay strings.
    fn as_number(&self) -> Option<u64> {
        if self.quoted || !self.id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.id
            .parse::<u64>()
            .ok()
            .filter(|n| n.to_string() == self.id)
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for DeviceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.id),
        }
    }
}

/// Battery charge as an integer percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    pub const EMPTY: BatteryLevel = BatteryLevel(0);
    pub const FULL: BatteryLevel = BatteryLevel(100);

    /// Map a raw ADC reading onto a percentage.
    ///
    /// `100 * (raw - raw_empty) / raw_span` with truncating integer division,
    /// clamped to `[0, 100]`. A zero span maps everything to empty.
    pub fn from_raw(raw: u16, raw_empty: u16, raw_span: u16) -> Self {
        if raw_span == 0 {
            return Self::EMPTY;
        }
        let scaled = 100 * (i32::from(raw) - i32::from(raw_empty)) / i32::from(raw_span);
        Self(scaled.clamp(0, 100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl Default for BatteryLevel {
    fn default() -> Self {
        Self::FULL
    }
}

impl std::fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Node lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Process just started, nothing initialised.
    Booting,
    /// Associating with the network and registering.
    Connecting,
    /// Registered and polling.
    Idle,
    /// Blocking acquisition and analysis in progress.
    Measuring,
    /// Deactivation sent, waiting for button release before deep sleep.
    SleepPending,
}

impl LifecycleState {
    /// Whether `next` is reachable from `self` in one step.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Booting, Connecting)
                | (Connecting, Idle)
                | (Idle, Measuring)
                | (Measuring, Idle)
                | (Idle, SleepPending)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Booting => write!(f, "booting"),
            Self::Connecting => write!(f, "connecting"),
            Self::Idle => write!(f, "idle"),
            Self::Measuring => write!(f, "measuring"),
            Self::SleepPending => write!(f, "sleep-pending"),
        }
    }
}

/// An 8-bit RGB color for one status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 220);
    pub const GREEN: Rgb = Rgb::new(0, 220, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// What the status outputs should show.
///
/// Always derived from the lifecycle, never read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusIndicators {
    /// Lifecycle LED.
    pub primary: Rgb,
    /// Signal-strength LED.
    pub secondary: Rgb,
    /// Buzzer. Kept silent in every state.
    pub audio: bool,
}

impl StatusIndicators {
    /// Derive the indicator outputs.
    ///
    /// `blink_on` is the connecting blink phase (solid once associated),
    /// `signal_strong` whether the sensor level is above threshold.
    pub fn derive(state: LifecycleState, blink_on: bool, signal_strong: bool) -> Self {
        let primary = match state {
            LifecycleState::Booting | LifecycleState::SleepPending => Rgb::OFF,
            LifecycleState::Connecting if blink_on => Rgb::BLUE,
            LifecycleState::Connecting => Rgb::OFF,
            LifecycleState::Idle | LifecycleState::Measuring => Rgb::GREEN,
        };
        let secondary = match state {
            LifecycleState::SleepPending => Rgb::OFF,
            _ if signal_strong => Rgb::GREEN,
            _ => Rgb::OFF,
        };
        Self {
            primary,
            secondary,
            audio: false,
        }
    }
}
