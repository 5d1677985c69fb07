//! Lifecycle state machine.
//!
//! ```text
//! Booting ──► Connecting ──► Idle ◄──► Measuring
//!                              │
//!                              ▼
//!                         SleepPending ──► (deep sleep, wake = fresh boot)
//! ```
//!
//! One poll cycle, in order:
//! 1. battery: report when the level differs from the last one reported
//! 2. power button: held for the hold window enters `SleepPending`
//! 3. signal level: recolor the secondary indicator
//! 4. measurement: run one if the trigger is pending
//!
//! Every report is best-effort. A failure is logged and the cycle carries on.

use tracing::{debug, info, warn};

use emg_core::{
    BatteryLevel, Board, DeviceIdentity, LifecycleState, MeasureTrigger, Network, NodeConfig,
    SpectralAnalyzer, StatusIndicators,
};
use emg_protocol::{TelemetryReporter, TransportChannel};

/// What the caller should do after a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Keep polling.
    Continue,
    /// The node went to sleep; stop the loop.
    Sleep,
}

/// Mutable device state, owned by the lifecycle.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub state: LifecycleState,
    /// Empty until registration succeeds.
    pub identity: DeviceIdentity,
    /// Last level sent (or attempted) to the cloud.
    pub battery: BatteryLevel,
    /// Clock reading when the button was first seen held.
    pub hold_since: Option<u64>,
    pub blink_on: bool,
    pub signal_strong: bool,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self {
            state: LifecycleState::Booting,
            identity: DeviceIdentity::default(),
            battery: BatteryLevel::FULL,
            hold_since: None,
            blink_on: false,
            signal_strong: false,
        }
    }
}

impl DeviceContext {
    pub fn indicators(&self) -> StatusIndicators {
        StatusIndicators::derive(self.state, self.blink_on, self.signal_strong)
    }
}

/// The node: one board, one network, one reporter, one analyzer.
pub struct DeviceLifecycle<B, N, T> {
    config: NodeConfig,
    board: B,
    network: N,
    reporter: TelemetryReporter<T>,
    analyzer: SpectralAnalyzer,
    trigger: MeasureTrigger,
    ctx: DeviceContext,
}

impl<B, N, T> DeviceLifecycle<B, N, T>
where
    B: Board,
    N: Network,
    T: TransportChannel,
{
    pub fn new(
        config: NodeConfig,
        board: B,
        network: N,
        reporter: TelemetryReporter<T>,
        trigger: MeasureTrigger,
    ) -> Self {
        let analyzer = SpectralAnalyzer::new(&config.sampling);
        Self {
            config,
            board,
            network,
            reporter,
            analyzer,
            trigger,
            ctx: DeviceContext::default(),
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn state(&self) -> LifecycleState {
        self.ctx.state
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn reporter(&self) -> &TelemetryReporter<T> {
        &self.reporter
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    /// A handle on the trigger shared with the control endpoint.
    pub fn trigger(&self) -> MeasureTrigger {
        self.trigger.clone()
    }

    /// Boot, then poll until the node goes to sleep.
    pub fn run(&mut self) {
        self.boot();
        loop {
            if self.poll() == PollOutcome::Sleep {
                info!("Poll loop stopped");
                return;
            }
            self.board.delay_ms(self.config.timing.poll_interval_ms);
        }
    }

    // ========================================================================
    // Boot
    // ========================================================================

    /// Associate, register and send the first battery report.
    ///
    /// Association is retried forever; there is no way out of `Connecting`
    /// other than success.
    pub fn boot(&mut self) {
        info!("Booting EMG node");
        self.refresh_indicators();
        self.transition(LifecycleState::Connecting);
        self.network.begin();

        let blink_ms = self.config.timing.connect_blink_ms;
        let reassociate_after = self.config.timing.reassociate_after;
        let mut attempts: u32 = 0;
        while !self.network.is_associated() {
            self.board.delay_ms(blink_ms);
            self.ctx.blink_on = !self.ctx.blink_on;
            self.refresh_indicators();

            attempts += 1;
            if reassociate_after > 0 && attempts % reassociate_after == 0 {
                warn!(
                    "Not associated after {} attempts, restarting association",
                    attempts
                );
                self.network.begin();
            } else {
                self.network.reconnect();
            }
        }

        // Solid blue until registered.
        self.ctx.blink_on = true;
        self.refresh_indicators();
        let ip = self.network.local_ip().unwrap_or_default();
        info!("Network associated, local address {}", ip);

        self.board.delay_ms(self.config.timing.registration_delay_ms);
        self.register(&ip);
        self.transition(LifecycleState::Idle);

        self.board.delay_ms(self.config.timing.battery_report_delay_ms);
        let level = self.read_battery();
        self.ctx.battery = level;
        self.report_battery(level);
    }

    fn register(&mut self, ip: &str) {
        let mac = if self.config.mac_address.is_empty() {
            self.network.mac_address().unwrap_or_default()
        } else {
            self.config.mac_address.clone()
        };

        match self.reporter.register(&mac, ip) {
            Ok(identity) => self.ctx.identity = identity,
            Err(e) => warn!("Registration failed: {}", e),
        }
    }

    // ========================================================================
    // Poll cycle
    // ========================================================================

    /// Run one poll cycle.
    pub fn poll(&mut self) -> PollOutcome {
        self.check_battery();

        if self.check_button() {
            self.enter_sleep();
            return PollOutcome::Sleep;
        }

        self.check_signal();

        if self.trigger.is_pending() {
            self.measure();
        }

        PollOutcome::Continue
    }

    fn read_battery(&mut self) -> BatteryLevel {
        let raw = self.board.read_battery_raw();
        let cal = &self.config.battery;
        BatteryLevel::from_raw(raw, cal.raw_empty, cal.raw_span)
    }

    fn check_battery(&mut self) {
        let level = self.read_battery();
        if level != self.ctx.battery {
            info!("Battery level changed {} -> {}", self.ctx.battery, level);
            // Recorded before sending so a failing report is not resent every cycle.
            self.ctx.battery = level;
            self.report_battery(level);
        }
    }

    fn report_battery(&mut self, level: BatteryLevel) {
        match self.reporter.report_battery(&self.ctx.identity, level) {
            Ok(()) => info!("Battery level {} reported", level),
            Err(e) => warn!("Battery report failed: {}", e),
        }
    }

    /// Whether the button has now been held for the full hold window.
    fn check_button(&mut self) -> bool {
        if !self.board.power_button_held() {
            if self.ctx.hold_since.take().is_some() {
                debug!("Power button released before the hold window");
            }
            return false;
        }

        let now = self.board.now_micros();
        let since = *self.ctx.hold_since.get_or_insert(now);
        now.saturating_sub(since) >= self.config.timing.button_hold_ms.saturating_mul(1000)
    }

    fn enter_sleep(&mut self) {
        if !self.transition(LifecycleState::SleepPending) {
            return;
        }

        match self.reporter.report_deactivation(&self.ctx.identity) {
            Ok(()) => info!("Deactivation reported"),
            Err(e) => warn!("Deactivation report failed: {}", e),
        }

        while self.board.power_button_held() {
            self.board.delay_ms(self.config.timing.poll_interval_ms);
        }
        self.ctx.hold_since = None;

        info!("Entering deep sleep");
        self.board.deep_sleep();
    }

    fn check_signal(&mut self) {
        let strong = self.board.read_signal_level() > self.config.signal_threshold;
        if strong != self.ctx.signal_strong {
            self.ctx.signal_strong = strong;
            self.refresh_indicators();
        }
    }

    fn measure(&mut self) {
        if !self.transition(LifecycleState::Measuring) {
            return;
        }

        let result = self.analyzer.run_measurement(&mut self.board);
        info!("Measurement done, major peak {:.3} Hz", result.frequency_hz);

        match self
            .reporter
            .report_measurement(&self.ctx.identity, result)
        {
            Ok(()) => info!("Measurement reported"),
            Err(e) => warn!("Measurement report failed: {}", e),
        }

        self.trigger.complete();
        self.transition(LifecycleState::Idle);
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Move to `next` if allowed, then refresh the indicators.
    fn transition(&mut self, next: LifecycleState) -> bool {
        let current = self.ctx.state;
        if !current.can_transition_to(next) {
            warn!("Ignoring transition {} -> {}", current, next);
            return false;
        }
        info!("State {} -> {}", current, next);
        self.ctx.state = next;
        self.refresh_indicators();
        true
    }

    fn refresh_indicators(&mut self) {
        let indicators = self.ctx.indicators();
        self.board.show(&indicators);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    use emg_core::config::{CloudConfig, SamplingConfig};
    use emg_core::{Clock, Rgb, TriggerAck};
    use emg_protocol::TransportError;
    use pretty_assertions::assert_eq;

    const REGISTERED: &str =
        "HTTP/1.1 201 Created\r\n\r\n{\"deviceId\" :\"abc123\",\"macAddress\":\"x\"}";

    /// Board with a virtual microsecond clock.
    struct FakeBoard {
        now: Cell<u64>,
        battery_raw: u16,
        signal: u16,
        /// Button held while `start <= now < end`.
        button: Option<(u64, u64)>,
        shown: Vec<StatusIndicators>,
        sleeps: usize,
    }

    impl FakeBoard {
        fn new() -> Self {
            Self {
                now: Cell::new(0),
                battery_raw: 4070,
                signal: 0,
                button: None,
                shown: Vec::new(),
                sleeps: 0,
            }
        }

        /// Hold the button from now for `ms` milliseconds.
        fn press_for(&mut self, ms: u64) {
            let start = self.now.get();
            self.button = Some((start, start + ms * 1000));
        }
    }

    impl Clock for FakeBoard {
        fn now_micros(&self) -> u64 {
            let t = self.now.get();
            self.now.set(t + 10);
            t
        }

        fn delay_ms(&mut self, ms: u32) {
            self.now.set(self.now.get() + u64::from(ms) * 1000);
        }
    }

    impl Board for FakeBoard {
        fn read_emg(&mut self) -> u16 {
            let t = self.now.get() as f64 / 1e6;
            (2048.0 + 1000.0 * (2.0 * std::f64::consts::PI * 250.0 * t).sin()) as u16
        }

        fn read_signal_level(&mut self) -> u16 {
            self.signal
        }

        fn read_battery_raw(&mut self) -> u16 {
            self.battery_raw
        }

        fn power_button_held(&mut self) -> bool {
            let now = self.now.get();
            matches!(self.button, Some((start, end)) if now >= start && now < end)
        }

        fn show(&mut self, indicators: &StatusIndicators) {
            self.shown.push(*indicators);
        }

        fn deep_sleep(&mut self) {
            self.sleeps += 1;
        }
    }

    /// Network that associates after a fixed number of failed checks.
    #[derive(Default)]
    struct FakeNetwork {
        fail_checks: u32,
        checks: u32,
        begins: u32,
        reconnects: u32,
    }

    impl Network for FakeNetwork {
        fn begin(&mut self) {
            self.begins += 1;
        }

        fn reconnect(&mut self) {
            self.reconnects += 1;
        }

        fn is_associated(&mut self) -> bool {
            self.checks += 1;
            self.checks > self.fail_checks
        }

        fn local_ip(&self) -> Option<String> {
            Some("192.168.1.20".to_string())
        }

        fn mac_address(&self) -> Option<String> {
            Some("AA-BB-CC-DD-EE-FF".to_string())
        }
    }

    /// Transport that answers every connection with the same response.
    #[derive(Default)]
    struct Scripted {
        refuse: bool,
        response: &'static str,
        incoming: VecDeque<u8>,
        sent: Vec<String>,
    }

    impl Scripted {
        fn count(&self, start_line: &str) -> usize {
            self.sent.iter().filter(|f| f.starts_with(start_line)).count()
        }

        fn last(&self, start_line: &str) -> Option<&str> {
            self.sent
                .iter()
                .rev()
                .find(|f| f.starts_with(start_line))
                .map(String::as_str)
        }
    }

    impl TransportChannel for Scripted {
        fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
            if self.refuse {
                return Err(TransportError::Connect {
                    host: host.to_string(),
                    port,
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                });
            }
            self.incoming = self.response.bytes().collect();
            Ok(())
        }

        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent.push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>, TransportError> {
            if self.incoming.is_empty() {
                return Ok(None);
            }
            let mut line = String::new();
            while let Some(b) = self.incoming.pop_front() {
                if b == b'\n' {
                    break;
                }
                line.push(b as char);
            }
            Ok(Some(line))
        }

        fn read_byte_available(&mut self) -> Result<Option<u8>, TransportError> {
            Ok(self.incoming.pop_front())
        }

        fn close(&mut self) {
            self.incoming.clear();
        }
    }

    type TestNode = DeviceLifecycle<FakeBoard, FakeNetwork, Scripted>;

    fn node_with(network: FakeNetwork, transport: Scripted) -> TestNode {
        let config = NodeConfig {
            sampling: SamplingConfig {
                frequency_hz: 2000.0,
                samples: 256,
            },
            ..NodeConfig::default()
        };
        let reporter = TelemetryReporter::new(transport, &CloudConfig::default(), 12);
        DeviceLifecycle::new(
            config,
            FakeBoard::new(),
            network,
            reporter,
            MeasureTrigger::new(),
        )
    }

    fn booted_node() -> TestNode {
        let mut node = node_with(
            FakeNetwork::default(),
            Scripted {
                response: REGISTERED,
                ..Default::default()
            },
        );
        node.boot();
        node
    }

    /// Poll the way `run` does for `ms` of virtual time.
    fn poll_for(node: &mut TestNode, ms: u64) -> PollOutcome {
        let end = node.board().now.get() + ms * 1000;
        while node.board().now.get() < end {
            if node.poll() == PollOutcome::Sleep {
                return PollOutcome::Sleep;
            }
            node.board_mut().delay_ms(1);
        }
        PollOutcome::Continue
    }

    fn transport(node: &TestNode) -> &Scripted {
        node.reporter().transport()
    }

    #[test]
    fn test_boot_registers_and_reports_battery() {
        let node = booted_node();

        assert_eq!(node.state(), LifecycleState::Idle);
        assert_eq!(node.context().identity.as_str(), "abc123");

        let t = transport(&node);
        assert_eq!(t.count("POST /api/devices HTTP/1.1"), 1);
        assert!(t
            .last("POST /api/devices HTTP/1.1")
            .unwrap()
            .ends_with(r#"{"macAddress":"00-B0-D0-63-C2-52","ipAddress":"192.168.1.20"}"#));
        assert_eq!(t.count("POST /api/devices/battery "), 1);
        assert!(t
            .last("POST /api/devices/battery ")
            .unwrap()
            .ends_with(r#"{"deviceId":"abc123","batteryLevel":100}"#));

        assert_eq!(node.board().shown.last().unwrap().primary, Rgb::GREEN);
    }

    #[test]
    fn test_boot_restarts_association_every_25_attempts() {
        let mut node = node_with(
            FakeNetwork {
                fail_checks: 30,
                ..Default::default()
            },
            Scripted {
                response: REGISTERED,
                ..Default::default()
            },
        );

        node.boot();

        let network = node.network();
        assert_eq!(network.begins, 2);
        assert_eq!(network.reconnects, 29);
        assert_eq!(transport(&node).count("POST /api/devices HTTP/1.1"), 1);

        // Blinked blue while connecting.
        let blues = node
            .board()
            .shown
            .iter()
            .filter(|s| s.primary == Rgb::BLUE)
            .count();
        assert!(blues >= 15);
    }

    #[test]
    fn test_boot_uses_interface_mac_when_unset() {
        let mut node = node_with(
            FakeNetwork::default(),
            Scripted {
                response: REGISTERED,
                ..Default::default()
            },
        );
        node.config.mac_address.clear();

        node.boot();

        assert!(transport(&node)
            .last("POST /api/devices HTTP/1.1")
            .unwrap()
            .contains(r#""macAddress":"AA-BB-CC-DD-EE-FF""#));
    }

    #[test]
    fn test_short_hold_does_not_sleep() {
        let mut node = booted_node();

        node.board_mut().press_for(4_900);
        assert_eq!(poll_for(&mut node, 8_000), PollOutcome::Continue);

        // Two short presses do not add up.
        node.board_mut().press_for(3_000);
        assert_eq!(poll_for(&mut node, 3_500), PollOutcome::Continue);
        node.board_mut().press_for(3_000);
        assert_eq!(poll_for(&mut node, 3_500), PollOutcome::Continue);

        assert_eq!(node.state(), LifecycleState::Idle);
        assert_eq!(node.board().sleeps, 0);
        assert_eq!(transport(&node).count("POST /api/devices/turn-off "), 0);
    }

    #[test]
    fn test_hold_of_exactly_five_seconds_sleeps() {
        let mut node = booted_node();
        let start = node.board().now.get();
        // Held through start + 5 s inclusive, released right after.
        node.board_mut().button = Some((start, start + 5_000_001));

        assert_eq!(node.poll(), PollOutcome::Continue);
        node.board().now.set(start + 4_999_999);
        assert_eq!(node.poll(), PollOutcome::Continue);
        assert_eq!(node.board().sleeps, 0);

        node.board().now.set(start + 5_000_000);
        assert_eq!(node.poll(), PollOutcome::Sleep);
        assert_eq!(node.board().sleeps, 1);
        assert_eq!(transport(&node).count("POST /api/devices/turn-off "), 1);
    }

    #[test]
    fn test_huge_hold_window_never_sleeps() {
        let mut node = booted_node();
        node.config.timing.button_hold_ms = u64::MAX;

        node.board_mut().press_for(60_000);
        assert_eq!(poll_for(&mut node, 1_000), PollOutcome::Continue);
        assert_eq!(node.board().sleeps, 0);
    }

    #[test]
    fn test_long_hold_sleeps_once() {
        let mut node = booted_node();

        node.board_mut().press_for(6_500);
        assert_eq!(poll_for(&mut node, 10_000), PollOutcome::Sleep);

        assert_eq!(node.state(), LifecycleState::SleepPending);
        assert_eq!(node.board().sleeps, 1);
        let t = transport(&node);
        assert_eq!(t.count("POST /api/devices/turn-off "), 1);
        assert!(t
            .last("POST /api/devices/turn-off ")
            .unwrap()
            .ends_with(r#"{"deviceId":"abc123"}"#));

        // Slept only after the button was released.
        assert!(!node.board_mut().power_button_held());
        let shown = node.board().shown.last().unwrap();
        assert_eq!(shown.primary, Rgb::OFF);
        assert_eq!(shown.secondary, Rgb::OFF);
    }

    #[test]
    fn test_battery_delta_reports_once() {
        let mut node = booted_node();
        assert_eq!(transport(&node).count("POST /api/devices/battery "), 1);

        poll_for(&mut node, 10);
        assert_eq!(transport(&node).count("POST /api/devices/battery "), 1);

        node.board_mut().battery_raw = 4063;
        poll_for(&mut node, 10);

        let t = transport(&node);
        assert_eq!(t.count("POST /api/devices/battery "), 2);
        assert!(t
            .last("POST /api/devices/battery ")
            .unwrap()
            .ends_with(r#"{"deviceId":"abc123","batteryLevel":99}"#));
        assert_eq!(node.context().battery.percent(), 99);
    }

    #[test]
    fn test_signal_indicator_follows_threshold() {
        let mut node = booted_node();

        node.board_mut().signal = 2500;
        node.poll();
        assert_eq!(node.board().shown.last().unwrap().secondary, Rgb::GREEN);
        assert_eq!(node.board().shown.last().unwrap().primary, Rgb::GREEN);

        node.board_mut().signal = 2000;
        node.poll();
        assert_eq!(node.board().shown.last().unwrap().secondary, Rgb::OFF);
        assert_eq!(node.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_trigger_runs_one_measurement() {
        let mut node = booted_node();
        let trigger = node.trigger();

        assert_eq!(trigger.request(), TriggerAck::Started);
        assert_eq!(trigger.request(), TriggerAck::AlreadyRunning);

        node.poll();
        node.poll();

        assert!(!trigger.is_pending());
        assert_eq!(node.state(), LifecycleState::Idle);
        let t = transport(&node);
        assert_eq!(t.count("PUT /api/datapoints "), 1);

        let frame = t.last("PUT /api/datapoints ").unwrap();
        let body = frame.split("\r\n\r\n").nth(1).unwrap();
        assert!(body.starts_with(r#"{"deviceId":"abc123","value":"#));

        // 250 Hz tone, bin width 2000/256.
        let peak = node.analyzer().last_result().unwrap().frequency_hz;
        assert!((peak - 250.0).abs() < 2000.0 / 256.0, "peak at {}", peak);

        assert_eq!(trigger.request(), TriggerAck::Started);
    }

    #[test]
    fn test_unreachable_cloud_does_not_stall_lifecycle() {
        let mut node = node_with(
            FakeNetwork::default(),
            Scripted {
                refuse: true,
                ..Default::default()
            },
        );
        node.boot();

        assert_eq!(node.state(), LifecycleState::Idle);
        assert!(node.context().identity.is_empty());

        let trigger = node.trigger();
        trigger.request();
        node.board_mut().battery_raw = 3685;
        node.poll();

        assert!(!trigger.is_pending());
        assert_eq!(node.context().battery.percent(), 50);
        assert!(node.analyzer().last_result().is_some());
        assert!(transport(&node).sent.is_empty());
    }
}
