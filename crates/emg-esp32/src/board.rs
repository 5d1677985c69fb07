//! Board peripherals for the DTAP7 node (ESP32-S3).
//!
//! | Function | GPIO |
//! |---|---|
//! | EMG sensor (ADC1) | 1 |
//! | battery divider (ADC1) | 8 |
//! | power button, wake source | 9 |
//! | status LED red/green/blue | 4 / 5 / 6 |
//! | signal LED red/green/blue | 7 / 15 / 16 |
//! | buzzer | 17 |
//!
//! The sensor pin feeds both the acquisition and the signal-strength LED.

use anyhow::Result;
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::FreeRtos,
    gpio::{AnyIOPin, AnyOutputPin, Gpio1, Gpio8, Input, Output, PinDriver},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, LEDC},
    prelude::*,
};
use esp_idf_svc::sys::{esp, esp_deep_sleep_start, esp_sleep_enable_ext0_wakeup, esp_timer_get_time};
use log::{info, warn};

use emg_core::{Board, Clock, Rgb, StatusIndicators};

/// The red LED dies are brighter; scale them down to balance the mix.
const RED_SCALE_NUM: u32 = 154;
const LED_FREQ_HZ: u32 = 5_000;

type Adc = AdcDriver<'static, ADC1>;

/// Pins the board takes ownership of.
pub struct BoardPins {
    pub sensor: Gpio1,
    pub battery: Gpio8,
    pub button: AnyIOPin,
    pub status_led: [AnyOutputPin; 3],
    pub signal_led: [AnyOutputPin; 3],
    pub buzzer: AnyOutputPin,
}

/// One common-cathode RGB LED on three LEDC channels.
struct RgbLed {
    red: LedcDriver<'static>,
    green: LedcDriver<'static>,
    blue: LedcDriver<'static>,
}

impl RgbLed {
    fn set(&mut self, color: Rgb) -> Result<()> {
        let max = self.green.get_max_duty();
        let scale = |v: u32| v * max / 255;
        self.red
            .set_duty(scale(u32::from(color.r) * RED_SCALE_NUM / 255))?;
        self.green.set_duty(scale(u32::from(color.g)))?;
        self.blue.set_duty(scale(u32::from(color.b)))?;
        Ok(())
    }
}

pub struct EspBoard {
    sensor: AdcChannelDriver<'static, Gpio1, &'static Adc>,
    battery: AdcChannelDriver<'static, Gpio8, &'static Adc>,
    button: PinDriver<'static, AnyIOPin, Input>,
    status_led: RgbLed,
    signal_led: RgbLed,
    buzzer: PinDriver<'static, AnyOutputPin, Output>,
}

impl EspBoard {
    pub fn new(pins: BoardPins, adc1: ADC1, ledc: LEDC) -> Result<Self> {
        // Both live for the whole program.
        let adc: &'static Adc = Box::leak(Box::new(AdcDriver::new(adc1)?));
        let timer = Box::leak(Box::new(LedcTimerDriver::new(
            ledc.timer0,
            &TimerConfig::default().frequency(LED_FREQ_HZ.Hz().into()),
        )?));

        let channel_config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let sensor = AdcChannelDriver::new(adc, pins.sensor, &channel_config)?;
        let battery = AdcChannelDriver::new(adc, pins.battery, &channel_config)?;

        let [r1, g1, b1] = pins.status_led;
        let [r2, g2, b2] = pins.signal_led;
        let status_led = RgbLed {
            red: LedcDriver::new(ledc.channel0, &*timer, r1)?,
            green: LedcDriver::new(ledc.channel1, &*timer, g1)?,
            blue: LedcDriver::new(ledc.channel2, &*timer, b1)?,
        };
        let signal_led = RgbLed {
            red: LedcDriver::new(ledc.channel3, &*timer, r2)?,
            green: LedcDriver::new(ledc.channel4, &*timer, g2)?,
            blue: LedcDriver::new(ledc.channel5, &*timer, b2)?,
        };

        let mut buzzer = PinDriver::output(pins.buzzer)?;
        buzzer.set_low()?;

        Ok(Self {
            sensor,
            battery,
            button: PinDriver::input(pins.button)?,
            status_led,
            signal_led,
            buzzer,
        })
    }
}

impl Clock for EspBoard {
    fn now_micros(&self) -> u64 {
        // Monotonic since boot, never negative.
        unsafe { esp_timer_get_time() as u64 }
    }

    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}

impl Board for EspBoard {
    fn read_emg(&mut self) -> u16 {
        self.sensor.read().unwrap_or(0)
    }

    fn read_signal_level(&mut self) -> u16 {
        self.sensor.read().unwrap_or(0)
    }

    fn read_battery_raw(&mut self) -> u16 {
        self.battery.read().unwrap_or(0)
    }

    fn power_button_held(&mut self) -> bool {
        self.button.is_high()
    }

    fn show(&mut self, indicators: &StatusIndicators) {
        if let Err(e) = self.status_led.set(indicators.primary) {
            warn!("Status LED: {:?}", e);
        }
        if let Err(e) = self.signal_led.set(indicators.secondary) {
            warn!("Signal LED: {:?}", e);
        }
        let buzz = if indicators.audio {
            self.buzzer.set_high()
        } else {
            self.buzzer.set_low()
        };
        if let Err(e) = buzz {
            warn!("Buzzer: {:?}", e);
        }
    }

    fn deep_sleep(&mut self) {
        let pin = self.button.pin();
        if let Err(e) = esp!(unsafe { esp_sleep_enable_ext0_wakeup(pin, 1) }) {
            warn!("Failed to arm wake on GPIO{}: {:?}", pin, e);
        }
        info!("Going to deep sleep, wake on GPIO{}", pin);
        unsafe { esp_deep_sleep_start() };
    }
}
