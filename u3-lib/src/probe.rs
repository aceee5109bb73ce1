//! Temperature-probe and TTL-pulse compositions.
//!
//! The probe wiring: an EI-1034 sensor on AIN0 (FIO0), a second analog input
//! on FIO1, a PWM pair on Timer0/Timer1 from FIO4, Counter1 on FIO6, a
//! digital output on FIO2 and a digital input on FIO3.

use crate::calibration::kelvin_to_fahrenheit;
use crate::commands::{ConfigIoRequest, ConfigIoWriteMask, TimerCounterPinConfig};
use crate::constants::{SINGLE_ENDED_CHANNEL, TEMPERATURE_CHANNEL, VREF_CHANNEL};
use crate::device::U3;
use crate::error::{Result, U3Error};
use crate::feedback::FeedbackCommand;
use crate::ops::{le_u16, le_u32};
use crate::transport::Transport;
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Line the probe setup drives as an output.
const PROBE_OUTPUT_LINE: u8 = 2;
/// Line the probe setup reads as an input, also the TTL pulse line.
pub const PROBE_INPUT_LINE: u8 = 3;
/// Timer/counter lines start at FIO4.
const PROBE_PIN_OFFSET: u8 = 4;
/// FIO0 and FIO1 analog.
const PROBE_FIO_ANALOG: u8 = 0x03;
/// Volts set on DAC0 during setup.
const PROBE_DAC0_VOLTS: f64 = 1.5;
/// EI-1034 output scale.
const FAHRENHEIT_PER_VOLT: f64 = 100.0;

/// One probe measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemperatureReading {
    /// Internal sensor
    pub internal_kelvin: f64,
    pub internal_fahrenheit: f64,
    /// EI-1034 on AIN0
    pub external_volts: f64,
    pub external_fahrenheit: f64,
    /// AIN0, AIN1 single-ended; AIN0-AIN1, AIN1-AIN0; AIN0, AIN1 vs Vref
    pub raw_inputs: [u16; 6],
    pub fio3_state: bool,
    pub counter1: u32,
}

fn probe_pin_config(enable: bool) -> u8 {
    let pins = TimerCounterPinConfig::new().with_pin_offset(PROBE_PIN_OFFSET);
    let pins = if enable {
        pins.with_timers(2).with_counter1(true)
    } else {
        pins
    };
    pins.into_bytes()[0]
}

impl<T: Transport> U3<T> {
    /// Enable or disable the probe's timers, counter and analog lines.
    ///
    /// Enabling sets two timers plus Counter1 at offset 4 (74) with FIO0-1
    /// analog; disabling keeps offset 4 (64) and makes every FIO analog.
    /// Returns whether DAC1 is enabled.
    pub async fn configure_probe_io(&mut self, enable: bool) -> Result<bool> {
        let timer_counter_config = probe_pin_config(enable);
        let fio_analog = if enable { PROBE_FIO_ANALOG } else { 0xFF };

        let request = ConfigIoRequest {
            write_mask: ConfigIoWriteMask::new()
                .with_timer_counter_config(true)
                .with_fio_analog(true),
            timer_counter_config,
            dac1_enable: 0,
            fio_analog,
            eio_analog: 0,
        };
        let state = self.config_io(&request).await?;

        if state.timer_counter_config != timer_counter_config {
            return Err(U3Error::ConfigMismatch(format!(
                "TimerCounterConfig is {}, expected {timer_counter_config}",
                state.timer_counter_config
            )));
        }
        // HV units keep FIO0-3 analog whatever is requested
        if state.fio_analog != fio_analog && state.fio_analog != fio_analog | 0x0F {
            return Err(U3Error::ConfigMismatch(format!(
                "FIOAnalog is {}, expected {fio_analog}",
                state.fio_analog
            )));
        }

        info!(enable, dac1_enabled = self.dac1_enabled, "Probe IO configured");
        Ok(self.dac1_enabled)
    }

    /// Set up probe line directions, the PWM timers and DAC0.
    pub async fn configure_probe_outputs(&mut self) -> Result<()> {
        let dac0 = self.calibration.dac_code_8bit(0, PROBE_DAC0_VOLTS)?;
        let commands = [
            FeedbackCommand::BitDirWrite {
                channel: PROBE_OUTPUT_LINE,
                output: true,
            },
            FeedbackCommand::BitDirWrite {
                channel: PROBE_INPUT_LINE,
                output: false,
            },
            FeedbackCommand::BitStateWrite {
                channel: PROBE_OUTPUT_LINE,
                state: false,
            },
            // 16-bit PWM
            FeedbackCommand::TimerConfig {
                timer: 0,
                mode: 0,
                value: 0,
            },
            FeedbackCommand::Timer {
                timer: 0,
                update_reset: true,
                value: 32768,
            },
            // 8-bit PWM
            FeedbackCommand::TimerConfig {
                timer: 1,
                mode: 1,
                value: 0,
            },
            FeedbackCommand::Timer {
                timer: 1,
                update_reset: true,
                value: 32768,
            },
            FeedbackCommand::Dac8 { dac: 0, code: dac0 },
        ];
        self.feedback(&commands).await?;
        debug!(dac0, "Probe outputs configured");
        Ok(())
    }

    /// Read every probe input in one Feedback call.
    pub async fn measure(&mut self) -> Result<TemperatureReading> {
        if !self.calibration.is_valid() {
            return Err(U3Error::InvalidCalibration);
        }

        let ain = |positive: u8, negative: u8| FeedbackCommand::AnalogInput {
            positive,
            negative,
            long_settling: false,
            quick_sample: false,
        };
        let commands = [
            ain(0, SINGLE_ENDED_CHANNEL),
            ain(1, SINGLE_ENDED_CHANNEL),
            ain(0, 1),
            ain(1, 0),
            ain(0, VREF_CHANNEL),
            ain(1, VREF_CHANNEL),
            FeedbackCommand::BitStateRead {
                channel: PROBE_INPUT_LINE,
            },
            FeedbackCommand::Counter {
                counter: 1,
                reset: false,
            },
            ain(TEMPERATURE_CHANNEL, SINGLE_ENDED_CHANNEL),
        ];
        let response = self.feedback(&commands).await?;

        let mut raw_inputs = [0u16; 6];
        for (i, raw) in raw_inputs.iter_mut().enumerate() {
            *raw = le_u16(response.result(i)?)?;
        }
        let fio3_state = response.result(6)?.first().copied().unwrap_or_default() & 1 != 0;
        let counter1 = le_u32(response.result(7)?)?;
        let temperature_raw = le_u16(response.result(8)?)?;

        let external_volts = self
            .calibration
            .ain_voltage(0, SINGLE_ENDED_CHANNEL, raw_inputs[0], self.dac1_enabled)?;
        let internal_kelvin = self.calibration.temperature_kelvin(temperature_raw)?;

        let reading = TemperatureReading {
            internal_kelvin,
            internal_fahrenheit: kelvin_to_fahrenheit(internal_kelvin),
            external_volts,
            external_fahrenheit: external_volts * FAHRENHEIT_PER_VOLT,
            raw_inputs,
            fio3_state,
            counter1,
        };
        debug!(?reading, "Probe measurement");
        Ok(reading)
    }

    /// Pulse `channel` high, low, high.
    pub async fn send_ttl_pulse(&mut self, channel: u8) -> Result<()> {
        for state in [true, false, true] {
            self.digital_write(channel, state, true).await?;
        }
        Ok(())
    }
}
