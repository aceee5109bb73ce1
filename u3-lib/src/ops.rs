//! Device-level operations on an open [`U3`] session.

use crate::calibration::{AnalogModel, HardwareVersion, TdacCalibrationInfo};
use crate::commands::{
    self, ConfigIoRequest, ConfigIoState, ConfigIoWriteMask, TimerClockBase, TimerCounterPinConfig,
};
use crate::constants::{
    MAX_DIGITAL_CHANNEL, MAX_FLEXIBLE_CHANNEL, SINGLE_ENDED_CHANNEL, SPECIAL_RANGE_CHANNEL, TEMPERATURE_CHANNEL,
    VREF_CHANNEL,
};
use crate::device::U3;
use crate::error::{Result, U3Error};
use crate::feedback::{FeedbackCommand, FeedbackResponse};
use crate::transport::Transport;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest timer/counter pin offset.
const MAX_PIN_OFFSET: u8 = 8;

/// Options for one analog reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogInput {
    /// 0-15, 30 (temperature sensor) or 31 (Vreg)
    pub positive: u8,
    /// 0-15, 30 (Vref), 31 (single-ended) or 32 (special 0-3.6 V range)
    pub negative: u8,
    pub long_settling: bool,
    pub quick_sample: bool,
    /// Switch the lines to analog first when needed
    pub configure_io: bool,
}

impl AnalogInput {
    pub fn single_ended(positive: u8) -> Self {
        Self::differential(positive, SINGLE_ENDED_CHANNEL)
    }

    pub fn differential(positive: u8, negative: u8) -> Self {
        Self {
            positive,
            negative,
            long_settling: false,
            quick_sample: false,
            configure_io: true,
        }
    }
}

/// A converted analog reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalogReading {
    pub raw: u16,
    /// Volts, or kelvin for the temperature sensor
    pub value: f64,
}

/// Timer and counter setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCounterConfig {
    /// Timer1 is only enabled together with Timer0
    pub enable_timers: [bool; 2],
    pub enable_counters: [bool; 2],
    /// First FIO/EIO line used, 0-8
    pub pin_offset: u8,
    pub clock_base: TimerClockBase,
    pub clock_divisor: u8,
    pub timer_modes: [u8; 2],
    pub timer_values: [u16; 2],
}

/// Which timers and counters to read or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerCounterRead {
    pub read_timers: [bool; 2],
    pub update_reset_timers: [bool; 2],
    pub read_counters: [bool; 2],
    pub reset_counters: [bool; 2],
    /// Values written to timers being updated
    pub timer_values: [u16; 2],
}

/// Values from [`U3::timer_counter_read`]; slots not read are 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimerCounterValues {
    pub timers: [u32; 2],
    pub counters: [u32; 2],
}

/// FIOAnalog and EIOAnalog bits for a line, none for lines above 15.
fn line_bits(channel: u8) -> (u8, u8) {
    match channel {
        0..=7 => (1 << channel, 0),
        8..=15 => (0, 1 << (channel - 8)),
        _ => (0, 0),
    }
}

pub(crate) fn le_u16(bytes: &[u8]) -> Result<u16> {
    let raw: [u8; 2] = bytes.get(..2).unwrap_or_default().try_into()?;
    Ok(u16::from_le_bytes(raw))
}

pub(crate) fn le_u32(bytes: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = bytes.get(..4).unwrap_or_default().try_into()?;
    Ok(u32::from_le_bytes(raw))
}

fn check_digital_channel(channel: u8) -> Result<()> {
    if channel > MAX_DIGITAL_CHANNEL {
        return Err(U3Error::InvalidChannel(format!(
            "digital channel {channel} is not 0-{MAX_DIGITAL_CHANNEL}"
        )));
    }
    Ok(())
}

impl<T: Transport> U3<T> {
    fn ensure_calibrated(&self) -> Result<()> {
        if self.calibration.is_valid() {
            Ok(())
        } else {
            Err(U3Error::InvalidCalibration)
        }
    }

    fn check_analog_channels(&self, positive: u8, negative: u8) -> Result<()> {
        if !(positive <= MAX_FLEXIBLE_CHANNEL || positive == TEMPERATURE_CHANNEL || positive == SINGLE_ENDED_CHANNEL) {
            return Err(U3Error::InvalidChannel(format!("invalid positive channel {positive}")));
        }
        if !(negative <= MAX_FLEXIBLE_CHANNEL
            || negative == VREF_CHANNEL
            || negative == SINGLE_ENDED_CHANNEL
            || negative == SPECIAL_RANGE_CHANNEL)
        {
            return Err(U3Error::InvalidChannel(format!("invalid negative channel {negative}")));
        }

        match self.calibration.model() {
            AnalogModel::Legacy if negative == SPECIAL_RANGE_CHANNEL => Err(U3Error::InvalidChannel(
                "negative channel 32 needs hardware 1.30 or later".to_string(),
            )),
            AnalogModel::HighVoltage
                if (positive < 4 && negative != SINGLE_ENDED_CHANNEL && negative != SPECIAL_RANGE_CHANNEL)
                    || negative < 4 =>
            {
                Err(U3Error::InvalidChannel(format!(
                    "channels {positive}/{negative} not available on a U3-HV"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Read the IO configuration, refreshing the DAC1 flag.
    async fn read_config_io(&mut self) -> Result<ConfigIoState> {
        let state = commands::config_io(&mut self.transport, &ConfigIoRequest::read()).await?;
        self.dac1_enabled = state.dac1_enable != 0;
        Ok(state)
    }

    /// Merge analog-mode bits into FIOAnalog/EIOAnalog with `merge`, writing
    /// only when the result differs from what the device has.
    async fn update_analog_mask(&mut self, merge: impl Fn(u8, u8) -> (u8, u8)) -> Result<()> {
        let current = self.read_config_io().await?;
        let (fio, eio) = merge(current.fio_analog, current.eio_analog);
        if fio == current.fio_analog && eio == current.eio_analog {
            return Ok(());
        }

        debug!(
            fio_analog = fio,
            eio_analog = eio,
            "Updating analog line configuration"
        );
        let request = ConfigIoRequest {
            write_mask: ConfigIoWriteMask::analog(),
            timer_counter_config: current.timer_counter_config,
            dac1_enable: 0,
            fio_analog: fio,
            eio_analog: eio,
        };
        commands::config_io(&mut self.transport, &request).await?;
        Ok(())
    }

    async fn set_digital(&mut self, channel: u8) -> Result<()> {
        let (fio_bits, eio_bits) = line_bits(channel);
        self.update_analog_mask(|fio, eio| (fio & !fio_bits, eio & !eio_bits))
            .await
    }

    /// ConfigIO on the session's transport.
    pub async fn config_io(&mut self, request: &ConfigIoRequest) -> Result<ConfigIoState> {
        let state = commands::config_io(&mut self.transport, request).await?;
        self.dac1_enabled = state.dac1_enable != 0;
        Ok(state)
    }

    /// Feedback on the session's transport.
    pub async fn feedback(&mut self, commands: &[FeedbackCommand]) -> Result<FeedbackResponse> {
        commands::feedback(&mut self.transport, commands).await
    }

    /// Read the calibration of an LJTDAC on `dioa_pin`/`dioa_pin + 1`.
    pub async fn read_tdac_calibration(&mut self, dioa_pin: u8) -> Result<TdacCalibrationInfo> {
        if dioa_pin >= MAX_DIGITAL_CHANNEL {
            return Err(U3Error::InvalidChannel(format!(
                "LJTDAC needs two lines starting at {dioa_pin}"
            )));
        }
        commands::read_tdac_calibration(&mut self.transport, dioa_pin).await
    }

    /// Read one analog input.
    ///
    /// Positive channel 30 returns kelvin; everything else returns volts.
    pub async fn analog_read(&mut self, input: &AnalogInput) -> Result<AnalogReading> {
        self.ensure_calibrated()?;
        self.check_analog_channels(input.positive, input.negative)?;

        let wire_negative = if input.negative == SPECIAL_RANGE_CHANNEL {
            VREF_CHANNEL
        } else {
            input.negative
        };
        let hv_input = self.calibration.model() == AnalogModel::HighVoltage && input.positive < 4;

        if input.configure_io && !hv_input {
            let (p_fio, p_eio) = line_bits(input.positive);
            let (n_fio, n_eio) = line_bits(wire_negative);
            self.update_analog_mask(|fio, eio| (fio | p_fio | n_fio, eio | p_eio | n_eio))
                .await?;
        }

        let command = FeedbackCommand::AnalogInput {
            positive: input.positive,
            negative: wire_negative,
            long_settling: input.long_settling,
            quick_sample: input.quick_sample,
        };
        let response = self.feedback(&[command]).await?;
        let raw = le_u16(response.result(0)?)?;

        let value = if input.positive == TEMPERATURE_CHANNEL {
            self.calibration.temperature_kelvin(raw)?
        } else {
            self.calibration
                .ain_voltage(input.positive, input.negative, raw, self.dac1_enabled)?
        };
        debug!(positive = input.positive, negative = input.negative, raw, value, "AIN");
        Ok(AnalogReading { raw, value })
    }

    /// Set DAC0 or DAC1 to `volts`.
    pub async fn analog_write(&mut self, dac: u8, volts: f64, configure_io: bool) -> Result<()> {
        self.ensure_calibrated()?;
        if dac > 1 {
            return Err(U3Error::InvalidDac(dac));
        }

        let legacy = self.calibration.hardware_version() < HardwareVersion::V1_30;
        let command = if legacy {
            FeedbackCommand::Dac8 {
                dac,
                code: self.calibration.dac_code_8bit(dac, volts)?,
            }
        } else {
            FeedbackCommand::Dac16 {
                dac,
                code: self.calibration.dac_code_16bit(dac, volts)?,
            }
        };

        if configure_io && dac == 1 && legacy {
            let request = ConfigIoRequest {
                write_mask: ConfigIoWriteMask::new().with_dac1_enable(true),
                dac1_enable: 1,
                ..ConfigIoRequest::read()
            };
            self.config_io(&request).await?;
        }

        debug!(dac, volts, ?command, "DAC");
        self.feedback(&[command]).await?;
        Ok(())
    }

    /// Make `channel` an input and read its state.
    pub async fn digital_read(&mut self, channel: u8, configure_io: bool) -> Result<bool> {
        check_digital_channel(channel)?;
        if configure_io && channel <= MAX_FLEXIBLE_CHANNEL {
            self.set_digital(channel).await?;
        }

        let response = self
            .feedback(&[
                FeedbackCommand::BitDirWrite {
                    channel,
                    output: false,
                },
                FeedbackCommand::BitStateRead { channel },
            ])
            .await?;
        let state = response.result(0)?.first().copied().unwrap_or_default() & 1 != 0;
        Ok(state)
    }

    /// Make `channel` an output and drive it.
    pub async fn digital_write(&mut self, channel: u8, state: bool, configure_io: bool) -> Result<()> {
        check_digital_channel(channel)?;
        if configure_io && channel <= MAX_FLEXIBLE_CHANNEL {
            self.set_digital(channel).await?;
        }

        self.feedback(&[
            FeedbackCommand::BitDirWrite { channel, output: true },
            FeedbackCommand::BitStateWrite { channel, state },
        ])
        .await?;
        Ok(())
    }

    /// Set up the timer clock, enable timers and counters, and configure
    /// each enabled timer's mode.
    pub async fn timer_counter_configure(&mut self, config: &TimerCounterConfig) -> Result<()> {
        if config.pin_offset > MAX_PIN_OFFSET {
            return Err(U3Error::InvalidRange(format!(
                "timer/counter pin offset {} is not 0-{MAX_PIN_OFFSET}",
                config.pin_offset
            )));
        }

        let clock = commands::config_timer_clock(
            &mut self.transport,
            config.clock_base.config_byte(),
            config.clock_divisor,
        )
        .await?;
        debug!(base = %config.clock_base, ?clock, "Timer clock configured");

        let current = self.read_config_io().await?;

        let num_timers = config.enable_timers.iter().take_while(|&&enabled| enabled).count();
        let num_counters = config.enable_counters.iter().filter(|&&enabled| enabled).count();
        let pins = TimerCounterPinConfig::new()
            .with_timers(num_timers as u8)
            .with_counter0(config.enable_counters[0])
            .with_counter1(config.enable_counters[1])
            .with_pin_offset(config.pin_offset);

        let (mut fio, mut eio) = (0xFFu8, 0xFFu8);
        for i in 0..(num_timers + num_counters) as u8 {
            let (fio_bit, eio_bit) = line_bits(config.pin_offset + i);
            fio &= !fio_bit;
            eio &= !eio_bit;
        }

        let request = ConfigIoRequest {
            write_mask: ConfigIoWriteMask::analog().with_timer_counter_config(true),
            timer_counter_config: pins.into_bytes()[0],
            dac1_enable: 0,
            fio_analog: fio & current.fio_analog,
            eio_analog: eio & current.eio_analog,
        };
        self.config_io(&request).await?;

        if num_timers > 0 {
            let commands: Vec<FeedbackCommand> = (0..num_timers)
                .map(|i| FeedbackCommand::TimerConfig {
                    timer: i as u8,
                    mode: config.timer_modes[i],
                    value: config.timer_values[i],
                })
                .collect();
            self.feedback(&commands).await?;
        }
        Ok(())
    }

    /// Read, update or reset timers and counters in one Feedback call.
    pub async fn timer_counter_read(&mut self, request: &TimerCounterRead) -> Result<TimerCounterValues> {
        let mut commands = Vec::with_capacity(4);
        let mut slots = Vec::with_capacity(4);

        for i in 0..2 {
            if request.read_timers[i] || request.update_reset_timers[i] {
                commands.push(FeedbackCommand::Timer {
                    timer: i as u8,
                    update_reset: request.update_reset_timers[i],
                    value: request.timer_values[i],
                });
                slots.push((false, i, request.read_timers[i]));
            }
        }
        for i in 0..2 {
            if request.read_counters[i] || request.reset_counters[i] {
                commands.push(FeedbackCommand::Counter {
                    counter: i as u8,
                    reset: request.reset_counters[i],
                });
                slots.push((true, i, request.read_counters[i]));
            }
        }

        let mut values = TimerCounterValues::default();
        if commands.is_empty() {
            return Ok(values);
        }

        let response = self.feedback(&commands).await?;
        for (n, &(is_counter, i, read)) in slots.iter().enumerate() {
            if !read {
                continue;
            }
            let value = le_u32(response.result(n)?)?;
            if is_counter {
                values.counters[i] = value;
            } else {
                values.timers[i] = value;
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_bits() {
        assert_eq!(line_bits(0), (0x01, 0));
        assert_eq!(line_bits(7), (0x80, 0));
        assert_eq!(line_bits(8), (0, 0x01));
        assert_eq!(line_bits(15), (0, 0x80));
        assert_eq!(line_bits(16), (0, 0));
        assert_eq!(line_bits(30), (0, 0));
    }

    #[test]
    fn test_little_endian_results() {
        assert_eq!(le_u16(&[0x40, 0x9C]).unwrap(), 40000);
        assert_eq!(le_u32(&[0x01, 0x02, 0x03, 0x04]).unwrap(), 0x0403_0201);
        assert!(le_u16(&[0x01]).is_err());
        assert!(le_u32(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_timer_counter_pin_config_byte() {
        // two timers, counter1, offset 4
        let pins = TimerCounterPinConfig::new()
            .with_timers(2)
            .with_counter1(true)
            .with_pin_offset(4);
        assert_eq!(pins.into_bytes()[0], 74);

        let pins = TimerCounterPinConfig::new().with_pin_offset(4);
        assert_eq!(pins.into_bytes()[0], 64);
    }
}
