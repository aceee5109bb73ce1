//! Low-level U3 commands.
//!
//! Each function frames one extended command, sends it, validates the reply
//! and decodes its fields. They take any [`Transport`] so they can be used
//! outside a [`crate::U3`] session.

use crate::calibration::{FixedPointBlock, HardwareVersion, TdacCalibrationInfo};
use crate::constants::{
    CONFIG_IO_SIZE, CONFIG_TIMER_CLOCK_SIZE, CONFIG_U3_REQUEST_SIZE, CONFIG_U3_RESPONSE_SIZE, CONSTANTS_PER_BLOCK,
    HEADER_SIZE, I2C_ACK_OFFSET, I2C_DATA_OFFSET, I2C_MAX_RECEIVE, I2C_MAX_SEND, READ_MEM_RESPONSE_SIZE,
    TDAC_CALIBRATION_MEMORY_ADDRESS, TDAC_CALIBRATION_SIZE, TDAC_EEPROM_ADDRESS,
};
use crate::error::{Result, U3Error};
use crate::feedback::{FeedbackCommand, FeedbackResponse, encode_request, parse_response, response_len};
use crate::packet::{ExtendedCommand, ExtendedHeader, build_extended, check_error_code, padded_size, validate_response};
use crate::transport::{Transport, read_reply, send_command, transact};
use bytes::Bytes;
use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use tracing::{debug, warn};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Frame `payload`, exchange it and check the reply's echo and error code.
///
/// The reply's word count must match `response_len`.
async fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    command: ExtendedCommand,
    payload: &[u8],
    response_len: usize,
) -> Result<Bytes> {
    let packet = build_extended(command, payload)?;
    let reply = transact(transport, &packet, response_len).await?;
    let words = ((response_len - HEADER_SIZE) / 2) as u8;
    validate_response(&reply, command, Some(words))?;
    check_error_code(&reply)?;
    Ok(reply)
}

/// Which ConfigIO fields a request writes.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigIoWriteMask {
    pub timer_counter_config: bool,
    pub dac1_enable: bool,
    pub fio_analog: bool,
    pub eio_analog: bool,
    #[skip]
    unused: B4,
}

impl ConfigIoWriteMask {
    pub fn analog() -> Self {
        Self::new().with_fio_analog(true).with_eio_analog(true)
    }
}

/// The TimerCounterConfig byte of ConfigIO.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCounterPinConfig {
    /// Number of enabled timers, counted from Timer0
    pub timers: B2,
    pub counter0: bool,
    pub counter1: bool,
    /// First FIO/EIO line assigned to timers and counters
    pub pin_offset: B4,
}

/// ConfigIO request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigIoRequest {
    pub write_mask: ConfigIoWriteMask,
    pub timer_counter_config: u8,
    pub dac1_enable: u8,
    pub fio_analog: u8,
    pub eio_analog: u8,
}

impl ConfigIoRequest {
    /// A request that writes nothing and only reads back the current values.
    pub fn read() -> Self {
        Self {
            write_mask: ConfigIoWriteMask::new(),
            timer_counter_config: 0,
            dac1_enable: 0,
            fio_analog: 0,
            eio_analog: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ConfigIoRaw {
    pub header: ExtendedHeader,
    pub error_code: u8,
    pub reserved: u8,
    pub timer_counter_config: u8,
    pub dac1_enable: u8,
    pub fio_analog: u8,
    pub eio_analog: u8,
}

/// Current IO configuration as echoed by ConfigIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfigIoState {
    pub timer_counter_config: u8,
    pub dac1_enable: u8,
    pub fio_analog: u8,
    pub eio_analog: u8,
}

impl From<ConfigIoRaw> for ConfigIoState {
    fn from(raw: ConfigIoRaw) -> Self {
        Self {
            timer_counter_config: raw.timer_counter_config,
            dac1_enable: raw.dac1_enable,
            fio_analog: raw.fio_analog,
            eio_analog: raw.eio_analog,
        }
    }
}

/// ConfigIO: write the masked fields and return the values now in effect.
pub async fn config_io<T: Transport + ?Sized>(transport: &mut T, request: &ConfigIoRequest) -> Result<ConfigIoState> {
    let payload = [
        request.write_mask.into_bytes()[0],
        0,
        request.timer_counter_config,
        request.dac1_enable,
        request.fio_analog,
        request.eio_analog,
    ];
    let reply = exchange(transport, ExtendedCommand::ConfigIo, &payload, CONFIG_IO_SIZE).await?;
    let raw = ConfigIoRaw::read_from_bytes(&reply)
        .map_err(|_| U3Error::InvalidPacket("ConfigIO reply size".to_string()))?;
    let state = ConfigIoState::from(raw);
    debug!(?state, "ConfigIO");
    Ok(state)
}

/// Timer clock sources, numbered as in the LabJack driver constants.
///
/// Bases 10-16 and 20-26 name the same seven wire settings for the two
/// families of U3 firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TimerClockBase {
    #[strum(to_string = "2 MHz")]
    Clock2Mhz = 10,
    #[strum(to_string = "6 MHz")]
    Clock6Mhz = 11,
    #[strum(to_string = "24 MHz")]
    Clock24Mhz = 12,
    #[strum(to_string = "500 kHz / divisor")]
    Clock500KhzDiv = 13,
    #[strum(to_string = "2 MHz / divisor")]
    Clock2MhzDiv = 14,
    #[strum(to_string = "6 MHz / divisor")]
    Clock6MhzDiv = 15,
    #[strum(to_string = "24 MHz / divisor")]
    Clock24MhzDiv = 16,
    #[strum(to_string = "4 MHz")]
    Clock4Mhz = 20,
    #[strum(to_string = "12 MHz")]
    Clock12Mhz = 21,
    #[strum(to_string = "48 MHz")]
    Clock48Mhz = 22,
    #[strum(to_string = "1 MHz / divisor")]
    Clock1MhzDiv = 23,
    #[strum(to_string = "4 MHz / divisor")]
    Clock4MhzDiv = 24,
    #[strum(to_string = "12 MHz / divisor")]
    Clock12MhzDiv = 25,
    #[strum(to_string = "48 MHz / divisor")]
    Clock48MhzDiv = 26,
}

impl TimerClockBase {
    /// Index the device expects in TimerClockConfig bits 0-2.
    pub fn wire_index(&self) -> u8 {
        let value: u8 = (*self).into();
        if value >= 20 { value - 20 } else { value - 10 }
    }

    /// TimerClockConfig byte with the apply bit (bit 7) set.
    pub fn config_byte(&self) -> u8 {
        self.wire_index() | 0x80
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct TimerClockRaw {
    pub header: ExtendedHeader,
    pub error_code: u8,
    pub reserved: u8,
    pub config: u8,
    pub divisor: u8,
}

/// Timer clock settings echoed by ConfigTimerClock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimerClockState {
    pub config: u8,
    pub divisor: u8,
}

/// ConfigTimerClock. A `config` without bit 7 only reads the current values.
pub async fn config_timer_clock<T: Transport + ?Sized>(
    transport: &mut T,
    config: u8,
    divisor: u8,
) -> Result<TimerClockState> {
    let payload = [0, 0, config, divisor];
    let reply = exchange(transport, ExtendedCommand::ConfigTimerClock, &payload, CONFIG_TIMER_CLOCK_SIZE).await?;
    let raw = TimerClockRaw::read_from_bytes(&reply)
        .map_err(|_| U3Error::InvalidPacket("ConfigTimerClock reply size".to_string()))?;
    Ok(TimerClockState {
        config: raw.config,
        divisor: raw.divisor,
    })
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ConfigU3Raw {
    pub header: ExtendedHeader,
    pub error_code: u8,
    pub reserved: [u8; 2],
    pub firmware_minor: u8,
    pub firmware_major: u8,
    pub bootloader_minor: u8,
    pub bootloader_major: u8,
    pub hardware_minor: u8,
    pub hardware_major: u8,
    pub serial_number: U32,
    pub product_id: U16,
    pub local_id: u8,
    pub timer_counter_mask: u8,
    pub fio_analog: u8,
    pub fio_direction: u8,
    pub fio_state: u8,
    pub eio_analog: u8,
    pub eio_direction: u8,
    pub eio_state: u8,
    pub cio_direction: u8,
    pub cio_state: u8,
    pub dac1_enable: u8,
    pub dac0: u8,
    pub dac1: u8,
    pub timer_clock_config: u8,
    pub timer_clock_divisor: u8,
    pub compatibility_options: u8,
    pub version_info: u8,
}

/// Device identity and configuration reported by ConfigU3.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfigU3Info {
    pub firmware_version: f64,
    pub bootloader_version: f64,
    pub hardware_version: HardwareVersion,
    pub serial_number: u32,
    pub product_id: u16,
    pub local_id: u8,
    pub timer_counter_mask: u8,
    pub fio_analog: u8,
    pub fio_direction: u8,
    pub fio_state: u8,
    pub eio_analog: u8,
    pub eio_direction: u8,
    pub eio_state: u8,
    pub cio_direction: u8,
    pub cio_state: u8,
    pub dac1_enable: u8,
    pub dac0: u8,
    pub dac1: u8,
    pub timer_clock_config: u8,
    pub timer_clock_divisor: u8,
    pub compatibility_options: u8,
    pub version_info: u8,
    pub high_voltage: bool,
}

impl From<ConfigU3Raw> for ConfigU3Info {
    fn from(raw: ConfigU3Raw) -> Self {
        let version = |major: u8, minor: u8| f64::from(major) + f64::from(minor) / 100.0;
        Self {
            firmware_version: version(raw.firmware_major, raw.firmware_minor),
            bootloader_version: version(raw.bootloader_major, raw.bootloader_minor),
            hardware_version: HardwareVersion::new(raw.hardware_major, raw.hardware_minor),
            serial_number: raw.serial_number.get(),
            product_id: raw.product_id.get(),
            local_id: raw.local_id,
            timer_counter_mask: raw.timer_counter_mask,
            fio_analog: raw.fio_analog,
            fio_direction: raw.fio_direction,
            fio_state: raw.fio_state,
            eio_analog: raw.eio_analog,
            eio_direction: raw.eio_direction,
            eio_state: raw.eio_state,
            cio_direction: raw.cio_direction,
            cio_state: raw.cio_state,
            dac1_enable: raw.dac1_enable,
            dac0: raw.dac0,
            dac1: raw.dac1,
            timer_clock_config: raw.timer_clock_config,
            timer_clock_divisor: raw.timer_clock_divisor,
            compatibility_options: raw.compatibility_options,
            version_info: raw.version_info,
            // U3-HV when bits 1 and 4 are both set
            high_voltage: raw.version_info & 0x12 == 0x12,
        }
    }
}

/// ConfigU3 with an all-zero write mask: read identity and configuration.
pub async fn config_u3<T: Transport + ?Sized>(transport: &mut T) -> Result<ConfigU3Info> {
    let payload = [0u8; CONFIG_U3_REQUEST_SIZE - HEADER_SIZE];
    let reply = exchange(transport, ExtendedCommand::ConfigU3, &payload, CONFIG_U3_RESPONSE_SIZE).await?;
    let raw = ConfigU3Raw::read_from_bytes(&reply)
        .map_err(|_| U3Error::InvalidPacket("ConfigU3 reply size".to_string()))?;
    Ok(ConfigU3Info::from(raw))
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ReadMemRaw {
    pub header: ExtendedHeader,
    pub error_code: u8,
    pub reserved: u8,
    pub block: FixedPointBlock,
}

/// ReadMem: decode calibration block `block` (0-4) into four constants.
pub async fn read_calibration_block<T: Transport + ?Sized>(
    transport: &mut T,
    block: u8,
) -> Result<[f64; CONSTANTS_PER_BLOCK]> {
    let payload = [0, block];
    let reply = exchange(transport, ExtendedCommand::ReadMem, &payload, READ_MEM_RESPONSE_SIZE).await?;
    let raw = ReadMemRaw::read_from_bytes(&reply)
        .map_err(|_| U3Error::InvalidPacket("ReadMem reply size".to_string()))?;
    Ok(raw.block.values.map(|v| v.value()))
}

/// An I2C transaction over two digital lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cRequest<'a> {
    pub options: u8,
    pub speed_adjust: u8,
    pub sda_pin: u8,
    pub scl_pin: u8,
    /// 8-bit bus address, R/W bit included
    pub address: u8,
    pub send: &'a [u8],
    pub receive_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cResponse {
    pub ack_array: u32,
    pub data: Bytes,
}

/// I2C: send up to 50 bytes and receive up to 52.
///
/// An ack array other than one ack per sent byte plus the address is only
/// logged; firmware before 1.44 does not ack the address byte.
pub async fn i2c<T: Transport + ?Sized>(transport: &mut T, request: &I2cRequest<'_>) -> Result<I2cResponse> {
    if request.send.len() > I2C_MAX_SEND {
        return Err(U3Error::InvalidRange(format!(
            "cannot send {} I2C bytes, maximum is {I2C_MAX_SEND}",
            request.send.len()
        )));
    }
    if request.receive_len > I2C_MAX_RECEIVE {
        return Err(U3Error::InvalidRange(format!(
            "cannot receive {} I2C bytes, maximum is {I2C_MAX_RECEIVE}",
            request.receive_len
        )));
    }

    let mut payload = Vec::with_capacity(8 + request.send.len());
    payload.extend_from_slice(&[
        request.options,
        request.speed_adjust,
        request.sda_pin,
        request.scl_pin,
        request.address,
        0,
        request.send.len() as u8,
        request.receive_len as u8,
    ]);
    payload.extend_from_slice(request.send);

    let response_len = padded_size(I2C_DATA_OFFSET - HEADER_SIZE + request.receive_len);
    let reply = exchange(transport, ExtendedCommand::I2c, &payload, response_len).await?;

    let ack_bytes: [u8; 4] = reply[I2C_ACK_OFFSET..I2C_DATA_OFFSET].try_into()?;
    let ack_array = u32::from_le_bytes(ack_bytes);
    let acks = request.send.len() as u32 + 1;
    let expected_acks = if acks >= 32 { u32::MAX } else { (1u32 << acks) - 1 };
    if ack_array != expected_acks {
        warn!(
            expected = expected_acks,
            received = ack_array,
            address = request.address,
            "Unexpected I2C ack array"
        );
    }

    Ok(I2cResponse {
        ack_array,
        data: reply.slice(I2C_DATA_OFFSET..I2C_DATA_OFFSET + request.receive_len),
    })
}

/// Read the calibration record of an LJTDAC whose DIOA line is on
/// `dioa_pin` (SCL) and DIOB on the next line (SDA).
pub async fn read_tdac_calibration<T: Transport + ?Sized>(
    transport: &mut T,
    dioa_pin: u8,
) -> Result<TdacCalibrationInfo> {
    let sda_pin = dioa_pin
        .checked_add(1)
        .ok_or_else(|| U3Error::InvalidChannel(format!("no SDA line after {dioa_pin}")))?;
    let request = I2cRequest {
        options: 0,
        speed_adjust: 0,
        sda_pin,
        scl_pin: dioa_pin,
        address: TDAC_EEPROM_ADDRESS,
        send: &[TDAC_CALIBRATION_MEMORY_ADDRESS],
        receive_len: TDAC_CALIBRATION_SIZE.into(),
    };
    let response = i2c(transport, &request).await?;
    let constants = FixedPointBlock::decode(&response.data)?;
    debug!(?constants, "LJTDAC calibration");
    Ok(TdacCalibrationInfo::new(constants))
}

/// Feedback: run a list of IO descriptors in one packet.
pub async fn feedback<T: Transport + ?Sized>(
    transport: &mut T,
    commands: &[FeedbackCommand],
) -> Result<FeedbackResponse> {
    let packet = encode_request(commands)?;
    send_command(transport, &packet).await?;
    let reply = read_reply(transport, response_len(commands)).await?;
    parse_response(reply, commands)
}
