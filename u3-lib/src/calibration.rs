//! Calibration records and conversions between raw device codes and
//! physical units.

use crate::constants::{
    CALIBRATION_CONSTANTS, CONSTANTS_PER_BLOCK, MAX_FLEXIBLE_CHANNEL, SINGLE_ENDED_CHANNEL, SPECIAL_RANGE_CHANNEL,
    U3_PRODUCT_ID, VREF_CHANNEL,
};
use crate::error::{Result, U3Error};
use std::fmt;
use zerocopy::byteorder::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Nominal constants published by LabJack, used when a device has not been
/// read yet.
const NOMINAL_CONSTANTS: [f64; CALIBRATION_CONSTANTS] = [
    0.000037231, // LV single-ended slope
    0.0,         // LV single-ended offset
    0.000074463, // LV differential slope
    -2.44,       // LV differential offset
    51.717,      // DAC0 slope
    0.0,         // DAC0 offset
    51.717,      // DAC1 slope
    0.0,         // DAC1 offset
    0.013021,    // temperature slope
    2.44,        // Vref at calibration
    3.66,        // 1.5 V reference
    3.3,         // Vreg
    0.000314,    // HV AIN0-3 slope
    0.000314,
    0.000314,
    0.000314,
    -10.3, // HV AIN0-3 offset
    -10.3,
    -10.3,
    -10.3,
];

/// Nominal LJTDAC constants: DACA slope/offset, DACB slope/offset.
const NOMINAL_TDAC_CONSTANTS: [f64; 4] = [1.0, 0.0, 1.0, 0.0];

/// Hardware revision as reported by ConfigU3, e.g. 1.30 is major 1, minor 30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HardwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl HardwareVersion {
    /// First revision with 16-bit DACs and the HV variant.
    pub const V1_30: HardwareVersion = HardwareVersion::new(1, 30);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.major) + f64::from(self.minor) / 100.0
    }
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Conversion formulas, chosen once from the hardware version and HV flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AnalogModel {
    /// Hardware before 1.30
    Legacy,
    /// 1.30 and later, low-voltage inputs only
    LowVoltage,
    /// 1.30 and later, AIN0-3 are high-voltage inputs
    HighVoltage,
}

impl AnalogModel {
    pub fn select(hardware_version: HardwareVersion, high_voltage: bool) -> Self {
        if hardware_version < HardwareVersion::V1_30 {
            AnalogModel::Legacy
        } else if high_voltage {
            AnalogModel::HighVoltage
        } else {
            AnalogModel::LowVoltage
        }
    }
}

/// One 8-byte fixed-point calibration value: 32-bit fraction then signed
/// 32-bit whole part, both little-endian.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FixedPointRaw {
    pub fraction: U32,
    pub whole: I32,
}

impl FixedPointRaw {
    pub fn value(&self) -> f64 {
        f64::from(self.whole.get()) + f64::from(self.fraction.get()) / 4_294_967_296.0
    }
}

/// 32 bytes of calibration memory holding four fixed-point values.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FixedPointBlock {
    pub values: [FixedPointRaw; CONSTANTS_PER_BLOCK],
}

impl FixedPointBlock {
    pub fn decode(data: &[u8]) -> Result<[f64; CONSTANTS_PER_BLOCK]> {
        let block = FixedPointBlock::read_from_bytes(data).map_err(|_| {
            U3Error::InvalidPacket(format!("calibration block must be 32 bytes, got {}", data.len()))
        })?;
        Ok(block.values.map(|v| v.value()))
    }
}

/// Per-device calibration, read once when a session opens.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationInfo {
    product_id: u16,
    hardware_version: HardwareVersion,
    high_voltage: bool,
    constants: [f64; CALIBRATION_CONSTANTS],
    model: AnalogModel,
}

impl CalibrationInfo {
    pub fn new(
        product_id: u16,
        hardware_version: HardwareVersion,
        high_voltage: bool,
        constants: [f64; CALIBRATION_CONSTANTS],
    ) -> Self {
        Self {
            product_id,
            hardware_version,
            high_voltage,
            constants,
            model: AnalogModel::select(hardware_version, high_voltage),
        }
    }

    /// LabJack default constants for the given hardware.
    pub fn nominal(hardware_version: HardwareVersion, high_voltage: bool) -> Self {
        Self::new(U3_PRODUCT_ID.into(), hardware_version, high_voltage, NOMINAL_CONSTANTS)
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn hardware_version(&self) -> HardwareVersion {
        self.hardware_version
    }

    pub fn high_voltage(&self) -> bool {
        self.high_voltage
    }

    pub fn constants(&self) -> &[f64; CALIBRATION_CONSTANTS] {
        &self.constants
    }

    pub fn model(&self) -> AnalogModel {
        self.model
    }

    pub fn is_valid(&self) -> bool {
        self.product_id == u16::from(U3_PRODUCT_ID)
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(U3Error::InvalidCalibration)
        }
    }

    /// Convert a raw AIN code to volts.
    ///
    /// For `negative == 32` the code must come from a reading taken against
    /// channel 30. `dac1_enabled` only matters on legacy hardware, where an
    /// enabled DAC1 moves the reference to Vreg.
    pub fn ain_voltage(&self, positive: u8, negative: u8, raw: u16, dac1_enabled: bool) -> Result<f64> {
        self.ensure_valid()?;
        let c = &self.constants;
        let raw = f64::from(raw);
        let differential = negative <= MAX_FLEXIBLE_CHANNEL || negative == VREF_CHANNEL;

        match self.model {
            AnalogModel::Legacy => {
                if differential {
                    if dac1_enabled {
                        Ok((raw / 65536.0) * c[11] * 2.0 - c[11])
                    } else {
                        Ok(c[2] * raw + c[3])
                    }
                } else if negative == SINGLE_ENDED_CHANNEL {
                    if dac1_enabled {
                        Ok((raw / 65536.0) * c[11])
                    } else {
                        Ok(c[0] * raw + c[1])
                    }
                } else {
                    Err(U3Error::InvalidChannel(format!(
                        "negative channel {negative} needs hardware 1.30 or later"
                    )))
                }
            }
            AnalogModel::LowVoltage | AnalogModel::HighVoltage => {
                let hv = self.model == AnalogModel::HighVoltage;
                let hv_input = hv && positive < 4;
                let p = usize::from(positive);

                if differential {
                    if hv && (positive < 4 || negative < 4) {
                        return Err(U3Error::InvalidChannel(format!(
                            "differential reading {positive}-{negative} not supported on HV inputs"
                        )));
                    }
                    Ok(c[2] * raw + c[3])
                } else if negative == SINGLE_ENDED_CHANNEL {
                    if hv_input {
                        Ok(c[12 + p] * raw + c[16 + p])
                    } else {
                        Ok(c[0] * raw + c[1])
                    }
                } else if negative == SPECIAL_RANGE_CHANNEL {
                    let volts = c[2] * raw + c[3] + c[9];
                    if hv_input {
                        Ok(volts * c[12 + p] / c[0] + c[16 + p])
                    } else {
                        Ok(volts)
                    }
                } else {
                    Err(U3Error::InvalidChannel(format!("invalid negative channel {negative}")))
                }
            }
        }
    }

    /// Convert a raw temperature-sensor code to kelvin.
    pub fn temperature_kelvin(&self, raw: u16) -> Result<f64> {
        self.ensure_valid()?;
        Ok(self.constants[8] * f64::from(raw))
    }

    fn dac_line(&self, dac: u8) -> Result<(f64, f64)> {
        self.ensure_valid()?;
        if dac > 1 {
            return Err(U3Error::InvalidDac(dac));
        }
        let i = 4 + 2 * usize::from(dac);
        Ok((self.constants[i], self.constants[i + 1]))
    }

    /// Volts to an 8-bit DAC code, clamped to [0, 255].
    pub fn dac_code_8bit(&self, dac: u8, volts: f64) -> Result<u8> {
        let (slope, offset) = self.dac_line(dac)?;
        Ok((volts * slope + offset).clamp(0.0, 255.0) as u8)
    }

    /// Volts to a 16-bit DAC code.
    ///
    /// Hardware before 1.30 only has 8-bit DACs, so the result is clamped to
    /// 255 there; later hardware scales the line by 256.
    pub fn dac_code_16bit(&self, dac: u8, volts: f64) -> Result<u16> {
        let (slope, offset) = self.dac_line(dac)?;
        if self.hardware_version < HardwareVersion::V1_30 {
            Ok((volts * slope + offset).clamp(0.0, 255.0) as u16)
        } else {
            Ok((volts * slope * 256.0 + offset * 256.0).clamp(0.0, 65535.0) as u16)
        }
    }
}

/// Calibration of an LJTDAC accessory, read over I2C from its EEPROM.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TdacCalibrationInfo {
    pub product_id: u16,
    /// DACA slope, DACA offset, DACB slope, DACB offset
    pub constants: [f64; 4],
}

impl TdacCalibrationInfo {
    pub fn new(constants: [f64; 4]) -> Self {
        Self {
            product_id: U3_PRODUCT_ID.into(),
            constants,
        }
    }

    pub fn nominal() -> Self {
        Self::new(NOMINAL_TDAC_CONSTANTS)
    }

    pub fn is_valid(&self) -> bool {
        self.product_id == u16::from(U3_PRODUCT_ID)
    }

    /// Volts to a 16-bit LJTDAC code for DACA (0) or DACB (1), clamped to
    /// [0, 65535].
    pub fn dac_code(&self, dac: u8, volts: f64) -> Result<u16> {
        if !self.is_valid() {
            return Err(U3Error::InvalidCalibration);
        }
        if dac > 1 {
            return Err(U3Error::InvalidDac(dac));
        }
        let i = 2 * usize::from(dac);
        Ok((volts * self.constants[i] + self.constants[i + 1]).clamp(0.0, 65535.0) as u16)
    }
}

pub fn kelvin_to_fahrenheit(kelvin: f64) -> f64 {
    1.8 * (kelvin - 273.0) + 32.0
}
