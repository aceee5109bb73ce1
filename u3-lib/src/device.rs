use crate::calibration::CalibrationInfo;
use crate::commands::{ConfigU3Info, config_u3, read_calibration_block};
use crate::constants::{CALIBRATION_BLOCKS, CALIBRATION_CONSTANTS, CONSTANTS_PER_BLOCK};
use crate::error::{Result, U3Error};
use crate::transport::{Connector, Transport};
use tracing::{debug, info, warn};

/// Which attached U3 to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// The first device that opens
    #[default]
    First,
    /// The device whose local ID or serial number matches
    Id(u32),
}

/// An open U3 session.
///
/// Owns the transport exclusively; dropping the session closes the device.
pub struct U3<T: Transport> {
    pub(crate) transport: T,
    pub(crate) calibration: CalibrationInfo,
    pub(crate) info: Option<ConfigU3Info>,
    pub(crate) dac1_enabled: bool,
}

impl<T: Transport> U3<T> {
    /// Find, open and calibrate a device.
    pub async fn open<C>(connector: &C, selector: DeviceSelector) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        let count = connector.device_count().await?;
        info!("Searching {} LabJack device(s) for {:?}", count, selector);

        for index in 0..count {
            let mut transport = match connector.open(index).await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(index, error = %e, "Could not open device");
                    continue;
                }
            };

            let info = config_u3(&mut transport).await?;
            if let DeviceSelector::Id(id) = selector {
                if u32::from(info.local_id) != id && info.serial_number != id {
                    debug!(index, local_id = info.local_id, serial = info.serial_number, "Skipping device");
                    continue;
                }
            }

            return Self::with_info(transport, info).await;
        }

        Err(U3Error::DeviceNotFound)
    }

    /// Calibrate a session over an already opened transport.
    pub async fn from_transport(mut transport: T) -> Result<Self> {
        let info = config_u3(&mut transport).await?;
        Self::with_info(transport, info).await
    }

    async fn with_info(mut transport: T, info: ConfigU3Info) -> Result<Self> {
        let calibration = read_calibration(&mut transport, &info).await?;
        info!(
            "Opened U3 serial {} (local ID {}), hardware {}, firmware {:.2}{}",
            info.serial_number,
            info.local_id,
            info.hardware_version,
            info.firmware_version,
            if info.high_voltage { ", HV" } else { "" }
        );
        Ok(Self {
            transport,
            calibration,
            info: Some(info),
            dac1_enabled: info.dac1_enable != 0,
        })
    }

    /// Wrap a transport with a known calibration, without any I/O.
    pub fn with_calibration(transport: T, calibration: CalibrationInfo, dac1_enabled: bool) -> Self {
        Self {
            transport,
            calibration,
            info: None,
            dac1_enabled,
        }
    }

    /// Close the device.
    pub fn close(self) {
        info!("Closing U3");
        drop(self);
    }

    pub fn calibration(&self) -> &CalibrationInfo {
        &self.calibration
    }

    /// ConfigU3 values read when the session was opened.
    pub fn info(&self) -> Option<&ConfigU3Info> {
        self.info.as_ref()
    }

    /// Whether DAC1 was enabled the last time the IO configuration was read.
    pub fn dac1_enabled(&self) -> bool {
        self.dac1_enabled
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Read the five calibration blocks and build the record.
pub async fn read_calibration<T: Transport + ?Sized>(
    transport: &mut T,
    info: &ConfigU3Info,
) -> Result<CalibrationInfo> {
    let mut constants = [0.0; CALIBRATION_CONSTANTS];
    for block in 0..CALIBRATION_BLOCKS {
        let values = read_calibration_block(transport, block).await?;
        let start = usize::from(block) * CONSTANTS_PER_BLOCK;
        constants[start..start + CONSTANTS_PER_BLOCK].copy_from_slice(&values);
    }

    let calibration = CalibrationInfo::new(info.product_id, info.hardware_version, info.high_voltage, constants);
    if !calibration.is_valid() {
        warn!(product_id = info.product_id, "Device is not a U3");
    }
    debug!(?constants, model = ?calibration.model(), "Calibration loaded");
    Ok(calibration)
}
