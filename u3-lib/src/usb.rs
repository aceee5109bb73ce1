use crate::constants::{ENDPOINT_IN, ENDPOINT_OUT, MAX_PACKET_SIZE, PID, VID};
use crate::error::{Result, U3Error};
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use nusb::transfer::RequestBuffer;
use nusb::{DeviceInfo, Interface};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

// Default timeout for USB operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// USB identity and transfer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub endpoint_out: u8,
    pub endpoint_in: u8,
    /// Per-transfer timeout
    pub timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            vendor_id: VID,
            product_id: PID,
            interface: 0,
            endpoint_out: ENDPOINT_OUT,
            endpoint_in: ENDPOINT_IN,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Enumerates U3s on the USB bus.
#[derive(Debug, Clone, Default)]
pub struct UsbConnector {
    config: UsbConfig,
}

impl UsbConnector {
    pub fn new(config: UsbConfig) -> Self {
        Self { config }
    }

    fn matching_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(nusb::list_devices()?
            .filter(|d| d.vendor_id() == self.config.vendor_id && d.product_id() == self.config.product_id)
            .collect())
    }
}

#[async_trait]
impl Connector for UsbConnector {
    type Transport = UsbTransport;

    async fn device_count(&self) -> Result<usize> {
        Ok(self.matching_devices()?.len())
    }

    async fn open(&self, index: usize) -> Result<UsbTransport> {
        let device_info = self
            .matching_devices()?
            .into_iter()
            .nth(index)
            .ok_or(U3Error::DeviceNotFound)?;

        info!(
            "Found device on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        let interface = device.detach_and_claim_interface(self.config.interface)?;
        info!("Interface claimed successfully.");

        Ok(UsbTransport {
            interface,
            config: self.config,
        })
    }
}

/// Bulk-endpoint transport to one claimed U3 interface.
pub struct UsbTransport {
    interface: Interface,
    config: UsbConfig,
}

#[async_trait]
impl Transport for UsbTransport {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        debug!(bytes = hex::encode(data), "USB write");

        let transfer_future = self.interface.bulk_out(self.config.endpoint_out, data.to_vec());
        let result = timeout(self.config.timeout, transfer_future).await?;
        let sent = result.into_result()?;

        Ok(sent.actual_length())
    }

    async fn read(&mut self, max_len: usize) -> Result<Bytes> {
        // IN transfers must cover whole packets or a full reply overflows
        let request_len = max_len.div_ceil(MAX_PACKET_SIZE).max(1) * MAX_PACKET_SIZE;
        let transfer_future = self
            .interface
            .bulk_in(self.config.endpoint_in, RequestBuffer::new(request_len));
        let result = timeout(self.config.timeout, transfer_future).await?;
        let mut data = result.into_result()?;
        data.truncate(max_len);

        debug!(bytes = hex::encode(&data), "USB read");
        Ok(Bytes::from(data))
    }
}
