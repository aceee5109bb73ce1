//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use u3_lib::calibration::{AnalogModel, CalibrationInfo, HardwareVersion};
#[allow(unused_imports)]
pub use u3_lib::checksum::{apply_extended_checksum, verify_extended_checksum};
#[allow(unused_imports)]
pub use u3_lib::error::{ChecksumField, U3Error};
#[allow(unused_imports)]
pub use u3_lib::{Connector, DeviceSelector, Transport, U3};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Nominal constants as stored on a freshly calibrated U3.
#[allow(dead_code)]
pub const TEST_CONSTANTS: [f64; 20] = [
    0.000037231,
    0.0,
    0.000074463,
    -2.44,
    51.717,
    0.0,
    51.717,
    0.0,
    0.013021,
    2.44,
    3.66,
    3.3,
    0.000314,
    0.000314,
    0.000314,
    0.000314,
    -10.3,
    -10.3,
    -10.3,
    -10.3,
];

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// A [`Transport`] that replays scripted replies and records every write.
///
/// Replies are consumed in order, one per `read()`. Once the script is
/// exhausted, reads return nothing.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    accept_limit: Option<usize>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn push_reply(&mut self, reply: Vec<u8>) {
        self.replies.push_back(reply);
    }

    /// Accept at most `limit` bytes per write.
    pub fn accept_only(mut self, limit: usize) -> Self {
        self.accept_limit = Some(limit);
        self
    }

    /// Every packet written, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> u3_lib::error::Result<usize> {
        self.sent.push(data.to_vec());
        Ok(self.accept_limit.map_or(data.len(), |limit| data.len().min(limit)))
    }

    async fn read(&mut self, max_len: usize) -> u3_lib::error::Result<Bytes> {
        let mut reply = self.replies.pop_front().unwrap_or_default();
        reply.truncate(max_len);
        Ok(Bytes::from(reply))
    }
}

/// A [`Connector`] over a fixed set of mock devices.
///
/// A `None` slot is a device that fails to open.
#[derive(Debug, Default)]
pub struct MockConnector {
    devices: Mutex<Vec<Option<MockTransport>>>,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new(devices: Vec<Option<MockTransport>>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn device_count(&self) -> u3_lib::error::Result<usize> {
        Ok(self.devices.lock().expect("mock connector lock").len())
    }

    async fn open(&self, index: usize) -> u3_lib::error::Result<MockTransport> {
        self.devices
            .lock()
            .expect("mock connector lock")
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(U3Error::DeviceNotFound)
    }
}

/// Frame `body` as an extended reply to `command`, padding to even and
/// filling in both checksums.
#[allow(dead_code)]
pub fn extended_reply(command: u8, body: &[u8]) -> Vec<u8> {
    let mut body = body.to_vec();
    if body.len() % 2 != 0 {
        body.push(0);
    }
    let mut packet = vec![0, 0xF8, (body.len() / 2) as u8, command, 0, 0];
    packet.extend_from_slice(&body);
    apply_extended_checksum(&mut packet).expect("reply has a full header");
    packet
}

#[allow(dead_code)]
pub fn config_io_reply(timer_counter_config: u8, dac1_enable: u8, fio_analog: u8, eio_analog: u8) -> Vec<u8> {
    extended_reply(0x0B, &[0, 0, timer_counter_config, dac1_enable, fio_analog, eio_analog])
}

#[allow(dead_code)]
pub fn timer_clock_reply(config: u8, divisor: u8) -> Vec<u8> {
    extended_reply(0x0A, &[0, 0, config, divisor])
}

/// ConfigU3 reply for a U3 with product ID 3 and firmware 1.46.
#[allow(dead_code)]
pub fn config_u3_reply(hardware: (u8, u8), serial_number: u32, local_id: u8, dac1_enable: u8, version_info: u8) -> Vec<u8> {
    let mut body = vec![0, 0, 0];
    body.extend_from_slice(&[46, 1]); // firmware 1.46
    body.extend_from_slice(&[24, 0]); // bootloader 0.24
    body.extend_from_slice(&[hardware.1, hardware.0]);
    body.extend_from_slice(&serial_number.to_le_bytes());
    body.extend_from_slice(&3u16.to_le_bytes());
    body.push(local_id);
    body.push(0); // timer/counter mask
    body.extend_from_slice(&[0x0F, 0x00, 0x00]); // FIO analog, direction, state
    body.extend_from_slice(&[0x00, 0x00, 0x00]); // EIO analog, direction, state
    body.extend_from_slice(&[0x00, 0x00]); // CIO direction, state
    body.push(dac1_enable);
    body.extend_from_slice(&[0, 0]); // DAC0, DAC1
    body.extend_from_slice(&[0x02, 1]); // timer clock config, divisor
    body.push(0); // compatibility options
    body.push(version_info);
    extended_reply(0x08, &body)
}

/// Encode a value in the device's 32.32 fixed-point layout.
#[allow(dead_code)]
pub fn fixed_point(value: f64) -> [u8; 8] {
    let whole = value.floor();
    let fraction = ((value - whole) * 4_294_967_296.0) as u32;
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&fraction.to_le_bytes());
    bytes[4..].copy_from_slice(&(whole as i32).to_le_bytes());
    bytes
}

#[allow(dead_code)]
pub fn fixed_point_block(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|&v| fixed_point(v)).collect()
}

#[allow(dead_code)]
pub fn read_mem_reply(values: &[f64]) -> Vec<u8> {
    let mut body = vec![0, 0];
    body.extend_from_slice(&fixed_point_block(values));
    extended_reply(0x2D, &body)
}

/// The five ReadMem replies carrying `constants`.
#[allow(dead_code)]
pub fn calibration_replies(constants: &[f64; 20]) -> Vec<Vec<u8>> {
    constants.chunks(4).map(read_mem_reply).collect()
}

/// Feedback reply with echo 0.
#[allow(dead_code)]
pub fn feedback_reply(error_code: u8, error_frame: u8, results: &[u8]) -> Vec<u8> {
    let mut body = vec![error_code, error_frame, 0];
    body.extend_from_slice(results);
    extended_reply(0x00, &body)
}

#[allow(dead_code)]
pub fn i2c_reply(ack_array: u32, data: &[u8]) -> Vec<u8> {
    let mut body = vec![0, 0];
    body.extend_from_slice(&ack_array.to_le_bytes());
    body.extend_from_slice(data);
    extended_reply(0x3B, &body)
}

/// A session on a mock transport with nominal calibration and no I/O.
#[allow(dead_code)]
pub fn session(hardware: HardwareVersion, high_voltage: bool, replies: Vec<Vec<u8>>) -> U3<MockTransport> {
    U3::with_calibration(
        MockTransport::with_replies(replies),
        CalibrationInfo::nominal(hardware, high_voltage),
        false,
    )
}

#[allow(dead_code)]
pub const LEGACY: HardwareVersion = HardwareVersion::new(1, 20);
#[allow(dead_code)]
pub const HW_130: HardwareVersion = HardwareVersion::V1_30;

#[allow(dead_code)]
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() < tolerance
}
