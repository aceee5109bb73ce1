use std::array::TryFromSliceError;
use std::fmt;
use thiserror::Error;

/// Header field whose checksum did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumField {
    /// Byte 0, folded 8-bit sum of bytes 1..6 (or 1..n for normal packets).
    Checksum8,
    /// Bytes 4 and 5, 16-bit sum of the payload.
    Checksum16,
}

impl fmt::Display for ChecksumField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumField::Checksum8 => write!(f, "checksum8"),
            ChecksumField::Checksum16 => write!(f, "checksum16"),
        }
    }
}

/// The primary error type for the `u3-lib` library.
#[derive(Error, Debug)]
pub enum U3Error {
    #[error("USB device not found. Is a LabJack U3 connected?")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("Timeout during USB operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Short write: expected {expected} bytes, device accepted {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Response has bad {field}: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch {
        field: ChecksumField,
        computed: u16,
        received: u16,
    },

    #[error("Unexpected command echo: expected {expected:02x?}, got {actual:02x?}")]
    UnexpectedCommandEcho { expected: [u8; 3], actual: [u8; 3] },

    #[error("Device returned error code {code}{}", frame_suffix(.frame))]
    DeviceError { code: u8, frame: Option<u8> },

    #[error("Invalid calibration information")]
    InvalidCalibration,

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid DAC number {0}")]
    InvalidDac(u8),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Packet too large: {len} bytes, maximum is {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

impl From<TryFromSliceError> for U3Error {
    fn from(_: TryFromSliceError) -> Self {
        U3Error::InvalidPacket("Failed to convert slice to array".to_string())
    }
}

fn frame_suffix(frame: &Option<u8>) -> String {
    frame.map(|f| format!(" for frame {f}")).unwrap_or_default()
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, U3Error>;
