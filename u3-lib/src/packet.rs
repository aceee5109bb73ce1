use crate::checksum::{apply_extended_checksum, verify_extended_checksum};
use crate::constants::{EXTENDED_COMMAND_BYTE, HEADER_SIZE, MAX_PACKET_SIZE};
use crate::error::{Result, U3Error};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Extended command numbers (header byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExtendedCommand {
    Feedback = 0x00,
    ConfigU3 = 0x08,
    ConfigTimerClock = 0x0A,
    #[strum(to_string = "ConfigIO")]
    ConfigIo = 0x0B,
    ReadMem = 0x2D,
    #[strum(to_string = "I2C")]
    I2c = 0x3B,
}

/// The 6-byte header shared by every extended packet.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ExtendedHeader {
    pub checksum8: u8,
    pub command: u8,
    /// Payload length in 16-bit words
    pub words: u8,
    pub extended_command: u8,
    pub checksum16: U16,
}

impl ExtendedHeader {
    /// The bytes the device echoes back: command byte, word count, command number.
    pub fn echo(&self) -> [u8; 3] {
        [self.command, self.words, self.extended_command]
    }
}

/// Frame an extended command.
///
/// The payload is zero-padded to an even length, the word count is derived
/// from it and both checksums are applied last.
pub fn build_extended(command: ExtendedCommand, payload: &[u8]) -> Result<Bytes> {
    let padded_len = payload.len() + payload.len() % 2;
    let total = HEADER_SIZE + padded_len;
    if total > MAX_PACKET_SIZE {
        return Err(U3Error::PacketTooLarge {
            len: total,
            max: MAX_PACKET_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(0);
    buf.put_u8(EXTENDED_COMMAND_BYTE);
    buf.put_u8((padded_len / 2) as u8);
    buf.put_u8(command.into());
    buf.put_u16_le(0);
    buf.put_slice(payload);
    buf.resize(total, 0);

    apply_extended_checksum(&mut buf)?;
    Ok(buf.freeze())
}

/// Check checksums and the echoed command bytes of a response.
///
/// `words` is the expected data-word count for commands whose reply size is
/// fixed; `None` accepts whatever the device reports.
pub fn validate_response(buffer: &[u8], command: ExtendedCommand, words: Option<u8>) -> Result<ExtendedHeader> {
    verify_extended_checksum(buffer)?;

    let (header, _) = ExtendedHeader::read_from_prefix(buffer)
        .map_err(|_| U3Error::InvalidPacket("response shorter than header".to_string()))?;

    let command_number: u8 = command.into();
    let expected = [
        EXTENDED_COMMAND_BYTE,
        words.unwrap_or(header.words),
        command_number,
    ];
    if header.echo() != expected {
        return Err(U3Error::UnexpectedCommandEcho {
            expected,
            actual: header.echo(),
        });
    }

    Ok(header)
}

/// Map the error-code byte (offset 6) of a non-Feedback reply.
pub fn check_error_code(buffer: &[u8]) -> Result<()> {
    match buffer.get(HEADER_SIZE).copied() {
        Some(0) => Ok(()),
        Some(code) => Err(U3Error::DeviceError { code, frame: None }),
        None => Err(U3Error::InvalidPacket("response has no error code".to_string())),
    }
}

/// Size of an extended response carrying `payload_len` bytes, padded to even.
pub fn padded_size(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + payload_len % 2
}
