//! Checksums used by U3 packets.
//!
//! Every command in this crate uses the *extended* form: a 16-bit sum of the
//! payload (bytes 6 and up) stored little-endian in bytes 4-5, and an 8-bit
//! folded sum of header bytes 1-5 stored in byte 0. The *normal* form, a
//! single folded sum of bytes 1..n in byte 0, belongs to the legacy
//! short commands.

use crate::constants::HEADER_SIZE;
use crate::error::{ChecksumField, Result, U3Error};

/// Fold a byte sum into 8 bits: add the quotient and remainder of a
/// division by 256, twice.
fn fold(sum: u32) -> u8 {
    let mut a = sum;
    let q = a / 256;
    a = (a - 256 * q) + q;
    let q = a / 256;
    ((a - 256 * q) + q) as u8
}

/// Normal checksum: folded sum of bytes `1..n`.
pub fn checksum8(buffer: &[u8]) -> u8 {
    fold(buffer.iter().skip(1).map(|&b| u32::from(b)).sum())
}

/// Payload checksum of an extended packet: wrapping sum of bytes `6..n`.
pub fn extended_checksum16(buffer: &[u8]) -> u16 {
    buffer
        .iter()
        .skip(HEADER_SIZE)
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Header checksum of an extended packet: folded sum of bytes `1..6`.
pub fn extended_checksum8(buffer: &[u8]) -> u8 {
    fold(buffer.iter().take(HEADER_SIZE).skip(1).map(|&b| u32::from(b)).sum())
}

/// Write the normal checksum into byte 0.
pub fn apply_normal_checksum(buffer: &mut [u8]) {
    if let Some(first) = buffer.first_mut() {
        *first = 0;
    }
    let sum = checksum8(buffer);
    if let Some(first) = buffer.first_mut() {
        *first = sum;
    }
}

/// Write both extended checksums into the header.
///
/// Must run after the payload is final; the 8-bit checksum covers the
/// 16-bit one, so the order here matters.
pub fn apply_extended_checksum(buffer: &mut [u8]) -> Result<()> {
    if buffer.len() < HEADER_SIZE {
        return Err(U3Error::InvalidPacket(format!(
            "packet too short for checksum: {} bytes",
            buffer.len()
        )));
    }
    let [lo, hi] = extended_checksum16(buffer).to_le_bytes();
    buffer[4] = lo;
    buffer[5] = hi;
    buffer[0] = extended_checksum8(buffer);
    Ok(())
}

/// Check both extended checksums of a received packet.
pub fn verify_extended_checksum(buffer: &[u8]) -> Result<()> {
    if buffer.len() < HEADER_SIZE {
        return Err(U3Error::InvalidPacket(format!(
            "packet too short for checksum: {} bytes",
            buffer.len()
        )));
    }

    let computed = extended_checksum16(buffer);
    let received = u16::from_le_bytes([buffer[4], buffer[5]]);
    if computed != received {
        return Err(U3Error::ChecksumMismatch {
            field: ChecksumField::Checksum16,
            computed,
            received,
        });
    }

    let computed = extended_checksum8(buffer);
    if computed != buffer[0] {
        return Err(U3Error::ChecksumMismatch {
            field: ChecksumField::Checksum8,
            computed: computed.into(),
            received: buffer[0].into(),
        });
    }

    Ok(())
}

/// Check the normal checksum of a received packet.
pub fn verify_normal_checksum(buffer: &[u8]) -> Result<()> {
    let Some(&received) = buffer.first() else {
        return Err(U3Error::InvalidPacket("empty packet".to_string()));
    };
    let computed = checksum8(buffer);
    if computed != received {
        return Err(U3Error::ChecksumMismatch {
            field: ChecksumField::Checksum8,
            computed: computed.into(),
            received: received.into(),
        });
    }
    Ok(())
}
