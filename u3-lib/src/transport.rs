//! Byte-stream capabilities the protocol layer is written against.
//!
//! [`Transport`] is one opened device; [`Connector`] enumerates and opens
//! devices. The nusb binding lives in [`crate::usb`]; tests script both
//! traits with in-memory mocks.

use crate::error::{Result, U3Error};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

/// An exclusively owned, opened device handle.
///
/// Closing happens on drop.
#[async_trait]
pub trait Transport: Send {
    /// Write one packet, returning how many bytes the device accepted.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read one packet of at most `max_len` bytes.
    async fn read(&mut self, max_len: usize) -> Result<Bytes>;
}

/// Device enumeration.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Number of attached devices.
    async fn device_count(&self) -> Result<usize>;

    /// Open the device at `index` (0-based, in enumeration order).
    async fn open(&self, index: usize) -> Result<Self::Transport>;
}

/// Write a framed command, failing unless every byte was accepted.
pub async fn send_command<T: Transport + ?Sized>(transport: &mut T, packet: &[u8]) -> Result<()> {
    let written = transport.write(packet).await?;
    if written < packet.len() {
        return Err(U3Error::ShortWrite {
            expected: packet.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Read a reply of up to `max_len` bytes, failing only when nothing arrives.
pub async fn read_reply<T: Transport + ?Sized>(transport: &mut T, max_len: usize) -> Result<Bytes> {
    let reply = transport.read(max_len).await?;
    if reply.is_empty() {
        return Err(U3Error::ShortRead {
            expected: max_len,
            actual: 0,
        });
    }
    Ok(reply)
}

/// Read a reply that must be exactly `expected_len` bytes long.
pub async fn receive_response<T: Transport + ?Sized>(transport: &mut T, expected_len: usize) -> Result<Bytes> {
    let reply = read_reply(transport, expected_len).await?;
    if reply.len() < expected_len {
        warn!(
            expected = expected_len,
            actual = reply.len(),
            bytes = hex::encode(&reply),
            "Partial read"
        );
        return Err(U3Error::ShortRead {
            expected: expected_len,
            actual: reply.len(),
        });
    }
    Ok(reply)
}

/// Send a command and read its fixed-size reply.
pub async fn transact<T: Transport + ?Sized>(transport: &mut T, packet: &[u8], response_len: usize) -> Result<Bytes> {
    debug!(command = packet.get(3).copied().unwrap_or_default(), len = packet.len(), "Sending command");
    send_command(transport, packet).await?;
    receive_response(transport, response_len).await
}
