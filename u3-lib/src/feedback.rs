//! Feedback sub-command codec.
//!
//! A Feedback packet carries an echo byte followed by a list of IO
//! descriptors. The reply carries an error code, the 1-based index of the
//! descriptor that failed, the echo, and then the result bytes of every
//! descriptor that produces output, in request order.

use crate::constants::{
    FEEDBACK_DATA_OFFSET, HEADER_SIZE, MAX_DIGITAL_CHANNEL, MAX_PACKET_SIZE, SINGLE_ENDED_CHANNEL, SPECIAL_RANGE_CHANNEL,
};
use crate::error::{Result, U3Error};
use crate::packet::{ExtendedCommand, build_extended, padded_size, validate_response};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use tracing::warn;

/// IOType byte that leads every Feedback descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IoType {
    #[strum(to_string = "AIN")]
    Ain = 1,
    BitStateRead = 10,
    BitStateWrite = 11,
    BitDirWrite = 13,
    #[strum(to_string = "DAC0 (8-bit)")]
    Dac0Bits8 = 34,
    #[strum(to_string = "DAC1 (8-bit)")]
    Dac1Bits8 = 35,
    #[strum(to_string = "DAC0 (16-bit)")]
    Dac0Bits16 = 38,
    #[strum(to_string = "DAC1 (16-bit)")]
    Dac1Bits16 = 39,
    Timer0 = 42,
    Timer0Config = 43,
    Timer1 = 44,
    Timer1Config = 45,
    Counter0 = 54,
    Counter1 = 55,
}

/// One Feedback descriptor.
///
/// `timer`, `dac` and `counter` indices are 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCommand {
    AnalogInput {
        positive: u8,
        negative: u8,
        long_settling: bool,
        quick_sample: bool,
    },
    BitStateRead {
        channel: u8,
    },
    BitStateWrite {
        channel: u8,
        state: bool,
    },
    BitDirWrite {
        channel: u8,
        output: bool,
    },
    Timer {
        timer: u8,
        update_reset: bool,
        value: u16,
    },
    TimerConfig {
        timer: u8,
        mode: u8,
        value: u16,
    },
    Dac8 {
        dac: u8,
        code: u8,
    },
    Dac16 {
        dac: u8,
        code: u16,
    },
    Counter {
        counter: u8,
        reset: bool,
    },
}

impl FeedbackCommand {
    /// The IOType this descriptor is sent as.
    pub fn io_type(&self) -> Result<IoType> {
        let (base, index, step) = match *self {
            FeedbackCommand::AnalogInput { .. } => return Ok(IoType::Ain),
            FeedbackCommand::BitStateRead { .. } => return Ok(IoType::BitStateRead),
            FeedbackCommand::BitStateWrite { .. } => return Ok(IoType::BitStateWrite),
            FeedbackCommand::BitDirWrite { .. } => return Ok(IoType::BitDirWrite),
            FeedbackCommand::Timer { timer, .. } => (IoType::Timer0, timer, 2),
            FeedbackCommand::TimerConfig { timer, .. } => (IoType::Timer0Config, timer, 2),
            FeedbackCommand::Dac8 { dac, .. } => (IoType::Dac0Bits8, dac, 1),
            FeedbackCommand::Dac16 { dac, .. } => (IoType::Dac0Bits16, dac, 1),
            FeedbackCommand::Counter { counter, .. } => (IoType::Counter0, counter, 1),
        };
        if index > 1 {
            return Err(U3Error::InvalidRange(format!("{base} index {index} is not 0 or 1")));
        }
        let code = u8::from(base) + index * step;
        IoType::try_from(code).map_err(|_| U3Error::InvalidRange(format!("no IOType {code}")))
    }

    /// Bytes this descriptor occupies in the request, IOType included.
    pub fn encoded_len(&self) -> usize {
        match self {
            FeedbackCommand::AnalogInput { .. } | FeedbackCommand::Dac16 { .. } => 3,
            FeedbackCommand::Timer { .. } | FeedbackCommand::TimerConfig { .. } => 4,
            _ => 2,
        }
    }

    /// Bytes this descriptor contributes to the reply.
    pub fn result_len(&self) -> usize {
        match self {
            FeedbackCommand::AnalogInput { .. } => 2,
            FeedbackCommand::BitStateRead { .. } => 1,
            FeedbackCommand::Timer { .. } | FeedbackCommand::Counter { .. } => 4,
            _ => 0,
        }
    }

    /// Reject channel numbers that would spill into the flag bits.
    fn check_channels(&self) -> Result<()> {
        match *self {
            FeedbackCommand::AnalogInput { positive, negative, .. } => {
                if positive > SINGLE_ENDED_CHANNEL {
                    return Err(U3Error::InvalidChannel(format!(
                        "positive channel {positive} is not 0-{SINGLE_ENDED_CHANNEL}"
                    )));
                }
                if negative > SPECIAL_RANGE_CHANNEL {
                    return Err(U3Error::InvalidChannel(format!(
                        "negative channel {negative} is not 0-{SPECIAL_RANGE_CHANNEL}"
                    )));
                }
            }
            FeedbackCommand::BitStateRead { channel }
            | FeedbackCommand::BitStateWrite { channel, .. }
            | FeedbackCommand::BitDirWrite { channel, .. }
                if channel > MAX_DIGITAL_CHANNEL =>
            {
                return Err(U3Error::InvalidChannel(format!(
                    "digital channel {channel} is not 0-{MAX_DIGITAL_CHANNEL}"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.check_channels()?;
        buf.put_u8(self.io_type()?.into());
        match *self {
            FeedbackCommand::AnalogInput {
                positive,
                negative,
                long_settling,
                quick_sample,
            } => {
                buf.put_u8(positive | (u8::from(long_settling) << 6) | (u8::from(quick_sample) << 7));
                buf.put_u8(negative);
            }
            FeedbackCommand::BitStateRead { channel } => buf.put_u8(channel),
            FeedbackCommand::BitStateWrite { channel, state } => buf.put_u8(channel | (u8::from(state) << 7)),
            FeedbackCommand::BitDirWrite { channel, output } => buf.put_u8(channel | (u8::from(output) << 7)),
            FeedbackCommand::Timer {
                update_reset, value, ..
            } => {
                buf.put_u8(update_reset.into());
                buf.put_u16_le(value);
            }
            FeedbackCommand::TimerConfig { mode, value, .. } => {
                buf.put_u8(mode);
                buf.put_u16_le(value);
            }
            FeedbackCommand::Dac8 { code, .. } => buf.put_u8(code),
            FeedbackCommand::Dac16 { code, .. } => buf.put_u16_le(code),
            FeedbackCommand::Counter { reset, .. } => buf.put_u8(reset.into()),
        }
        Ok(())
    }
}

/// Frame a Feedback request. The echo byte is always 0.
pub fn encode_request(commands: &[FeedbackCommand]) -> Result<Bytes> {
    let response_len = response_len(commands);
    if response_len > MAX_PACKET_SIZE {
        return Err(U3Error::PacketTooLarge {
            len: response_len,
            max: MAX_PACKET_SIZE,
        });
    }

    let mut payload = BytesMut::with_capacity(1 + commands.iter().map(FeedbackCommand::encoded_len).sum::<usize>());
    payload.put_u8(0);
    for command in commands {
        command.encode(&mut payload)?;
    }
    build_extended(ExtendedCommand::Feedback, &payload)
}

/// Expected reply size: header, error code, error frame, echo and results,
/// padded to even.
pub fn response_len(commands: &[FeedbackCommand]) -> usize {
    padded_size(3 + commands.iter().map(FeedbackCommand::result_len).sum::<usize>())
}

/// A decoded Feedback reply.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackResponse {
    pub echo: u8,
    /// Result bytes of each output-producing descriptor, in request order
    pub results: Vec<Bytes>,
}

impl FeedbackResponse {
    /// Result bytes of the `n`th output-producing descriptor.
    pub fn result(&self, n: usize) -> Result<&Bytes> {
        self.results
            .get(n)
            .ok_or_else(|| U3Error::InvalidPacket(format!("Feedback reply has no result {n}")))
    }
}

/// Validate and split a Feedback reply.
///
/// Replies shorter than expected are accepted only long enough to report a
/// device error; the device truncates those.
pub fn parse_response(reply: Bytes, commands: &[FeedbackCommand]) -> Result<FeedbackResponse> {
    let expected = response_len(commands);

    if reply.len() < expected {
        if reply.len() >= HEADER_SIZE + 2 {
            validate_response(&reply, ExtendedCommand::Feedback, None)?;
            check_error(&reply, commands)?;
        }
        warn!(
            expected,
            actual = reply.len(),
            bytes = hex::encode(&reply),
            "Partial Feedback read"
        );
        return Err(U3Error::ShortRead {
            expected,
            actual: reply.len(),
        });
    }

    validate_response(&reply, ExtendedCommand::Feedback, None)?;
    check_error(&reply, commands)?;

    let echo = reply[FEEDBACK_DATA_OFFSET - 1];
    let mut offset = FEEDBACK_DATA_OFFSET;
    let mut results = Vec::new();
    for command in commands {
        let len = command.result_len();
        if len > 0 {
            results.push(reply.slice(offset..offset + len));
            offset += len;
        }
    }

    Ok(FeedbackResponse { echo, results })
}

fn check_error(reply: &[u8], commands: &[FeedbackCommand]) -> Result<()> {
    let code = reply[HEADER_SIZE];
    if code == 0 {
        return Ok(());
    }
    let frame = reply[HEADER_SIZE + 1];
    let failed = usize::from(frame)
        .checked_sub(1)
        .and_then(|i| commands.get(i))
        .and_then(|c| c.io_type().ok());
    match failed {
        Some(io_type) => warn!(code, frame, %io_type, "Feedback descriptor failed"),
        None => warn!(code, frame, "Feedback command failed"),
    }
    Err(U3Error::DeviceError {
        code,
        frame: Some(frame),
    })
}
