use bytes::{BufMut, BytesMut};

use crate::checksum::checksum;
use crate::error::{FrameError, Result};
use crate::status::Status;
use crate::{ERROR_CODE, MAX_COMMAND};

/// Size of the fixed frame header: command byte plus code byte.
pub const HEADER_SIZE: usize = 2;

/// Largest payload the six-bit length field can announce.
pub const MAX_WIRE_PAYLOAD: usize = 63;

const LENGTH_MASK: u8 = 0b0011_1111;
const CHECKSUM_FLAG: u8 = 0x80;

/// Build the code byte from a payload length and the checksum flag.
pub fn code_byte(payload_len: usize, with_checksum: bool) -> u8 {
    (payload_len as u8 & LENGTH_MASK) | if with_checksum { CHECKSUM_FLAG } else { 0 }
}

/// Payload length announced by a code byte (low six bits; bit 6 is
/// reserved and ignored on receive).
pub fn payload_len(code: u8) -> usize {
    usize::from(code & LENGTH_MASK)
}

/// Whether a code byte announces a checksum byte.
pub fn has_checksum(code: u8) -> bool {
    code & CHECKSUM_FLAG != 0
}

/// Total frame size announced by a code byte, header and checksum included.
pub fn frame_len(code: u8) -> usize {
    HEADER_SIZE + usize::from(has_checksum(code)) + payload_len(code)
}

/// Encode a request frame (master to slave).
pub fn encode_request(
    command: u8,
    payload: &[u8],
    with_checksum: bool,
    dst: &mut BytesMut,
) -> Result<()> {
    if command > MAX_COMMAND {
        return Err(FrameError::CommandCodeInvalid(command));
    }
    encode_framed(command, payload, with_checksum, dst)
}

/// Encode a success reply frame (slave to master). The first byte echoes
/// the command with bit 7 set.
pub fn encode_reply(
    command: u8,
    payload: &[u8],
    with_checksum: bool,
    dst: &mut BytesMut,
) -> Result<()> {
    if command > MAX_COMMAND {
        return Err(FrameError::CommandCodeInvalid(command));
    }
    encode_framed(command | 0x80, payload, with_checksum, dst)
}

fn encode_framed(lead: u8, payload: &[u8], with_checksum: bool, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_WIRE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_WIRE_PAYLOAD,
        });
    }
    let code = code_byte(payload.len(), with_checksum);
    dst.reserve(frame_len(code));
    dst.put_u8(lead);
    dst.put_u8(code);
    if with_checksum {
        dst.put_u8(checksum(lead, code, payload));
    }
    dst.put_slice(payload);
    Ok(())
}

/// Encode an error reply: exactly three bytes, never checksummed.
pub fn encode_error(status: Status, info: u8, dst: &mut BytesMut) {
    dst.reserve(3);
    dst.put_u8(ERROR_CODE);
    dst.put_u8(status.code());
    dst.put_u8(info);
}

/// A fully received request frame, borrowed from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Request<'a> {
    /// Command code from the first byte.
    pub command: u8,
    /// Raw code byte (length, checksum flag, reserved bit).
    pub code: u8,
    /// Embedded checksum, when the checksum flag is set.
    pub checksum: Option<u8>,
    /// Payload bytes.
    pub payload: &'a [u8],
}

impl Request<'_> {
    /// Verify the embedded checksum. Returns the recomputed value on
    /// mismatch so it can be placed in the error info byte. Frames
    /// without a checksum always verify.
    pub fn verify_checksum(&self) -> std::result::Result<(), u8> {
        let Some(embedded) = self.checksum else {
            return Ok(());
        };
        let computed = checksum(self.command, self.code, self.payload);
        if computed == embedded {
            Ok(())
        } else {
            Err(computed)
        }
    }
}

/// Decode a request frame from a receive buffer.
///
/// Returns `None` while the buffer does not yet hold the complete frame
/// its header announces. Trailing bytes beyond the announced frame are
/// ignored; request/reply transactions never pipeline.
pub fn decode_request(buf: &[u8]) -> Option<Request<'_>> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let command = buf[0];
    let code = buf[1];
    if buf.len() < frame_len(code) {
        return None;
    }
    let payload_start = HEADER_SIZE + usize::from(has_checksum(code));
    Some(Request {
        command,
        code,
        checksum: has_checksum(code).then(|| buf[2]),
        payload: &buf[payload_start..payload_start + payload_len(code)],
    })
}
