//! Arducom wire format: frame codec, checksum and status codes.
//!
//! Every request is framed with:
//! - A 1-byte command code (0..=126)
//! - A 1-byte code field: payload length in the low six bits, checksum
//!   flag in bit 7
//! - An optional 1-byte checksum
//! - The payload (up to the transport maximum, never more than 63 bytes)
//!
//! A success reply has the same shape with bit 7 of the command byte set.
//! An error reply is always exactly three bytes: `0xFF`, the status code,
//! and one byte of status-specific info. Error replies are never
//! checksummed.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod status;

pub use checksum::checksum;
pub use codec::{
    code_byte, decode_request, encode_error, encode_reply, encode_request, frame_len,
    has_checksum, payload_len, Request, HEADER_SIZE, MAX_WIRE_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use status::Status;

/// Lead byte of every error reply.
pub const ERROR_CODE: u8 = 0xFF;

/// Highest valid command code. Bit 7 marks replies; 127 is reserved.
pub const MAX_COMMAND: u8 = 126;

/// Default payload buffer size shared by all stock transports.
pub const BUFFER_SIZE: usize = 32;

/// Hard upper bound on the payload buffer of any slave.
pub const MAX_BUFFER_SIZE: usize = 64;

/// Protocol version reported by the built-in version command.
pub const VERSION: u8 = 1;

/// Configuration flag: echo received frames to the debug log.
pub const FLAG_ENABLE_DEBUG: u8 = 0x01;
/// Configuration flag: enter an endless loop (watchdog self-test).
pub const FLAG_INFINITE_LOOP: u8 = 0x40;
/// Configuration flag: soft-reset the device.
pub const FLAG_SOFT_RESET: u8 = 0x80;

/// Sentinel for the version command's shutdown request: the mask byte plus
/// the flags byte shifted left by eight must equal this value (payload
/// bytes `DE AD` on the wire).
pub const SHUTDOWN_SENTINEL: u16 = 0xADDE;

/// Render bytes as an uppercase hex string for diagnostics.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
