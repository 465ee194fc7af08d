//! Master-side Arducom transports.
//!
//! Provides a unified capability surface over the three endpoint
//! families:
//! - Serial byte streams (`/dev/tty*`, `COM*`)
//! - I2C buses (`/dev/i2c-*`)
//! - TCP sockets (one connection per transaction)
//!
//! The [`Transport`] trait is the seam the execute engine drives; the
//! concrete transports are collected in the [`MasterTransport`] enum.

pub mod endpoint;
pub mod error;
pub mod i2c;
pub mod serial;
pub mod tcp;

mod stream;
mod window;

pub use endpoint::{detect_kind, is_usb_serial, lock_key, TransportKind, DEFAULT_TCP_PORT};
pub use error::{Result, TransportError};
pub use i2c::I2cTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Block size shared by all stock transports: the largest payload a
/// single frame may carry.
pub const BLOCK_SIZE: usize = 32;

/// Largest complete frame on the wire: block-sized payload plus command,
/// code and checksum bytes.
pub const MAX_FRAME_SIZE: usize = BLOCK_SIZE + 3;

/// Capability set every master transport provides.
///
/// `send_bytes` retries cover physical write failures only; protocol
/// retries are the execute engine's business. `request` announces intent
/// to receive up to `expected` bytes and buffers them; `read_byte` then
/// consumes the buffered window in order.
pub trait Transport {
    /// Prepare and open the endpoint. Idempotent with respect to `done`.
    fn init(&mut self) -> Result<()>;

    /// Atomically write one frame.
    fn send_bytes(&mut self, frame: &[u8], retries: u32) -> Result<()>;

    /// Fetch up to `expected` bytes of reply into the internal window.
    fn request(&mut self, expected: usize) -> Result<()>;

    /// Read one byte from the previously requested window, in order.
    fn read_byte(&mut self) -> Result<u8>;

    /// End of transaction; release per-transaction resources.
    fn done(&mut self) -> Result<()>;

    /// Largest payload a frame over this transport may carry.
    fn max_payload(&self) -> usize;

    /// Default number of bytes to expect when the caller gives no bound.
    fn default_expected(&self) -> usize;

    /// Stable per-endpoint identifier used as the interprocess lock key.
    /// 0 disables locking.
    fn lock_key(&self) -> i32;

    /// Log the receive window at debug level.
    fn dump_receive_buffer(&self);
}

/// The three concrete master transports as one dispatchable value.
#[derive(Debug)]
pub enum MasterTransport {
    Serial(SerialTransport),
    I2c(I2cTransport),
    Tcp(TcpTransport),
}

impl Transport for MasterTransport {
    fn init(&mut self) -> Result<()> {
        match self {
            Self::Serial(t) => t.init(),
            Self::I2c(t) => t.init(),
            Self::Tcp(t) => t.init(),
        }
    }

    fn send_bytes(&mut self, frame: &[u8], retries: u32) -> Result<()> {
        match self {
            Self::Serial(t) => t.send_bytes(frame, retries),
            Self::I2c(t) => t.send_bytes(frame, retries),
            Self::Tcp(t) => t.send_bytes(frame, retries),
        }
    }

    fn request(&mut self, expected: usize) -> Result<()> {
        match self {
            Self::Serial(t) => t.request(expected),
            Self::I2c(t) => t.request(expected),
            Self::Tcp(t) => t.request(expected),
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        match self {
            Self::Serial(t) => t.read_byte(),
            Self::I2c(t) => t.read_byte(),
            Self::Tcp(t) => t.read_byte(),
        }
    }

    fn done(&mut self) -> Result<()> {
        match self {
            Self::Serial(t) => t.done(),
            Self::I2c(t) => t.done(),
            Self::Tcp(t) => t.done(),
        }
    }

    fn max_payload(&self) -> usize {
        match self {
            Self::Serial(t) => t.max_payload(),
            Self::I2c(t) => t.max_payload(),
            Self::Tcp(t) => t.max_payload(),
        }
    }

    fn default_expected(&self) -> usize {
        match self {
            Self::Serial(t) => t.default_expected(),
            Self::I2c(t) => t.default_expected(),
            Self::Tcp(t) => t.default_expected(),
        }
    }

    fn lock_key(&self) -> i32 {
        match self {
            Self::Serial(t) => t.lock_key(),
            Self::I2c(t) => t.lock_key(),
            Self::Tcp(t) => t.lock_key(),
        }
    }

    fn dump_receive_buffer(&self) {
        match self {
            Self::Serial(t) => t.dump_receive_buffer(),
            Self::I2c(t) => t.dump_receive_buffer(),
            Self::Tcp(t) => t.dump_receive_buffer(),
        }
    }
}

impl MasterTransport {
    /// Name of the transport family for diagnostics.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Serial(_) => TransportKind::Serial,
            Self::I2c(_) => TransportKind::I2c,
            Self::Tcp(_) => TransportKind::Tcpip,
        }
    }
}
