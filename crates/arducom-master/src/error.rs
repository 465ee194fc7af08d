use arducom_frame::Status;

use crate::lock::LockError;

/// Numeric codes for master-local errors. Codes below 128 are local;
/// codes 128 and above come from the slave.
pub mod code {
    pub const OK: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const NO_COMMAND: u8 = 2;
    pub const INVALID_REPLY: u8 = 3;
    pub const INVALID_RESPONSE: u8 = 4;
    pub const PAYLOAD_TOO_LONG: u8 = 5;
    pub const TRANSPORT_ERROR: u8 = 6;
    pub const TIMEOUT: u8 = 7;
}

/// Errors surfaced by the master execute engine.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// Tried to receive without sending a command first.
    #[error("cannot receive without sending a command first")]
    NoCommand,

    /// The first reply byte was 0: protocol-level garbage.
    #[error("did not receive a valid reply")]
    InvalidReply,

    /// The reply echoes a different command than the one sent.
    #[error("reply echoes command {echoed} instead of {sent}")]
    InvalidResponse { sent: u8, echoed: u8 },

    /// The reply announces more payload than the transport can carry.
    #[error("reply payload length {length} exceeds transport maximum {max}")]
    PayloadTooLong { length: usize, max: usize },

    /// The reply's checksum flag does not match what was requested.
    #[error("checksum flag mismatch between request and reply")]
    ChecksumFlagMismatch,

    /// The slave answered with an error reply. `code` is the raw status
    /// byte, `info` the accompanying info byte.
    #[error("{}; info {info}", format_slave_code(.code))]
    Slave { code: u8, info: u8 },

    /// Underlying I/O failure; the originating error is preserved.
    #[error("transport error: {0}")]
    Transport(#[source] arducom_transport::TransportError),

    /// The request or read timed out. The execute loop treats this like
    /// a slave `NO_DATA` so the retry policy applies uniformly.
    #[error("timeout waiting for a reply")]
    Timeout,

    /// The request frame could not be built.
    #[error("frame error: {0}")]
    Frame(#[from] arducom_frame::FrameError),

    /// Interprocess lock failure.
    #[error("interprocess lock: {0}")]
    Lock(#[from] LockError),
}

impl MasterError {
    /// The numeric error code, used by the CLI as its exit code.
    pub fn code(&self) -> u8 {
        match self {
            Self::NoCommand => code::NO_COMMAND,
            Self::InvalidReply => code::INVALID_REPLY,
            Self::InvalidResponse { .. } => code::INVALID_RESPONSE,
            Self::PayloadTooLong { .. } => code::PAYLOAD_TOO_LONG,
            Self::ChecksumFlagMismatch => code::GENERAL_ERROR,
            Self::Slave { code, .. } => *code,
            Self::Transport(_) => code::TRANSPORT_ERROR,
            Self::Timeout => code::TIMEOUT,
            Self::Frame(_) => code::GENERAL_ERROR,
            Self::Lock(_) => code::GENERAL_ERROR,
        }
    }

    /// The slave status, when this error carries one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Slave { code, .. } => Status::from_code(*code),
            _ => None,
        }
    }

    /// Whether the execute loop may retry after this error. Only "no
    /// data yet" conditions qualify; everything else surfaces at once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
            || matches!(self, Self::Slave { code, .. } if *code == Status::NoData.code())
    }

    pub(crate) fn from_transport(err: arducom_transport::TransportError) -> Self {
        match err {
            arducom_transport::TransportError::Timeout => Self::Timeout,
            other => Self::Transport(other),
        }
    }
}

fn format_slave_code(code: &u8) -> String {
    match Status::from_code(*code) {
        Some(status) => format!("slave error: {status}"),
        None => format!("slave error: unknown status ({code})"),
    }
}

pub type Result<T> = std::result::Result<T, MasterError>;
