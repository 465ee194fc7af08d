/// Status codes a slave sends in the second byte of an error reply.
///
/// All values have bit 7 set so they can never collide with a command
/// echo. The info byte accompanying each status carries context: the
/// requested command for [`Status::CommandUnknown`], the expected payload
/// length for [`Status::ParameterMismatch`], the recomputed checksum for
/// [`Status::ChecksumError`], and a handler-defined code for
/// [`Status::FunctionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The command was received but no reply is ready yet; poll again.
    NoData = 128,
    /// No handler is registered for the requested command code.
    CommandUnknown = 129,
    /// The receive buffer overflowed while collecting the frame.
    TooMuchData = 130,
    /// The payload length did not match the registered expected length.
    ParameterMismatch = 131,
    /// The handler produced more reply bytes than the transport carries.
    BufferOverrun = 132,
    /// Checksum verification failed.
    ChecksumError = 133,
    /// A bound was violated (read past the end of a region, etc.).
    LimitExceeded = 134,
    /// The handler failed; the info byte carries its own error code.
    FunctionError = 254,
}

impl Status {
    /// The wire value of this status.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire value. Returns `None` for codes this protocol
    /// revision does not define.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            128 => Some(Self::NoData),
            129 => Some(Self::CommandUnknown),
            130 => Some(Self::TooMuchData),
            131 => Some(Self::ParameterMismatch),
            132 => Some(Self::BufferOverrun),
            133 => Some(Self::ChecksumError),
            134 => Some(Self::LimitExceeded),
            254 => Some(Self::FunctionError),
            _ => None,
        }
    }

    /// Short human-readable description used in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            Self::NoData => "no data available yet",
            Self::CommandUnknown => "command unknown",
            Self::TooMuchData => "too much data",
            Self::ParameterMismatch => "parameter mismatch",
            Self::BufferOverrun => "buffer overrun",
            Self::ChecksumError => "checksum error",
            Self::LimitExceeded => "limit exceeded",
            Self::FunctionError => "function error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.describe(), self.code())
    }
}
