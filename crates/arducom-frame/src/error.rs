/// Errors that can occur while building or parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The command code is outside the valid range 0..=126.
    #[error("invalid command code {0} (valid range 0..=126)")]
    CommandCodeInvalid(u8),

    /// The payload exceeds what the length field or the transport can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
