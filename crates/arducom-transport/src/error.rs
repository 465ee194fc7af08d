/// Errors that can occur in master transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the endpoint.
    #[error("failed to open {endpoint}: {source}")]
    Open {
        endpoint: String,
        source: std::io::Error,
    },

    /// An I/O error occurred while talking to the endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint did not produce data within the configured timeout.
    /// Kept apart from [`TransportError::Io`] so the execute loop can
    /// retry timeouts without retrying hard failures.
    #[error("timeout waiting for data")]
    Timeout,

    /// A frame exceeds the block size this transport can move at once.
    #[error("frame too large for transport ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The transport was used before `init` opened the endpoint.
    #[error("transport not initialized")]
    NotInitialized,

    /// `read_byte` was called without a preceding `request`.
    #[error("data must be requested before reading")]
    NotRequested,

    /// More bytes were read than the last `request` made available.
    #[error("read past the end of the requested data window")]
    WindowExhausted,

    /// The endpoint string could not be understood.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
