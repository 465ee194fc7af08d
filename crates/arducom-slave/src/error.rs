/// Errors that can occur on the slave side.
#[derive(Debug, thiserror::Error)]
pub enum SlaveError {
    /// An I/O error on the slave transport.
    #[error("slave transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply frame could not be built.
    #[error("frame error: {0}")]
    Frame(#[from] arducom_frame::FrameError),

    /// Command registration failed.
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
}

pub type Result<T> = std::result::Result<T, SlaveError>;
