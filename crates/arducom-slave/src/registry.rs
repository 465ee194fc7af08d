use arducom_frame::{Status, MAX_COMMAND};

/// A handler failure: the status for the error reply plus its info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandError {
    pub status: Status,
    pub info: u8,
}

impl CommandError {
    pub fn new(status: Status, info: u8) -> Self {
        Self { status, info }
    }

    /// A handler-specific failure; `info` carries the handler's own code.
    pub fn function_error(info: u8) -> Self {
        Self::new(Status::FunctionError, info)
    }

    /// A bound violation; `info` names the limit that was exceeded.
    pub fn limit_exceeded(info: u8) -> Self {
        Self::new(Status::LimitExceeded, info)
    }

    /// The reply would not fit; `info` names the maximum.
    pub fn buffer_overrun(info: u8) -> Self {
        Self::new(Status::BufferOverrun, info)
    }

    /// The payload shape is wrong; `info` names the expected length.
    pub fn parameter_mismatch(expected: u8) -> Self {
        Self::new(Status::ParameterMismatch, expected)
    }
}

/// What a handler returns: reply payload bytes, or an error reply.
pub type CommandResult = std::result::Result<Vec<u8>, CommandError>;

/// A command handler. Receives the request payload and produces the
/// reply payload.
pub type Handler = Box<dyn FnMut(&[u8]) -> CommandResult>;

/// One registered command.
pub struct Command {
    pub(crate) code: u8,
    /// `Some(n)`: the payload must be exactly `n` bytes. `None`: the
    /// handler accepts a variable payload.
    pub(crate) expected: Option<usize>,
    pub(crate) handler: Handler,
}

/// Errors from command registration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A command with this code is already registered.
    #[error("command {0} is already registered")]
    AlreadyExists(u8),

    /// The code is outside the valid range 0..=126.
    #[error("command code {0} is invalid (valid range 0..=126)")]
    CodeInvalid(u8),
}

/// The slave's command table, uniquely keyed by command code.
#[derive(Default)]
pub struct CommandRegistry {
    entries: Vec<Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command code.
    ///
    /// Duplicate registration fails and leaves the first entry active.
    pub fn add(
        &mut self,
        code: u8,
        expected: Option<usize>,
        handler: Handler,
    ) -> std::result::Result<(), RegistryError> {
        if code > MAX_COMMAND {
            return Err(RegistryError::CodeInvalid(code));
        }
        if self.entries.iter().any(|entry| entry.code == code) {
            return Err(RegistryError::AlreadyExists(code));
        }
        self.entries.push(Command {
            code,
            expected,
            handler,
        });
        Ok(())
    }

    pub(crate) fn find_mut(&mut self, code: u8) -> Option<&mut Command> {
        self.entries.iter_mut().find(|entry| entry.code == code)
    }

    /// Registered command codes, in registration order.
    pub fn codes(&self) -> Vec<u8> {
        self.entries.iter().map(|entry| entry.code).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
