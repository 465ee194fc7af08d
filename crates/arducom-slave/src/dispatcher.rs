use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::debug;

use arducom_frame::{codec, Status, BUFFER_SIZE};

use crate::error::Result;
use crate::registry::{CommandRegistry, Handler, RegistryError};
use crate::transport::{BufferState, SlaveTransport};

/// Default receive timeout: a partial frame is dropped when no new bytes
/// arrive within this window.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// What one `poll` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No new input.
    Idle,
    /// Bytes are buffered but the frame is not complete yet.
    Incomplete,
    /// A command was dispatched and a success reply emitted.
    Handled,
    /// An error reply was emitted.
    Error(Status),
    /// A partial frame went stale and was dropped.
    TimedOut,
}

/// The slave dispatcher: buffers bytes from the transport, matches
/// complete frames against the command registry and emits replies.
///
/// Call [`Dispatcher::poll`] once per main-loop iteration; it never
/// blocks.
pub struct Dispatcher<T> {
    transport: T,
    registry: CommandRegistry,
    receive_timeout: Duration,
    last_receive: Option<Instant>,
    last_data_len: Option<usize>,
}

impl<T: SlaveTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            registry: CommandRegistry::new(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            last_receive: None,
            last_data_len: None,
        }
    }

    /// Replace the receive timeout. `Duration::ZERO` waits forever.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Register a command handler; see [`CommandRegistry::add`].
    pub fn add_command(
        &mut self,
        code: u8,
        expected: Option<usize>,
        handler: Handler,
    ) -> std::result::Result<(), RegistryError> {
        self.registry.add(code, expected, handler)
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ingest available bytes and handle at most one complete frame.
    pub fn poll(&mut self) -> Result<PollOutcome> {
        self.transport.poll()?;

        match self.transport.state() {
            BufferState::TooMuchData => {
                let mut frame = BytesMut::new();
                codec::encode_error(Status::TooMuchData, BUFFER_SIZE as u8, &mut frame);
                self.transport.send(&frame)?;
                self.transport.reset();
                self.clear_trackers();
                return Ok(PollOutcome::Error(Status::TooMuchData));
            }
            BufferState::HasData => {}
            _ => return Ok(self.idle_outcome()),
        }

        let len = self.transport.data().len();
        if self.last_data_len == Some(len) {
            // nothing new arrived for the buffered partial frame
            return Ok(self.idle_outcome());
        }
        self.last_data_len = Some(len);
        self.last_receive = Some(Instant::now());

        // the frames are tiny; working on a copy keeps the transport free
        // for the reply
        let buffered = self.transport.data().to_vec();
        let Some(request) = codec::decode_request(&buffered) else {
            return Ok(PollOutcome::Incomplete);
        };

        let checksummed = request.checksum.is_some();
        let (reply, outcome) = self.run_command(&request, checksummed)?;
        self.transport.send(&reply)?;
        self.clear_trackers();
        Ok(outcome)
    }

    fn run_command(
        &mut self,
        request: &codec::Request<'_>,
        checksummed: bool,
    ) -> Result<(BytesMut, PollOutcome)> {
        let mut frame = BytesMut::new();

        let Some(entry) = self.registry.find_mut(request.command) else {
            debug!(command = request.command, "command unknown");
            codec::encode_error(Status::CommandUnknown, request.command, &mut frame);
            return Ok((frame, PollOutcome::Error(Status::CommandUnknown)));
        };

        if let Some(expected) = entry.expected {
            if request.payload.len() != expected {
                debug!(
                    command = request.command,
                    received = request.payload.len(),
                    expected,
                    "parameter mismatch"
                );
                codec::encode_error(Status::ParameterMismatch, expected as u8, &mut frame);
                return Ok((frame, PollOutcome::Error(Status::ParameterMismatch)));
            }
        }

        if let Err(computed) = request.verify_checksum() {
            debug!(command = request.command, computed, "checksum mismatch");
            codec::encode_error(Status::ChecksumError, computed, &mut frame);
            return Ok((frame, PollOutcome::Error(Status::ChecksumError)));
        }

        debug!(
            command = request.command,
            payload = %arducom_frame::hex_dump(request.payload),
            "dispatch"
        );
        match (entry.handler)(request.payload) {
            Ok(reply_payload) => {
                if reply_payload.len() > BUFFER_SIZE {
                    codec::encode_error(Status::BufferOverrun, BUFFER_SIZE as u8, &mut frame);
                    return Ok((frame, PollOutcome::Error(Status::BufferOverrun)));
                }
                codec::encode_reply(request.command, &reply_payload, checksummed, &mut frame)?;
                Ok((frame, PollOutcome::Handled))
            }
            Err(err) => {
                debug!(command = request.command, status = %err.status, info = err.info, "handler error");
                codec::encode_error(err.status, err.info, &mut frame);
                Ok((frame, PollOutcome::Error(err.status)))
            }
        }
    }

    /// Timeout bookkeeping for polls that saw no new bytes.
    fn idle_outcome(&mut self) -> PollOutcome {
        if let Some(last_receive) = self.last_receive {
            if !self.receive_timeout.is_zero() && last_receive.elapsed() > self.receive_timeout {
                debug!("receive timeout, dropping partial frame");
                self.transport.reset();
                self.clear_trackers();
                return PollOutcome::TimedOut;
            }
            return PollOutcome::Incomplete;
        }
        PollOutcome::Idle
    }

    fn clear_trackers(&mut self) {
        self.last_receive = None;
        self.last_data_len = None;
    }
}
