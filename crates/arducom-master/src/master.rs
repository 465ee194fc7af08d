use bytes::BytesMut;
use tracing::debug;

use arducom_frame::{codec, hex_dump, Status, ERROR_CODE};
use arducom_transport::Transport;

use crate::error::{code, MasterError, Result};
use crate::lock::SemaphoreLock;
use crate::params::TransactionParams;

/// The Arducom master: one blocking request/response caller.
///
/// Each [`Master::execute`] call runs exactly one transaction: acquire
/// the interprocess lock, send one frame, poll for the reply with the
/// configured delay/retry policy, release the lock. The engine never
/// re-sends the request; retries only repeat the read.
pub struct Master<T: Transport> {
    transport: T,
    last_command: Option<u8>,
    last_error: u8,
    lock: Option<SemaphoreLock>,
}

impl<T: Transport> Master<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last_command: None,
            last_error: code::OK,
            lock: None,
        }
    }

    /// Initialize the underlying transport.
    pub fn init(&mut self) -> Result<()> {
        match self.transport.init() {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = MasterError::from_transport(err);
                self.last_error = err.code();
                Err(err)
            }
        }
    }

    /// The code of the last error seen on this master; 0 when the last
    /// transaction succeeded. Codes below 128 are local, higher codes
    /// come from the slave. The CLI uses this as its exit code.
    pub fn last_error(&self) -> u8 {
        self.last_error
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one transaction and return the reply payload.
    ///
    /// `expected` bounds how many payload bytes are read back; `None`
    /// uses the transport default. When the slave advertises more than
    /// `expected`, the remainder is discarded at the transport boundary
    /// and a checksum mismatch will typically follow; retry with a
    /// larger bound in that case.
    pub fn execute(
        &mut self,
        params: &TransactionParams,
        command: u8,
        payload: &[u8],
        expected: Option<usize>,
    ) -> Result<Vec<u8>> {
        let expected = expected.unwrap_or_else(|| self.transport.default_expected());
        let result = self.transaction(params, command, payload, expected);
        self.last_error = match &result {
            Ok(_) => code::OK,
            Err(err) => err.code(),
        };

        // end of transaction on every path; a successful transaction may
        // keep the connection when the caller asked to hold it
        let keep_open = params.hold_connection && result.is_ok();
        if !keep_open {
            if let Err(done_err) = self.transport.done() {
                debug!(error = %done_err, "transport done failed");
            }
        }
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        result
    }

    /// Release any held connection kept open by `hold_connection`.
    pub fn close(&mut self) -> Result<()> {
        self.transport.done().map_err(MasterError::from_transport)
    }

    fn transaction(
        &mut self,
        params: &TransactionParams,
        command: u8,
        payload: &[u8],
        expected: usize,
    ) -> Result<Vec<u8>> {
        let key = params.lock_key.unwrap_or_else(|| self.transport.lock_key());
        if self.lock.is_some() {
            return Err(crate::lock::LockError::AlreadyHeld.into());
        }
        self.lock = SemaphoreLock::acquire(key, params.timeout)?;

        self.send(command, params.use_checksum, payload, 0)?;

        let mut attempts_left = params.retries;
        loop {
            if !params.delay.is_zero() {
                std::thread::sleep(params.delay);
            }
            match self.receive(expected, params.use_checksum) {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() && attempts_left > 0 => {
                    debug!(error = %err, attempts_left, "no data yet, polling again");
                    attempts_left -= 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Build and send one request frame. Transport retries cover
    /// physical write failures only.
    pub fn send(
        &mut self,
        command: u8,
        use_checksum: bool,
        payload: &[u8],
        retries: u32,
    ) -> Result<()> {
        let max = self.transport.max_payload();
        if payload.len() > max {
            return Err(arducom_frame::FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }
        let mut frame = BytesMut::new();
        codec::encode_request(command, payload, use_checksum, &mut frame)?;
        debug!(command, frame = %hex_dump(&frame), "send");
        self.transport
            .send_bytes(&frame, retries)
            .map_err(MasterError::from_transport)?;
        self.last_command = Some(command);
        Ok(())
    }

    /// Read and parse one reply frame for the last sent command.
    pub fn receive(&mut self, expected: usize, use_checksum: bool) -> Result<Vec<u8>> {
        let Some(command) = self.last_command else {
            return Err(MasterError::NoCommand);
        };

        // header plus checksum on top of the payload bound
        let window = (expected + 3).min(self.transport.max_payload() + 3);
        self.transport
            .request(window)
            .map_err(MasterError::from_transport)?;
        self.transport.dump_receive_buffer();

        let lead = self.read_byte()?;
        if lead == ERROR_CODE {
            let status = self.read_byte()?;
            let info = self.read_byte()?;
            debug!(status, info, "error reply");
            return Err(MasterError::Slave { code: status, info });
        }
        if lead == 0 {
            return Err(MasterError::InvalidReply);
        }
        if lead != command | 0x80 {
            return Err(MasterError::InvalidResponse {
                sent: command,
                echoed: lead & 0x7F,
            });
        }

        let code_field = self.read_byte()?;
        let length = codec::payload_len(code_field);
        let has_checksum = codec::has_checksum(code_field);
        if length > self.transport.max_payload() {
            return Err(MasterError::PayloadTooLong {
                length,
                max: self.transport.max_payload(),
            });
        }
        if has_checksum != use_checksum {
            return Err(MasterError::ChecksumFlagMismatch);
        }

        let embedded = if has_checksum {
            Some(self.read_byte()?)
        } else {
            None
        };

        let mut payload = Vec::with_capacity(length.min(expected));
        for _ in 0..length.min(expected) {
            payload.push(self.read_byte()?);
        }
        debug!(payload = %hex_dump(&payload), "reply payload");

        if let Some(embedded) = embedded {
            let computed = arducom_frame::checksum(lead, code_field, &payload);
            if computed != embedded {
                return Err(MasterError::Slave {
                    code: Status::ChecksumError.code(),
                    info: computed,
                });
            }
        }
        Ok(payload)
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.transport.read_byte().map_err(MasterError::from_transport)
    }
}
