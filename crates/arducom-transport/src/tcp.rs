use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::endpoint;
use crate::error::{Result, TransportError};
use crate::stream::read_reply;
use crate::window::ReplyWindow;
use crate::{Transport, BLOCK_SIZE, MAX_FRAME_SIZE};

/// TCP master transport: one fresh connection per transaction.
///
/// The socket is opened lazily by `send_bytes` and closed by `done`, so a
/// slave that accepts a single connection at a time is never held open
/// between transactions.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    window: ReplyWindow,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
            window: ReplyWindow::default(),
        }
    }

    fn connect(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let address = format!("{}:{}", self.host, self.port);
            debug!(%address, "connecting");
            let stream = TcpStream::connect(&address).map_err(|err| TransportError::Open {
                endpoint: address,
                source: err,
            })?;
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().expect("stream was just set"))
    }
}

impl Transport for TcpTransport {
    fn init(&mut self) -> Result<()> {
        // connections are per-transaction; nothing to open yet
        Ok(())
    }

    fn send_bytes(&mut self, frame: &[u8], retries: u32) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        debug!(frame = %arducom_frame::hex_dump(frame), "tcp send");
        let mut attempts_left = retries;
        loop {
            let result = self
                .connect()
                .and_then(|stream| {
                    use std::io::Write;
                    stream.write_all(frame)?;
                    stream.flush()?;
                    Ok(())
                });
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempts_left > 0 => {
                    debug!(%err, attempts_left, "tcp write failed, retrying");
                    self.stream = None;
                    attempts_left -= 1;
                }
                Err(err) => {
                    self.stream = None;
                    return Err(err);
                }
            }
        }
    }

    fn request(&mut self, expected: usize) -> Result<()> {
        if expected > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: expected,
                max: MAX_FRAME_SIZE,
            });
        }
        let timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::NotInitialized)?;
        let mut data = Vec::with_capacity(expected);
        match read_reply(stream, expected, timeout, &mut data) {
            Ok(()) => {
                self.window.fill(data);
                Ok(())
            }
            Err(err) => {
                self.window.clear();
                Err(err)
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.window.read_byte()
    }

    fn done(&mut self) -> Result<()> {
        // drop the per-transaction connection
        self.stream = None;
        self.window.clear();
        Ok(())
    }

    fn max_payload(&self) -> usize {
        BLOCK_SIZE
    }

    fn default_expected(&self) -> usize {
        BLOCK_SIZE
    }

    fn lock_key(&self) -> i32 {
        endpoint::lock_key(&format!("{}:{}", self.host, self.port))
    }

    fn dump_receive_buffer(&self) {
        self.window.dump();
    }
}
