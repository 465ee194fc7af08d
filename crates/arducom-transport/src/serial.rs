use std::io::Write;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::endpoint;
use crate::error::{Result, TransportError};
use crate::stream::read_reply;
use crate::window::ReplyWindow;
use crate::{Transport, BLOCK_SIZE, MAX_FRAME_SIZE};

/// Startup delay applied to USB-serial endpoints unless overridden.
/// Opening such a port asserts DTR, which resets most boards; the board
/// needs time to boot before it can answer.
pub const DEFAULT_USB_INIT_DELAY: Duration = Duration::from_millis(3000);

/// Read timeout of the underlying port per poll; the per-operation
/// deadline is enforced above it.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial master transport: one byte stream, polled reads.
pub struct SerialTransport {
    device: String,
    baud_rate: u32,
    timeout: Duration,
    init_delay: Duration,
    port: Option<Box<dyn SerialPort>>,
    window: ReplyWindow,
}

impl SerialTransport {
    /// Configure a serial transport. `init_delay` of `None` selects the
    /// USB-serial default for matching device paths and zero otherwise.
    pub fn new(
        device: impl Into<String>,
        baud_rate: u32,
        timeout: Duration,
        init_delay: Option<Duration>,
    ) -> Self {
        let device = device.into();
        let init_delay = init_delay.unwrap_or_else(|| {
            if endpoint::is_usb_serial(&device) {
                DEFAULT_USB_INIT_DELAY
            } else {
                Duration::ZERO
            }
        });
        Self {
            device,
            baud_rate,
            timeout,
            init_delay,
            port: None,
            window: ReplyWindow::default(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotInitialized)
    }
}

impl Transport for SerialTransport {
    fn init(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        info!(device = %self.device, baud = self.baud_rate, "opening serial device");
        let port = serialport::new(&self.device, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .map_err(|err| TransportError::Open {
                endpoint: self.device.clone(),
                source: err.into(),
            })?;
        // drop anything buffered from before this transaction
        port.clear(ClearBuffer::Input)
            .map_err(|err| TransportError::Io(err.into()))?;
        self.port = Some(port);
        if !self.init_delay.is_zero() {
            debug!(delay_ms = self.init_delay.as_millis() as u64, "init delay");
            std::thread::sleep(self.init_delay);
        }
        Ok(())
    }

    fn send_bytes(&mut self, frame: &[u8], retries: u32) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let port = self.port()?;
        port.clear(ClearBuffer::All)
            .map_err(|err| TransportError::Io(err.into()))?;
        debug!(frame = %arducom_frame::hex_dump(frame), "serial send");
        let mut attempts_left = retries;
        loop {
            match port.write_all(frame).and_then(|()| port.flush()) {
                Ok(()) => return Ok(()),
                Err(err) if attempts_left > 0 => {
                    debug!(%err, attempts_left, "serial write failed, retrying");
                    attempts_left -= 1;
                }
                Err(err) => return Err(TransportError::Io(err)),
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
        let port = self.port()?;
        let mut data = Vec::with_capacity(expected);
        match read_reply(port, expected, timeout, &mut data) {
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
        // the port handle stays open across transactions
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
        endpoint::lock_key(&self.device)
    }

    fn dump_receive_buffer(&self) {
        self.window.dump();
    }
}
