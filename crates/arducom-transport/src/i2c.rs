use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;

use tracing::{debug, info};

use crate::endpoint;
use crate::error::{Result, TransportError};
use crate::window::ReplyWindow;
use crate::{Transport, BLOCK_SIZE, MAX_FRAME_SIZE};

/// ioctl request selecting the slave address on an i2c-dev file.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// I2C master transport over the Linux i2c-dev interface.
///
/// One `write` per request and one block `read` per reply; the slave must
/// buffer the entire reply and answer it as a contiguous block, because
/// the bus cannot be polled with short reads the way a stream can.
#[derive(Debug)]
pub struct I2cTransport {
    device: String,
    slave_address: u16,
    fd: Option<RawFd>,
    window: ReplyWindow,
}

impl I2cTransport {
    pub fn new(device: impl Into<String>, slave_address: u16) -> Self {
        Self {
            device: device.into(),
            slave_address,
            fd: None,
            window: ReplyWindow::default(),
        }
    }

    fn fd(&self) -> Result<RawFd> {
        self.fd.ok_or(TransportError::NotInitialized)
    }
}

impl Transport for I2cTransport {
    fn init(&mut self) -> Result<()> {
        if self.fd.is_some() {
            return Ok(());
        }
        info!(device = %self.device, address = self.slave_address, "opening I2C bus");
        let path = CString::new(self.device.as_str()).map_err(|_| {
            TransportError::InvalidEndpoint(format!("NUL byte in device path {:?}", self.device))
        })?;
        // SAFETY: path is a valid NUL-terminated string; the fd is owned
        // by this transport and closed in Drop.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(TransportError::Open {
                endpoint: self.device.clone(),
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just opened; I2C_SLAVE takes the address operand.
        if unsafe { libc::ioctl(fd, I2C_SLAVE, libc::c_ulong::from(self.slave_address)) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is open and not shared.
            unsafe { libc::close(fd) };
            return Err(TransportError::Open {
                endpoint: self.device.clone(),
                source: err,
            });
        }
        self.fd = Some(fd);
        Ok(())
    }

    fn send_bytes(&mut self, frame: &[u8], retries: u32) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let fd = self.fd()?;
        debug!(frame = %arducom_frame::hex_dump(frame), "i2c send");
        let mut attempts_left = retries;
        loop {
            // SAFETY: frame points to valid memory of the given length.
            let written = unsafe {
                libc::write(fd, frame.as_ptr().cast::<libc::c_void>(), frame.len())
            };
            if written == frame.len() as isize {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if attempts_left == 0 {
                return Err(TransportError::Io(err));
            }
            debug!(%err, attempts_left, "i2c write failed, retrying");
            attempts_left -= 1;
        }
    }

    fn request(&mut self, expected: usize) -> Result<()> {
        if expected > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: expected,
                max: MAX_FRAME_SIZE,
            });
        }
        let fd = self.fd()?;
        let mut data = vec![0u8; expected];
        // SAFETY: data is a valid writable buffer of the given length.
        let read = unsafe { libc::read(fd, data.as_mut_ptr().cast::<libc::c_void>(), expected) };
        if read != expected as isize {
            self.window.clear();
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        self.window.fill(data);
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.window.read_byte()
    }

    fn done(&mut self) -> Result<()> {
        // the bus handle stays open across transactions
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

impl Drop for I2cTransport {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            // SAFETY: fd is open and owned by this transport.
            unsafe { libc::close(fd) };
        }
    }
}
