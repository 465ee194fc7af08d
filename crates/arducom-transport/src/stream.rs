use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use arducom_frame::{codec, ERROR_CODE};

use crate::error::{Result, TransportError};

const POLL_SLEEP: Duration = Duration::from_millis(1);

/// Read one reply frame from a byte stream into `out`, lazily fetching
/// bytes until either `expected` bytes or the frame announced by the
/// header have been collected, whichever is smaller.
///
/// Stream transports cannot know the reply length up front, so the header
/// is inspected as it arrives: an error lead byte means exactly three
/// bytes follow in total; otherwise the code byte bounds the frame.
pub(crate) fn read_reply<R: Read>(
    reader: &mut R,
    expected: usize,
    timeout: Duration,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.clear();
    if expected == 0 {
        return Ok(());
    }
    let deadline = Instant::now() + timeout;

    out.push(read_byte_deadline(reader, deadline)?);
    if expected == 1 {
        return Ok(());
    }

    if out[0] == ERROR_CODE {
        out.push(read_byte_deadline(reader, deadline)?);
        if expected > 2 {
            out.push(read_byte_deadline(reader, deadline)?);
        }
        return Ok(());
    }

    let code = read_byte_deadline(reader, deadline)?;
    out.push(code);
    let frame_len = codec::frame_len(code);
    while out.len() < expected && out.len() < frame_len {
        out.push(read_byte_deadline(reader, deadline)?);
    }
    Ok(())
}

/// Read exactly one byte, polling until the deadline.
///
/// `WouldBlock` and short reads are retried after a 1 ms sleep;
/// `TimedOut` from the underlying stream counts against the deadline as
/// well, so a stream with its own read timeout keeps polling until the
/// per-operation deadline fires.
fn read_byte_deadline<R: Read>(reader: &mut R, deadline: Instant) -> Result<u8> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(1) => return Ok(byte[0]),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(err) => return Err(TransportError::Io(err)),
        }
        if Instant::now() >= deadline {
            return Err(TransportError::Timeout);
        }
        std::thread::sleep(POLL_SLEEP);
    }
}
