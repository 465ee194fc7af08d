use tracing::debug;

use crate::error::{Result, TransportError};

/// Bytes buffered by the last `request` call, consumed one at a time.
#[derive(Debug, Default)]
pub(crate) struct ReplyWindow {
    data: Vec<u8>,
    pos: Option<usize>,
}

impl ReplyWindow {
    /// Replace the window content and rewind the read position.
    pub(crate) fn fill(&mut self, data: Vec<u8>) {
        self.data = data;
        self.pos = Some(0);
    }

    /// Invalidate the window; `read_byte` fails until the next `fill`.
    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.pos = None;
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let pos = self.pos.ok_or(TransportError::NotRequested)?;
        let byte = *self.data.get(pos).ok_or(TransportError::WindowExhausted)?;
        self.pos = Some(pos + 1);
        Ok(byte)
    }

    pub(crate) fn dump(&self) {
        debug!(buffer = %arducom_frame::hex_dump(&self.data), "receive buffer");
    }
}
