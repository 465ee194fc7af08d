//! Standard data-access commands: typed and block reads/writes against a
//! shared RAM region or a file-backed persistent store.
//!
//! All multi-byte values are little-endian on the wire, serialised byte
//! by byte. Addresses and block offsets are two LE bytes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arducom_frame::BUFFER_SIZE;

use crate::error::Result as SlaveResult;
use crate::registry::{CommandError, CommandRegistry, Handler};

fn clamp_info(value: usize) -> u8 {
    value.min(usize::from(u8::MAX)) as u8
}

fn le_offset(payload: &[u8]) -> usize {
    usize::from(u16::from_le_bytes([payload[0], payload[1]]))
}

/// A byte region shared between command handlers and the host program.
#[derive(Clone)]
pub struct SharedRam {
    cells: Arc<Mutex<Vec<u8>>>,
}

impl SharedRam {
    pub fn new(size: usize) -> Self {
        Self {
            cells: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.lock().expect("ram lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current region content.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.lock().expect("ram lock poisoned").clone()
    }

    fn read(&self, offset: usize, len: usize) -> std::result::Result<Vec<u8>, CommandError> {
        let cells = self.cells.lock().expect("ram lock poisoned");
        if offset + len > cells.len() {
            return Err(CommandError::limit_exceeded(clamp_info(cells.len())));
        }
        Ok(cells[offset..offset + len].to_vec())
    }

    fn write(&self, offset: usize, data: &[u8]) -> std::result::Result<(), CommandError> {
        let mut cells = self.cells.lock().expect("ram lock poisoned");
        if offset + data.len() > cells.len() {
            return Err(CommandError::limit_exceeded(clamp_info(cells.len())));
        }
        cells[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// A persistent byte store backed by a file, standing in for the EEPROM
/// of a microcontroller slave.
#[derive(Clone)]
pub struct Eeprom {
    inner: Arc<Mutex<EepromInner>>,
}

struct EepromInner {
    path: PathBuf,
    cells: Vec<u8>,
}

impl Eeprom {
    /// Open (or create) the store at `path` with a fixed length.
    pub fn open(path: impl Into<PathBuf>, len: usize) -> SlaveResult<Self> {
        let path = path.into();
        let mut cells = match std::fs::read(&path) {
            Ok(existing) => existing,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        cells.resize(len, 0);
        Ok(Self {
            inner: Arc::new(Mutex::new(EepromInner { path, cells })),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("eeprom lock poisoned").cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, address: usize, len: usize) -> std::result::Result<Vec<u8>, CommandError> {
        let inner = self.inner.lock().expect("eeprom lock poisoned");
        if address + len > inner.cells.len() {
            return Err(CommandError::limit_exceeded(clamp_info(inner.cells.len())));
        }
        Ok(inner.cells[address..address + len].to_vec())
    }

    fn write(&self, address: usize, data: &[u8]) -> std::result::Result<(), CommandError> {
        let mut inner = self.inner.lock().expect("eeprom lock poisoned");
        if address + data.len() > inner.cells.len() {
            return Err(CommandError::limit_exceeded(clamp_info(inner.cells.len())));
        }
        let range = address..address + data.len();
        inner.cells[range].copy_from_slice(data);
        std::fs::write(&inner.path, &inner.cells)
            .map_err(|_| CommandError::function_error(0))?;
        Ok(())
    }
}

fn ram_value_write(region: SharedRam, offset: usize, width: usize) -> Handler {
    Box::new(move |payload| {
        debug_assert_eq!(payload.len(), width);
        region.write(offset, payload)?;
        Ok(Vec::new())
    })
}

fn ram_value_read(region: SharedRam, offset: usize, width: usize) -> Handler {
    Box::new(move |_payload| Ok(region.read(offset, width)?))
}

/// Register a write/read command pair for one value slot in a RAM
/// region. `width` is the value size in bytes (1, 2, 4 or 8).
pub fn register_ram_value(
    registry: &mut CommandRegistry,
    write_code: u8,
    read_code: u8,
    region: &SharedRam,
    offset: usize,
    width: usize,
) -> SlaveResult<()> {
    registry.add(
        write_code,
        Some(width),
        ram_value_write(region.clone(), offset, width),
    )?;
    registry.add(read_code, Some(0), ram_value_read(region.clone(), offset, width))?;
    Ok(())
}

/// Register block write/read commands for a RAM region.
///
/// Write expects a two-byte offset followed by the data (at least one
/// byte). Read expects a two-byte offset plus a length byte.
pub fn register_ram_block(
    registry: &mut CommandRegistry,
    write_code: u8,
    read_code: u8,
    region: &SharedRam,
) -> SlaveResult<()> {
    let write_region = region.clone();
    registry.add(
        write_code,
        None,
        Box::new(move |payload| {
            if payload.len() < 3 {
                return Err(CommandError::parameter_mismatch(3));
            }
            write_region.write(le_offset(payload), &payload[2..])?;
            Ok(Vec::new())
        }),
    )?;
    let read_region = region.clone();
    registry.add(
        read_code,
        Some(3),
        Box::new(move |payload| {
            let length = usize::from(payload[2]);
            if length > BUFFER_SIZE {
                return Err(CommandError::buffer_overrun(BUFFER_SIZE as u8));
            }
            Ok(read_region.read(le_offset(payload), length)?)
        }),
    )?;
    Ok(())
}

/// Register a write/read command pair for one value at a fixed width in
/// the persistent store. The payload carries a two-byte address,
/// followed by the value bytes for writes.
pub fn register_eeprom_value(
    registry: &mut CommandRegistry,
    write_code: u8,
    read_code: u8,
    eeprom: &Eeprom,
    width: usize,
) -> SlaveResult<()> {
    let write_store = eeprom.clone();
    registry.add(
        write_code,
        Some(2 + width),
        Box::new(move |payload| {
            write_store.write(le_offset(payload), &payload[2..])?;
            Ok(Vec::new())
        }),
    )?;
    let read_store = eeprom.clone();
    registry.add(
        read_code,
        Some(2),
        Box::new(move |payload| Ok(read_store.read(le_offset(payload), width)?)),
    )?;
    Ok(())
}

/// Register block write/read commands for the persistent store; payload
/// shapes match [`register_ram_block`] with addresses instead of
/// offsets.
pub fn register_eeprom_block(
    registry: &mut CommandRegistry,
    write_code: u8,
    read_code: u8,
    eeprom: &Eeprom,
) -> SlaveResult<()> {
    let write_store = eeprom.clone();
    registry.add(
        write_code,
        None,
        Box::new(move |payload| {
            if payload.len() < 3 {
                return Err(CommandError::parameter_mismatch(3));
            }
            write_store.write(le_offset(payload), &payload[2..])?;
            Ok(Vec::new())
        }),
    )?;
    let read_store = eeprom.clone();
    registry.add(
        read_code,
        Some(3),
        Box::new(move |payload| {
            let length = usize::from(payload[2]);
            if length > BUFFER_SIZE {
                return Err(CommandError::buffer_overrun(BUFFER_SIZE as u8));
            }
            Ok(read_store.read(le_offset(payload), length)?)
        }),
    )?;
    Ok(())
}
