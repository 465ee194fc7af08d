//! File-transfer overlay: eight commands registered as one contiguous
//! block, serving a host directory the way a card-equipped slave serves
//! its filesystem. Uses only the public registry API and the standard
//! frame codec.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use arducom_frame::BUFFER_SIZE;

use crate::error::Result as SlaveResult;
use crate::registry::{CommandError, CommandRegistry, Handler};

/// Default first command code of the overlay block.
pub const DEFAULT_COMMAND_BASE: u8 = 60;

/// Command code offsets within the overlay block.
pub mod command {
    pub const INIT: u8 = 0;
    pub const LIST_FILES: u8 = 1;
    pub const REWIND: u8 = 2;
    pub const CHDIR: u8 = 3;
    pub const OPEN_READ: u8 = 4;
    pub const READ_FILE: u8 = 5;
    pub const CLOSE_FILE: u8 = 6;
    pub const DELETE: u8 = 7;
}

/// Overlay status codes carried in the info byte of a FUNCTION_ERROR
/// reply.
pub mod status {
    pub const OK: u8 = 0;
    pub const CARD_ERROR: u8 = 1;
    pub const CARD_TYPE_UNKNOWN: u8 = 2;
    pub const FILESYSTEM_ERROR: u8 = 3;
    pub const NOT_INITIALIZED: u8 = 4;
    pub const MISSING_FILENAME: u8 = 5;
    pub const NOT_A_DIRECTORY: u8 = 6;
    pub const FILE_OPEN_ERROR: u8 = 7;
    pub const READ_ERROR: u8 = 8;
    pub const FILE_NOT_OPEN: u8 = 9;
    pub const POSITION_INVALID: u8 = 10;
    pub const CANNOT_DELETE: u8 = 11;
}

/// Longest file name transferred on the wire, NUL included.
const NAME_FIELD: usize = 13;

fn ftp_error(code: u8) -> CommandError {
    CommandError::function_error(code)
}

/// Serves one directory tree to FTP overlay commands.
#[derive(Clone)]
pub struct FtpServer {
    inner: Arc<Mutex<FtpState>>,
}

struct FtpState {
    root: PathBuf,
    /// Current directory relative to the root.
    cwd: PathBuf,
    /// Directory snapshot the LIST command walks through.
    listing: Option<(Vec<PathBuf>, usize)>,
    open_file: Option<fs::File>,
}

impl FtpServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FtpState {
                root: root.into(),
                cwd: PathBuf::new(),
                listing: None,
                open_file: None,
            })),
        }
    }
}

impl FtpState {
    fn current_dir(&self) -> PathBuf {
        self.root.join(&self.cwd)
    }

    /// A single file name, rejected if it tries to traverse directories.
    fn resolve_name(&self, payload: &[u8]) -> Result<PathBuf, CommandError> {
        if payload.len() >= NAME_FIELD {
            return Err(CommandError::buffer_overrun(NAME_FIELD as u8));
        }
        let name = std::str::from_utf8(payload)
            .map_err(|_| ftp_error(status::MISSING_FILENAME))?
            .trim_end_matches('\0');
        if name.is_empty() {
            return Err(ftp_error(status::MISSING_FILENAME));
        }
        if name.contains(['/', '\\']) || name == ".." {
            return Err(ftp_error(status::FILE_OPEN_ERROR));
        }
        Ok(self.current_dir().join(name))
    }

    fn snapshot_listing(&mut self) -> Result<(), CommandError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(self.current_dir())
            .map_err(|_| ftp_error(status::FILESYSTEM_ERROR))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        self.listing = Some((entries, 0));
        Ok(())
    }
}

/// Register the overlay's eight commands starting at `base`.
pub fn register_ftp_commands(
    registry: &mut CommandRegistry,
    base: u8,
    server: &FtpServer,
) -> SlaveResult<()> {
    registry.add(base + command::INIT, None, init_handler(server.clone()))?;
    registry.add(base + command::LIST_FILES, None, list_handler(server.clone()))?;
    registry.add(base + command::REWIND, None, rewind_handler(server.clone()))?;
    registry.add(base + command::CHDIR, None, chdir_handler(server.clone()))?;
    registry.add(base + command::OPEN_READ, None, open_read_handler(server.clone()))?;
    registry.add(
        base + command::READ_FILE,
        Some(4),
        read_file_handler(server.clone()),
    )?;
    registry.add(
        base + command::CLOSE_FILE,
        None,
        close_file_handler(server.clone()),
    )?;
    registry.add(base + command::DELETE, None, delete_handler(server.clone()))?;
    Ok(())
}

fn init_handler(server: FtpServer) -> Handler {
    Box::new(move |_payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        if !state.root.is_dir() {
            return Err(ftp_error(status::CARD_ERROR));
        }
        state.cwd = PathBuf::new();
        state.listing = None;
        state.open_file = None;
        debug!(root = %state.root.display(), "ftp initialized");

        // medium identifier, filesystem type, volume size in MB
        let mut reply = Vec::with_capacity(9);
        reply.extend_from_slice(b"HOST");
        reply.push(0);
        reply.extend_from_slice(&0u32.to_le_bytes());
        Ok(reply)
    })
}

fn list_handler(server: FtpServer) -> Handler {
    Box::new(move |_payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        if state.listing.is_none() {
            state.snapshot_listing()?;
        }
        let (entries, index) = state.listing.as_mut().expect("listing was just created");
        let Some(path) = entries.get(*index).cloned() else {
            // enumeration finished
            return Ok(Vec::new());
        };
        *index += 1;

        let metadata = fs::metadata(&path).map_err(|_| ftp_error(status::READ_ERROR))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut reply = Vec::with_capacity(21);
        let mut name_bytes = name.into_bytes();
        name_bytes.truncate(NAME_FIELD - 1);
        name_bytes.resize(NAME_FIELD - 1, 0);
        reply.extend_from_slice(&name_bytes);
        reply.push(0);
        reply.push(u8::from(metadata.is_dir()));
        reply.extend_from_slice(&(metadata.len().min(u64::from(u32::MAX)) as u32).to_le_bytes());
        let (date, time) = fat_timestamp(metadata.modified().ok());
        reply.extend_from_slice(&date.to_le_bytes());
        reply.extend_from_slice(&time.to_le_bytes());
        Ok(reply)
    })
}

fn rewind_handler(server: FtpServer) -> Handler {
    Box::new(move |_payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        state.listing = None;
        Ok(Vec::new())
    })
}

fn chdir_handler(server: FtpServer) -> Handler {
    Box::new(move |payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        if payload.len() >= NAME_FIELD {
            return Err(CommandError::buffer_overrun(NAME_FIELD as u8));
        }
        let name = std::str::from_utf8(payload)
            .map_err(|_| ftp_error(status::MISSING_FILENAME))?
            .trim_end_matches('\0');
        if name.is_empty() {
            return Err(ftp_error(status::MISSING_FILENAME));
        }

        match name {
            "/" => state.cwd = PathBuf::new(),
            ".." => {
                state.cwd.pop();
            }
            _ => {
                if name.contains(['/', '\\']) {
                    return Err(ftp_error(status::NOT_A_DIRECTORY));
                }
                let candidate = state.cwd.join(name);
                if !state.root.join(&candidate).is_dir() {
                    return Err(ftp_error(status::NOT_A_DIRECTORY));
                }
                state.cwd = candidate;
            }
        }
        state.listing = None;

        let current = state
            .cwd
            .components()
            .next_back()
            .map(|component| match component {
                Component::Normal(name) => name.to_string_lossy().into_owned(),
                _ => String::from("/"),
            })
            .unwrap_or_else(|| String::from("/"));
        let mut reply = current.into_bytes();
        reply.truncate(NAME_FIELD - 1);
        reply.push(0);
        Ok(reply)
    })
}

fn open_read_handler(server: FtpServer) -> Handler {
    Box::new(move |payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        let path = state.resolve_name(payload)?;
        let file = fs::File::open(&path).map_err(|_| ftp_error(status::FILE_OPEN_ERROR))?;
        let size = file
            .metadata()
            .map_err(|_| ftp_error(status::READ_ERROR))?
            .len();
        debug!(path = %path.display(), size, "ftp open");
        state.open_file = Some(file);
        Ok((size.min(u64::from(u32::MAX)) as u32).to_le_bytes().to_vec())
    })
}

fn read_file_handler(server: FtpServer) -> Handler {
    Box::new(move |payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        let Some(file) = state.open_file.as_mut() else {
            return Err(ftp_error(status::FILE_NOT_OPEN));
        };
        let position = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        file.seek(SeekFrom::Start(u64::from(position)))
            .map_err(|_| ftp_error(status::POSITION_INVALID))?;
        let mut chunk = vec![0u8; BUFFER_SIZE];
        let read = file
            .read(&mut chunk)
            .map_err(|_| ftp_error(status::READ_ERROR))?;
        chunk.truncate(read);
        Ok(chunk)
    })
}

fn close_file_handler(server: FtpServer) -> Handler {
    Box::new(move |_payload| {
        let mut state = server.inner.lock().expect("ftp lock poisoned");
        if state.open_file.take().is_none() {
            return Err(ftp_error(status::FILE_NOT_OPEN));
        }
        Ok(Vec::new())
    })
}

fn delete_handler(server: FtpServer) -> Handler {
    Box::new(move |payload| {
        let state = server.inner.lock().expect("ftp lock poisoned");
        let path = state.resolve_name(payload)?;
        let metadata = fs::metadata(&path).map_err(|_| ftp_error(status::FILE_NOT_OPEN))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|_| ftp_error(status::CANNOT_DELETE))?;
        debug!(path = %path.display(), "ftp delete");
        Ok(Vec::new())
    })
}

/// Pack a modification time into FAT date and time words.
fn fat_timestamp(modified: Option<SystemTime>) -> (u16, u16) {
    let Some(since_epoch) = modified.and_then(|m| m.duration_since(UNIX_EPOCH).ok()) else {
        return (0, 0);
    };
    let secs = since_epoch.as_secs();
    let days = (secs / 86_400) as i64;
    let (year, month, day) = civil_from_days(days);
    if year < 1980 {
        return (0, 0);
    }
    let seconds_of_day = secs % 86_400;
    let hour = (seconds_of_day / 3600) as u16;
    let minute = ((seconds_of_day % 3600) / 60) as u16;
    let second = (seconds_of_day % 60) as u16;
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time = (hour << 11) | (minute << 5) | (second / 2);
    (date, time)
}

/// Days-since-epoch to civil date (Gregorian).
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::registry::CommandResult;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "arducom-ftp-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run(registry: &mut CommandRegistry, code: u8, payload: &[u8]) -> CommandResult {
        (registry.find_mut(code).expect("command registered").handler)(payload)
    }

    fn setup(root: &Path) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        let server = FtpServer::new(root);
        register_ftp_commands(&mut registry, DEFAULT_COMMAND_BASE, &server).unwrap();
        registry
    }

    #[test]
    fn registers_the_contiguous_block() {
        let root = temp_root("codes");
        let registry = setup(&root);
        assert_eq!(registry.codes(), vec![60, 61, 62, 63, 64, 65, 66, 67]);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn init_reports_the_medium() {
        let root = temp_root("init");
        let mut registry = setup(&root);
        let reply = run(&mut registry, 60, &[]).unwrap();
        assert_eq!(reply.len(), 9);
        assert_eq!(&reply[0..4], b"HOST");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn list_enumerates_until_exhausted() {
        let root = temp_root("list");
        fs::write(root.join("a.txt"), b"aaa").unwrap();
        fs::write(root.join("b.txt"), b"bb").unwrap();
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        let first = run(&mut registry, 61, &[]).unwrap();
        assert_eq!(first.len(), 21);
        assert_eq!(&first[0..5], b"a.txt");
        assert_eq!(first[13], 0, "a.txt is not a directory");
        assert_eq!(&first[14..18], &3u32.to_le_bytes());

        let second = run(&mut registry, 61, &[]).unwrap();
        assert_eq!(&second[0..5], b"b.txt");

        // enumeration finished: empty reply
        assert_eq!(run(&mut registry, 61, &[]).unwrap(), Vec::<u8>::new());

        // rewind starts over
        run(&mut registry, 62, &[]).unwrap();
        let again = run(&mut registry, 61, &[]).unwrap();
        assert_eq!(&again[0..5], b"a.txt");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn open_read_and_read_file() {
        let root = temp_root("read");
        fs::write(root.join("data.bin"), (0u8..64).collect::<Vec<_>>()).unwrap();
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        let reply = run(&mut registry, 64, b"data.bin").unwrap();
        assert_eq!(reply, 64u32.to_le_bytes().to_vec());

        // a 32-byte chunk from position 0
        let chunk = run(&mut registry, 65, &0u32.to_le_bytes()).unwrap();
        assert_eq!(chunk.len(), BUFFER_SIZE);
        assert_eq!(chunk[0], 0);

        // the tail chunk from position 32
        let chunk = run(&mut registry, 65, &32u32.to_le_bytes()).unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(chunk[0], 32);

        // past the end: empty
        let chunk = run(&mut registry, 65, &64u32.to_le_bytes()).unwrap();
        assert!(chunk.is_empty());

        run(&mut registry, 66, &[]).unwrap();
        // closing twice reports "file not open"
        assert_eq!(
            run(&mut registry, 66, &[]),
            Err(ftp_error(status::FILE_NOT_OPEN))
        );
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn read_without_open_fails() {
        let root = temp_root("noopen");
        let mut registry = setup(&root);
        assert_eq!(
            run(&mut registry, 65, &0u32.to_le_bytes()),
            Err(ftp_error(status::FILE_NOT_OPEN))
        );
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn chdir_descends_and_returns() {
        let root = temp_root("chdir");
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("inner.txt"), b"x").unwrap();
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        let reply = run(&mut registry, 63, b"sub").unwrap();
        assert_eq!(&reply, b"sub\0");

        let entry = run(&mut registry, 61, &[]).unwrap();
        assert_eq!(&entry[0..9], b"inner.txt");

        let reply = run(&mut registry, 63, b"..").unwrap();
        assert_eq!(&reply, b"/\0");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn chdir_rejects_files_and_missing_names() {
        let root = temp_root("chdir-bad");
        fs::write(root.join("plain.txt"), b"x").unwrap();
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        assert_eq!(
            run(&mut registry, 63, b"plain.txt"),
            Err(ftp_error(status::NOT_A_DIRECTORY))
        );
        assert_eq!(
            run(&mut registry, 63, b""),
            Err(ftp_error(status::MISSING_FILENAME))
        );
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn delete_removes_files_and_empty_dirs() {
        let root = temp_root("delete");
        fs::write(root.join("gone.txt"), b"x").unwrap();
        fs::create_dir(root.join("emptydir")).unwrap();
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        run(&mut registry, 67, b"gone.txt").unwrap();
        assert!(!root.join("gone.txt").exists());
        run(&mut registry, 67, b"emptydir").unwrap();
        assert!(!root.join("emptydir").exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn traversal_attempts_are_rejected() {
        let root = temp_root("traversal");
        let mut registry = setup(&root);
        run(&mut registry, 60, &[]).unwrap();

        assert!(run(&mut registry, 64, b"../secret").is_err());
        assert!(run(&mut registry, 67, b"..").is_err());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn fat_timestamp_packs_fields() {
        // 2020-01-02 03:04:06 UTC
        let time = UNIX_EPOCH + std::time::Duration::from_secs(1_577_934_246);
        let (date, time) = fat_timestamp(Some(time));
        assert_eq!(date >> 9, 40); // 2020 - 1980
        assert_eq!((date >> 5) & 0xF, 1);
        assert_eq!(date & 0x1F, 2);
        assert_eq!(time >> 11, 3);
        assert_eq!((time >> 5) & 0x3F, 4);
        assert_eq!(time & 0x1F, 3); // two-second granularity
    }
}
