use std::io;
use std::time::Duration;

use tracing::debug;

/// Errors from the interprocess transaction lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The semaphore could not be created or attached.
    #[error("failed to attach semaphore for key {key}: {source}")]
    Attach { key: i32, source: io::Error },

    /// Another process held the bus for longer than the timeout.
    #[error("timeout acquiring bus lock (key {key})")]
    Timeout { key: i32 },

    /// The semaphore operation failed.
    #[error("semaphore operation failed: {0}")]
    Op(#[source] io::Error),

    /// The lock was acquired twice within one transaction.
    #[error("bus lock already held by this transaction")]
    AlreadyHeld,
}

/// A named SysV counting semaphore serialising bus transactions across
/// processes.
///
/// The key is derived from the transport endpoint so unrelated processes
/// agree on the name without coordination. Acquisition waits for the
/// counter to reach zero, then increments it; both operations carry
/// `SEM_UNDO` so the kernel reverts the increment if the holder dies.
#[derive(Debug)]
pub struct SemaphoreLock {
    id: libc::c_int,
    key: i32,
    held: bool,
}

impl SemaphoreLock {
    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// A key of 0 disables locking and returns `None`.
    pub fn acquire(key: i32, timeout: Duration) -> Result<Option<Self>, LockError> {
        if key == 0 {
            return Ok(None);
        }
        // SAFETY: semget has no pointer arguments.
        let id = unsafe { libc::semget(key, 1, libc::IPC_CREAT | 0o666) };
        if id < 0 {
            return Err(LockError::Attach {
                key,
                source: io::Error::last_os_error(),
            });
        }

        // wait for zero, then increment; atomic as one semop set
        let mut ops = [
            libc::sembuf {
                sem_num: 0,
                sem_op: 0,
                sem_flg: 0,
            },
            libc::sembuf {
                sem_num: 0,
                sem_op: 1,
                sem_flg: libc::SEM_UNDO as libc::c_short,
            },
        ];
        let timeout_ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // SAFETY: ops points to two valid sembuf entries; the timespec
        // outlives the call. libc does not expose a `semtimedop` binding,
        // so invoke the syscall directly.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_semtimedop,
                id,
                ops.as_mut_ptr(),
                ops.len(),
                &timeout_ts,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EAGAIN) => LockError::Timeout { key },
                _ => LockError::Op(err),
            });
        }
        debug!(key, "bus lock acquired");
        Ok(Some(Self {
            id,
            key,
            held: true,
        }))
    }

    /// Release the lock. Safe to call more than once; only the first
    /// call decrements.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let mut op = libc::sembuf {
            sem_num: 0,
            sem_op: -1,
            sem_flg: (libc::SEM_UNDO | libc::IPC_NOWAIT) as libc::c_short,
        };
        // SAFETY: op points to one valid sembuf entry.
        let rc = unsafe { libc::semop(self.id, &mut op, 1) };
        if rc < 0 {
            // nothing to do beyond reporting; SEM_UNDO covers process exit
            debug!(key = self.key, error = %io::Error::last_os_error(), "semaphore release failed");
        } else {
            debug!(key = self.key, "bus lock released");
        }
    }

    /// The key this lock was created for.
    pub fn key(&self) -> i32 {
        self.key
    }
}

impl Drop for SemaphoreLock {
    fn drop(&mut self) {
        self.release();
    }
}
