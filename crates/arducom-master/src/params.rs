use std::time::Duration;

/// Default per-operation timeout on the host. Generous so "unreachable"
/// can be told apart from "slow".
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default delay between sending a command and the first read attempt on
/// an I2C bus; the peripheral needs time to process before it can answer.
pub const DEFAULT_I2C_DELAY: Duration = Duration::from_millis(10);

/// Per-transaction options of the execute engine.
#[derive(Debug, Clone)]
pub struct TransactionParams {
    /// Protect request and reply with the one-byte checksum.
    pub use_checksum: bool,
    /// Delay between send and the first read attempt.
    pub delay: Duration,
    /// How often to poll again after a `NO_DATA` reply or a timeout.
    pub retries: u32,
    /// Per-operation timeout (reads, lock acquisition).
    pub timeout: Duration,
    /// Override for the interprocess lock key; `None` uses the
    /// transport's endpoint-derived key. 0 disables locking.
    pub lock_key: Option<i32>,
    /// Keep per-transaction connections open after a successful
    /// transaction until [`crate::Master::close`] is called.
    pub hold_connection: bool,
}

impl Default for TransactionParams {
    fn default() -> Self {
        Self {
            use_checksum: true,
            delay: Duration::ZERO,
            retries: 0,
            timeout: DEFAULT_TIMEOUT,
            lock_key: None,
            hold_connection: false,
        }
    }
}

impl TransactionParams {
    /// Defaults suitable for an I2C transport.
    pub fn for_i2c() -> Self {
        Self {
            delay: DEFAULT_I2C_DELAY,
            ..Self::default()
        }
    }
}
