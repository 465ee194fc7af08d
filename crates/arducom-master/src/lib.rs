//! Arducom master: the execute engine and its retry policy.
//!
//! One [`Master::execute`] call is one transaction:
//! lock → send one frame → delay → poll for the reply → unlock.
//! Only "no data yet" conditions (a slave `NO_DATA` reply or a read
//! timeout) are retried; every other error surfaces immediately and
//! re-execution is the caller's decision.

pub mod error;
pub mod lock;
pub mod master;
pub mod params;

pub use error::{MasterError, Result};
pub use lock::{LockError, SemaphoreLock};
pub use master::Master;
pub use params::{TransactionParams, DEFAULT_I2C_DELAY, DEFAULT_TIMEOUT};
