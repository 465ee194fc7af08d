//! Arducom slave: dispatcher, command registry and slave transports.
//!
//! The slave runs a single-threaded cooperative loop: call
//! [`Dispatcher::poll`] repeatedly; it ingests bytes from its transport,
//! recognises complete frames by their length field, dispatches to the
//! registered handler and emits the reply. A partial frame that goes
//! quiet for longer than the receive timeout is dropped.

pub mod data;
pub mod dispatcher;
pub mod error;
pub mod ftp;
pub mod registry;
pub mod transport;
pub mod version;

pub use data::{register_eeprom_block, register_eeprom_value, register_ram_block, register_ram_value, Eeprom, SharedRam};
pub use dispatcher::{Dispatcher, PollOutcome, DEFAULT_RECEIVE_TIMEOUT};
pub use error::{Result, SlaveError};
pub use ftp::{register_ftp_commands, FtpServer};
pub use registry::{Command, CommandError, CommandRegistry, CommandResult, Handler, RegistryError};
pub use transport::{
    BufferState, ProxyTransport, SlaveTransport, StreamTransport, TcpServerTransport,
    RECEIVE_CAPACITY,
};
pub use version::{register_version_command, SlaveControl};
