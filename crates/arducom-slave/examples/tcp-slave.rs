//! Minimal TCP slave — serves the version command, a small data region
//! and the file-transfer overlay.
//!
//! Run with:
//!   cargo run --example tcp-slave
//!
//! In another terminal:
//!   cargo run --bin arducom -- -d 127.0.0.1 -t tcpip -c 0

use std::time::Duration;

use arducom_slave::{
    register_eeprom_value, register_ftp_commands, register_ram_block, register_version_command,
    Dispatcher, Eeprom, FtpServer, SharedRam, SlaveControl, TcpServerTransport,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = TcpServerTransport::bind("0.0.0.0:4152")?;
    eprintln!("Listening on {}", transport.local_addr()?);

    let mut dispatcher = Dispatcher::new(transport);
    register_version_command(
        dispatcher.registry_mut(),
        SlaveControl::new("tcp-slave example"),
    )?;

    let eeprom = Eeprom::open(std::env::temp_dir().join("arducom-example-eeprom.bin"), 1024)?;
    register_eeprom_value(dispatcher.registry_mut(), 3, 4, &eeprom, 1)?;
    register_eeprom_value(dispatcher.registry_mut(), 5, 6, &eeprom, 4)?;

    let ram = SharedRam::new(256);
    register_ram_block(dispatcher.registry_mut(), 20, 21, &ram)?;

    let files = FtpServer::new(std::env::current_dir()?);
    register_ftp_commands(
        dispatcher.registry_mut(),
        arducom_slave::ftp::DEFAULT_COMMAND_BASE,
        &files,
    )?;

    loop {
        dispatcher.poll()?;
        std::thread::sleep(Duration::from_millis(1));
    }
}
