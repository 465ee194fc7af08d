use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::TransportError;

/// Default TCP port an Arducom slave listens on.
pub const DEFAULT_TCP_PORT: u16 = 4152;

/// The three concrete transport families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    I2c,
    Tcpip,
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(Self::Serial),
            "i2c" => Ok(Self::I2c),
            "tcpip" => Ok(Self::Tcpip),
            other => Err(TransportError::InvalidEndpoint(format!(
                "unknown transport type {other:?} (expected serial, i2c or tcpip)"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::I2c => "i2c",
            Self::Tcpip => "tcpip",
        })
    }
}

/// Guess the transport family from an endpoint string.
///
/// `/dev/tty*`, `/dev/rfcomm*` and `COM*` are serial devices, `/dev/i2c*`
/// is an I2C bus, and anything that parses as an IPv4 address is TCP.
pub fn detect_kind(device: &str) -> Option<TransportKind> {
    if device.starts_with("/dev/tty") || device.starts_with("/dev/rfcomm") || device.starts_with("COM")
    {
        return Some(TransportKind::Serial);
    }
    if device.starts_with("/dev/i2c") {
        return Some(TransportKind::I2c);
    }
    if Ipv4Addr::from_str(device).is_ok() {
        return Some(TransportKind::Tcpip);
    }
    None
}

/// Whether a serial endpoint follows a USB-serial naming convention.
/// Opening such a device typically resets the attached board, so a
/// startup delay is applied before the first command.
pub fn is_usb_serial(device: &str) -> bool {
    device.starts_with("/dev/ttyUSB")
        || device.starts_with("/dev/ttyACM")
        || device.starts_with("/dev/rfcomm")
}

/// Derive the interprocess lock key for an endpoint.
///
/// Independent processes must name the same semaphore without prior
/// agreement, so the key is the first four bytes of the SHA-1 hash of the
/// endpoint string (the device path, or `host:port` for TCP). A key of 0
/// disables locking.
pub fn lock_key(endpoint: &str) -> i32 {
    let digest = Sha1::digest(endpoint.as_bytes());
    i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_serial_devices() {
        assert_eq!(detect_kind("/dev/ttyUSB0"), Some(TransportKind::Serial));
        assert_eq!(detect_kind("/dev/ttyACM1"), Some(TransportKind::Serial));
        assert_eq!(detect_kind("/dev/rfcomm0"), Some(TransportKind::Serial));
        assert_eq!(detect_kind("COM3"), Some(TransportKind::Serial));
    }

    #[test]
    fn detects_i2c_buses() {
        assert_eq!(detect_kind("/dev/i2c-1"), Some(TransportKind::I2c));
    }

    #[test]
    fn detects_ipv4_addresses() {
        assert_eq!(detect_kind("192.168.0.10"), Some(TransportKind::Tcpip));
        assert_eq!(detect_kind("127.0.0.1"), Some(TransportKind::Tcpip));
    }

    #[test]
    fn rejects_unknown_endpoints() {
        assert_eq!(detect_kind("example.local"), None);
        assert_eq!(detect_kind(""), None);
    }

    #[test]
    fn usb_serial_convention() {
        assert!(is_usb_serial("/dev/ttyUSB0"));
        assert!(is_usb_serial("/dev/ttyACM0"));
        assert!(is_usb_serial("/dev/rfcomm2"));
        assert!(!is_usb_serial("/dev/ttyS0"));
    }

    #[test]
    fn lock_key_is_stable_per_endpoint() {
        let a = lock_key("/dev/i2c-1");
        let b = lock_key("/dev/i2c-1");
        let c = lock_key("/dev/i2c-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn lock_key_covers_host_and_port() {
        assert_ne!(lock_key("10.0.0.1:4152"), lock_key("10.0.0.1:4153"));
    }

    #[test]
    fn kind_parses_and_displays() {
        assert_eq!("serial".parse::<TransportKind>().unwrap(), TransportKind::Serial);
        assert_eq!("i2c".parse::<TransportKind>().unwrap(), TransportKind::I2c);
        assert_eq!("tcpip".parse::<TransportKind>().unwrap(), TransportKind::Tcpip);
        assert!("spi".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Tcpip.to_string(), "tcpip");
    }
}
