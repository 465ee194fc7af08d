mod logging;
mod output;

use std::io::Read;
use std::time::Duration;

use clap::Parser;

use arducom_master::{Master, TransactionParams, DEFAULT_I2C_DELAY};
use arducom_transport::{
    detect_kind, I2cTransport, MasterTransport, SerialTransport, TcpTransport, TransportKind,
    DEFAULT_TCP_PORT,
};

use crate::logging::init_logging;
use crate::output::{format_output, interpret_version_reply, parse_payload, Format};

#[derive(Parser, Debug)]
#[command(name = "arducom", version, about = "Arducom command-line master")]
struct Cli {
    /// Endpoint: serial device, I2C bus device, or IPv4 address.
    #[arg(short = 'd', long = "device")]
    device: String,

    /// Transport type; guessed from the endpoint when omitted.
    #[arg(short = 't', long = "type", value_name = "serial|i2c|tcpip")]
    transport: Option<String>,

    /// I2C slave address, or TCP port (default 4152).
    #[arg(short = 'a', long = "address")]
    address: Option<u16>,

    /// Serial baud rate.
    #[arg(short = 'b', long = "baudrate", default_value_t = 57600)]
    baudrate: u32,

    /// Command number to send (0..=126).
    #[arg(short = 'c', long = "command", value_parser = clap::value_parser!(u8).range(0..=126))]
    command: u8,

    /// Number of expected reply payload bytes; transport default when
    /// omitted.
    #[arg(short = 'e', long = "expected")]
    expected: Option<usize>,

    /// Command payload, in the input format.
    #[arg(short = 'p', long = "payload", conflicts_with = "read_stdin")]
    payload: Option<String>,

    /// Read the command payload from standard input.
    #[arg(short = 'r', long = "read-stdin")]
    read_stdin: bool,

    /// Input format of the command payload.
    #[arg(short = 'i', long = "input-format", value_enum, default_value = "Hex")]
    input_format: Format,

    /// Output format of the reply payload.
    #[arg(short = 'o', long = "output-format", value_enum, default_value = "Hex")]
    output_format: Format,

    /// Input and output separator character.
    #[arg(short = 's', long = "separator")]
    separator: Option<char>,

    /// Input separator character (overrides -s).
    #[arg(long = "si", value_name = "SEP")]
    input_separator: Option<char>,

    /// Output separator character (overrides -s).
    #[arg(long = "so", value_name = "SEP")]
    output_separator: Option<char>,

    /// Do not use checksums.
    #[arg(short = 'n', long = "no-checksum")]
    no_checksum: bool,

    /// Timeout in milliseconds for reads and lock acquisition.
    #[arg(short = 'u', long = "timeout", default_value_t = 5000)]
    timeout_ms: u64,

    /// Delay in milliseconds between send and the first read; defaults
    /// to 10 on I2C and 0 elsewhere.
    #[arg(short = 'l', long = "delay")]
    delay_ms: Option<u64>,

    /// Number of retries after NO_DATA replies or read timeouts.
    #[arg(short = 'x', long = "retries", default_value_t = 0)]
    retries: u32,

    /// Semaphore key override for the bus lock; 0 disables locking.
    #[arg(short = 'k', long = "semkey")]
    semkey: Option<i32>,

    /// Initialization delay in milliseconds before the first command
    /// (covers USB-serial resets).
    #[arg(long = "init-delay", value_name = "MS")]
    init_delay_ms: Option<u64>,

    /// No newline after the output.
    #[arg(long = "no-newline")]
    no_newline: bool,

    /// Do not interpret the reply of command 0.
    #[arg(long = "no-interpret")]
    no_interpret: bool,

    /// Verbose output (-v frame dumps, -vv everything).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => {}
        Err(failure) => {
            eprintln!("{}", failure.message);
            std::process::exit(failure.exit_code);
        }
    }
}

#[derive(Debug)]
struct Failure {
    message: String,
    exit_code: i32,
}

impl Failure {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: 1,
        }
    }
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    let transport = build_transport(cli, timeout)?;

    let delay = cli.delay_ms.map(Duration::from_millis).unwrap_or(
        if matches!(transport.kind(), TransportKind::I2c) {
            DEFAULT_I2C_DELAY
        } else {
            Duration::ZERO
        },
    );
    let params = TransactionParams {
        use_checksum: !cli.no_checksum,
        delay,
        retries: cli.retries,
        timeout,
        lock_key: cli.semkey,
        hold_connection: false,
    };

    let payload = resolve_payload(cli)?;
    let mut master = Master::new(transport);

    let outcome = master
        .init()
        .and_then(|()| master.execute(&params, cli.command, &payload, cli.expected));
    let reply = match outcome {
        Ok(reply) => reply,
        Err(err) => {
            let exit_code = match master.last_error() {
                0 => 1,
                code => i32::from(code),
            };
            return Err(Failure {
                message: render_error(&err),
                exit_code,
            });
        }
    };

    if !reply.is_empty() {
        let rendered = if !cli.no_interpret && cli.command == 0 {
            interpret_version_reply(&reply)
        } else {
            None
        };
        let rendered = match rendered {
            Some(text) => text,
            None => format_output(
                &reply,
                cli.output_format,
                cli.output_separator.or(cli.separator),
            )
            .map_err(Failure::usage)?,
        };
        if cli.no_newline {
            print!("{rendered}");
        } else {
            println!("{rendered}");
        }
    }
    Ok(())
}

fn build_transport(cli: &Cli, timeout: Duration) -> Result<MasterTransport, Failure> {
    let kind = match cli.transport.as_deref() {
        Some(name) => name
            .parse::<TransportKind>()
            .map_err(|err| Failure::usage(err.to_string()))?,
        None => detect_kind(&cli.device).ok_or_else(|| {
            Failure::usage(format!(
                "cannot guess the transport type of {:?}; use -t",
                cli.device
            ))
        })?,
    };

    Ok(match kind {
        TransportKind::Serial => MasterTransport::Serial(SerialTransport::new(
            cli.device.clone(),
            cli.baudrate,
            timeout,
            cli.init_delay_ms.map(Duration::from_millis),
        )),
        TransportKind::I2c => {
            let address = cli.address.ok_or_else(|| {
                Failure::usage("an I2C slave address is required (argument -a)")
            })?;
            MasterTransport::I2c(I2cTransport::new(cli.device.clone(), address))
        }
        TransportKind::Tcpip => MasterTransport::Tcp(TcpTransport::new(
            cli.device.clone(),
            cli.address.unwrap_or(DEFAULT_TCP_PORT),
            timeout,
        )),
    })
}

fn resolve_payload(cli: &Cli) -> Result<Vec<u8>, Failure> {
    let input_separator = cli.input_separator.or(cli.separator);
    if cli.read_stdin {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .map_err(|err| Failure::usage(format!("failed reading stdin: {err}")))?;
        return parse_payload(input.trim_end(), cli.input_format, input_separator)
            .map_err(Failure::usage);
    }
    match &cli.payload {
        Some(payload) => {
            parse_payload(payload, cli.input_format, input_separator).map_err(Failure::usage)
        }
        None => Ok(Vec::new()),
    }
}

/// One line per error: `<message> (<code>); <detail chain>`.
fn render_error(err: &arducom_master::MasterError) -> String {
    let mut message = format!("{err} ({})", err.code());
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(&format!("; {cause}"));
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_serial_invocation() {
        let cli = Cli::try_parse_from([
            "arducom", "-d", "/dev/ttyUSB0", "-b", "115200", "-c", "0",
        ])
        .expect("args should parse");
        assert_eq!(cli.command, 0);
        assert_eq!(cli.baudrate, 115200);
        assert!(!cli.no_checksum);
    }

    #[test]
    fn rejects_out_of_range_commands() {
        let err = Cli::try_parse_from(["arducom", "-d", "/dev/i2c-1", "-c", "127"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn payload_and_stdin_conflict() {
        let err = Cli::try_parse_from([
            "arducom", "-d", "/dev/i2c-1", "-c", "1", "-p", "00", "-r",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn i2c_requires_an_address() {
        let cli =
            Cli::try_parse_from(["arducom", "-d", "/dev/i2c-1", "-c", "0"]).expect("should parse");
        let failure = build_transport(&cli, Duration::from_secs(5)).unwrap_err();
        assert!(failure.message.contains("-a"));
    }

    #[test]
    fn transport_is_guessed_from_the_endpoint() {
        let cli = Cli::try_parse_from(["arducom", "-d", "192.168.0.5", "-c", "0"])
            .expect("should parse");
        let transport = build_transport(&cli, Duration::from_secs(5)).unwrap();
        assert!(matches!(transport.kind(), TransportKind::Tcpip));
    }

    #[test]
    fn unknown_endpoints_need_an_explicit_type() {
        let cli = Cli::try_parse_from(["arducom", "-d", "somewhere.local", "-c", "0"])
            .expect("should parse");
        assert!(build_transport(&cli, Duration::from_secs(5)).is_err());
    }
}
