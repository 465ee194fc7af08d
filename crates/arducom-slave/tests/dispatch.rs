//! Dispatcher behaviour over a loopback stream, including the literal
//! wire-format transactions.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use arducom_frame::Status;
use arducom_slave::{
    register_eeprom_value, register_version_command, Dispatcher, Eeprom, PollOutcome,
    RegistryError, SlaveControl, StreamTransport,
};

/// One end of an in-memory wire: reads pop from `incoming`, writes land
/// in `outgoing`.
#[derive(Clone, Default)]
struct Loopback {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    outgoing: Arc<Mutex<Vec<u8>>>,
}

impl Loopback {
    fn push(&self, bytes: &[u8]) {
        self.incoming.lock().unwrap().extend(bytes.iter().copied());
    }

    fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing.lock().unwrap())
    }
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut incoming = self.incoming.lock().unwrap();
        match incoming.pop_front() {
            Some(byte) if !buf.is_empty() => {
                buf[0] = byte;
                Ok(1)
            }
            _ => Err(std::io::Error::from(ErrorKind::WouldBlock)),
        }
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outgoing.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn dispatcher() -> (Dispatcher<StreamTransport<Loopback>>, Loopback) {
    let wire = Loopback::default();
    let dispatcher = Dispatcher::new(StreamTransport::new(wire.clone()));
    (dispatcher, wire)
}

/// Poll until the transaction concludes (bounded; the loopback never
/// blocks).
fn poll_until_settled(
    dispatcher: &mut Dispatcher<StreamTransport<Loopback>>,
) -> PollOutcome {
    for _ in 0..8 {
        let outcome = dispatcher.poll().unwrap();
        match outcome {
            PollOutcome::Idle | PollOutcome::Incomplete => continue,
            settled => return settled,
        }
    }
    PollOutcome::Idle
}

#[test]
fn version_command_without_checksum() {
    let (mut dispatcher, wire) = dispatcher();
    register_version_command(dispatcher.registry_mut(), SlaveControl::new("")).unwrap();

    wire.push(&[0x00, 0x00]);
    assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);

    let reply = wire.take_output();
    assert_eq!(reply.len(), 10);
    assert_eq!(&reply[0..2], &[0x80, 0x08]);
    assert_eq!(reply[2], 1, "protocol version");
    assert_eq!(reply[7], 0, "flags");
    assert_eq!(&reply[8..10], &[0, 0], "free RAM");
}

#[test]
fn eeprom_write_byte_with_checksum() {
    let dir = std::env::temp_dir().join(format!(
        "arducom-dispatch-eeprom-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let eeprom = Eeprom::open(dir.join("eeprom.bin"), 64).unwrap();

    let (mut dispatcher, wire) = dispatcher();
    register_eeprom_value(dispatcher.registry_mut(), 3, 4, &eeprom, 1).unwrap();

    // write byte 0x2A at address 0x0005, checksum flagged
    wire.push(&[0x03, 0x83, 0x4A, 0x05, 0x00, 0x2A]);
    assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);
    assert_eq!(wire.take_output(), vec![0x83, 0x80, 0xFB]);

    // read it back, checksum flagged: 04 82 <ck> 05 00
    let ck = arducom_frame::checksum(0x04, 0x82, &[0x05, 0x00]);
    wire.push(&[0x04, 0x82, ck, 0x05, 0x00]);
    assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);
    let reply = wire.take_output();
    assert_eq!(reply[0], 0x84);
    assert_eq!(reply[1], 0x81);
    assert_eq!(reply[3], 0x2A);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_command_is_reported_with_its_code() {
    let (mut dispatcher, wire) = dispatcher();

    wire.push(&[0x63, 0x00]);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::CommandUnknown)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0x81, 0x63]);
}

#[test]
fn parameter_mismatch_reports_the_expected_length() {
    let (mut dispatcher, wire) = dispatcher();
    dispatcher
        .add_command(7, Some(2), Box::new(|_| Ok(Vec::new())))
        .unwrap();

    wire.push(&[0x07, 0x01, 0xAA]);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::ParameterMismatch)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0x83, 0x02]);
}

#[test]
fn corrupted_checksum_reports_the_recomputed_value() {
    let (mut dispatcher, wire) = dispatcher();
    dispatcher
        .add_command(5, None, Box::new(|_| Ok(Vec::new())))
        .unwrap();

    // frame built for payload 01 02 03, last byte flipped in transit
    wire.push(&[0x05, 0x83, 0x71, 0x01, 0x02, 0x04]);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::ChecksumError)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0x85, 0x70]);
}

#[test]
fn repeated_polls_after_a_reply_are_no_ops() {
    let (mut dispatcher, wire) = dispatcher();
    register_version_command(dispatcher.registry_mut(), SlaveControl::new("")).unwrap();

    wire.push(&[0x00, 0x00]);
    assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);
    let reply = wire.take_output();
    assert!(!reply.is_empty());

    for _ in 0..5 {
        assert_eq!(dispatcher.poll().unwrap(), PollOutcome::Idle);
    }
    assert!(wire.take_output().is_empty(), "no further bytes emitted");
}

#[test]
fn duplicate_registration_fails_through_the_dispatcher() {
    let (mut dispatcher, _wire) = dispatcher();
    dispatcher
        .add_command(9, None, Box::new(|_| Ok(vec![1])))
        .unwrap();
    let err = dispatcher
        .add_command(9, None, Box::new(|_| Ok(vec![2])))
        .unwrap_err();
    assert_eq!(err, RegistryError::AlreadyExists(9));
}

#[test]
fn stale_partial_frame_is_dropped_after_the_timeout() {
    let (dispatcher, wire) = dispatcher();
    let mut dispatcher = dispatcher.with_receive_timeout(Duration::from_millis(20));
    dispatcher
        .add_command(5, Some(3), Box::new(|_| Ok(Vec::new())))
        .unwrap();

    // half a frame, then silence
    wire.push(&[0x05, 0x03, 0x01]);
    assert_eq!(dispatcher.poll().unwrap(), PollOutcome::Incomplete);
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(dispatcher.poll().unwrap(), PollOutcome::TimedOut);

    // a complete frame afterwards goes through untroubled
    wire.push(&[0x05, 0x03, 0x01, 0x02, 0x03]);
    assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);
    assert_eq!(wire.take_output(), vec![0x85, 0x00]);
}

#[test]
fn overflowing_frame_reports_too_much_data() {
    let (mut dispatcher, wire) = dispatcher();

    // announces 63 payload bytes; the buffer gives up before that
    let mut flood = vec![0x05, 0x3F];
    flood.extend(std::iter::repeat(0xEE).take(40));
    wire.push(&flood);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::TooMuchData)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0x82, 0x20]);
}

#[test]
fn handler_error_becomes_a_function_error_frame() {
    let (mut dispatcher, wire) = dispatcher();
    dispatcher
        .add_command(
            11,
            None,
            Box::new(|_| Err(arducom_slave::CommandError::function_error(0x17))),
        )
        .unwrap();

    wire.push(&[0x0B, 0x00]);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::FunctionError)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0xFE, 0x17]);
}

#[test]
fn oversized_handler_reply_is_a_buffer_overrun() {
    let (mut dispatcher, wire) = dispatcher();
    dispatcher
        .add_command(12, None, Box::new(|_| Ok(vec![0u8; 33])))
        .unwrap();

    wire.push(&[0x0C, 0x00]);
    assert_eq!(
        poll_until_settled(&mut dispatcher),
        PollOutcome::Error(Status::BufferOverrun)
    );
    assert_eq!(wire.take_output(), vec![0xFF, 0x84, 0x20]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A correctly framed request for a registered no-op command always
    /// yields a success reply echoing the command, with the code byte
    /// mirroring the checksum flag.
    #[test]
    fn no_op_commands_reply_for_every_command_code(
        command in 0u8..=126,
        payload in proptest::collection::vec(any::<u8>(), 0..=32),
        with_checksum: bool,
    ) {
        let (mut dispatcher, wire) = dispatcher();
        dispatcher
            .add_command(command, None, Box::new(|_| Ok(Vec::new())))
            .unwrap();

        let mut frame = bytes::BytesMut::new();
        arducom_frame::encode_request(command, &payload, with_checksum, &mut frame).unwrap();
        wire.push(&frame);

        prop_assert_eq!(poll_until_settled(&mut dispatcher), PollOutcome::Handled);
        let reply = wire.take_output();
        prop_assert_eq!(reply[0], command | 0x80);
        prop_assert_eq!(reply[1] & 0x80 != 0, with_checksum);
        prop_assert_eq!(reply[1] & 0x3F, 0, "no reply payload");
        prop_assert_eq!(reply.len(), if with_checksum { 3 } else { 2 });
    }
}
