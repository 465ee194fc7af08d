use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::debug;

use arducom_frame::BUFFER_SIZE;

use crate::error::Result;

/// Room for a block-sized payload plus command, code and checksum bytes.
pub const RECEIVE_CAPACITY: usize = BUFFER_SIZE + 3;

/// State of a slave transport's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing received since the last reset.
    NoData,
    /// Bytes are buffered; the dispatcher decides completeness.
    HasData,
    /// The buffer overflowed; the partial frame was dropped.
    TooMuchData,
    /// A reply is staged for transmission.
    ReadyToSend,
    /// The reply left the transport; waiting for the next request.
    Sent,
}

/// A passive byte source/sink the dispatcher polls.
///
/// `poll` ingests whatever bytes are available without blocking; the
/// dispatcher inspects the buffered bytes and calls `send` once a frame
/// has been handled. `send` consumes the request bytes.
pub trait SlaveTransport {
    /// Ingest available bytes into the receive buffer.
    fn poll(&mut self) -> Result<()>;

    /// Current buffer state.
    fn state(&self) -> BufferState;

    /// The buffered request bytes.
    fn data(&self) -> &[u8];

    /// Transmit one reply frame and mark the request consumed.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Drop any partial frame and return to `NoData`.
    fn reset(&mut self);
}

/// Slave transport over any byte stream.
///
/// The stream must not block indefinitely on read: a non-blocking stream
/// or one with a short read timeout both work. `WouldBlock`, `TimedOut`
/// and empty reads end an ingestion round.
pub struct StreamTransport<T> {
    io: T,
    buf: BytesMut,
    state: BufferState,
}

impl<T: Read + Write> StreamTransport<T> {
    pub fn new(io: T) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(RECEIVE_CAPACITY),
            state: BufferState::NoData,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    fn ingest(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            match self.io.read(&mut byte) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    if self.buf.len() >= RECEIVE_CAPACITY {
                        self.buf.clear();
                        self.state = BufferState::TooMuchData;
                        return Ok(());
                    }
                    self.buf.extend_from_slice(&byte);
                    self.state = BufferState::HasData;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(())
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl<T: Read + Write> SlaveTransport for StreamTransport<T> {
    fn poll(&mut self) -> Result<()> {
        // a delivered reply ends the transaction; fresh bytes start over
        if matches!(self.state, BufferState::Sent | BufferState::ReadyToSend) {
            self.buf.clear();
            self.state = BufferState::NoData;
        }
        self.ingest()
    }

    fn state(&self) -> BufferState {
        self.state
    }

    fn data(&self) -> &[u8] {
        &self.buf
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.state = BufferState::ReadyToSend;
        debug!(frame = %arducom_frame::hex_dump(frame), "slave send");
        self.io.write_all(frame)?;
        self.io.flush()?;
        self.buf.clear();
        self.state = BufferState::Sent;
        Ok(())
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.state = BufferState::NoData;
    }
}

/// Slave transport accepting TCP connections, one client at a time.
///
/// The listener is non-blocking; `poll` accepts a pending connection and
/// ingests available bytes. A disconnected client drops the partial
/// frame and frees the slot for the next connection.
pub struct TcpServerTransport {
    listener: TcpListener,
    client: Option<TcpStream>,
    buf: BytesMut,
    state: BufferState,
}

impl TcpServerTransport {
    pub fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        debug!(%address, "slave listening");
        Ok(Self {
            listener,
            client: None,
            buf: BytesMut::with_capacity(RECEIVE_CAPACITY),
            state: BufferState::NoData,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn accept_pending(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "client connected");
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                self.client = Some(stream);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn drop_client(&mut self) {
        debug!("client disconnected");
        self.client = None;
        self.buf.clear();
        self.state = BufferState::NoData;
    }
}

impl SlaveTransport for TcpServerTransport {
    fn poll(&mut self) -> Result<()> {
        if matches!(self.state, BufferState::Sent | BufferState::ReadyToSend) {
            self.buf.clear();
            self.state = BufferState::NoData;
        }
        self.accept_pending()?;
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        let mut byte = [0u8; 1];
        loop {
            match client.read(&mut byte) {
                Ok(0) => {
                    self.drop_client();
                    return Ok(());
                }
                Ok(_) => {
                    if self.buf.len() >= RECEIVE_CAPACITY {
                        self.buf.clear();
                        self.state = BufferState::TooMuchData;
                        return Ok(());
                    }
                    self.buf.extend_from_slice(&byte);
                    self.state = BufferState::HasData;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(_) => {
                    self.drop_client();
                    return Ok(());
                }
            }
        }
    }

    fn state(&self) -> BufferState {
        self.state
    }

    fn data(&self) -> &[u8] {
        &self.buf
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        self.state = BufferState::ReadyToSend;
        debug!(frame = %arducom_frame::hex_dump(frame), "slave send");
        if client.write_all(frame).and_then(|()| client.flush()).is_err() {
            self.drop_client();
            return Ok(());
        }
        self.buf.clear();
        self.state = BufferState::Sent;
        Ok(())
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.state = BufferState::NoData;
    }
}

/// Maximum quiet gap between bytes of one forwarded burst.
const PROXY_BYTE_GAP: Duration = Duration::from_millis(3);

/// Forwards frames between an upstream slave transport and a secondary
/// byte stream, so one device can expose another device's Arducom port.
///
/// The proxy never interprets frames: requests buffered by the upstream
/// transport are pushed into the stream, and whatever the stream answers
/// within the inter-byte gap is sent back upstream as one block. Its own
/// buffer state stays `NoData`, so a dispatcher driving it never
/// dispatches.
pub struct ProxyTransport<U, S> {
    upstream: U,
    stream: S,
    buf: BytesMut,
    state: BufferState,
}

impl<U: SlaveTransport, S: Read + Write> ProxyTransport<U, S> {
    pub fn new(upstream: U, stream: S) -> Self {
        Self {
            upstream,
            stream,
            buf: BytesMut::with_capacity(RECEIVE_CAPACITY),
            state: BufferState::NoData,
        }
    }

    fn pump(&mut self) -> Result<()> {
        self.upstream.poll()?;
        if self.upstream.state() == BufferState::HasData {
            self.stream.write_all(self.upstream.data())?;
            self.stream.flush()?;
            self.upstream.reset();
        }

        // collect the device's answer as one burst; the upstream side
        // may have to transmit it as a single block
        let mut byte = [0u8; 1];
        let mut last_byte = Instant::now();
        while last_byte.elapsed() < PROXY_BYTE_GAP {
            match self.stream.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if self.buf.len() >= RECEIVE_CAPACITY {
                        self.buf.clear();
                        self.state = BufferState::TooMuchData;
                        return Ok(());
                    }
                    self.buf.extend_from_slice(&byte);
                    last_byte = Instant::now();
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut => {}
                Err(err) => return Err(err.into()),
            }
        }
        if !self.buf.is_empty() {
            let reply = self.buf.split().freeze();
            self.upstream.send(&reply)?;
        }
        Ok(())
    }
}

impl<U: SlaveTransport, S: Read + Write> SlaveTransport for ProxyTransport<U, S> {
    fn poll(&mut self) -> Result<()> {
        self.pump()
    }

    fn state(&self) -> BufferState {
        self.state
    }

    fn data(&self) -> &[u8] {
        &self.buf
    }

    fn send(&mut self, _frame: &[u8]) -> Result<()> {
        // the master's frames pass through the proxy unseen; nothing may
        // ever be dispatched locally
        Ok(())
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.state = BufferState::NoData;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Read end fed from a shared queue; writes land in a shared log.
    #[derive(Clone, Default)]
    pub(crate) struct PipeEnd {
        pub incoming: Arc<Mutex<VecDeque<u8>>>,
        pub outgoing: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for PipeEnd {
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

    impl Write for PipeEnd {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outgoing.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl PipeEnd {
        pub fn push_incoming(&self, bytes: &[u8]) {
            self.incoming.lock().unwrap().extend(bytes.iter().copied());
        }
    }

    #[test]
    fn stream_ingests_available_bytes() {
        let pipe = PipeEnd::default();
        pipe.push_incoming(&[0x00, 0x00]);
        let mut transport = StreamTransport::new(pipe.clone());
        transport.poll().unwrap();
        assert_eq!(transport.state(), BufferState::HasData);
        assert_eq!(transport.data(), &[0x00, 0x00]);
    }

    #[test]
    fn stream_overflow_drops_the_frame() {
        let pipe = PipeEnd::default();
        pipe.push_incoming(&vec![0xAA; RECEIVE_CAPACITY + 1]);
        let mut transport = StreamTransport::new(pipe.clone());
        transport.poll().unwrap();
        assert_eq!(transport.state(), BufferState::TooMuchData);
        assert!(transport.data().is_empty());
    }

    #[test]
    fn stream_send_consumes_the_request() {
        let pipe = PipeEnd::default();
        pipe.push_incoming(&[0x00, 0x00]);
        let mut transport = StreamTransport::new(pipe.clone());
        transport.poll().unwrap();
        transport.send(&[0x80, 0x00]).unwrap();
        assert_eq!(transport.state(), BufferState::Sent);
        assert!(transport.data().is_empty());
        assert_eq!(pipe.outgoing.lock().unwrap().as_slice(), &[0x80, 0x00]);
    }

    #[test]
    fn stream_reset_recovers_from_overflow() {
        let pipe = PipeEnd::default();
        pipe.push_incoming(&vec![0xAA; RECEIVE_CAPACITY + 1]);
        let mut transport = StreamTransport::new(pipe.clone());
        transport.poll().unwrap();
        transport.reset();
        assert_eq!(transport.state(), BufferState::NoData);
    }

    #[test]
    fn proxy_forwards_requests_and_relays_replies() {
        // upstream: a stream transport fed by the master
        let master_side = PipeEnd::default();
        master_side.push_incoming(&[0x01, 0x00]);
        let upstream = StreamTransport::new(master_side.clone());

        // device side answers as soon as it sees the request
        let device_side = PipeEnd::default();
        device_side.push_incoming(&[0x81, 0x00]);

        let mut proxy = ProxyTransport::new(upstream, device_side.clone());
        proxy.poll().unwrap();

        // the request reached the device
        assert_eq!(device_side.outgoing.lock().unwrap().as_slice(), &[0x01, 0x00]);
        // the reply reached the master
        assert_eq!(master_side.outgoing.lock().unwrap().as_slice(), &[0x81, 0x00]);
        // the proxy itself never exposes data for dispatch
        assert_eq!(proxy.state(), BufferState::NoData);
    }

    #[test]
    fn tcp_server_roundtrip() {
        let mut transport = TcpServerTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[0x00, 0x00]).unwrap();

        // poll until the request is buffered
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.state() != BufferState::HasData {
            assert!(Instant::now() < deadline, "request never arrived");
            transport.poll().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(transport.data(), &[0x00, 0x00]);

        transport.send(&[0x80, 0x00]).unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x80, 0x00]);
    }
}
