use crate::error::TransportError;
use crate::jdwp::constants::HANDSHAKE;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

bitflags::bitflags! {
    /// Capability answers for `Transport` implementations.
    #[derive(Debug, Clone, Copy)]
    pub struct TransportCapabilities: u8 {
        const CAN_TIMEOUT_ATTACH = 0x01;
        const CAN_TIMEOUT_ACCEPT = 0x02;
        const CAN_TIMEOUT_HANDSHAKE = 0x04;
    }
}

/// Pluggable byte pipe between the agent and a debugger. The VM thread is
/// the only caller; nothing here may block without a timeout except the
/// explicit whole-packet reads issued after `is_data_available` said yes.
pub trait Transport: Send {
    /// Fills `buf` completely or fails.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), TransportError>;
    /// True when at least one byte can be read without blocking past
    /// `timeout`.
    fn is_data_available(&mut self, timeout: Duration) -> Result<bool, TransportError>;
    fn close(&mut self);
    fn capabilities(&self) -> TransportCapabilities;
    fn last_error(&self) -> Option<TransportError>;
}

fn map_io(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::IoError,
    }
}

/// The `dt_socket` transport: one TCP stream, big-endian packets, with the
/// 14-byte handshake exchanged right after connecting.
pub struct TcpTransport {
    stream: TcpStream,
    last_error: Option<TransportError>,
}

impl TcpTransport {
    /// Client mode: connect out to a listening debugger.
    pub fn attach(
        addr: impl ToSocketAddrs,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|_| TransportError::IllegalArgument)?
            .next()
            .ok_or(TransportError::IllegalArgument)?;
        let stream = TcpStream::connect(addr).map_err(map_io)?;
        Self::finish(stream, handshake_timeout)
    }

    /// Server mode: wrap an accepted connection.
    pub fn accepted(
        stream: TcpStream,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::finish(stream, handshake_timeout)
    }

    fn finish(stream: TcpStream, handshake_timeout: Duration) -> Result<Self, TransportError> {
        stream.set_nodelay(true).ok();
        let mut transport = Self {
            stream,
            last_error: None,
        };
        transport.handshake(handshake_timeout)?;
        Ok(transport)
    }

    /// Both sides send the literal `JDWP-Handshake`; any deviation is fatal
    /// to the session.
    fn handshake(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(map_io)?;
        self.write_bytes(HANDSHAKE)?;
        let mut reply = [0u8; HANDSHAKE.len()];
        self.read_bytes(&mut reply)?;
        if &reply != HANDSHAKE {
            return Err(TransportError::IllegalState);
        }
        self.stream.set_read_timeout(None).map_err(map_io)?;
        Ok(())
    }

    fn record(&mut self, e: TransportError) -> TransportError {
        self.last_error = Some(e);
        e
    }
}

impl Transport for TcpTransport {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.stream
            .read_exact(buf)
            .map_err(|e| self.record(map_io(e)))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(buf)
            .and_then(|_| self.stream.flush())
            .map_err(|e| self.record(map_io(e)))
    }

    fn is_data_available(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let mut probe = [0u8; 1];
        if timeout.is_zero() {
            self.stream.set_nonblocking(true).map_err(map_io)?;
            let result = self.stream.peek(&mut probe);
            self.stream.set_nonblocking(false).map_err(map_io)?;
            match result {
                Ok(0) => Err(self.record(TransportError::IoError)), // peer gone
                Ok(_) => Ok(true),
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
                Err(e) => Err(self.record(map_io(e))),
            }
        } else {
            self.stream
                .set_read_timeout(Some(timeout))
                .map_err(map_io)?;
            let result = self.stream.peek(&mut probe);
            self.stream.set_read_timeout(None).map_err(map_io)?;
            match result {
                Ok(0) => Err(self.record(TransportError::IoError)),
                Ok(_) => Ok(true),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    Ok(false)
                }
                Err(e) => Err(self.record(map_io(e))),
            }
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::CAN_TIMEOUT_HANDSHAKE
    }

    fn last_error(&self) -> Option<TransportError> {
        self.last_error
    }
}

/// Listening half of server mode; polled by the VM thread so the interpreter
/// keeps running until a debugger shows up.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(map_io)?;
        listener.set_nonblocking(true).map_err(map_io)?;
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener.local_addr().ok().map(|a| a.port())
    }

    /// Non-blocking accept; `Ok(None)` while nobody has connected yet.
    pub fn try_accept(
        &mut self,
        handshake_timeout: Duration,
    ) -> Result<Option<TcpTransport>, TransportError> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).map_err(map_io)?;
                TcpTransport::accepted(stream, handshake_timeout).map(Some)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(map_io(e)),
        }
    }

    /// Blocking accept used by suspend-on-start launches.
    pub fn accept_blocking(
        &mut self,
        handshake_timeout: Duration,
    ) -> Result<TcpTransport, TransportError> {
        self.listener.set_nonblocking(false).map_err(map_io)?;
        let (stream, _) = self.listener.accept().map_err(map_io)?;
        TcpTransport::accepted(stream, handshake_timeout)
    }
}
