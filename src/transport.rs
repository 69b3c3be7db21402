//! Socket transports sharing the message codec.
//!
//! The codec itself is pure; these two types bind it to the device's
//! control channel (TCP) and broadcast channel (UDP). Each transport
//! owns its socket exclusively and releases it when dropped, on every
//! exit path. Neither is safe to share between threads without outside
//! synchronization; the codec is.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use log::{debug, warn};

use crate::error::ClientError;
use crate::field::UnknownFieldPolicy;
use crate::message::{Message, MessageType, HEADER_LEN};

/// The device's TCP control port.
pub const TCP_PORT: u16 = 5001;

/// The device's UDP broadcast port.
pub const UDP_PORT: u16 = 43210;

/// The length field is 16 bits, so no frame (and no broadcast
/// datagram) exceeds this.
const MAX_FRAME: usize = HEADER_LEN + u16::MAX as usize;

/// The request/response control channel.
///
/// One request may be in flight at a time: send, then receive (or use
/// [`Self::request`]), unpipelined. The wire has no client-side
/// correlation id, so ordering is the only correlation there is.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Connects to the device's control port.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        Ok(TcpChannel { stream })
    }

    /// Caller-imposed deadline on socket reads. `None` blocks forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Writes one encoded message to the channel.
    pub fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let bytes = message.encode();
        debug!(
            "tcp: sending {} request ({} bytes)",
            message.message_type,
            bytes.len()
        );
        self.stream.write_all(&bytes)?;
        Ok(())
    }

    /// Reads one complete frame and decodes it.
    ///
    /// The frame is length-delimited: the first 13 bytes carry the
    /// length field, then exactly `length` more bytes follow. Short
    /// reads are looped over; a peer close mid-frame is
    /// [`ClientError::Eof`].
    pub fn receive(&mut self) -> Result<Message, ClientError> {
        let mut frame = vec![0u8; HEADER_LEN];
        read_frame_bytes(&mut self.stream, &mut frame, 0)?;
        let length = u16::from_be_bytes([frame[11], frame[12]]) as usize;
        frame.resize(HEADER_LEN + length, 0);
        read_frame_bytes(&mut self.stream, &mut frame[HEADER_LEN..], HEADER_LEN)?;

        let message = Message::decode(&frame, UnknownFieldPolicy::Lenient)?;
        debug!(
            "tcp: received {} ({} bytes)",
            message.message_type,
            frame.len()
        );
        Ok(message)
    }

    /// Sends a request and reads its response. With an expected type, a
    /// mismatched response is dropped and surfaces as
    /// [`ClientError::UnexpectedType`].
    pub fn request(
        &mut self,
        message: &Message,
        expected: Option<MessageType>,
    ) -> Result<Message, ClientError> {
        self.send(message)?;
        let response = self.receive()?;
        if let Some(expected) = expected {
            if response.message_type != expected {
                warn!(
                    "tcp: dropping {} response to a {} request",
                    response.message_type, expected
                );
                return Err(ClientError::UnexpectedType {
                    expected,
                    actual: response.message_type,
                });
            }
        }
        Ok(response)
    }
}

fn read_frame_bytes(
    stream: &mut TcpStream,
    buf: &mut [u8],
    already: usize,
) -> Result<(), ClientError> {
    let mut pos = 0;
    while pos < buf.len() {
        match stream.read(&mut buf[pos..]) {
            Ok(0) => {
                return Err(ClientError::Eof {
                    received: already + pos,
                })
            }
            Ok(n) => pos += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Listens for device broadcasts.
///
/// The broadcast port is shared with whatever else is shouting on the
/// network, so datagrams that fail to decode are dropped (at debug log
/// level) rather than surfaced; a hostile neighbor must not kill the
/// listener.
#[derive(Debug)]
pub struct Broadcasts {
    socket: UdpSocket,
}

impl Broadcasts {
    /// Binds `0.0.0.0` on the given port; port 0 picks an ephemeral
    /// port (useful under test).
    pub fn bind(port: u16) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Broadcasts { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// Caller-imposed deadline on the next datagram. `None` blocks
    /// forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Blocks until the next well-formed broadcast, returning its
    /// sender.
    pub fn recv(&self) -> Result<(SocketAddr, Message), ClientError> {
        let mut buf = vec![0u8; MAX_FRAME];
        loop {
            let (len, sender) = self.socket.recv_from(&mut buf)?;
            match Message::decode(&buf[..len], UnknownFieldPolicy::Lenient) {
                Ok(message) => {
                    debug!("udp: {} broadcast from {}", message.message_type, sender);
                    return Ok((sender, message));
                }
                Err(e) => debug!("udp: dropping {} bytes from {}: {}", len, sender, e),
            }
        }
    }

    /// A lazy sequence of `(sender, message)` pairs. With a read
    /// timeout set, the sequence ends when the deadline passes;
    /// otherwise it is unbounded.
    pub fn incoming(&self) -> Incoming<'_> {
        Incoming { listener: self }
    }
}

/// Iterator over well-formed broadcasts. See [`Broadcasts::incoming`].
#[derive(Debug)]
pub struct Incoming<'a> {
    listener: &'a Broadcasts,
}

impl Iterator for Incoming<'_> {
    type Item = Result<(SocketAddr, Message), ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.listener.recv() {
            Err(ClientError::Io(ref e)) if is_timeout(e) => None,
            other => Some(other),
        }
    }
}

/// Read deadlines surface as `WouldBlock` on Unix and `TimedOut` on
/// Windows.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
