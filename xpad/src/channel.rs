/*!
One connection to the detector server.

The server is driven over two of these: the command channel carries commands
and bulk image data, the status channel carries status polls and aborts. A
channel never reconnects; any transport fault is terminal for it.
*/

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::ack::{Ack, ACK_TERMINATOR};
use crate::codec::{self, Command};
use crate::error::{Result, XpadError};
use crate::transport::Transport;

/// Scratch size for greeting and drain reads
pub const DRAIN_BUFFER_SIZE: usize = 2048;

/// Socket tuning applied when a TCP channel is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Kernel receive buffer size, left at the OS default when `None`
    pub recv_buffer_size: Option<usize>,
    pub nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_buffer_size: None,
            nodelay: true,
        }
    }
}

/// A named, blocking request/response stream
pub struct Channel<T: Transport = TcpStream> {
    name: &'static str,
    stream: T,
}

impl Channel<TcpStream> {
    /// Connect and consume the server greeting
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        name: &'static str,
        options: &SocketOptions,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| XpadError::connection(name, e))?;

        let sock_ref = socket2::SockRef::from(&stream);
        if let Some(size) = options.recv_buffer_size {
            sock_ref
                .set_recv_buffer_size(size)
                .map_err(|e| XpadError::connection(name, e))?;
        }
        sock_ref
            .set_nodelay(options.nodelay)
            .map_err(|e| XpadError::connection(name, e))?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut channel = Self::new(name, stream);
        let greeting = channel.read_greeting()?;
        info!(
            channel = name,
            "Connected to {} ({})",
            peer,
            String::from_utf8_lossy(&greeting).trim()
        );
        Ok(channel)
    }
}

impl<T: Transport> Channel<T> {
    /// Wrap an already connected transport
    pub fn new(name: &'static str, stream: T) -> Self {
        Self { name, stream }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    fn io_error(&self, e: io::Error) -> XpadError {
        XpadError::connection(self.name, e)
    }

    /// One blocking read of whatever the server says on connect
    pub fn read_greeting(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; DRAIN_BUFFER_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(XpadError::peer_closed(self.name)),
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    /// Write all bytes
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| XpadError::connection(self.name, e))
    }

    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        debug!(channel = self.name, "-> {}", command);
        self.send(&command.encode())
    }

    /// Read byte by byte up to and including `terminator`
    pub fn recv_until_terminator(&mut self, terminator: u8) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(XpadError::peer_closed(self.name)),
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == terminator {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    /// Read and decode one acknowledgement line
    pub fn recv_ack(&mut self) -> Result<Ack> {
        let line = self.recv_until_terminator(ACK_TERMINATOR)?;
        debug!(
            channel = self.name,
            "<- {}",
            String::from_utf8_lossy(&line).trim()
        );
        Ack::parse(&line)
    }

    /// Discard every byte already waiting on the stream
    ///
    /// Clears leftovers of an interrupted exchange. The channel is switched
    /// back to blocking mode even when the drain fails.
    pub fn drain_nonblocking(&mut self) -> Result<usize> {
        self.stream
            .set_nonblocking(true)
            .map_err(|e| XpadError::connection(self.name, e))?;

        let mut buf = [0u8; DRAIN_BUFFER_SIZE];
        let mut discarded = 0usize;
        let outcome = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!(channel = self.name, "Peer closed while draining");
                    break Ok(());
                }
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        let restored = self.stream.set_nonblocking(false);
        outcome
            .and(restored)
            .map_err(|e| XpadError::connection(self.name, e))?;

        if discarded > 0 {
            debug!(channel = self.name, "Discarded {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Read exactly `n` bytes of payload
    pub fn read_exactly(&mut self, n: usize) -> Result<Vec<u8>> {
        codec::read_exactly(&mut self.stream, n).map_err(|e| XpadError::connection(self.name, e))
    }

    /// Read one little-endian i32 length or dimension field
    pub fn read_i32_le(&mut self) -> Result<i32> {
        let bytes = self.read_exactly(4)?;
        codec::decode_i32_le(&bytes).ok_or_else(|| XpadError::peer_closed(self.name))
    }

    /// Drain, send the command and decode its acknowledgement
    pub fn request(&mut self, command: &Command) -> Result<Ack> {
        self.drain_nonblocking()?;
        self.send_command(command)?;
        self.recv_ack()
    }

    /// Close both directions of the underlying stream
    pub fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .map_err(|e| XpadError::connection(self.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckKind;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_recv_until_terminator_includes_terminator() {
        let mock = MockTransport::new().preload(b"* 0\n>* 1>");
        let mut channel = Channel::new("command", mock.clone());

        assert_eq!(channel.recv_until_terminator(b'>').unwrap(), b"* 0\n>");
        // Reads stop right at the terminator
        assert_eq!(mock.unread(), 4);
    }

    #[test]
    fn test_recv_until_terminator_peer_closed() {
        let mut channel = Channel::new("status", MockTransport::new().preload(b"* Idle."));
        let err = channel.recv_until_terminator(b'>').unwrap_err();
        assert!(matches!(err, XpadError::Connection { channel: "status", .. }));
    }

    #[test]
    fn test_drain_discards_stale_bytes_and_restores_blocking() {
        let mock = MockTransport::new().preload(b"* 1>stale garbage");
        let mut channel = Channel::new("command", mock.clone());

        assert_eq!(channel.drain_nonblocking().unwrap(), 17);
        assert_eq!(mock.unread(), 0);

        // Blocking mode again: an empty stream reads as closed, not WouldBlock
        assert!(channel.recv_until_terminator(b'>').unwrap_err().is_connection());
    }

    #[test]
    fn test_drain_on_empty_stream() {
        let mut channel = Channel::new("command", MockTransport::new());
        assert_eq!(channel.drain_nonblocking().unwrap(), 0);
    }

    #[test]
    fn test_request_ignores_stale_reply() {
        let mock = MockTransport::new()
            .preload(b"* 99>")
            .reply("* 3>");
        let mut channel = Channel::new("command", mock.clone());

        let ack = channel.request(&Command::new("GetModuleMask")).unwrap();
        assert_eq!(ack.kind, AckKind::Value);
        assert_eq!(ack.payload, "3");
        assert_eq!(mock.sent_lines(), vec!["GetModuleMask"]);
    }

    #[test]
    fn test_read_i32_le() {
        let mock = MockTransport::new().preload((-7i32).to_le_bytes());
        let mut channel = Channel::new("command", mock);
        assert_eq!(channel.read_i32_le().unwrap(), -7);
        assert!(channel.read_i32_le().unwrap_err().is_connection());
    }

    #[test]
    fn test_greeting_and_shutdown() {
        let mock = MockTransport::new().preload(b"Welcome XPAD server>");
        let mut channel = Channel::new("command", mock.clone());
        assert_eq!(channel.read_greeting().unwrap(), b"Welcome XPAD server>");

        channel.shutdown().unwrap();
        assert!(mock.is_shut_down());
        assert!(channel.send(b"Exit\n").unwrap_err().is_connection());
    }
}
