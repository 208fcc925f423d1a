/*!
Byte-stream transports underneath a [`Channel`](crate::channel::Channel).
*/

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A full-duplex byte stream with a switchable blocking mode
pub trait Transport: Read + Write + Send {
    /// Switch between blocking and non-blocking reads
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Close both directions of the stream
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}
