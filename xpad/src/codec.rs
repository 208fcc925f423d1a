/*!
Wire encoding for the command channel.

Outgoing commands are ASCII lines: the command name followed by
space-separated arguments and a single `\n`. Bulk transfers use
little-endian signed 32-bit length fields followed by raw bytes:

- configuration pushes: `[len: i32 LE][len bytes]`
- image frames: `[size: i32 LE][height: i32 LE][width: i32 LE][size bytes]`
*/

use std::fmt;
use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{Result, XpadError};
use crate::frame::ImageFrame;
use crate::transport::Transport;

/// Reply the client sends after consuming a framed payload
pub const OK_REPLY: &[u8] = b"OK\n";

/// Size of the image frame header (size, height, width)
pub const FRAME_HEADER_LEN: usize = 12;

/// Largest single read issued while collecting a payload
pub const READ_CHUNK_SIZE: usize = 8192;

/// One command line for the detector server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument, formatted with `Display`
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encode as a newline-terminated ASCII line
    pub fn encode(&self) -> Bytes {
        let line = self.to_string();
        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Encode a command name and its arguments as one line
pub fn encode_command<A: fmt::Display>(name: &str, args: &[A]) -> Bytes {
    args.iter()
        .fold(Command::new(name), |cmd, arg| cmd.arg(arg))
        .encode()
}

/// Prefix a blob with its length as a little-endian i32
pub fn encode_length_prefixed_blob(blob: &[u8]) -> Result<Bytes> {
    let len = i32::try_from(blob.len())
        .map_err(|_| XpadError::invalid_value("length prefix", blob.len().to_string()))?;
    let mut buf = BytesMut::with_capacity(4 + blob.len());
    buf.put_i32_le(len);
    buf.put_slice(blob);
    Ok(buf.freeze())
}

/// Read exactly `n` bytes, accumulating partial reads
///
/// A zero-length read before `n` bytes arrived is reported as
/// [`io::ErrorKind::UnexpectedEof`].
pub fn read_exactly<R: Read + ?Sized>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; n];
    let mut filled = 0;

    while filled < n {
        let end = n.min(filled + READ_CHUNK_SIZE);
        match reader.read(&mut data[filled..end]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream closed after {} of {} bytes", filled, n),
                ));
            }
            Ok(read) => filled += read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(data)
}

/// Decode a little-endian i32 from the first four bytes
pub fn decode_i32_le(bytes: &[u8]) -> Option<i32> {
    let mut buf = bytes.get(..4)?;
    Some(buf.get_i32_le())
}

/// Header preceding every image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload size in bytes, 0 when the acquisition was aborted
    pub size: i32,
    pub height: i32,
    pub width: i32,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8; FRAME_HEADER_LEN]) -> Self {
        let mut buf = &bytes[..];
        Self {
            size: buf.get_i32_le(),
            height: buf.get_i32_le(),
            width: buf.get_i32_le(),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_i32_le(self.size);
        buf.put_i32_le(self.height);
        buf.put_i32_le(self.width);
        out
    }

    /// A zero size is the server's abort signal
    pub fn is_abort(&self) -> bool {
        self.size == 0
    }
}

/// Read one image frame and acknowledge it
///
/// On abort (size 0) the client still answers `OK` and consumes the closing
/// acknowledgement before failing with [`XpadError::AcquisitionAborted`].
/// A successful frame is acknowledged with `OK` and no reply is awaited.
pub fn read_image_frame<T: Transport>(channel: &mut Channel<T>) -> Result<ImageFrame> {
    let raw = channel.read_exactly(FRAME_HEADER_LEN)?;
    let mut header_bytes = [0u8; FRAME_HEADER_LEN];
    header_bytes.copy_from_slice(&raw);
    let header = FrameHeader::decode(&header_bytes);
    debug!(
        channel = channel.name(),
        header = %hex::encode(header_bytes),
        "Image header: size={} height={} width={}",
        header.size,
        header.height,
        header.width
    );

    if header.is_abort() {
        channel.send(OK_REPLY)?;
        let closing = channel.recv_until_terminator(crate::ack::ACK_TERMINATOR)?;
        warn!(
            channel = channel.name(),
            "Acquisition aborted by server ({})",
            String::from_utf8_lossy(&closing).trim()
        );
        return Err(XpadError::AcquisitionAborted);
    }

    let size = usize::try_from(header.size)
        .map_err(|_| XpadError::invalid_value("image size", header.size.to_string()))?;

    let data = channel.read_exactly(size)?;
    channel.send(OK_REPLY)?;

    Ok(ImageFrame::new(header.height, header.width, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn encoded_frame(height: i32, width: i32, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            size: payload.len() as i32,
            height,
            width,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_command_encoding() {
        let cmd = Command::new("CalibrationBEAM").arg(1000).arg(100).arg("1");
        assert_eq!(&cmd.encode()[..], b"CalibrationBEAM 1000 100 1\n");
        assert_eq!(cmd.to_string(), "CalibrationBEAM 1000 100 1");

        assert_eq!(&Command::new("Init").encode()[..], b"Init\n");
        assert_eq!(&encode_command("SetImageNumber", &[5])[..], b"SetImageNumber 5\n");
    }

    #[test]
    fn test_length_prefixed_blob() {
        let blob = encode_length_prefixed_blob(b"1 31 4 4 4\n").unwrap();
        assert_eq!(&blob[..4], &11i32.to_le_bytes());
        assert_eq!(&blob[4..], b"1 31 4 4 4\n");

        let empty = encode_length_prefixed_blob(b"").unwrap();
        assert_eq!(&empty[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_read_exactly_chunking_is_transparent() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();

        let mut one_shot = MockTransport::new().preload(&payload);
        let mut trickle = MockTransport::new().preload(&payload).chunked(1);
        let mut odd = MockTransport::new().preload(&payload).chunked(7);

        let a = read_exactly(&mut one_shot, payload.len()).unwrap();
        let b = read_exactly(&mut trickle, payload.len()).unwrap();
        let c = read_exactly(&mut odd, payload.len()).unwrap();

        assert_eq!(a, payload);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_read_exactly_leaves_trailing_bytes() {
        let mut mock = MockTransport::new().preload(b"abcdef");
        assert_eq!(read_exactly(&mut mock, 4).unwrap(), b"abcd");
        assert_eq!(mock.unread(), 2);
    }

    #[test]
    fn test_read_exactly_reports_early_close() {
        let mut mock = MockTransport::new().preload(b"abc");
        let err = read_exactly(&mut mock, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_frame_header_roundtrip_values() {
        let header = FrameHeader {
            size: 4 * 120 * 560,
            height: 120,
            width: 560,
        };
        assert_eq!(FrameHeader::decode(&header.encode()), header);
        assert!(!header.is_abort());
        assert_eq!(decode_i32_le(&(-1i32).to_le_bytes()), Some(-1));
        assert_eq!(decode_i32_le(&[1, 2]), None);
    }

    #[test]
    fn test_read_image_frame() {
        let payload: Vec<u8> = [7i32, -3, 1 << 20, 0, 42, -99]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        let mock = MockTransport::new()
            .preload(encoded_frame(2, 3, &payload))
            .chunked(5);
        let mut channel = Channel::new("command", mock.clone());

        let frame = read_image_frame(&mut channel).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.data(), &payload[..]);

        // Exactly one OK, no ack awaited afterwards
        assert_eq!(mock.writes(), vec![OK_REPLY.to_vec()]);
    }

    #[test]
    fn test_read_image_frame_abort() {
        let mock = MockTransport::new()
            .preload(FrameHeader { size: 0, height: 120, width: 560 }.encode())
            .reply("* 1>");
        let mut channel = Channel::new("command", mock.clone());

        let err = read_image_frame(&mut channel).unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(mock.writes(), vec![OK_REPLY.to_vec()]);
        assert_eq!(mock.unread(), 0);
    }

    #[test]
    fn test_read_image_frame_truncated_payload() {
        let mut bytes = encoded_frame(1, 4, &[1u8; 16]);
        bytes.truncate(FRAME_HEADER_LEN + 10);
        let mock = MockTransport::new().preload(bytes);
        let mut channel = Channel::new("command", mock.clone());

        let err = read_image_frame(&mut channel).unwrap_err();
        assert!(err.is_connection());
        assert!(mock.writes().is_empty());
    }
}
