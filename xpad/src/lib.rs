/*!
# XPAD Detector Client

Client driver for the XPAD detector control server. The server is driven over
two TCP connections to the same endpoint: a command channel carrying text
commands and the binary image stream, and a status channel reserved for
status polls and aborts.

## Core Types

- [`DeviceSession`] - Connected detector, every server command
- [`StatusHandle`] - Status polling and abort from another thread
- [`ImageFrame`] - One acquired image
- [`Ack`] - Decoded acknowledgement line
- [`XpadError`] - Error taxonomy of the client

## Modules

- [`ack`] - Acknowledgement line parsing
- [`codec`] - Command lines, length prefixes and image frames
- [`channel`] - One blocking connection to the server
- [`session`] - Command surface and exposure workflow
- [`calibration`] - Calibration file save and restore
- [`types`] - Wire enumerations
*/

pub mod ack;
pub mod calibration;
pub mod channel;
pub mod codec;
pub mod error;
pub mod frame;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use ack::{parse_ack, Ack, AckKind};
pub use calibration::{calibration_path, format_global_register};
pub use channel::{Channel, SocketOptions};
pub use codec::{Command, FrameHeader};
pub use error::{Result, XpadError};
pub use frame::ImageFrame;
pub use session::{DeviceSession, ExposureOutcome, ExposureSettings, SessionOptions, StatusHandle};
pub use transport::Transport;
pub use types::{
    AcqMode, CalibrationSpeed, DetInformation, DetectorStatus, GlobalRegister, OutSignal,
    TriggerMode,
};

/// Version information for the client library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Port the detector server listens on by default
    pub const DEFAULT_PORT: u16 = 3456;

    /// Terminator of every acknowledgement line
    pub const ACK_TERMINATOR: u8 = crate::ack::ACK_TERMINATOR;

    /// Size of an image frame header in bytes
    pub const FRAME_HEADER_LEN: usize = crate::codec::FRAME_HEADER_LEN;

    /// Reply sent after each framed payload
    pub const OK_REPLY: &[u8] = crate::codec::OK_REPLY;
}
