/*!
Error types for the XPAD protocol client.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the protocol client
pub type Result<T> = std::result::Result<T, XpadError>;

/// Every failure the protocol and session layers can report
#[derive(Error, Debug)]
pub enum XpadError {
    /// Transport fault or peer closure on one of the two channels
    #[error("Connection error on {channel} channel: {source}")]
    Connection {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Acknowledgement line without a recognized marker
    #[error("Malformed response: {0:?}")]
    MalformedResponse(String),

    /// `!`-marked acknowledgement reported by the detector server
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Server acknowledged the command but signalled non-success
    #[error("Command {command} rejected by server (reply: {reply:?})")]
    CommandRejected { command: String, reply: String },

    /// Acknowledgement payload that does not decode to the expected value
    #[error("Invalid value {value:?} in reply to {command}")]
    InvalidValue { command: String, value: String },

    #[error("No module connected")]
    NoModulesConnected,

    /// Image size field of 0: the acquisition was aborted server side
    #[error("Read image aborted")]
    AcquisitionAborted,

    #[error("Digital test produced no image data")]
    DigitalTestFailed,

    #[error("Calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("Calibration file does not exist: {}", .0.display())]
    CalibrationFileMissing(PathBuf),

    /// Local file I/O (calibration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XpadError {
    /// Create a connection error for the named channel
    pub fn connection(channel: &'static str, source: std::io::Error) -> Self {
        Self::Connection { channel, source }
    }

    /// Create a connection error for a stream that ended early
    pub fn peer_closed(channel: &'static str) -> Self {
        Self::Connection {
            channel,
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ),
        }
    }

    /// Create a malformed response error from the raw line
    pub fn malformed(line: impl Into<String>) -> Self {
        Self::MalformedResponse(line.into())
    }

    /// Create a command rejected error
    pub fn rejected(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::CommandRejected {
            command: command.into(),
            reply: reply.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(command: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            command: command.into(),
            value: value.into(),
        }
    }

    /// True when the server aborted the running acquisition
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::AcquisitionAborted)
    }

    /// True when the error leaves a channel unusable
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
