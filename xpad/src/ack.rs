/*!
Acknowledgement line parsing.

Every reply the detector server sends on either channel is a single text line
terminated by `>`. The first whitespace-separated token that starts with one of
the markers `*`, `#` or `!` decides the shape of the reply:

- `*` success, the payload is the first quoted segment when the line contains a
  `"`, otherwise the token right after the marker
- `#` success, the payload is the text after the first `#`
- `!` device-reported error, the payload is the text after the first `!`
*/

use crate::error::{Result, XpadError};

/// Byte closing every acknowledgement line
pub const ACK_TERMINATOR: u8 = b'>';

/// Reply shape, selected by the marker token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// `*` marker
    Value,
    /// `#` marker
    Message,
    /// `!` marker
    Error,
}

impl AckKind {
    /// Map a marker character to its reply shape
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            '*' => Some(Self::Value),
            '#' => Some(Self::Message),
            '!' => Some(Self::Error),
            _ => None,
        }
    }

    /// Marker character as sent on the wire
    pub fn marker(self) -> char {
        match self {
            Self::Value => '*',
            Self::Message => '#',
            Self::Error => '!',
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// A decoded acknowledgement line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub kind: AckKind,
    pub payload: String,
}

impl Ack {
    /// Decode one raw acknowledgement line (terminator optional)
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(line);
        let body = strip_terminator(&text);
        let tokens: Vec<&str> = body.split_whitespace().collect();

        // First marker wins; the whole token list is scanned so a marker in
        // last position is found and then rejected below for lack of payload.
        let (index, kind) = tokens
            .iter()
            .enumerate()
            .find_map(|(i, token)| {
                token
                    .chars()
                    .next()
                    .and_then(AckKind::from_marker)
                    .map(|kind| (i, kind))
            })
            .ok_or_else(|| XpadError::malformed(text.as_ref()))?;

        let payload = match kind {
            AckKind::Value => {
                if body.contains('"') {
                    body.split('"').nth(1).map(str::to_string)
                } else {
                    let token = tokens[index];
                    if token.len() > 1 {
                        Some(token[1..].to_string())
                    } else {
                        tokens.get(index + 1).map(|t| t.to_string())
                    }
                }
            }
            AckKind::Message | AckKind::Error => body
                .split_once(kind.marker())
                .map(|(_, rest)| rest.trim())
                .filter(|rest| !rest.is_empty())
                .map(str::to_string),
        };

        let payload = payload.ok_or_else(|| XpadError::malformed(text.as_ref()))?;
        Ok(Self { kind, payload })
    }

    /// Payload of a successful reply; `!` replies become [`XpadError::DeviceError`]
    pub fn into_value(self) -> Result<String> {
        if self.kind.is_error() {
            Err(XpadError::DeviceError(self.payload))
        } else {
            Ok(self.payload)
        }
    }

    /// Integer payload, as most setters and getters reply
    pub fn int_value(self, command: &str) -> Result<i64> {
        let value = self.into_value()?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| XpadError::invalid_value(command, value))
    }
}

/// Parse a line and return its success payload
pub fn parse_ack(line: &[u8]) -> Result<String> {
    Ack::parse(line)?.into_value()
}

fn strip_terminator(text: &str) -> &str {
    let trimmed = text.trim_end();
    trimmed
        .strip_suffix(ACK_TERMINATOR as char)
        .unwrap_or(trimmed)
        .trim()
}
