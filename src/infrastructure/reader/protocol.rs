//! ACR1255U-J1 Protocol
//!
//! Fixed reader commands and the wire encoding of APDU payloads exchanged
//! with the application.

use crate::domain::error::PluginError;
use crate::domain::settings::SleepMode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// APDU asking the card for its identifier (UID)
pub const GET_CARD_ID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

/// Separator between base64 segments of a multi-command SEND_APDU payload
pub const SEGMENT_SEPARATOR: char = '|';

/// Vendor escape commands understood by the reader (not sent to the card)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeCommand {
    /// Start continuous card presence detection
    AutoPollingStart,
    /// Stop continuous card presence detection
    AutoPollingStop,
    /// Configure the idle time before the reader sleeps
    SleepMode(SleepMode),
}

impl EscapeCommand {
    /// Get the raw bytes for this command
    pub const fn as_bytes(&self) -> [u8; 5] {
        match self {
            Self::AutoPollingStart => [0xE0, 0x00, 0x00, 0x40, 0x01],
            Self::AutoPollingStop => [0xE0, 0x00, 0x00, 0x40, 0x00],
            Self::SleepMode(mode) => [0xE0, 0x00, 0x00, 0x48, mode.as_byte()],
        }
    }
}

/// Decode a SEND_APDU payload: one base64 blob, or several joined by `|`.
///
/// Trailing empty segments are ignored. An all-empty payload counts as a
/// missing command.
pub fn decode_apdu_payload(encoded: &str) -> Result<Vec<Vec<u8>>, PluginError> {
    let mut segments: Vec<&str> = encoded.split(SEGMENT_SEPARATOR).collect();
    while segments.last().is_some_and(|s| s.trim().is_empty()) {
        segments.pop();
    }

    if segments.is_empty() {
        return Err(PluginError::MissingApduCommand);
    }

    segments
        .into_iter()
        .map(|segment| {
            // Line breaks are legal inside platform base64 output
            let compact: String = segment.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| PluginError::InvalidApduCommand(e.to_string()))
        })
        .collect()
}

/// Uppercase hex, one space between bytes: `[0x04, 0xA2]` -> `"04 A2"`.
pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Response payload with the trailing 2-byte status word removed.
pub fn strip_status_word(response: &[u8]) -> &[u8] {
    &response[..response.len().saturating_sub(2)]
}
