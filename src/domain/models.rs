use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse connection state of the physical reader link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Token published on the status stream for this state.
    pub const fn token(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
        }
    }

    /// Map a raw platform profile state onto a connection state.
    ///
    /// Values outside the four known profile states have no variant and
    /// publish as [`UNKNOWN_CONNECTION_STATE`].
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::Disconnecting),
            _ => None,
        }
    }
}

/// Status token for a profile state the plugin does not recognise.
pub const UNKNOWN_CONNECTION_STATE: &str = "UNKNOWN_CONNECTION_STATE";

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Last card status reported by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardStatus {
    Absent,
    Present,
    Powered,
    PowerSaving,
    #[default]
    Unknown,
}

impl CardStatus {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Present => "Present",
            Self::Powered => "Powered",
            Self::PowerSaving => "Power saving mode",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Availability of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No Bluetooth manager or adapter on this device
    Unavailable,
    Disabled,
    Enabled,
}

/// Outcome reported with a GATT connection state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(i32),
}

/// Reader models the vendor SDK can detect behind a GATT connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderModel {
    /// ACR1255U-J1, the only model this plugin drives
    Acr1255uJ1,
    Acr3901uS1,
    Other(String),
}

impl ReaderModel {
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Acr1255uJ1)
    }
}

impl fmt::Display for ReaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acr1255uJ1 => f.write_str("ACR1255U-J1"),
            Self::Acr3901uS1 => f.write_str("ACR3901U-S1"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// A BLE device reported by the host's scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleDevice {
    pub name: Option<String>,
    pub address: String,
}
