//! Method channel surface
//!
//! Host method calls arrive as a method name plus a JSON argument map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const CONNECT: &str = "CONNECT";
pub const DISCONNECT: &str = "DISCONNECT";
pub const SEND_APDU: &str = "SEND_APDU";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// A call without arguments.
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }

    /// String argument `key`; `None` when absent, null or not a string.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// The event streams a host can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Devices,
    Status,
    Battery,
    Card,
}

impl StreamKind {
    pub const fn channel_name(self) -> &'static str {
        match self {
            StreamKind::Devices => "flutter.nuvopoint.com/nfc/acs/devices",
            StreamKind::Status => "flutter.nuvopoint.com/nfc/acs/device/status",
            StreamKind::Battery => "flutter.nuvopoint.com/nfc/acs/device/battery",
            StreamKind::Card => "flutter.nuvopoint.com/nfc/acs/device/card",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_name())
    }
}
