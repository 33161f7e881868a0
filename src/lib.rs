//! BLE plugin for the ACS ACR1255U-J1 smart-card reader.
//!
//! The host attaches an [`NfcAcsPlugin`] with its Bluetooth stack and
//! permission prompt, then talks to it through the returned
//! [`PluginHandle`]: `CONNECT`, `DISCONNECT` and `SEND_APDU` method calls,
//! plus the devices, status, battery and card event streams.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

#[cfg(test)]
mod testing;

pub use domain::error::{MethodResult, PluginError};
pub use domain::models::{BleDevice, CardStatus, ConnectionState, ReaderModel};
pub use domain::settings::{Settings, SettingsService, SleepMode};
pub use infrastructure::reader::transport::{
    BluetoothStack, DetectedReader, ReaderEvent, ReaderEventSender, ReaderTransport,
};
pub use presentation::channel::{MethodCall, StreamKind};
pub use presentation::plugin::{NfcAcsPlugin, PermissionGate, PluginHandle};
