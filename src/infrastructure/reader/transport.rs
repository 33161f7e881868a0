//! Reader Transport Seams
//!
//! The BLE stack and the vendor reader driver live outside this crate. They
//! are reached through [`BluetoothStack`] and [`ReaderTransport`], and they
//! report back by posting [`ReaderEvent`]s through a [`ReaderEventSender`]
//! from whatever thread their callbacks run on.

use crate::domain::models::{AdapterState, BleDevice, CardStatus, GattStatus, ReaderModel};
use crate::presentation::plugin::PluginMessage;
use std::fmt;
use tokio::sync::mpsc;

/// Platform Bluetooth access needed to open and close the GATT link.
pub trait BluetoothStack: Send {
    fn adapter_state(&self) -> AdapterState;

    /// Look up the remote device for a transport address.
    fn resolve_device(&self, address: &str) -> Option<BleDevice>;

    /// Start a GATT connection. Completion arrives as
    /// [`ReaderEvent::GattStateChanged`].
    fn connect_gatt(&mut self, device: &BleDevice, events: ReaderEventSender);

    fn disconnect_gatt(&mut self);

    fn close_gatt(&mut self);

    /// Ask the vendor SDK which reader sits behind the open GATT link.
    /// Completion arrives as [`ReaderEvent::ReaderDetected`].
    fn detect_reader(&mut self, events: ReaderEventSender);
}

/// Requests accepted by a detected reader.
///
/// Every method only dispatches the request and reports whether that
/// worked; outcomes arrive later as [`ReaderEvent`]s.
pub trait ReaderTransport: Send {
    fn enable_notification(&mut self, enable: bool) -> bool;

    fn authenticate(&mut self, master_key: &[u8]) -> bool;

    fn transmit_apdu(&mut self, apdu: &[u8]) -> bool;

    fn transmit_escape_command(&mut self, command: &[u8]) -> bool;
}

/// Reader found behind a GATT link, classified once at detection time.
pub enum DetectedReader {
    Supported(Box<dyn ReaderTransport>),
    Unsupported(ReaderModel),
}

impl DetectedReader {
    pub fn new(model: ReaderModel, reader: Box<dyn ReaderTransport>) -> Self {
        if model.is_supported() {
            Self::Supported(reader)
        } else {
            Self::Unsupported(model)
        }
    }
}

impl fmt::Debug for DetectedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supported(_) => f.write_str("Supported"),
            Self::Unsupported(model) => write!(f, "Unsupported({})", model),
        }
    }
}

/// Callbacks from the BLE stack and the reader driver.
#[derive(Debug)]
pub enum ReaderEvent {
    /// GATT link state changed; `new_state` is the raw platform profile state
    GattStateChanged { status: GattStatus, new_state: i32 },
    ReaderDetected(DetectedReader),
    NotificationsEnabled { success: bool },
    AuthenticationComplete { success: bool },
    EscapeResponse { response: Vec<u8>, success: bool },
    CardStatusChanged(CardStatus),
    /// Response to a transmitted APDU, or the reader's error code
    ApduResponse(Result<Vec<u8>, i32>),
    BatteryLevel(u8),
}

/// Cloneable, thread-safe handle used by transport callbacks to hand events
/// to the plugin's owner task.
#[derive(Clone)]
pub struct ReaderEventSender {
    tx: mpsc::UnboundedSender<PluginMessage>,
}

impl ReaderEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PluginMessage>) -> Self {
        Self { tx }
    }

    /// Post an event. Events sent after the plugin detached are dropped.
    pub fn send(&self, event: ReaderEvent) {
        let _ = self.tx.send(PluginMessage::Reader(event));
    }
}

impl fmt::Debug for ReaderEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderEventSender").finish_non_exhaustive()
    }
}
