//! Recording doubles for the BLE stack and the reader driver.

use crate::domain::models::{AdapterState, BleDevice};
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::reader::exchange::BoxedReader;
use crate::infrastructure::reader::transport::{BluetoothStack, ReaderEventSender, ReaderTransport};
use std::sync::{Arc, Mutex};

/// Settings held in memory; nothing is read from or written to disk.
pub fn settings(settings: Settings) -> Arc<Mutex<SettingsService>> {
    let path = std::env::temp_dir()
        .join("acs_ble_reader_unsaved")
        .join("settings.json");
    let mut service = SettingsService::with_path(path);
    *service.get_mut() = settings;
    Arc::new(Mutex::new(service))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ConnectGatt(String),
    DisconnectGatt,
    CloseGatt,
    DetectReader,
    EnableNotification(bool),
    Authenticate(Vec<u8>),
    Apdu(Vec<u8>),
    Escape(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn apdus(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Apdu(apdu) => Some(apdu),
                _ => None,
            })
            .collect()
    }

    pub fn escapes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Escape(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.0.lock().unwrap().contains(call)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct MockReader {
    log: CallLog,
    accepts: bool,
}

impl MockReader {
    pub fn new(log: CallLog) -> Self {
        Self { log, accepts: true }
    }

    /// A reader that records requests but refuses to dispatch them.
    pub fn refusing(log: CallLog) -> Self {
        Self {
            log,
            accepts: false,
        }
    }

    pub fn boxed() -> (BoxedReader, CallLog) {
        let log = CallLog::default();
        (Box::new(Self::new(log.clone())), log)
    }
}

impl ReaderTransport for MockReader {
    fn enable_notification(&mut self, enable: bool) -> bool {
        self.log.push(Call::EnableNotification(enable));
        self.accepts
    }

    fn authenticate(&mut self, master_key: &[u8]) -> bool {
        self.log.push(Call::Authenticate(master_key.to_vec()));
        self.accepts
    }

    fn transmit_apdu(&mut self, apdu: &[u8]) -> bool {
        self.log.push(Call::Apdu(apdu.to_vec()));
        self.accepts
    }

    fn transmit_escape_command(&mut self, command: &[u8]) -> bool {
        self.log.push(Call::Escape(command.to_vec()));
        self.accepts
    }
}

pub struct MockStack {
    log: CallLog,
    adapter: AdapterState,
    known_addresses: Vec<String>,
}

impl MockStack {
    /// An enabled adapter that can resolve `address`.
    pub fn with_device(log: CallLog, address: &str) -> Self {
        Self {
            log,
            adapter: AdapterState::Enabled,
            known_addresses: vec![address.to_string()],
        }
    }

    pub fn with_adapter(mut self, adapter: AdapterState) -> Self {
        self.adapter = adapter;
        self
    }
}

impl BluetoothStack for MockStack {
    fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    fn resolve_device(&self, address: &str) -> Option<BleDevice> {
        self.known_addresses
            .iter()
            .any(|known| known == address)
            .then(|| BleDevice {
                name: Some("ACR1255U-J1-000001".to_string()),
                address: address.to_string(),
            })
    }

    fn connect_gatt(&mut self, device: &BleDevice, _events: ReaderEventSender) {
        self.log.push(Call::ConnectGatt(device.address.clone()));
    }

    fn disconnect_gatt(&mut self) {
        self.log.push(Call::DisconnectGatt);
    }

    fn close_gatt(&mut self) {
        self.log.push(Call::CloseGatt);
    }

    fn detect_reader(&mut self, _events: ReaderEventSender) {
        self.log.push(Call::DetectReader);
    }
}
