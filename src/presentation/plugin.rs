//! Plugin owner task
//!
//! All plugin state lives in one tokio task. Host calls, permission results,
//! lifecycle events and transport callbacks are posted to it as
//! [`PluginMessage`]s and handled strictly one at a time.

use crate::domain::error::{MethodResult, PluginError};
use crate::domain::models::BleDevice;
use crate::domain::settings::SettingsService;
use crate::infrastructure::logging::{init_logger, LoggingGuard};
use crate::infrastructure::reader::streams::{EventSink, StreamEvent};
use crate::infrastructure::reader::transport::{BluetoothStack, ReaderEvent, ReaderEventSender};
use crate::infrastructure::reader::SessionController;
use crate::presentation::channel::{MethodCall, StreamKind, CONNECT, DISCONNECT, SEND_APDU};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runtime permission checks, answered by the host.
pub trait PermissionGate: Send {
    fn has_permissions(&self) -> bool;

    /// Prompt for permissions. The outcome comes back through
    /// [`PluginHandle::permissions_resolved`].
    fn request_permissions(&mut self);
}

/// A listener attaching to one of the event streams.
#[derive(Debug)]
pub enum Listener {
    Devices(EventSink<BleDevice>),
    Status(EventSink<String>),
    Battery(EventSink<u8>),
    Card(EventSink<String>),
}

#[derive(Debug)]
pub enum PluginMessage {
    MethodCall {
        call: MethodCall,
        reply: oneshot::Sender<MethodResult>,
    },
    Listen(Listener),
    Cancel(StreamKind),
    PermissionsResolved(bool),
    Reader(ReaderEvent),
    DeviceDiscovered(BleDevice),
    Resumed,
    Detached,
}

/// A call waiting for the permission prompt to resolve.
struct ParkedCall {
    call: MethodCall,
    reply: oneshot::Sender<MethodResult>,
}

pub struct NfcAcsPlugin {
    controller: SessionController,
    permissions: Box<dyn PermissionGate>,
    parked: Vec<ParkedCall>,
    rx: mpsc::UnboundedReceiver<PluginMessage>,
}

impl NfcAcsPlugin {
    /// Spawn the owner task on the current tokio runtime.
    pub fn attach(
        stack: Box<dyn BluetoothStack>,
        permissions: Box<dyn PermissionGate>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> (PluginHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(stack, ReaderEventSender::new(tx.clone()), settings);

        let plugin = Self {
            controller,
            permissions,
            parked: Vec::new(),
            rx,
        };

        let task = tokio::spawn(plugin.run());
        (PluginHandle { tx }, task)
    }

    /// Load the stored settings, start logging and attach.
    ///
    /// Keep the returned guard alive for as long as file logging should run.
    pub fn bootstrap(
        stack: Box<dyn BluetoothStack>,
        permissions: Box<dyn PermissionGate>,
    ) -> anyhow::Result<(PluginHandle, JoinHandle<()>, LoggingGuard)> {
        let settings_service = SettingsService::new()?;
        let logging_guard = init_logger(&settings_service.get().log_settings)?;

        let (handle, task) =
            Self::attach(stack, permissions, Arc::new(Mutex::new(settings_service)));
        Ok((handle, task, logging_guard))
    }

    async fn run(mut self) {
        info!("NFC ACS plugin attached");

        while let Some(message) = self.rx.recv().await {
            if let PluginMessage::Detached = message {
                break;
            }
            self.handle(message);
        }

        self.detach();
    }

    fn handle(&mut self, message: PluginMessage) {
        match message {
            PluginMessage::MethodCall { call, reply } => self.on_method_call(call, reply),
            PluginMessage::Listen(listener) => self.on_listen(listener),
            PluginMessage::Cancel(kind) => self.on_cancel(kind),
            PluginMessage::PermissionsResolved(granted) => self.on_permissions_resolved(granted),
            PluginMessage::Reader(event) => self.controller.handle_reader_event(event),
            PluginMessage::DeviceDiscovered(device) => self.controller.device_discovered(device),
            PluginMessage::Resumed => self.controller.resume(),
            PluginMessage::Detached => {}
        }
    }

    fn on_method_call(&mut self, call: MethodCall, reply: oneshot::Sender<MethodResult>) {
        debug!("Method call: {}", call.method);

        if !is_known_method(&call.method) {
            let _ = reply.send(Err(PluginError::NotImplemented(call.method)));
            return;
        }

        if !self.permissions.has_permissions() {
            let prompt = self.parked.is_empty();
            self.parked.push(ParkedCall { call, reply });
            if prompt {
                info!("Requesting permissions");
                self.permissions.request_permissions();
            }
            return;
        }

        let result = self.execute(&call);
        let _ = reply.send(result);
    }

    fn execute(&mut self, call: &MethodCall) -> MethodResult {
        match call.method.as_str() {
            CONNECT => self
                .controller
                .connect(call.argument("address").map(str::to_owned)),
            DISCONNECT => {
                self.controller.disconnect();
                Ok(())
            }
            SEND_APDU => self.controller.send_apdu(call.argument("data")),
            other => Err(PluginError::NotImplemented(other.to_string())),
        }
    }

    fn on_permissions_resolved(&mut self, granted: bool) {
        if !granted {
            warn!("Permissions denied, rejecting {} call(s)", self.parked.len());
        }

        for ParkedCall { call, reply } in std::mem::take(&mut self.parked) {
            let result = if granted {
                self.execute(&call)
            } else {
                Err(PluginError::NoPermissions)
            };
            let _ = reply.send(result);
        }
    }

    fn on_listen(&mut self, listener: Listener) {
        match listener {
            Listener::Devices(sink) => self.controller.listen_devices(sink),
            Listener::Status(sink) => self.controller.listen_status(sink),
            Listener::Battery(sink) => self.controller.listen_battery(sink),
            Listener::Card(sink) => self.controller.listen_card(sink),
        }
    }

    fn on_cancel(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Devices => self.controller.cancel_devices(),
            StreamKind::Status => self.controller.cancel_status(),
            StreamKind::Battery => self.controller.cancel_battery(),
            StreamKind::Card => self.controller.cancel_card(),
        }
    }

    fn detach(&mut self) {
        self.controller.teardown();
        for ParkedCall { reply, .. } in self.parked.drain(..) {
            let _ = reply.send(Err(PluginError::Detached));
        }
        info!("NFC ACS plugin detached");
    }
}

fn is_known_method(method: &str) -> bool {
    matches!(method, CONNECT | DISCONNECT | SEND_APDU)
}

/// Host-side handle to a running plugin.
#[derive(Clone, Debug)]
pub struct PluginHandle {
    tx: mpsc::UnboundedSender<PluginMessage>,
}

impl PluginHandle {
    /// Invoke a method; resolves once the owner task has handled it.
    pub async fn invoke(&self, call: MethodCall) -> MethodResult {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(PluginMessage::MethodCall { call, reply })
            .map_err(|_| PluginError::Detached)?;
        response.await.map_err(|_| PluginError::Detached)?
    }

    pub async fn connect(&self, address: &str) -> MethodResult {
        self.invoke(MethodCall::new(CONNECT, json!({ "address": address })))
            .await
    }

    pub async fn disconnect(&self) -> MethodResult {
        self.invoke(MethodCall::bare(DISCONNECT)).await
    }

    /// Send one base64 APDU, or several joined by `|`.
    pub async fn send_apdu(&self, data: &str) -> MethodResult {
        self.invoke(MethodCall::new(SEND_APDU, json!({ "data": data })))
            .await
    }

    pub fn listen_devices(&self) -> mpsc::UnboundedReceiver<StreamEvent<BleDevice>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post(PluginMessage::Listen(Listener::Devices(tx)));
        rx
    }

    pub fn listen_status(&self) -> mpsc::UnboundedReceiver<StreamEvent<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post(PluginMessage::Listen(Listener::Status(tx)));
        rx
    }

    pub fn listen_battery(&self) -> mpsc::UnboundedReceiver<StreamEvent<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post(PluginMessage::Listen(Listener::Battery(tx)));
        rx
    }

    pub fn listen_card(&self) -> mpsc::UnboundedReceiver<StreamEvent<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.post(PluginMessage::Listen(Listener::Card(tx)));
        rx
    }

    pub fn cancel(&self, kind: StreamKind) {
        self.post(PluginMessage::Cancel(kind));
    }

    /// Sender for the BLE stack and reader driver callbacks.
    pub fn reader_events(&self) -> ReaderEventSender {
        ReaderEventSender::new(self.tx.clone())
    }

    pub fn permissions_resolved(&self, granted: bool) {
        self.post(PluginMessage::PermissionsResolved(granted));
    }

    pub fn device_discovered(&self, device: BleDevice) {
        self.post(PluginMessage::DeviceDiscovered(device));
    }

    /// The host activity came back to the foreground.
    pub fn resumed(&self) {
        self.post(PluginMessage::Resumed);
    }

    pub fn detach(&self) {
        self.post(PluginMessage::Detached);
    }

    fn post(&self, message: PluginMessage) {
        if self.tx.send(message).is_err() {
            debug!("Plugin already detached, message dropped");
        }
    }
}
