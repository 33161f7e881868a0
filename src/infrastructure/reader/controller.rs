//! Reader Session Controller
//!
//! Owns the GATT link and walks a freshly connected reader through its
//! setup: detect -> enable notifications -> authenticate -> configure sleep
//! mode -> start auto-polling. Publishes the coarse connection state on the
//! status stream and routes card traffic to the [`CardExchange`].

use crate::domain::error::{MethodResult, PluginError};
use crate::domain::models::{
    AdapterState, BleDevice, ConnectionState, GattStatus, UNKNOWN_CONNECTION_STATE,
};
use crate::domain::settings::{ReaderConfig, SettingsService};
use crate::infrastructure::reader::exchange::{BoxedReader, CardExchange};
use crate::infrastructure::reader::listener::OneShot;
use crate::infrastructure::reader::protocol::{self, EscapeCommand};
use crate::infrastructure::reader::streams::{EventSink, Subscriptions};
use crate::infrastructure::reader::transport::{
    BluetoothStack, DetectedReader, ReaderEvent, ReaderEventSender,
};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// What to do when the reader answers the pending escape command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeAction {
    StartPolling,
}

/// State that lives exactly as long as one physical connection.
#[derive(Default)]
struct Session {
    reader: Option<BoxedReader>,
    exchange: CardExchange,
    escape_listener: OneShot<EscapeAction>,
    battery_bound: bool,
}

pub struct SessionController {
    stack: Box<dyn BluetoothStack>,
    events: ReaderEventSender,
    settings: Arc<Mutex<SettingsService>>,
    /// Kept across disconnects so the link can be restored on resume
    address: Option<String>,
    /// `None` while the platform reports a state with no known meaning
    state: Option<ConnectionState>,
    gatt_open: bool,
    session: Session,
    streams: Subscriptions,
}

impl SessionController {
    pub fn new(
        stack: Box<dyn BluetoothStack>,
        events: ReaderEventSender,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        Self {
            stack,
            events,
            settings,
            address: None,
            state: Some(ConnectionState::Disconnected),
            gatt_open: false,
            session: Session::default(),
            streams: Subscriptions::default(),
        }
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn exchange(&self) -> &CardExchange {
        &self.session.exchange
    }

    pub fn has_reader(&self) -> bool {
        self.session.reader.is_some()
    }

    /// Remember `address` and start connecting to it.
    ///
    /// Success only means the connection attempt was dispatched.
    pub fn connect(&mut self, address: Option<String>) -> MethodResult {
        self.address = address.filter(|a| !a.trim().is_empty());
        if self.address.is_none() {
            return Err(PluginError::MissingAddress);
        }

        if self.connect_to_reader() {
            Ok(())
        } else {
            Err(PluginError::DeviceNotFound)
        }
    }

    pub fn connect_to_reader(&mut self) -> bool {
        let Some(address) = self.address.clone() else {
            return false;
        };

        match self.stack.adapter_state() {
            AdapterState::Unavailable => {
                self.set_state(Some(ConnectionState::Disconnected));
                error!("Bluetooth adapter unavailable - cannot connect");
                return false;
            }
            AdapterState::Disabled => {
                warn!("Bluetooth was not enabled!");
                return false;
            }
            AdapterState::Enabled => {}
        }

        let Some(device) = self.stack.resolve_device(&address) else {
            warn!("Device {} not found. Unable to connect.", address);
            return false;
        };

        if self.gatt_open {
            self.stack.disconnect_gatt();
            self.stack.close_gatt();
            self.end_session();
        }

        info!("Connecting to reader: {}", address);
        self.set_state(Some(ConnectionState::Connecting));
        self.stack.connect_gatt(&device, self.events.clone());
        self.gatt_open = true;
        true
    }

    /// Request a disconnect and publish `Disconnected` without waiting for
    /// the link to confirm it.
    pub fn disconnect(&mut self) {
        if self.gatt_open {
            self.stack.disconnect_gatt();
        }
        self.end_session();
        self.set_state(Some(ConnectionState::Disconnected));
    }

    /// Host came back to the foreground.
    pub fn resume(&mut self) {
        if !self.reconnect_on_resume() {
            return;
        }
        if self.address.is_some() && self.state == Some(ConnectionState::Disconnected) {
            info!("Reconnecting after resume");
            self.connect_to_reader();
        }
    }

    /// Queue the base64 payload of a SEND_APDU call.
    pub fn send_apdu(&mut self, data: Option<&str>) -> MethodResult {
        let encoded = data.ok_or(PluginError::MissingApduCommand)?;
        let mut commands = protocol::decode_apdu_payload(encoded)?;

        if commands.len() == 1 {
            let apdu = commands.remove(0);
            info!("Queued APDU of {} bytes", apdu.len());
            self.session.exchange.send_apdu(apdu);
        } else {
            info!("Queued {} chained APDUs", commands.len());
            self.session
                .exchange
                .send_multiple_apdu_with_merged_result(commands, self.session.reader.as_mut());
        }
        Ok(())
    }

    pub fn handle_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::GattStateChanged { status, new_state } => {
                self.on_gatt_state_changed(status, new_state)
            }
            ReaderEvent::ReaderDetected(detected) => self.on_reader_detected(detected),
            ReaderEvent::NotificationsEnabled { success } => self.on_notifications_enabled(success),
            ReaderEvent::AuthenticationComplete { success } => {
                self.on_authentication_complete(success)
            }
            ReaderEvent::EscapeResponse { success, .. } => self.on_escape_response(success),
            ReaderEvent::CardStatusChanged(status) => {
                if let Some(reader) = self.session.reader.as_mut() {
                    self.session.exchange.on_card_status(status, reader);
                }
            }
            ReaderEvent::ApduResponse(result) => {
                if let Some(reader) = self.session.reader.as_mut() {
                    self.session
                        .exchange
                        .on_apdu_response(result, reader, &self.streams.card);
                }
            }
            ReaderEvent::BatteryLevel(level) => {
                if self.session.battery_bound {
                    self.streams.battery.success(level);
                }
            }
        }
    }

    pub fn listen_status(&mut self, sink: EventSink<String>) {
        self.streams.status.attach(sink);
        self.notify_status_listeners();
    }

    pub fn cancel_status(&mut self) {
        self.streams.status.detach();
    }

    pub fn listen_card(&mut self, sink: EventSink<String>) {
        self.streams.card.attach(sink);
        if let Some(reader) = self.session.reader.as_mut() {
            self.session.exchange.start_polling(reader);
        }
    }

    pub fn cancel_card(&mut self) {
        self.session
            .exchange
            .dispose(self.session.reader.as_mut(), &mut self.streams.card);
    }

    pub fn listen_battery(&mut self, sink: EventSink<u8>) {
        self.streams.battery.attach(sink);
    }

    pub fn cancel_battery(&mut self) {
        self.streams.battery.detach();
    }

    pub fn listen_devices(&mut self, sink: EventSink<BleDevice>) {
        self.streams.devices.attach(sink);
    }

    pub fn cancel_devices(&mut self) {
        self.streams.devices.detach();
    }

    pub fn device_discovered(&mut self, device: BleDevice) {
        self.streams.devices.success(device);
    }

    /// Plugin detached from the host: stop the reader and drop every listener.
    pub fn teardown(&mut self) {
        self.session
            .exchange
            .dispose(self.session.reader.as_mut(), &mut self.streams.card);
        self.session.battery_bound = false;
        self.disconnect();
        self.streams.clear();
    }

    fn on_gatt_state_changed(&mut self, status: GattStatus, new_state: i32) {
        let state = ConnectionState::from_raw(new_state);

        if let GattStatus::Failure(code) = status {
            self.set_state(Some(ConnectionState::Disconnected));
            match state {
                Some(ConnectionState::Connected) => warn!("Could not connect to GATT ({})", code),
                Some(ConnectionState::Disconnected) => {
                    warn!("Could not disconnect from GATT ({})", code)
                }
                _ => warn!("GATT transition to {} failed ({})", new_state, code),
            }
            return;
        }

        self.set_state(state);

        match state {
            Some(ConnectionState::Connected) => {
                info!("GATT connected, detecting reader");
                self.stack.detect_reader(self.events.clone());
            }
            Some(ConnectionState::Disconnected) => {
                if self.gatt_open {
                    self.stack.disconnect_gatt();
                    self.stack.close_gatt();
                    self.gatt_open = false;
                }
                self.end_session();
                info!("GATT disconnected");
            }
            _ => {}
        }
    }

    fn on_reader_detected(&mut self, detected: DetectedReader) {
        let mut reader = match detected {
            DetectedReader::Supported(reader) => reader,
            DetectedReader::Unsupported(model) => {
                self.streams.status.error(PluginError::DeviceNotSupported);
                warn!("Reader not supported: {}", model);
                self.disconnect();
                return;
            }
        };

        info!("Supported reader detected");
        self.session.battery_bound = true;

        // Battery level, card status and response notifications
        if !reader.enable_notification(true) {
            warn!("Could not request notifications from the reader");
        }
        self.session.reader = Some(reader);
    }

    fn on_notifications_enabled(&mut self, success: bool) {
        let config = self.reader_config();
        let Some(reader) = self.session.reader.as_mut() else {
            return;
        };

        if !success {
            warn!("Enabling notifications failed");
        } else if !reader.authenticate(&config.auth_key) {
            warn!("Card reader not ready");
        }
    }

    fn on_authentication_complete(&mut self, success: bool) {
        if !success {
            warn!("Authentication failed");
            return;
        }

        let config = self.reader_config();
        let Some(reader) = self.session.reader.as_mut() else {
            return;
        };

        info!("Authentication successful");
        self.session.exchange.bind();
        self.session.escape_listener.arm(EscapeAction::StartPolling);

        let sleep_mode = EscapeCommand::SleepMode(config.sleep_mode);
        if !reader.transmit_escape_command(&sleep_mode.as_bytes()) {
            warn!("Reader did not accept the sleep mode command");
        }
    }

    fn on_escape_response(&mut self, success: bool) {
        let Some(action) = self.session.escape_listener.take() else {
            return;
        };

        if !success {
            warn!("Sleep mode configuration failed, polling not started");
            return;
        }

        match action {
            EscapeAction::StartPolling => {
                if let Some(reader) = self.session.reader.as_mut() {
                    self.session.exchange.start_polling(reader);
                }
            }
        }
    }

    fn end_session(&mut self) {
        self.session = Session::default();
    }

    fn set_state(&mut self, state: Option<ConnectionState>) {
        self.state = state;
        self.notify_status_listeners();
    }

    fn notify_status_listeners(&self) {
        let token = self.state.map_or(UNKNOWN_CONNECTION_STATE, ConnectionState::token);
        self.streams.status.success(token.to_string());
    }

    fn reader_config(&self) -> ReaderConfig {
        match self.settings.lock() {
            Ok(settings) => settings.get().reader_config(),
            Err(_) => {
                warn!("Settings lock poisoned, using the default reader config");
                ReaderConfig::default()
            }
        }
    }

    fn reconnect_on_resume(&self) -> bool {
        self.settings
            .lock()
            .map(|settings| settings.get().reconnect_on_resume)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CardStatus;
    use crate::domain::settings::{Settings, SleepMode};
    use crate::infrastructure::reader::exchange::ExchangePhase;
    use crate::infrastructure::reader::protocol::GET_CARD_ID;
    use crate::testing::{self, Call, CallLog, MockReader, MockStack};
    use tokio::sync::mpsc;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
    const CONNECTED: i32 = 2;
    const DISCONNECTED: i32 = 0;

    fn controller_with(
        stack: MockStack,
        settings: Settings,
    ) -> (SessionController, mpsc::UnboundedReceiver<crate::presentation::plugin::PluginMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(
            Box::new(stack),
            ReaderEventSender::new(tx),
            testing::settings(settings),
        );
        (controller, rx)
    }

    fn setup() -> (SessionController, CallLog) {
        let log = CallLog::default();
        let (controller, _rx) =
            controller_with(MockStack::with_device(log.clone(), ADDRESS), Settings::default());
        (controller, log)
    }

    fn status_listener(
        controller: &mut SessionController,
    ) -> mpsc::UnboundedReceiver<Result<String, PluginError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        controller.listen_status(tx);
        rx
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn tokens(rx: &mut mpsc::UnboundedReceiver<Result<String, PluginError>>) -> Vec<String> {
        drain(rx).into_iter().filter_map(Result::ok).collect()
    }

    fn gatt(controller: &mut SessionController, status: GattStatus, new_state: i32) {
        controller.handle_reader_event(ReaderEvent::GattStateChanged { status, new_state });
    }

    /// Connect and walk the reader through the whole setup sequence.
    fn ready_reader(controller: &mut SessionController, log: &CallLog) {
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(controller, GattStatus::Success, CONNECTED);
        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::Supported(
            Box::new(MockReader::new(log.clone())),
        )));
        controller.handle_reader_event(ReaderEvent::NotificationsEnabled { success: true });
        controller.handle_reader_event(ReaderEvent::AuthenticationComplete { success: true });
        controller.handle_reader_event(ReaderEvent::EscapeResponse {
            response: vec![0x90, 0x00],
            success: true,
        });
    }

    #[test]
    fn test_connect_without_address_never_touches_transport() {
        let (mut controller, log) = setup();

        assert_eq!(controller.connect(None), Err(PluginError::MissingAddress));
        assert_eq!(
            controller.connect(Some(String::new())),
            Err(PluginError::MissingAddress)
        );
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_connect_publishes_connecting_then_connected() {
        let (mut controller, log) = setup();
        let mut status = status_listener(&mut controller);

        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);

        assert_eq!(tokens(&mut status), vec!["DISCONNECTED", "CONNECTING", "CONNECTED"]);
        assert_eq!(
            log.calls(),
            vec![Call::ConnectGatt(ADDRESS.to_string()), Call::DetectReader]
        );
    }

    #[test]
    fn test_connect_failures_resolve_as_device_not_found() {
        let log = CallLog::default();
        let stack = MockStack::with_device(log.clone(), ADDRESS).with_adapter(AdapterState::Disabled);
        let (mut controller, _rx) = controller_with(stack, Settings::default());
        assert_eq!(
            controller.connect(Some(ADDRESS.to_string())),
            Err(PluginError::DeviceNotFound)
        );

        let (mut controller, _log) = setup();
        assert_eq!(
            controller.connect(Some("11:22:33:44:55:66".to_string())),
            Err(PluginError::DeviceNotFound)
        );
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_missing_adapter_forces_disconnected() {
        let log = CallLog::default();
        let stack =
            MockStack::with_device(log.clone(), ADDRESS).with_adapter(AdapterState::Unavailable);
        let (mut controller, _rx) = controller_with(stack, Settings::default());
        let mut status = status_listener(&mut controller);

        assert!(controller.connect(Some(ADDRESS.to_string())).is_err());
        assert_eq!(tokens(&mut status), vec!["DISCONNECTED", "DISCONNECTED"]);
    }

    #[test]
    fn test_reconnect_closes_previous_link_first() {
        let (mut controller, log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        log.clear();

        controller.connect(Some(ADDRESS.to_string())).unwrap();

        assert_eq!(
            log.calls(),
            vec![
                Call::DisconnectGatt,
                Call::CloseGatt,
                Call::ConnectGatt(ADDRESS.to_string())
            ]
        );
    }

    #[test]
    fn test_full_setup_sequence_starts_polling() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);

        assert_eq!(
            log.calls(),
            vec![
                Call::ConnectGatt(ADDRESS.to_string()),
                Call::DetectReader,
                Call::EnableNotification(true),
                Call::Authenticate(b"ACR1255U-J1 Auth".to_vec()),
                Call::Escape(vec![0xE0, 0x00, 0x00, 0x48, 0x04]),
                Call::Escape(vec![0xE0, 0x00, 0x00, 0x40, 0x01]),
            ]
        );
        assert_eq!(controller.exchange().phase(), ExchangePhase::AwaitingCardForId);
    }

    #[test]
    fn test_sleep_mode_comes_from_settings() {
        let log = CallLog::default();
        let settings = Settings {
            sleep_mode: SleepMode::Sec180,
            ..Settings::default()
        };
        let (mut controller, _rx) =
            controller_with(MockStack::with_device(log.clone(), ADDRESS), settings);

        ready_reader(&mut controller, &log);

        assert!(log.contains(&Call::Escape(vec![0xE0, 0x00, 0x00, 0x48, 0x03])));
    }

    #[test]
    fn test_unsupported_reader_reports_and_disconnects() {
        let (mut controller, log) = setup();
        let mut status = status_listener(&mut controller);
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);
        drain(&mut status);

        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::new(
            crate::domain::models::ReaderModel::Acr3901uS1,
            Box::new(MockReader::new(log.clone())),
        )));
        controller.handle_reader_event(ReaderEvent::NotificationsEnabled { success: true });

        assert_eq!(
            drain(&mut status),
            vec![
                Err(PluginError::DeviceNotSupported),
                Ok("DISCONNECTED".to_string())
            ]
        );
        assert!(log.contains(&Call::DisconnectGatt));
        assert!(!log
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Authenticate(_) | Call::EnableNotification(_))));
        assert!(!controller.has_reader());
    }

    #[test]
    fn test_status_listener_gets_current_state_immediately() {
        let (mut controller, _log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();

        let mut status = status_listener(&mut controller);

        assert_eq!(tokens(&mut status), vec!["CONNECTING"]);
    }

    #[test]
    fn test_disconnect_is_published_before_confirmation() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        let mut status = status_listener(&mut controller);
        drain(&mut status);

        controller.disconnect();

        assert_eq!(tokens(&mut status), vec!["DISCONNECTED"]);
        assert_eq!(controller.connection_state(), Some(ConnectionState::Disconnected));
        assert!(log.contains(&Call::DisconnectGatt));
        assert!(!log.contains(&Call::CloseGatt));
        assert!(!controller.has_reader());
    }

    #[test]
    fn test_gatt_disconnect_closes_link() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        log.clear();

        gatt(&mut controller, GattStatus::Success, DISCONNECTED);

        assert_eq!(log.calls(), vec![Call::DisconnectGatt, Call::CloseGatt]);
        assert_eq!(controller.exchange().phase(), ExchangePhase::NoCardAction);
    }

    #[test]
    fn test_gatt_failure_forces_disconnected_without_retry() {
        let (mut controller, log) = setup();
        let mut status = status_listener(&mut controller);
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        log.clear();

        gatt(&mut controller, GattStatus::Failure(133), CONNECTED);

        assert_eq!(tokens(&mut status), vec!["DISCONNECTED", "CONNECTING", "DISCONNECTED"]);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_unknown_profile_state_publishes_fallback_token() {
        let (mut controller, _log) = setup();
        let mut status = status_listener(&mut controller);
        drain(&mut status);

        gatt(&mut controller, GattStatus::Success, 42);

        assert_eq!(tokens(&mut status), vec![UNKNOWN_CONNECTION_STATE]);
        assert_eq!(controller.connection_state(), None);
    }

    #[test]
    fn test_setup_failures_are_silent() {
        let (mut controller, log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);
        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::Supported(
            Box::new(MockReader::new(log.clone())),
        )));
        let mut status = status_listener(&mut controller);
        drain(&mut status);

        controller.handle_reader_event(ReaderEvent::NotificationsEnabled { success: false });
        controller.handle_reader_event(ReaderEvent::AuthenticationComplete { success: false });
        controller.handle_reader_event(ReaderEvent::EscapeResponse {
            response: vec![],
            success: true,
        });

        assert!(!log.calls().iter().any(|call| matches!(
            call,
            Call::Authenticate(_) | Call::Escape(_)
        )));
        assert!(drain(&mut status).is_empty());
        assert_eq!(controller.exchange().phase(), ExchangePhase::NoCardAction);
    }

    #[test]
    fn test_refused_authentication_request_halts_setup() {
        let (mut controller, log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);
        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::Supported(
            Box::new(MockReader::refusing(log.clone())),
        )));
        controller.handle_reader_event(ReaderEvent::NotificationsEnabled { success: true });

        assert!(log.contains(&Call::Authenticate(b"ACR1255U-J1 Auth".to_vec())));
        assert!(log.escapes().is_empty());
        assert!(!controller.exchange().is_bound());
    }

    #[test]
    fn test_escape_failure_leaves_polling_off() {
        let (mut controller, log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);
        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::Supported(
            Box::new(MockReader::new(log.clone())),
        )));
        controller.handle_reader_event(ReaderEvent::NotificationsEnabled { success: true });
        controller.handle_reader_event(ReaderEvent::AuthenticationComplete { success: true });

        controller.handle_reader_event(ReaderEvent::EscapeResponse {
            response: vec![],
            success: false,
        });
        controller.handle_reader_event(ReaderEvent::EscapeResponse {
            response: vec![],
            success: true,
        });

        assert_eq!(log.escapes(), vec![vec![0xE0, 0x00, 0x00, 0x48, 0x04]]);
    }

    #[test]
    fn test_escape_listener_fires_once() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);

        controller.handle_reader_event(ReaderEvent::EscapeResponse {
            response: vec![0x90, 0x00],
            success: true,
        });

        let polling_starts = log
            .escapes()
            .into_iter()
            .filter(|command| command == &EscapeCommand::AutoPollingStart.as_bytes())
            .count();
        assert_eq!(polling_starts, 1);
    }

    #[test]
    fn test_card_traffic_reaches_card_stream() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        let (tx, mut card) = mpsc::unbounded_channel();
        controller.listen_card(tx);
        log.clear();

        controller.handle_reader_event(ReaderEvent::CardStatusChanged(CardStatus::Present));
        controller.handle_reader_event(ReaderEvent::ApduResponse(Ok(vec![
            0x04, 0x5A, 0x90, 0x00,
        ])));

        assert_eq!(log.apdus(), vec![GET_CARD_ID.to_vec()]);
        assert_eq!(drain(&mut card), vec![Ok("04 5A".to_string())]);
    }

    #[test]
    fn test_listening_to_card_stream_starts_polling() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        log.clear();

        let (tx, _card) = mpsc::unbounded_channel();
        controller.listen_card(tx);
        controller.cancel_card();

        assert_eq!(
            log.escapes(),
            vec![
                EscapeCommand::AutoPollingStart.as_bytes().to_vec(),
                EscapeCommand::AutoPollingStop.as_bytes().to_vec()
            ]
        );
        assert!(!controller.exchange().is_bound());
    }

    #[test]
    fn test_listening_again_after_cancel_restarts_polling() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        let (tx, _first) = mpsc::unbounded_channel();
        controller.listen_card(tx);
        controller.cancel_card();
        log.clear();

        let (tx, _second) = mpsc::unbounded_channel();
        controller.listen_card(tx);

        assert_eq!(
            log.escapes(),
            vec![EscapeCommand::AutoPollingStart.as_bytes().to_vec()]
        );
    }

    #[test]
    fn test_polling_waits_for_authentication() {
        let (mut controller, log) = setup();
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        gatt(&mut controller, GattStatus::Success, CONNECTED);
        controller.handle_reader_event(ReaderEvent::ReaderDetected(DetectedReader::Supported(
            Box::new(MockReader::new(log.clone())),
        )));

        let (tx, _card) = mpsc::unbounded_channel();
        controller.listen_card(tx);

        assert!(log.escapes().is_empty());
    }

    #[test]
    fn test_chained_send_apdu_starts_on_present_card() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        controller.handle_reader_event(ReaderEvent::CardStatusChanged(CardStatus::Present));
        log.clear();

        // 00 A4 | 00 B0
        controller.send_apdu(Some("AKQ=|ALA=")).unwrap();

        assert_eq!(log.apdus(), vec![vec![0x00, 0xA4]]);
    }

    #[test]
    fn test_send_apdu_argument_errors() {
        let (mut controller, _log) = setup();
        assert_eq!(controller.send_apdu(None), Err(PluginError::MissingApduCommand));
        assert!(matches!(
            controller.send_apdu(Some("%%%")),
            Err(PluginError::InvalidApduCommand(_))
        ));
    }

    #[test]
    fn test_battery_levels_forwarded_once_bound() {
        let (mut controller, log) = setup();
        let (tx, mut battery) = mpsc::unbounded_channel();
        controller.listen_battery(tx);

        controller.handle_reader_event(ReaderEvent::BatteryLevel(80));
        ready_reader(&mut controller, &log);
        controller.handle_reader_event(ReaderEvent::BatteryLevel(75));

        assert_eq!(drain(&mut battery), vec![Ok(75)]);
    }

    #[test]
    fn test_resume_reconnects_only_when_disconnected() {
        let (mut controller, log) = setup();
        controller.resume();
        assert!(log.calls().is_empty());

        controller.connect(Some(ADDRESS.to_string())).unwrap();
        log.clear();
        controller.resume();
        assert!(log.calls().is_empty());

        controller.disconnect();
        log.clear();
        controller.resume();
        assert!(log.contains(&Call::ConnectGatt(ADDRESS.to_string())));
    }

    #[test]
    fn test_resume_respects_settings() {
        let log = CallLog::default();
        let settings = Settings {
            reconnect_on_resume: false,
            ..Settings::default()
        };
        let (mut controller, _rx) =
            controller_with(MockStack::with_device(log.clone(), ADDRESS), settings);
        controller.connect(Some(ADDRESS.to_string())).unwrap();
        controller.disconnect();
        log.clear();

        controller.resume();

        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_teardown_stops_polling_and_drops_listeners() {
        let (mut controller, log) = setup();
        ready_reader(&mut controller, &log);
        let mut status = status_listener(&mut controller);
        drain(&mut status);
        log.clear();

        controller.teardown();

        assert_eq!(
            log.calls(),
            vec![
                Call::Escape(EscapeCommand::AutoPollingStop.as_bytes().to_vec()),
                Call::DisconnectGatt
            ]
        );
        assert_eq!(tokens(&mut status), vec!["DISCONNECTED"]);

        controller.handle_reader_event(ReaderEvent::BatteryLevel(10));
        assert!(status.try_recv().is_err());
    }
}
