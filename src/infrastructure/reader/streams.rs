//! Event stream slots
//!
//! Each stream has at most one listener. Events emitted while nobody
//! listens are dropped, never buffered.

use crate::domain::error::PluginError;
use crate::domain::models::BleDevice;
use tokio::sync::mpsc;

/// Item delivered on an event stream.
pub type StreamEvent<T> = Result<T, PluginError>;

/// Listener end of an event stream, as handed to the host.
pub type EventSink<T> = mpsc::UnboundedSender<StreamEvent<T>>;

#[derive(Debug)]
pub struct StreamSlot<T> {
    sink: Option<EventSink<T>>,
}

impl<T> Default for StreamSlot<T> {
    fn default() -> Self {
        Self { sink: None }
    }
}

impl<T> StreamSlot<T> {
    /// Attach a listener, replacing the previous one.
    pub fn attach(&mut self, sink: EventSink<T>) {
        self.sink = Some(sink);
    }

    pub fn detach(&mut self) {
        self.sink = None;
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn success(&self, value: T) {
        self.emit(Ok(value));
    }

    pub fn error(&self, error: PluginError) {
        self.emit(Err(error));
    }

    fn emit(&self, event: StreamEvent<T>) {
        if let Some(sink) = &self.sink {
            // A listener that went away without cancelling is the same as none
            let _ = sink.send(event);
        }
    }
}

/// The plugin's event streams.
#[derive(Debug, Default)]
pub struct Subscriptions {
    pub status: StreamSlot<String>,
    pub battery: StreamSlot<u8>,
    pub card: StreamSlot<String>,
    pub devices: StreamSlot<BleDevice>,
}

impl Subscriptions {
    pub fn clear(&mut self) {
        self.status.detach();
        self.battery.detach();
        self.card.detach();
        self.devices.detach();
    }
}
