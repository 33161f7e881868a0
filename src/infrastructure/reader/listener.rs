//! Single-use listeners
//!
//! The reader reports escape and APDU responses without saying which request
//! they answer. These slots pair each response with the one request waiting
//! for it.

use std::time::Instant;

/// A handler armed for exactly one delivery.
///
/// [`OneShot::take`] disarms the slot before the caller processes the event,
/// so a second delivery finds it empty.
#[derive(Debug)]
pub struct OneShot<T> {
    handler: Option<T>,
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self { handler: None }
    }
}

impl<T> OneShot<T> {
    /// Arm the slot, replacing any handler still waiting.
    pub fn arm(&mut self, handler: T) {
        self.handler = Some(handler);
    }

    pub fn take(&mut self) -> Option<T> {
        self.handler.take()
    }
}

/// The request an outstanding response belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outstanding {
    pub command: Vec<u8>,
    pub sent_at: Instant,
}

/// Tracks the single APDU currently awaiting a response.
// TODO: expire `Outstanding` entries once a response timeout is configurable;
// a lost response currently leaves the exchange waiting until disconnect.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    outstanding: Option<Outstanding>,
}

impl ResponseSlot {
    pub fn await_response(&mut self, command: &[u8]) {
        self.outstanding = Some(Outstanding {
            command: command.to_vec(),
            sent_at: Instant::now(),
        });
    }

    /// Settle the outstanding request, if any.
    pub fn resolve(&mut self) -> Option<Outstanding> {
        self.outstanding.take()
    }

    pub fn is_waiting(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn clear(&mut self) {
        self.outstanding = None;
    }
}
