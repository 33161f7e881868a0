//! Card/APDU Exchange
//!
//! Reacts to card presence by sending either the queued command(s) or a
//! card id request, pairs every APDU response with the command that caused
//! it, and merges the responses of a command chain into one card event.

use crate::domain::error::PluginError;
use crate::domain::models::CardStatus;
use crate::infrastructure::reader::listener::ResponseSlot;
use crate::infrastructure::reader::protocol::{self, EscapeCommand, GET_CARD_ID};
use crate::infrastructure::reader::streams::StreamSlot;
use crate::infrastructure::reader::transport::ReaderTransport;
use tracing::{debug, info, warn};

pub type BoxedReader = Box<dyn ReaderTransport>;

/// Command(s) waiting for the next card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingCommand {
    #[default]
    None,
    Single(Vec<u8>),
    /// A chain whose responses are merged into one card event
    Multi(Vec<Vec<u8>>),
}

/// What the exchange will do with the next card or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Not bound to a reader; card and response events are ignored
    NoCardAction,
    /// Nothing queued; a card will be asked for its id
    AwaitingCardForId,
    AwaitingCardForSingle,
    AwaitingCardForMulti,
    /// A chain is being sent, one command per response
    MultiInFlight,
}

#[derive(Debug, Default)]
pub struct CardExchange {
    /// Authenticated reader behind this exchange; survives `dispose`
    attached: bool,
    /// Reacting to card status and responses
    bound: bool,
    card_status: CardStatus,
    pending: PendingCommand,
    /// Responses still expected before the merged result is delivered
    expected_responses: usize,
    merged: Vec<String>,
    response: ResponseSlot,
}

impl CardExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start reacting to the reader's card status and APDU responses.
    pub fn bind(&mut self) {
        info!("Card exchange bound to reader");
        self.attached = true;
        self.bound = true;
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn card_status(&self) -> CardStatus {
        self.card_status
    }

    pub fn pending(&self) -> &PendingCommand {
        &self.pending
    }

    pub fn phase(&self) -> ExchangePhase {
        if !self.bound {
            return ExchangePhase::NoCardAction;
        }
        match self.pending {
            PendingCommand::Multi(_) if self.response.is_waiting() => ExchangePhase::MultiInFlight,
            PendingCommand::Multi(_) => ExchangePhase::AwaitingCardForMulti,
            PendingCommand::Single(_) => ExchangePhase::AwaitingCardForSingle,
            PendingCommand::None => ExchangePhase::AwaitingCardForId,
        }
    }

    pub fn start_polling(&self, reader: &mut BoxedReader) {
        if self.attached {
            send_escape(reader, EscapeCommand::AutoPollingStart);
        }
    }

    pub fn stop_polling(&self, reader: &mut BoxedReader) {
        if self.attached {
            send_escape(reader, EscapeCommand::AutoPollingStop);
        }
    }

    pub fn on_card_status(&mut self, status: CardStatus, reader: &mut BoxedReader) {
        if !self.bound {
            return;
        }

        self.card_status = status;
        info!("Card status: {}", status);
        if status != CardStatus::Present {
            return;
        }

        match std::mem::take(&mut self.pending) {
            PendingCommand::Multi(commands) => {
                self.pending = PendingCommand::Multi(commands);
                self.start_multiple_send(reader);
            }
            PendingCommand::Single(apdu) => {
                info!("Sending APDU command");
                self.expected_responses = 1;
                self.transmit(reader, &apdu);
            }
            PendingCommand::None => {
                info!("Requesting card ID");
                self.transmit(reader, &GET_CARD_ID);
            }
        }
    }

    pub fn on_apdu_response(
        &mut self,
        result: Result<Vec<u8>, i32>,
        reader: &mut BoxedReader,
        card: &StreamSlot<String>,
    ) {
        if !self.bound {
            return;
        }

        // A response nobody waits for belongs to a superseded request
        let Some(answered) = self.response.resolve() else {
            debug!("Ignoring APDU response with no outstanding request");
            return;
        };

        let response = match result {
            Ok(response) => response,
            Err(code) => {
                warn!("Reader reported APDU error {}, abandoning exchange", code);
                self.reset_exchange();
                card.error(PluginError::UnknownReaderError(code));
                return;
            }
        };

        // Processed without a card listener too; only the delivery is dropped
        let payload = protocol::to_hex_string(protocol::strip_status_word(&response));
        self.expected_responses = self.expected_responses.saturating_sub(1);
        debug!(
            "Received response: {} for {} after {:?}. {} more to go",
            payload,
            protocol::to_hex_string(&answered.command),
            answered.sent_at.elapsed(),
            self.expected_responses
        );
        self.merged.push(payload);

        if self.expected_responses == 0 {
            if matches!(self.pending, PendingCommand::Multi(_)) {
                self.pending = PendingCommand::None;
            }
            let merged = std::mem::take(&mut self.merged).join(" ");
            card.success(merged);
            return;
        }

        let next = match &self.pending {
            PendingCommand::Multi(commands) => commands
                .len()
                .checked_sub(self.expected_responses)
                .and_then(|index| commands.get(index))
                .cloned(),
            _ => None,
        };
        match next {
            Some(command) => {
                info!("Sending next command: {}", protocol::to_hex_string(&command));
                self.transmit(reader, &command);
            }
            None => {
                warn!("No command left for {} expected responses", self.expected_responses);
                self.reset_exchange();
            }
        }
    }

    /// Queue one APDU for the next card presence.
    ///
    /// Supersedes whatever was pending or in flight; a late response to the
    /// superseded request is ignored.
    pub fn send_apdu(&mut self, apdu: Vec<u8>) {
        self.reset_exchange();
        self.pending = PendingCommand::Single(apdu);
    }

    /// Queue a command chain; starts right away when a card is already present.
    pub fn send_multiple_apdu_with_merged_result(
        &mut self,
        commands: Vec<Vec<u8>>,
        reader: Option<&mut BoxedReader>,
    ) {
        self.reset_exchange();
        self.expected_responses = commands.len();
        self.pending = PendingCommand::Multi(commands);

        if self.card_status == CardStatus::Present {
            if let Some(reader) = reader {
                self.start_multiple_send(reader);
            }
        }
    }

    /// Stop polling and stop reacting to the reader. Requests already sent are
    /// not retracted.
    pub fn dispose(&mut self, reader: Option<&mut BoxedReader>, card: &mut StreamSlot<String>) {
        if let Some(reader) = reader {
            self.stop_polling(reader);
        }
        self.bound = false;
        card.detach();
    }

    /// Forget everything tied to the current physical session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn start_multiple_send(&mut self, reader: &mut BoxedReader) {
        let PendingCommand::Multi(commands) = &self.pending else {
            return;
        };
        let Some(first) = commands.first().cloned() else {
            return;
        };

        info!("Sending multiple APDU commands");
        self.expected_responses = commands.len();
        self.merged.clear();
        info!("Sending command: {}", protocol::to_hex_string(&first));
        self.transmit(reader, &first);
    }

    fn transmit(&mut self, reader: &mut BoxedReader, apdu: &[u8]) {
        self.response.await_response(apdu);
        if !reader.transmit_apdu(apdu) {
            warn!("Reader did not accept APDU {}", protocol::to_hex_string(apdu));
        }
    }

    fn reset_exchange(&mut self) {
        self.expected_responses = 0;
        self.pending = PendingCommand::None;
        self.merged.clear();
        self.response.clear();
    }
}

fn send_escape(reader: &mut BoxedReader, command: EscapeCommand) {
    if !reader.transmit_escape_command(&command.as_bytes()) {
        warn!("Reader did not accept escape command {:?}", command);
    }
}
