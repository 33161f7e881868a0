//! Reader Module
//!
//! Drives an ACS ACR1255U-J1 card reader over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   SessionController                      │
//! │  (GATT link, setup sequence, status and battery streams) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │  Exchange  │ │ Transport  │ │  Protocol  │
//! │            │ │            │ │            │
//! │ - Card     │ │ - BLE      │ │ - Escape   │
//! │   presence │ │   stack    │ │   commands │
//! │ - APDU     │ │ - Reader   │ │ - Payload  │
//! │   chains   │ │   events   │ │   decoding │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Escape commands, APDU payload decoding, hex formatting
//! - [`transport`] - Seams to the BLE stack and the vendor reader driver
//! - [`listener`] - Single-use response listeners
//! - [`streams`] - Single-listener event streams
//! - [`exchange`] - Card presence and APDU exchange state machine
//! - [`controller`] - Connection lifecycle coordinator

pub mod controller;
pub mod exchange;
pub mod listener;
pub mod protocol;
pub mod streams;
pub mod transport;

pub use controller::SessionController;
