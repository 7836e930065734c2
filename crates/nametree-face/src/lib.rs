//! The Face contract consumed by the name-tree runtime.
//!
//! A Face is a passive port: the tree pushes Interests, Data and timer
//! requests down, then drains completions out of `poll` during its event
//! loop turn. The in-memory [`sim`] module wires several faces together
//! with a manually advanced clock for deterministic tests.

pub mod sim;

use std::time::Duration;

use thiserror::Error;

use nametree_codec::{Data, Interest, NetworkNack};
use nametree_core::{Name, Timestamp};

/// Identifies one expressed Interest within a face.
pub type InterestId = u64;
/// Identifies one registered prefix within a face.
pub type RegistrationId = u64;
/// Identifies one scheduled timer within a face.
pub type TimerId = u64;

/// Errors surfaced by face operations.
#[derive(Debug, Error)]
pub enum FaceError {
    /// The face could not transmit a packet.
    #[error("send failed: {0}")]
    Send(String),
}

/// A completion drained from a face during an event-loop turn.
#[derive(Debug, Clone)]
pub enum FaceEvent {
    /// A Data packet arrived for an expressed Interest.
    Data { interest_id: InterestId, data: Data },
    /// An expressed Interest reached its lifetime without an answer.
    Timeout {
        interest_id: InterestId,
        interest: Interest,
    },
    /// The network refused an expressed Interest.
    Nack {
        interest_id: InterestId,
        interest: Interest,
        nack: NetworkNack,
    },
    /// An Interest arrived under a registered prefix.
    IncomingInterest {
        registration_id: RegistrationId,
        interest: Interest,
    },
    /// A `call_later` deadline passed.
    TimerFired { timer_id: TimerId },
    /// Outcome of a `register_prefix` call.
    RegisterStatus {
        registration_id: RegistrationId,
        success: bool,
        reason: String,
    },
}

/// Network port used by the tree: non-blocking sends plus a poll drain.
pub trait Face {
    /// Sends an Interest; its completion arrives as `Data`/`Timeout`/`Nack`.
    fn express_interest(&mut self, interest: Interest) -> InterestId;

    /// Asks the network to deliver Interests under `prefix` as
    /// `IncomingInterest` events; the outcome arrives as `RegisterStatus`.
    fn register_prefix(&mut self, prefix: Name) -> RegistrationId;

    /// Stops delivery for a prior registration.
    fn remove_registered_prefix(&mut self, registration_id: RegistrationId);

    /// Transmits a Data packet toward whoever asked for it.
    fn put_data(&mut self, data: &Data) -> Result<(), FaceError>;

    /// Schedules a `TimerFired` event after `delay`.
    fn call_later(&mut self, delay: Duration) -> TimerId;

    /// The face's clock.
    fn now(&self) -> Timestamp;

    /// Drains the next completion, if any.
    fn poll(&mut self) -> Option<FaceEvent>;
}
