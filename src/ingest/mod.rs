// Touch ingest: events from the hardware layer into the relay

pub(crate) mod collector;
pub mod loader;
pub mod writer;

use serde::{Deserialize, Serialize};

use crate::actuator::Actuator;
use crate::errors::RelayError;
use crate::relay::{RelayController, TouchOutcome};
use crate::store::RelayStore;

pub use collector::{TouchStats, collect_touches};
pub use loader::{load_touches_jsonl, read_touches};
pub use writer::write_outcomes;

/// One debounced physical touch on a checkpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TouchEvent {
    pub checkpoint_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u128,
}

impl TouchEvent {
    pub fn new(checkpoint_id: &str, timestamp_ms: u128) -> Self {
        Self {
            checkpoint_id: checkpoint_id.to_string(),
            timestamp_ms,
        }
    }
}

/// What became of a touch, as written to the outcome log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum OutcomeRecord {
    Attributed(Box<TouchOutcome>),
    Dropped {
        checkpoint_id: String,
        timestamp_ms: u128,
        reason: String,
    },
}

impl OutcomeRecord {
    pub fn from_result(event: &TouchEvent, result: Result<TouchOutcome, RelayError>) -> Self {
        match result {
            Ok(outcome) => OutcomeRecord::Attributed(Box::new(outcome)),
            Err(e) => OutcomeRecord::Dropped {
                checkpoint_id: event.checkpoint_id.clone(),
                timestamp_ms: event.timestamp_ms,
                reason: e.to_string(),
            },
        }
    }
}

/// The single handler the ingest layer calls for every touch.
pub trait TouchHandler {
    fn on_touch(&self, checkpoint_id: &str, timestamp_ms: u128)
    -> Result<TouchOutcome, RelayError>;
}

impl<S: RelayStore, A: Actuator> TouchHandler for RelayController<S, A> {
    fn on_touch(
        &self,
        checkpoint_id: &str,
        timestamp_ms: u128,
    ) -> Result<TouchOutcome, RelayError> {
        RelayController::on_touch(self, checkpoint_id, timestamp_ms)
    }
}
