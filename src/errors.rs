// Error types for fieldrelay

use crate::ingest::OutcomeRecord;
use snafu::Snafu;
use std::{io, sync::mpsc::SendError};

#[derive(Debug, Snafu)]
pub enum RelayError {
    // Touch-level outcomes, the event is dropped and the session carries on
    #[snafu(display("No active session"))]
    NoActiveSession,
    #[snafu(display("Checkpoint {checkpoint_id} is not part of the course sequence"))]
    UnknownCheckpoint { checkpoint_id: String },
    #[snafu(display("No active athlete can be attributed the touch on {checkpoint_id}"))]
    NoAttributionCandidate { checkpoint_id: String },
    #[snafu(display("Touch on {checkpoint_id} has no pending segment for run {run_id}"))]
    UnrecordableSegment {
        run_id: String,
        checkpoint_id: String,
    },
    #[snafu(display("Run {run_id} was already handled: {reason}"))]
    RaceLost { run_id: String, reason: String },
    #[snafu(display("Persistence failure during {operation}: {reason}"))]
    PersistenceFailure { operation: String, reason: String },
    #[snafu(display("At max capacity ({capacity} active runs), {run_id} will wait"))]
    CapacityExceeded { run_id: String, capacity: usize },

    // Session lifecycle errors
    #[snafu(display("Session {session_id} is already active"))]
    SessionAlreadyActive { session_id: String },
    #[snafu(display("No athletes queued for session {session_id}"))]
    EmptyQueue { session_id: String },
    #[snafu(display("Invalid course definition: {reason}"))]
    InvalidCourse { reason: String },
    #[snafu(display("Session state lock poisoned"))]
    StatePoisoned,

    // Actuator errors
    #[snafu(display("Actuator command {command} failed: {reason}"))]
    ActuatorError { command: String, reason: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Store snapshot errors
    #[snafu(display("Store snapshot I/O error"))]
    StoreIOError { source: io::Error },
    #[snafu(display("Store snapshot is not valid JSON"))]
    StoreSerializeError { source: serde_json::Error },

    // Touch log errors
    #[snafu(display("Invalid touch log file: {path}"))]
    InvalidTouchLog { path: String },
    #[snafu(display("Error loading touch log"))]
    TouchLoaderError { source: io::Error },
    #[snafu(display("Error writing outcome log"))]
    WriterError { source: io::Error },
    #[snafu(display("Error broadcasting touch outcome"))]
    OutcomeBroadcastError {
        source: Box<SendError<OutcomeRecord>>,
    },
    #[snafu(display("Error reading input file {path}"))]
    InputFileError { path: String, source: io::Error },
    #[snafu(display("Error parsing input file {path}"))]
    InputParseError {
        path: String,
        source: serde_json::Error,
    },
}

impl From<SendError<OutcomeRecord>> for RelayError {
    fn from(value: SendError<OutcomeRecord>) -> Self {
        RelayError::OutcomeBroadcastError {
            source: Box::new(value),
        }
    }
}

impl RelayError {
    /// True for the outcomes that drop a single touch without affecting the session.
    pub fn is_touch_drop(&self) -> bool {
        matches!(
            self,
            RelayError::NoActiveSession
                | RelayError::UnknownCheckpoint { .. }
                | RelayError::NoAttributionCandidate { .. }
                | RelayError::UnrecordableSegment { .. }
                | RelayError::RaceLost { .. }
                | RelayError::PersistenceFailure { .. }
                | RelayError::CapacityExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_drop_classification() {
        let dropped = RelayError::UnknownCheckpoint {
            checkpoint_id: "10.0.0.9".to_string(),
        };
        assert!(dropped.is_touch_drop());
        assert_eq!(
            dropped.to_string(),
            "Checkpoint 10.0.0.9 is not part of the course sequence"
        );

        let hard = RelayError::EmptyQueue {
            session_id: "s1".to_string(),
        };
        assert!(!hard.is_touch_drop());
        assert!(!RelayError::StatePoisoned.is_touch_drop());
    }
}
