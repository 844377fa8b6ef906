// Persistence collaborator for sessions, runs and segments
// The relay core only talks to storage through the RelayStore trait

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

pub use memory::MemoryStore;

/// Persisted status of a run
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Absent,
    Incomplete,
}

/// Persisted status of a session
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Setup,
    Active,
    Completed,
    Incomplete,
}

/// Status of a single segment of a run
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Recorded,
    Missed,
}

/// An athlete on the session roster
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Athlete {
    pub athlete_id: String,
    pub name: String,
}

/// A run that is waiting in the queue to be released onto the course
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueuedRun {
    pub run_id: String,
    pub athlete_id: String,
    pub athlete_name: String,
    /// Position in the session queue, fixed at session creation
    pub queue_position: u32,
}

/// Directed edge between two checkpoints for a specific run
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SegmentRecord {
    pub segment_id: u64,
    pub run_id: String,
    /// Order of the segment along the course, starting at 0
    pub sequence: usize,
    pub from_checkpoint: String,
    pub to_checkpoint: String,
    pub status: SegmentStatus,
    pub touched_at_ms: Option<u128>,
}

/// Operations the relay core needs from durable storage.
///
/// Calls are synchronous and are never retried by the caller. Any failure should be reported as
/// [`RelayError::PersistenceFailure`] so the relay can drop the affected step.
pub trait RelayStore {
    /// Mark a session as active
    fn start_session(&mut self, session_id: &str) -> Result<(), RelayError>;

    /// Next run still waiting in the queue, lowest queue position first
    fn get_next_queued_run(&self, session_id: &str) -> Result<Option<QueuedRun>, RelayError>;

    /// Number of runs originally queued for a session
    fn count_session_runs(&self, session_id: &str) -> Result<usize, RelayError>;

    fn get_run_status(&self, run_id: &str) -> Result<RunStatus, RelayError>;

    fn start_run(&mut self, run_id: &str, timestamp_ms: u128) -> Result<(), RelayError>;

    /// Pre-create the pending segments a run will traverse
    fn create_segments_for_run(&mut self, run_id: &str, course_id: &str)
    -> Result<(), RelayError>;

    /// Record a touch against the run's pending segment ending at `checkpoint_id`.
    ///
    /// Returns `None` when the run has no such pending segment.
    fn record_touch(
        &mut self,
        run_id: &str,
        checkpoint_id: &str,
        timestamp_ms: u128,
    ) -> Result<Option<u64>, RelayError>;

    fn mark_segment_missed(&mut self, segment_id: u64) -> Result<(), RelayError>;

    fn complete_run(
        &mut self,
        run_id: &str,
        timestamp_ms: u128,
        elapsed_secs: f64,
    ) -> Result<(), RelayError>;

    fn complete_session(&mut self, session_id: &str) -> Result<(), RelayError>;

    fn mark_session_incomplete(&mut self, session_id: &str, reason: &str)
    -> Result<(), RelayError>;

    /// Segments of a run ordered along the course
    fn get_run_segments(&self, run_id: &str) -> Result<Vec<SegmentRecord>, RelayError>;

    /// Alert raised by a freshly recorded segment, if any
    fn check_segment_alert(&self, _segment_id: u64) -> Result<Option<String>, RelayError> {
        Ok(None)
    }
}
