// Relay core: attribution of checkpoint touches, athlete progression and session completion

pub mod attribution;
pub mod completion;
pub mod progression;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::course::{CourseDefinition, CourseSequence};

pub use attribution::{Attribution, Tier};
pub use progression::RelayController;
pub use registry::{ActiveRun, ActiveRunRegistry};

/// Everything the relay knows about the session in progress.
///
/// All fields are empty while no session is active.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub(crate) session_id: Option<String>,
    pub(crate) course: Option<CourseDefinition>,
    pub(crate) sequence: CourseSequence,
    pub(crate) registry: ActiveRunRegistry,
    pub(crate) total_queued: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session_id.is_some()
    }

    /// Course sequence of the active session
    pub fn sequence(&self) -> Option<&CourseSequence> {
        self.is_active().then_some(&self.sequence)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            course_id: self.course.as_ref().map(|c| c.course_id.clone()),
            sequence: self.sequence.checkpoints().to_vec(),
            start_checkpoint: self
                .is_active()
                .then(|| self.sequence.start_checkpoint().to_string()),
            active_runs: self.registry.in_queue_order(),
            total_queued: self.total_queued,
        }
    }
}

/// Consistent, owned copy of the session state for monitoring
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub course_id: Option<String>,
    pub sequence: Vec<String>,
    pub start_checkpoint: Option<String>,
    pub active_runs: Vec<ActiveRun>,
    pub total_queued: usize,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.session_id.is_some()
    }
}

/// What happened to the "release next athlete" request of a touch
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub enum ReleaseDecision {
    /// The touched checkpoint does not release anyone
    #[default]
    NotTriggered,
    /// Nobody left in the queue
    QueueEmpty,
    Released { run_id: String, athlete_name: String },
    /// The queued run was already started by another path
    RaceLost { run_id: String },
    /// Too many athletes on course, the queued run waits
    AtCapacity { run_id: String },
    /// The store refused part of the release, the queued run (if known) stays queued
    Failed {
        run_id: Option<String>,
        reason: String,
    },
}

/// A run that crossed its finish checkpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FinishedRun {
    pub run_id: String,
    pub athlete_name: String,
    pub elapsed_secs: f64,
}

/// Result of an attributed touch
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TouchOutcome {
    pub checkpoint_id: String,
    pub timestamp_ms: u128,
    pub run_id: String,
    pub athlete_name: String,
    pub tier: Tier,
    pub sequence_position: usize,
    pub skipped_count: usize,
    pub segment_id: u64,
    /// Segments marked missed because the athlete skipped checkpoints
    pub missed_segments: Vec<u64>,
    pub alert: Option<String>,
    pub release: ReleaseDecision,
    pub finished: Option<FinishedRun>,
    pub session_completed: bool,
}
