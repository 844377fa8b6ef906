// In-memory implementation of the relay store with JSON snapshots

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::course::CourseDefinition;
use crate::errors::RelayError;

use super::{
    Athlete, QueuedRun, RelayStore, RunStatus, SegmentRecord, SegmentStatus, SessionStatus,
};

/// Stored session with its ordered run queue
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub course_id: String,
    pub status: SessionStatus,
    pub run_ids: Vec<String>,
    pub incomplete_reason: Option<String>,
}

/// Stored run of one athlete within a session
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub session_id: String,
    pub athlete_id: String,
    pub athlete_name: String,
    pub queue_position: u32,
    pub status: RunStatus,
    pub started_at_ms: Option<u128>,
    pub completed_at_ms: Option<u128>,
    pub elapsed_secs: Option<f64>,
}

/// Relay store kept entirely in memory.
///
/// Used by the replay tooling, tests and benches. The whole store can be written to and read
/// back from a JSON snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MemoryStore {
    sessions: BTreeMap<String, SessionRecord>,
    runs: BTreeMap<String, RunRecord>,
    segments: BTreeMap<u64, SegmentRecord>,
    course_edges: BTreeMap<String, Vec<(String, String)>>,
    next_segment_id: u64,
}

fn persistence_failure(operation: &str, reason: String) -> RelayError {
    RelayError::PersistenceFailure {
        operation: operation.to_string(),
        reason,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a course so segments can be created for runs on it
    pub fn add_course(
        &mut self,
        course: &CourseDefinition,
        start_checkpoint: &str,
    ) -> Result<(), RelayError> {
        let edges = course.segment_edges(start_checkpoint)?;
        self.course_edges.insert(course.course_id.clone(), edges);
        Ok(())
    }

    /// Create a session with one queued run per athlete, in roster order.
    ///
    /// Returns the run identifiers in queue order.
    pub fn create_session(
        &mut self,
        session_id: &str,
        course_id: &str,
        athletes: &[Athlete],
    ) -> Result<Vec<String>, RelayError> {
        if self.sessions.contains_key(session_id) {
            return Err(persistence_failure(
                "create_session",
                format!("session {} already exists", session_id),
            ));
        }
        if !self.course_edges.contains_key(course_id) {
            return Err(persistence_failure(
                "create_session",
                format!("unknown course {}", course_id),
            ));
        }

        let mut run_ids = Vec::with_capacity(athletes.len());
        for (idx, athlete) in athletes.iter().enumerate() {
            let run_id = format!("{}-run-{}", session_id, idx + 1);
            self.runs.insert(
                run_id.clone(),
                RunRecord {
                    run_id: run_id.clone(),
                    session_id: session_id.to_string(),
                    athlete_id: athlete.athlete_id.clone(),
                    athlete_name: athlete.name.clone(),
                    queue_position: idx as u32 + 1,
                    status: RunStatus::Queued,
                    started_at_ms: None,
                    completed_at_ms: None,
                    elapsed_secs: None,
                },
            );
            run_ids.push(run_id);
        }

        self.sessions.insert(
            session_id.to_string(),
            SessionRecord {
                session_id: session_id.to_string(),
                course_id: course_id.to_string(),
                status: SessionStatus::Setup,
                run_ids: run_ids.clone(),
                incomplete_reason: None,
            },
        );
        debug!(
            "Created session {} with {} queued runs",
            session_id,
            run_ids.len()
        );
        Ok(run_ids)
    }

    /// Administrative transition used when an athlete does not show up
    pub fn mark_run_absent(&mut self, run_id: &str) -> Result<(), RelayError> {
        let run = self.run_mut("mark_run_absent", run_id)?;
        run.status = RunStatus::Absent;
        Ok(())
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.get(run_id)
    }

    pub fn segment(&self, segment_id: u64) -> Option<&SegmentRecord> {
        self.segments.get(&segment_id)
    }

    /// Write the whole store to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), RelayError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RelayError::StoreSerializeError { source: e })?;
        fs::write(path, content).map_err(|e| RelayError::StoreIOError { source: e })
    }

    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let content = fs::read_to_string(path).map_err(|e| RelayError::StoreIOError { source: e })?;
        serde_json::from_str(&content).map_err(|e| RelayError::StoreSerializeError { source: e })
    }

    fn run_mut(&mut self, operation: &str, run_id: &str) -> Result<&mut RunRecord, RelayError> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| persistence_failure(operation, format!("unknown run {}", run_id)))
    }

    fn session_mut(
        &mut self,
        operation: &str,
        session_id: &str,
    ) -> Result<&mut SessionRecord, RelayError> {
        self.sessions.get_mut(session_id).ok_or_else(|| {
            persistence_failure(operation, format!("unknown session {}", session_id))
        })
    }

    fn segments_for_run(&self, run_id: &str) -> impl Iterator<Item = &SegmentRecord> {
        self.segments.values().filter(move |s| s.run_id == run_id)
    }
}

impl RelayStore for MemoryStore {
    fn start_session(&mut self, session_id: &str) -> Result<(), RelayError> {
        let session = self.session_mut("start_session", session_id)?;
        session.status = SessionStatus::Active;
        Ok(())
    }

    fn get_next_queued_run(&self, session_id: &str) -> Result<Option<QueuedRun>, RelayError> {
        let session = self.sessions.get(session_id).ok_or_else(|| {
            persistence_failure(
                "get_next_queued_run",
                format!("unknown session {}", session_id),
            )
        })?;

        Ok(session
            .run_ids
            .iter()
            .filter_map(|id| self.runs.get(id))
            .filter(|r| r.status == RunStatus::Queued)
            .min_by_key(|r| r.queue_position)
            .map(|r| QueuedRun {
                run_id: r.run_id.clone(),
                athlete_id: r.athlete_id.clone(),
                athlete_name: r.athlete_name.clone(),
                queue_position: r.queue_position,
            }))
    }

    fn count_session_runs(&self, session_id: &str) -> Result<usize, RelayError> {
        self.sessions
            .get(session_id)
            .map(|s| s.run_ids.len())
            .ok_or_else(|| {
                persistence_failure(
                    "count_session_runs",
                    format!("unknown session {}", session_id),
                )
            })
    }

    fn get_run_status(&self, run_id: &str) -> Result<RunStatus, RelayError> {
        self.runs
            .get(run_id)
            .map(|r| r.status)
            .ok_or_else(|| persistence_failure("get_run_status", format!("unknown run {}", run_id)))
    }

    fn start_run(&mut self, run_id: &str, timestamp_ms: u128) -> Result<(), RelayError> {
        let run = self.run_mut("start_run", run_id)?;
        if run.status != RunStatus::Queued {
            return Err(persistence_failure(
                "start_run",
                format!("run {} is {:?}, not queued", run_id, run.status),
            ));
        }
        run.status = RunStatus::Running;
        run.started_at_ms = Some(timestamp_ms);
        Ok(())
    }

    fn create_segments_for_run(
        &mut self,
        run_id: &str,
        course_id: &str,
    ) -> Result<(), RelayError> {
        if !self.runs.contains_key(run_id) {
            return Err(persistence_failure(
                "create_segments_for_run",
                format!("unknown run {}", run_id),
            ));
        }
        if self.segments_for_run(run_id).next().is_some() {
            debug!("Segments already exist for run {}", run_id);
            return Ok(());
        }
        let edges = self.course_edges.get(course_id).cloned().ok_or_else(|| {
            persistence_failure(
                "create_segments_for_run",
                format!("unknown course {}", course_id),
            )
        })?;

        for (sequence, (from, to)) in edges.into_iter().enumerate() {
            let segment_id = self.next_segment_id;
            self.next_segment_id += 1;
            self.segments.insert(
                segment_id,
                SegmentRecord {
                    segment_id,
                    run_id: run_id.to_string(),
                    sequence,
                    from_checkpoint: from,
                    to_checkpoint: to,
                    status: SegmentStatus::Pending,
                    touched_at_ms: None,
                },
            );
        }
        Ok(())
    }

    fn record_touch(
        &mut self,
        run_id: &str,
        checkpoint_id: &str,
        timestamp_ms: u128,
    ) -> Result<Option<u64>, RelayError> {
        let segment = self.segments.values_mut().find(|s| {
            s.run_id == run_id
                && s.to_checkpoint == checkpoint_id
                && s.status == SegmentStatus::Pending
        });

        Ok(segment.map(|s| {
            s.status = SegmentStatus::Recorded;
            s.touched_at_ms = Some(timestamp_ms);
            s.segment_id
        }))
    }

    fn mark_segment_missed(&mut self, segment_id: u64) -> Result<(), RelayError> {
        let segment = self.segments.get_mut(&segment_id).ok_or_else(|| {
            persistence_failure(
                "mark_segment_missed",
                format!("unknown segment {}", segment_id),
            )
        })?;
        segment.status = SegmentStatus::Missed;
        Ok(())
    }

    fn complete_run(
        &mut self,
        run_id: &str,
        timestamp_ms: u128,
        elapsed_secs: f64,
    ) -> Result<(), RelayError> {
        let run = self.run_mut("complete_run", run_id)?;
        run.status = RunStatus::Completed;
        run.completed_at_ms = Some(timestamp_ms);
        run.elapsed_secs = Some(elapsed_secs);
        Ok(())
    }

    fn complete_session(&mut self, session_id: &str) -> Result<(), RelayError> {
        let session = self.session_mut("complete_session", session_id)?;
        session.status = SessionStatus::Completed;
        Ok(())
    }

    fn mark_session_incomplete(
        &mut self,
        session_id: &str,
        reason: &str,
    ) -> Result<(), RelayError> {
        let session = self.session_mut("mark_session_incomplete", session_id)?;
        session.status = SessionStatus::Incomplete;
        session.incomplete_reason = Some(reason.to_string());
        Ok(())
    }

    fn get_run_segments(&self, run_id: &str) -> Result<Vec<SegmentRecord>, RelayError> {
        let mut segments: Vec<SegmentRecord> = self.segments_for_run(run_id).cloned().collect();
        segments.sort_by_key(|s| s.sequence);
        Ok(segments)
    }

    fn check_segment_alert(&self, segment_id: u64) -> Result<Option<String>, RelayError> {
        let Some(segment) = self.segments.get(&segment_id) else {
            return Ok(None);
        };
        if segment.sequence == 0 {
            return Ok(None);
        }
        let previous_missed = self.segments_for_run(&segment.run_id).any(|s| {
            s.sequence == segment.sequence - 1 && s.status == SegmentStatus::Missed
        });
        Ok(previous_missed.then(|| {
            format!(
                "segment {} -> {} recorded after a missed segment",
                segment.from_checkpoint, segment.to_checkpoint
            )
        }))
    }
}
