// Applies attributed touches: cursor updates, skipped segments, releases and finishes

use log::{debug, error, info, warn};
use std::sync::{Mutex, MutexGuard};

use crate::actuator::{Actuator, ActuatorCommand, dispatch_all};
use crate::config::AppConfig;
use crate::course::CourseDefinition;
use crate::errors::RelayError;
use crate::store::{QueuedRun, RelayStore, RunStatus};

use super::{
    ActiveRun, ActiveRunRegistry, FinishedRun, ReleaseDecision, SessionSnapshot, SessionState,
    TouchOutcome, attribution, completion,
};

/// Owns the session state and the store behind a single lock.
///
/// Every mutating operation holds the lock for its whole body, so two touches can never
/// interleave their attribution, release or finish steps. Actuator commands produced while the
/// lock is held are dispatched after it is released.
pub struct RelayController<S, A> {
    inner: Mutex<RelayInner<S>>,
    actuator: A,
    config: AppConfig,
}

struct RelayInner<S> {
    state: SessionState,
    store: S,
}

impl<S: RelayStore, A: Actuator> RelayController<S, A> {
    pub fn new(store: S, actuator: A, config: AppConfig) -> Self {
        Self {
            inner: Mutex::new(RelayInner {
                state: SessionState::new(),
                store,
            }),
            actuator,
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RelayInner<S>>, RelayError> {
        self.inner.lock().map_err(|_| RelayError::StatePoisoned)
    }

    /// Start a session: send off the first queued athlete and load the course sequence.
    pub fn start_session(
        &self,
        session_id: &str,
        course: CourseDefinition,
        timestamp_ms: u128,
    ) -> Result<SessionSnapshot, RelayError> {
        let (snapshot, commands) = {
            let mut inner = self.lock()?;
            inner.start_session(session_id, course, timestamp_ms, &self.config)?
        };
        dispatch_all(&self.actuator, &commands);
        Ok(snapshot)
    }

    /// Stop the active session early, marking it incomplete.
    pub fn stop_session(&self, reason: &str) -> Result<(), RelayError> {
        let commands = {
            let mut inner = self.lock()?;
            inner.stop_session(reason)?
        };
        dispatch_all(&self.actuator, &commands);
        Ok(())
    }

    /// Handle one debounced checkpoint touch.
    ///
    /// Dropped touches are logged and returned as errors; the session state stays valid for
    /// the next touch either way.
    pub fn on_touch(
        &self,
        checkpoint_id: &str,
        timestamp_ms: u128,
    ) -> Result<TouchOutcome, RelayError> {
        let result = {
            let mut inner = self.lock()?;
            inner.apply_touch(checkpoint_id, timestamp_ms, &self.config)
        };

        match result {
            Ok((outcome, commands)) => {
                dispatch_all(&self.actuator, &commands);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Touch on {} dropped: {}", checkpoint_id, e);
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, RelayError> {
        Ok(self.lock()?.state.snapshot())
    }

    /// Read from the store under the session lock
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, RelayError> {
        Ok(f(&self.lock()?.store))
    }

    /// Administrative store changes (e.g. marking an athlete absent) under the session lock
    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, RelayError> {
        Ok(f(&mut self.lock()?.store))
    }

    pub fn into_store(self) -> Result<S, RelayError> {
        self.inner
            .into_inner()
            .map(|inner| inner.store)
            .map_err(|_| RelayError::StatePoisoned)
    }
}

fn start_audio(course: &CourseDefinition, start_checkpoint: &str) -> Option<ActuatorCommand> {
    course
        .start_audio_clip()
        .map(|clip| ActuatorCommand::PlayAudio {
            checkpoint_id: start_checkpoint.to_string(),
            clip: clip.trim_end_matches(".mp3").to_string(),
        })
}

impl<S: RelayStore> RelayInner<S> {
    fn start_session(
        &mut self,
        session_id: &str,
        course: CourseDefinition,
        timestamp_ms: u128,
        config: &AppConfig,
    ) -> Result<(SessionSnapshot, Vec<ActuatorCommand>), RelayError> {
        if let Some(active) = &self.state.session_id {
            return Err(RelayError::SessionAlreadyActive {
                session_id: active.clone(),
            });
        }

        let start_checkpoint = course
            .start_checkpoint_or(&config.default_start_checkpoint)
            .to_string();
        let sequence = course.sequence(&start_checkpoint)?;

        let first = self
            .store
            .get_next_queued_run(session_id)?
            .ok_or_else(|| RelayError::EmptyQueue {
                session_id: session_id.to_string(),
            })?;
        // segments first, so a failure leaves the session and its queue untouched
        self.store
            .create_segments_for_run(&first.run_id, &course.course_id)?;
        self.store.start_session(session_id)?;
        self.store.start_run(&first.run_id, timestamp_ms)?;
        let total_queued = self.store.count_session_runs(session_id)?;

        let mut registry = ActiveRunRegistry::new();
        registry.insert(ActiveRun::from_queued(&first, timestamp_ms));
        let commands: Vec<ActuatorCommand> =
            start_audio(&course, &start_checkpoint).into_iter().collect();

        info!(
            "Session {} started: 1/{} active, sequence {:?}, first athlete {}",
            session_id,
            total_queued,
            sequence.checkpoints(),
            first.athlete_name
        );

        self.state = SessionState {
            session_id: Some(session_id.to_string()),
            course: Some(course),
            sequence,
            registry,
            total_queued,
        };
        Ok((self.state.snapshot(), commands))
    }

    fn stop_session(&mut self, reason: &str) -> Result<Vec<ActuatorCommand>, RelayError> {
        let session_id = self
            .state
            .session_id
            .clone()
            .ok_or(RelayError::NoActiveSession)?;
        self.store.mark_session_incomplete(&session_id, reason)?;
        self.state.reset();
        info!("Session {} stopped: {}", session_id, reason);
        Ok(vec![ActuatorCommand::DeactivateCourse])
    }

    fn apply_touch(
        &mut self,
        checkpoint_id: &str,
        timestamp_ms: u128,
        config: &AppConfig,
    ) -> Result<(TouchOutcome, Vec<ActuatorCommand>), RelayError> {
        let attribution =
            attribution::resolve(self.state.sequence(), &self.state.registry, checkpoint_id)?;
        let session_id = self
            .state
            .session_id
            .clone()
            .ok_or(RelayError::NoActiveSession)?;
        let run_id = attribution.run_id.clone();
        let (athlete_name, previous_position) = self
            .state
            .registry
            .get(&run_id)
            .map(|r| (r.athlete_name.clone(), r.sequence_position))
            .ok_or_else(|| RelayError::RaceLost {
                run_id: run_id.clone(),
                reason: "no longer on course".to_string(),
            })?;
        debug!(
            "Touch on {} attributed to {} ({:?}, skipped {})",
            checkpoint_id, athlete_name, attribution.tier, attribution.skipped_count
        );

        let segment_id = self
            .store
            .record_touch(&run_id, checkpoint_id, timestamp_ms)?
            .ok_or_else(|| RelayError::UnrecordableSegment {
                run_id: run_id.clone(),
                checkpoint_id: checkpoint_id.to_string(),
            })?;

        // must run before the cursor moves so edges start from the old position
        let missed_segments =
            self.mark_skipped_segments(&run_id, previous_position, attribution.target_position);

        let alert = match self.store.check_segment_alert(segment_id) {
            Ok(alert) => alert,
            Err(e) => {
                warn!("Could not check alerts for segment {}: {}", segment_id, e);
                None
            }
        };
        if let Some(alert) = &alert {
            warn!("ALERT: segment {} - {}", segment_id, alert);
        }

        if let Some(run) = self.state.registry.get_mut(&run_id) {
            run.advance(checkpoint_id, attribution.target_position);
        }
        info!(
            "Touch recorded: {} -> {} (position {}/{})",
            athlete_name,
            checkpoint_id,
            attribution.target_position + 1,
            self.state.sequence.len()
        );

        let action = self
            .state
            .course
            .as_ref()
            .and_then(|c| c.action_for(checkpoint_id))
            .cloned();
        let mut commands = Vec::new();
        let mut release = ReleaseDecision::NotTriggered;
        let mut finished = None;
        let mut session_completed = false;

        match action {
            None => warn!("No action found for checkpoint {}", checkpoint_id),
            Some(action) => {
                if action.releases_next {
                    release =
                        self.release_next(&session_id, timestamp_ms, config, &mut commands);
                }
                if action.finishes_run {
                    finished = self.finish_run(&run_id, timestamp_ms);
                    if finished.is_some() {
                        session_completed =
                            self.close_if_complete(&session_id, config, &mut commands);
                    }
                }
            }
        }

        Ok((
            TouchOutcome {
                checkpoint_id: checkpoint_id.to_string(),
                timestamp_ms,
                run_id,
                athlete_name,
                tier: attribution.tier,
                sequence_position: attribution.target_position,
                skipped_count: attribution.skipped_count,
                segment_id,
                missed_segments,
                alert,
                release,
                finished,
                session_completed,
            },
            commands,
        ))
    }

    /// Mark the segments between `previous_position` (exclusive) and `target_position`
    /// (exclusive) as missed. Returns the ids of the segments that were marked.
    fn mark_skipped_segments(
        &mut self,
        run_id: &str,
        previous_position: Option<usize>,
        target_position: usize,
    ) -> Vec<u64> {
        let first_skipped = previous_position.map_or(0, |p| p + 1);
        if first_skipped >= target_position {
            return Vec::new();
        }

        let segments = match self.store.get_run_segments(run_id) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("Could not load segments for run {}: {}", run_id, e);
                return Vec::new();
            }
        };

        let mut missed = Vec::new();
        for position in first_skipped..target_position {
            let Some((from, to)) = self.state.sequence.edge_into(position) else {
                continue;
            };
            let Some(segment) = segments
                .iter()
                .find(|s| s.from_checkpoint == from && s.to_checkpoint == to)
            else {
                warn!("No segment {} -> {} for run {}", from, to, run_id);
                continue;
            };
            match self.store.mark_segment_missed(segment.segment_id) {
                Ok(()) => {
                    info!("{} -> {} marked as missed for run {}", from, to, run_id);
                    missed.push(segment.segment_id);
                }
                Err(e) => warn!(
                    "Could not mark segment {} as missed: {}",
                    segment.segment_id, e
                ),
            }
        }
        missed
    }

    /// Persisted status and in-memory checks that must all pass before a queued run starts
    fn check_admission(&self, next: &QueuedRun, capacity: usize) -> Result<(), RelayError> {
        let status = self.store.get_run_status(&next.run_id)?;
        if status != RunStatus::Queued {
            return Err(RelayError::RaceLost {
                run_id: next.run_id.clone(),
                reason: format!("status is {:?}", status),
            });
        }
        if self.state.registry.contains(&next.run_id) {
            return Err(RelayError::RaceLost {
                run_id: next.run_id.clone(),
                reason: "already on course".to_string(),
            });
        }
        if self.state.registry.len() >= capacity {
            return Err(RelayError::CapacityExceeded {
                run_id: next.run_id.clone(),
                capacity,
            });
        }
        Ok(())
    }

    fn release_next(
        &mut self,
        session_id: &str,
        timestamp_ms: u128,
        config: &AppConfig,
        commands: &mut Vec<ActuatorCommand>,
    ) -> ReleaseDecision {
        let next = match self.store.get_next_queued_run(session_id) {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!("No more athletes queued");
                return ReleaseDecision::QueueEmpty;
            }
            Err(e) => {
                warn!("Could not look up the next queued run: {}", e);
                return ReleaseDecision::Failed {
                    run_id: None,
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = self.check_admission(&next, config.max_active_runs) {
            warn!("Release of {} skipped: {}", next.athlete_name, e);
            return match e {
                RelayError::RaceLost { run_id, .. } => ReleaseDecision::RaceLost { run_id },
                RelayError::CapacityExceeded { run_id, .. } => {
                    ReleaseDecision::AtCapacity { run_id }
                }
                other => ReleaseDecision::Failed {
                    run_id: Some(next.run_id.clone()),
                    reason: other.to_string(),
                },
            };
        }

        if let Some(course) = &self.state.course {
            if let Err(e) = self
                .store
                .create_segments_for_run(&next.run_id, &course.course_id)
            {
                error!("Segment creation failed for {}: {}", next.athlete_name, e);
                return ReleaseDecision::Failed {
                    run_id: Some(next.run_id.clone()),
                    reason: e.to_string(),
                };
            }
        }
        if let Err(e) = self.store.start_run(&next.run_id, timestamp_ms) {
            warn!("start_run failed for {}: {}", next.athlete_name, e);
            return ReleaseDecision::Failed {
                run_id: Some(next.run_id.clone()),
                reason: e.to_string(),
            };
        }
        self.state
            .registry
            .insert(ActiveRun::from_queued(&next, timestamp_ms));
        if let Some(course) = &self.state.course {
            commands.extend(start_audio(course, self.state.sequence.start_checkpoint()));
        }

        info!(
            "Next athlete started: {} (active {}/{})",
            next.athlete_name,
            self.state.registry.len(),
            self.state.total_queued
        );
        ReleaseDecision::Released {
            run_id: next.run_id,
            athlete_name: next.athlete_name,
        }
    }

    fn finish_run(&mut self, run_id: &str, timestamp_ms: u128) -> Option<FinishedRun> {
        let run = self.state.registry.get(run_id)?;
        let elapsed_secs = timestamp_ms.saturating_sub(run.started_at_ms) as f64 / 1000.0;
        let athlete_name = run.athlete_name.clone();

        if let Err(e) = self.store.complete_run(run_id, timestamp_ms, elapsed_secs) {
            warn!("Could not complete run {}: {}", run_id, e);
            return None;
        }
        self.state.registry.remove(run_id);
        info!(
            "Run completed: {} in {:.2}s, {} still on course",
            athlete_name,
            elapsed_secs,
            self.state.registry.len()
        );

        Some(FinishedRun {
            run_id: run_id.to_string(),
            athlete_name,
            elapsed_secs,
        })
    }

    fn close_if_complete(
        &mut self,
        session_id: &str,
        config: &AppConfig,
        commands: &mut Vec<ActuatorCommand>,
    ) -> bool {
        let queue_exhausted = match completion::queue_exhausted(&self.store, session_id) {
            Ok(exhausted) => exhausted,
            Err(e) => {
                warn!("Could not check the queue of session {}: {}", session_id, e);
                return false;
            }
        };
        if !completion::is_session_complete(queue_exhausted, &self.state.registry) {
            return false;
        }

        if let Err(e) = self.store.complete_session(session_id) {
            warn!("Could not complete session {}: {}", session_id, e);
            return false;
        }

        let start_checkpoint = self.state.sequence.start_checkpoint().to_string();
        self.state.reset();
        commands.push(ActuatorCommand::DeactivateCourse);
        commands.push(ActuatorCommand::SetLedPattern {
            checkpoint_id: start_checkpoint,
            pattern: config.celebration_pattern.clone(),
            for_secs: Some(config.celebration_secs),
        });
        info!("Session {} completed - all athletes finished", session_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::LogActuator;
    use crate::course::CourseAction;
    use crate::store::{Athlete, MemoryStore, SegmentStatus};

    // start S, then A B C D; B releases the next athlete, D finishes
    fn course() -> CourseDefinition {
        CourseDefinition {
            course_id: "c1".to_string(),
            course_name: "Relay".to_string(),
            start_checkpoint: Some("S".to_string()),
            actions: vec![
                CourseAction::new("S").with_audio_clip("go.mp3"),
                CourseAction::new("A"),
                CourseAction::new("B").releasing_next(),
                CourseAction::new("C"),
                CourseAction::new("D").finishing_run(),
            ],
        }
    }

    fn controller(athletes: usize) -> (RelayController<MemoryStore, LogActuator>, Vec<String>) {
        let course = course();
        let mut store = MemoryStore::new();
        store.add_course(&course, "S").unwrap();
        let roster: Vec<Athlete> = (1..=athletes)
            .map(|i| Athlete {
                athlete_id: format!("a{}", i),
                name: format!("Athlete {}", i),
            })
            .collect();
        let runs = store.create_session("s1", "c1", &roster).unwrap();
        let controller = RelayController::new(store, LogActuator, AppConfig::default());
        controller.start_session("s1", course, 0).unwrap();
        (controller, runs)
    }

    #[test]
    fn test_start_session_seeds_first_run() {
        let (controller, runs) = controller(3);
        let snapshot = controller.snapshot().unwrap();
        assert_eq!(snapshot.session_id.as_deref(), Some("s1"));
        assert_eq!(snapshot.sequence, vec!["A", "B", "C", "D"]);
        assert_eq!(snapshot.total_queued, 3);
        assert_eq!(snapshot.active_runs.len(), 1);
        assert_eq!(snapshot.active_runs[0].run_id, runs[0]);
        assert_eq!(snapshot.active_runs[0].sequence_position, None);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (controller, _) = controller(1);
        assert!(matches!(
            controller.start_session("s1", course(), 10),
            Err(RelayError::SessionAlreadyActive { .. })
        ));
    }

    #[test]
    fn test_skipping_first_checkpoint_marks_start_segment_missed() {
        let (controller, runs) = controller(1);
        let outcome = controller.on_touch("B", 1_000).unwrap();

        assert_eq!(outcome.run_id, runs[0]);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.missed_segments.len(), 1);
        assert!(outcome.alert.is_some());

        let segments = controller
            .with_store(|s| s.get_run_segments(&runs[0]).unwrap())
            .unwrap();
        assert_eq!(segments[0].from_checkpoint, "S");
        assert_eq!(segments[0].to_checkpoint, "A");
        assert_eq!(segments[0].status, SegmentStatus::Missed);
        assert_eq!(segments[1].status, SegmentStatus::Recorded);
        assert_eq!(segments[2].status, SegmentStatus::Pending);
    }

    #[test]
    fn test_repeated_touch_is_not_attributed_twice() {
        let (controller, runs) = controller(1);
        controller.on_touch("A", 1_000).unwrap();
        assert!(matches!(
            controller.on_touch("A", 1_000),
            Err(RelayError::NoAttributionCandidate { .. })
        ));
        let recorded = controller
            .with_store(|s| {
                s.get_run_segments(&runs[0])
                    .unwrap()
                    .iter()
                    .filter(|seg| seg.status == SegmentStatus::Recorded)
                    .count()
            })
            .unwrap();
        assert_eq!(recorded, 1);
    }

    #[test]
    fn test_unknown_checkpoint_leaves_state_untouched() {
        let (controller, _) = controller(2);
        let before = controller.snapshot().unwrap();
        assert!(matches!(
            controller.on_touch("Z", 1_000),
            Err(RelayError::UnknownCheckpoint { .. })
        ));
        assert_eq!(controller.snapshot().unwrap(), before);
    }

    #[test]
    fn test_release_and_finish() {
        let (controller, runs) = controller(2);
        controller.on_touch("A", 1_000).unwrap();
        let outcome = controller.on_touch("B", 2_000).unwrap();
        assert_eq!(
            outcome.release,
            ReleaseDecision::Released {
                run_id: runs[1].clone(),
                athlete_name: "Athlete 2".to_string(),
            }
        );
        assert_eq!(controller.snapshot().unwrap().active_runs.len(), 2);

        controller.on_touch("C", 3_000).unwrap();
        let outcome = controller.on_touch("D", 4_500).unwrap();
        let finished = outcome.finished.unwrap();
        assert_eq!(finished.run_id, runs[0]);
        assert_eq!(finished.elapsed_secs, 4.5);
        assert!(!outcome.session_completed);
        assert_eq!(controller.snapshot().unwrap().active_runs.len(), 1);
    }

    #[test]
    fn test_unrecordable_touch_does_not_move_cursor() {
        let (controller, runs) = controller(1);
        // leave the run without any pending segment
        controller
            .with_store_mut(|s| {
                for segment in s.get_run_segments(&runs[0]).unwrap() {
                    s.mark_segment_missed(segment.segment_id).unwrap();
                }
            })
            .unwrap();

        assert!(matches!(
            controller.on_touch("A", 1_000),
            Err(RelayError::UnrecordableSegment { .. })
        ));
        let snapshot = controller.snapshot().unwrap();
        assert_eq!(snapshot.active_runs[0].sequence_position, None);
    }

    #[test]
    fn test_stop_session_resets_state() {
        let (controller, _) = controller(2);
        controller.stop_session("Stopped by coach").unwrap();
        assert!(!controller.snapshot().unwrap().is_active());
        assert!(matches!(
            controller.on_touch("A", 1_000),
            Err(RelayError::NoActiveSession)
        ));
        assert!(controller.stop_session("again").is_err());
    }
}
