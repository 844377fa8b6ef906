// Decides which athlete on course a checkpoint touch belongs to

use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::course::CourseSequence;
use crate::errors::RelayError;

use super::registry::{ActiveRun, ActiveRunRegistry};

/// Priority class of an attribution candidate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// The touched checkpoint is the next one for the athlete
    Sequential,
    /// The athlete skipped one or more checkpoints to get here
    Skipped,
}

/// An active run that could own a touch
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub run: &'a ActiveRun,
    pub gap: u64,
}

impl Candidate<'_> {
    pub fn tier(&self) -> Tier {
        if self.gap == 1 {
            Tier::Sequential
        } else {
            Tier::Skipped
        }
    }

    /// Sequential candidates beat skipped ones. Within a tier the smallest gap wins, and
    /// among equal gaps the athlete queued first wins.
    fn priority_cmp(&self, other: &Self) -> Ordering {
        self.tier()
            .cmp(&other.tier())
            .then(self.gap.cmp(&other.gap))
            .then(self.run.queue_position.cmp(&other.run.queue_position))
            .then_with(|| self.run.run_id.cmp(&other.run.run_id))
    }
}

/// Result of a successful attribution
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attribution {
    pub run_id: String,
    pub tier: Tier,
    /// Sequence position of the touched checkpoint
    pub target_position: usize,
    /// Checkpoints skipped between the run's last position and the touched one
    pub skipped_count: usize,
}

/// Every active run with a positive gap to `target_position`.
///
/// Runs that already sit at or beyond the touched checkpoint are duplicates or backward
/// touches and are never candidates.
pub fn candidates(registry: &ActiveRunRegistry, target_position: usize) -> Vec<Candidate<'_>> {
    registry
        .iter()
        .filter_map(|run| {
            let gap = run.gap_to(target_position);
            debug!(
                "{}: last_position={:?}, gap={}",
                run.athlete_name, run.sequence_position, gap
            );
            (gap > 0).then_some(Candidate {
                run,
                gap: gap as u64,
            })
        })
        .collect()
}

/// Pick the active run that owns a touch on `checkpoint_id`.
///
/// `sequence` is `None` when no session is active.
pub fn resolve(
    sequence: Option<&CourseSequence>,
    registry: &ActiveRunRegistry,
    checkpoint_id: &str,
) -> Result<Attribution, RelayError> {
    let sequence = sequence.ok_or(RelayError::NoActiveSession)?;
    let target_position =
        sequence
            .position_of(checkpoint_id)
            .ok_or_else(|| RelayError::UnknownCheckpoint {
                checkpoint_id: checkpoint_id.to_string(),
            })?;

    let winner = candidates(registry, target_position)
        .into_iter()
        .min_by(|a, b| a.priority_cmp(b))
        .ok_or_else(|| RelayError::NoAttributionCandidate {
            checkpoint_id: checkpoint_id.to_string(),
        })?;

    Ok(Attribution {
        run_id: winner.run.run_id.clone(),
        tier: winner.tier(),
        target_position,
        skipped_count: (winner.gap - 1) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sequence() -> CourseSequence {
        CourseSequence::new(
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            "START".into(),
        )
        .unwrap()
    }

    fn run_at(run_id: &str, position: Option<usize>, queue_position: u32) -> ActiveRun {
        ActiveRun {
            run_id: run_id.to_string(),
            athlete_id: run_id.to_string(),
            athlete_name: run_id.to_string(),
            started_at_ms: 0,
            last_checkpoint: None,
            sequence_position: position,
            queue_position,
        }
    }

    fn registry(runs: Vec<ActiveRun>) -> ActiveRunRegistry {
        let mut registry = ActiveRunRegistry::new();
        for run in runs {
            registry.insert(run);
        }
        registry
    }

    #[test]
    fn test_fresh_run_skipping_first_checkpoint() {
        let sequence = sequence();
        let registry = registry(vec![run_at("r1", None, 1)]);

        let attribution = resolve(Some(&sequence), &registry, "B").unwrap();
        assert_eq!(attribution.run_id, "r1");
        assert_eq!(attribution.tier, Tier::Skipped);
        assert_eq!(attribution.skipped_count, 1);
        assert_eq!(attribution.target_position, 1);
    }

    #[test]
    fn test_sequential_beats_skipped_regardless_of_queue() {
        let sequence = sequence();
        let registry = registry(vec![run_at("early", Some(0), 1), run_at("late", Some(1), 2)]);

        let attribution = resolve(Some(&sequence), &registry, "C").unwrap();
        assert_eq!(attribution.run_id, "late");
        assert_eq!(attribution.tier, Tier::Sequential);
        assert_eq!(attribution.skipped_count, 0);
    }

    #[test]
    fn test_sequential_tie_goes_to_earliest_queued() {
        let sequence = sequence();
        let registry = registry(vec![run_at("third", Some(1), 3), run_at("first", Some(1), 1)]);

        let attribution = resolve(Some(&sequence), &registry, "C").unwrap();
        assert_eq!(attribution.run_id, "first");
    }

    #[test]
    fn test_skipped_prefers_smallest_gap_then_queue() {
        let sequence = sequence();
        let registry = registry(vec![
            run_at("far", None, 1),
            run_at("near_late", Some(0), 4),
            run_at("near_early", Some(0), 2),
        ]);

        let attribution = resolve(Some(&sequence), &registry, "D").unwrap();
        assert_eq!(attribution.run_id, "near_early");
        assert_eq!(attribution.skipped_count, 2);
    }

    #[test]
    fn test_duplicate_and_backward_touches_are_ignored() {
        let sequence = sequence();
        let registry = registry(vec![run_at("r1", Some(2), 1)]);

        assert!(matches!(
            resolve(Some(&sequence), &registry, "C"),
            Err(RelayError::NoAttributionCandidate { .. })
        ));
        assert!(matches!(
            resolve(Some(&sequence), &registry, "A"),
            Err(RelayError::NoAttributionCandidate { .. })
        ));
    }

    #[test]
    fn test_unknown_checkpoint_and_no_session() {
        let sequence = sequence();
        let registry = registry(vec![run_at("r1", None, 1)]);

        assert!(matches!(
            resolve(Some(&sequence), &registry, "START"),
            Err(RelayError::UnknownCheckpoint { .. })
        ));
        assert!(matches!(
            resolve(None, &registry, "A"),
            Err(RelayError::NoActiveSession)
        ));
    }

    #[test]
    fn test_empty_registry_has_no_candidate() {
        let sequence = sequence();
        assert!(matches!(
            resolve(Some(&sequence), &ActiveRunRegistry::new(), "A"),
            Err(RelayError::NoAttributionCandidate { .. })
        ));
    }

    fn position_strategy() -> impl Strategy<Value = Option<usize>> {
        prop_oneof![Just(None), (0usize..6).prop_map(Some)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_winner_is_never_worse_than_any_candidate(
            positions in proptest::collection::vec(position_strategy(), 1..6),
            target in 0usize..6,
        ) {
            let sequence = CourseSequence::new(
                (0..6).map(|i| format!("D{}", i)).collect(),
                "START".into(),
            ).unwrap();
            let runs: Vec<ActiveRun> = positions
                .iter()
                .enumerate()
                .map(|(i, p)| run_at(&format!("r{}", i), *p, i as u32 + 1))
                .collect();
            let registry = registry(runs);
            let checkpoint = format!("D{}", target);

            match resolve(Some(&sequence), &registry, &checkpoint) {
                Ok(attribution) => {
                    let winner = registry.get(&attribution.run_id).unwrap();
                    let winner_gap = winner.gap_to(target);
                    prop_assert!(winner_gap >= 1);
                    prop_assert_eq!(attribution.skipped_count as i64, winner_gap - 1);
                    for other in registry.iter() {
                        let gap = other.gap_to(target);
                        if gap <= 0 {
                            continue;
                        }
                        // a skipped winner means nobody was sequential
                        if winner_gap == 1 {
                            prop_assert!(gap != 1 || other.queue_position >= winner.queue_position);
                        } else {
                            prop_assert!(gap != 1);
                            prop_assert!(gap >= winner_gap);
                        }
                    }
                }
                Err(RelayError::NoAttributionCandidate { .. }) => {
                    prop_assert!(registry.iter().all(|r| r.gap_to(target) <= 0));
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
