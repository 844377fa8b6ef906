use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, Sender};

use crate::errors::RelayError;

use super::{OutcomeRecord, TouchEvent, TouchHandler};

/// Counters for a finished ingest loop
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TouchStats {
    pub received: usize,
    pub attributed: usize,
    pub dropped: usize,
    pub sessions_completed: usize,
}

/// Feed every touch from `touch_receiver` to `handler` until all senders hang up.
///
/// When `outcome_sender` is set each touch's outcome is forwarded to it, typically to the
/// outcome writer thread.
pub fn collect_touches(
    handler: &impl TouchHandler,
    touch_receiver: Receiver<TouchEvent>,
    outcome_sender: Option<Sender<OutcomeRecord>>,
) -> Result<TouchStats, RelayError> {
    let mut stats = TouchStats::default();

    for event in touch_receiver {
        stats.received += 1;
        debug!(
            "Touch on {} at {}ms",
            event.checkpoint_id, event.timestamp_ms
        );

        let result = handler.on_touch(&event.checkpoint_id, event.timestamp_ms);
        match &result {
            Ok(outcome) => {
                stats.attributed += 1;
                if outcome.session_completed {
                    stats.sessions_completed += 1;
                }
            }
            Err(e) => {
                stats.dropped += 1;
                if !e.is_touch_drop() {
                    error!("Touch on {} failed: {}", event.checkpoint_id, e);
                }
            }
        }

        if let Some(ref sender) = outcome_sender {
            sender.send(OutcomeRecord::from_result(&event, result))?;
        }
    }

    info!(
        "Touch ingest finished: {} received, {} attributed, {} dropped",
        stats.received, stats.attributed, stats.dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{ReleaseDecision, Tier, TouchOutcome};
    use std::sync::mpsc;

    // attributes touches on "A" and drops everything else
    struct OnlyA;

    impl TouchHandler for OnlyA {
        fn on_touch(
            &self,
            checkpoint_id: &str,
            timestamp_ms: u128,
        ) -> Result<TouchOutcome, RelayError> {
            if checkpoint_id != "A" {
                return Err(RelayError::UnknownCheckpoint {
                    checkpoint_id: checkpoint_id.to_string(),
                });
            }
            Ok(TouchOutcome {
                checkpoint_id: checkpoint_id.to_string(),
                timestamp_ms,
                run_id: "r1".to_string(),
                athlete_name: "Ada".to_string(),
                tier: Tier::Sequential,
                sequence_position: 0,
                skipped_count: 0,
                segment_id: 0,
                missed_segments: vec![],
                alert: None,
                release: ReleaseDecision::NotTriggered,
                finished: None,
                session_completed: timestamp_ms == 30,
            })
        }
    }

    #[test]
    fn test_collect_counts_and_forwards() {
        let (touch_tx, touch_rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        for (cp, ts) in [("A", 10), ("Z", 20), ("A", 30)] {
            touch_tx.send(TouchEvent::new(cp, ts)).unwrap();
        }
        drop(touch_tx);

        let stats = collect_touches(&OnlyA, touch_rx, Some(outcome_tx)).unwrap();
        assert_eq!(
            stats,
            TouchStats {
                received: 3,
                attributed: 2,
                dropped: 1,
                sessions_completed: 1,
            }
        );

        let records: Vec<OutcomeRecord> = outcome_rx.iter().collect();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[1], OutcomeRecord::Dropped { timestamp_ms: 20, .. }));
    }

    #[test]
    fn test_collect_fails_when_outcome_receiver_is_gone() {
        let (touch_tx, touch_rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        drop(outcome_rx);
        touch_tx.send(TouchEvent::new("A", 10)).unwrap();
        drop(touch_tx);

        assert!(matches!(
            collect_touches(&OnlyA, touch_rx, Some(outcome_tx)),
            Err(RelayError::OutcomeBroadcastError { .. })
        ));
    }
}
