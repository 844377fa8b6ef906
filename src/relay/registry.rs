use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::QueuedRun;

/// An athlete currently on course.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActiveRun {
    pub run_id: String,
    pub athlete_id: String,
    pub athlete_name: String,
    pub started_at_ms: u128,
    pub last_checkpoint: Option<String>,
    /// Last touched position in the course sequence, `None` until the first touch
    pub sequence_position: Option<usize>,
    /// Queue position fixed at session creation, only used to break ties
    pub queue_position: u32,
}

impl ActiveRun {
    pub fn from_queued(run: &QueuedRun, started_at_ms: u128) -> Self {
        Self {
            run_id: run.run_id.clone(),
            athlete_id: run.athlete_id.clone(),
            athlete_name: run.athlete_name.clone(),
            started_at_ms,
            last_checkpoint: None,
            sequence_position: None,
            queue_position: run.queue_position,
        }
    }

    /// Distance from the run's last position to `target`. A fresh run sits at -1.
    pub fn gap_to(&self, target: usize) -> i64 {
        let current = self.sequence_position.map_or(-1, |p| p as i64);
        target as i64 - current
    }

    /// Move the cursor forward. Backward or repeated positions are ignored.
    pub fn advance(&mut self, checkpoint_id: &str, position: usize) -> bool {
        if self.gap_to(position) <= 0 {
            return false;
        }
        self.last_checkpoint = Some(checkpoint_id.to_string());
        self.sequence_position = Some(position);
        true
    }
}

/// Athletes on course keyed by run id
#[derive(Clone, Debug, Default)]
pub struct ActiveRunRegistry {
    runs: HashMap<String, ActiveRun>,
}

impl ActiveRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run. Returns false and leaves the registry untouched if the run id is present.
    pub fn insert(&mut self, run: ActiveRun) -> bool {
        if self.runs.contains_key(&run.run_id) {
            return false;
        }
        self.runs.insert(run.run_id.clone(), run);
        true
    }

    pub fn remove(&mut self, run_id: &str) -> Option<ActiveRun> {
        self.runs.remove(run_id)
    }

    pub fn get(&self, run_id: &str) -> Option<&ActiveRun> {
        self.runs.get(run_id)
    }

    pub fn get_mut(&mut self, run_id: &str) -> Option<&mut ActiveRun> {
        self.runs.get_mut(run_id)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.contains_key(run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveRun> {
        self.runs.values()
    }

    /// Active runs ordered by queue position
    pub fn in_queue_order(&self) -> Vec<ActiveRun> {
        self.runs
            .values()
            .sorted_by_key(|r| r.queue_position)
            .cloned()
            .collect()
    }
}
