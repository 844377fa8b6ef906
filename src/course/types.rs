// Course definition as supplied by the course authoring side

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::course::CourseSequence;
use crate::errors::RelayError;

/// What happens when a checkpoint is touched
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CourseAction {
    /// Device identifier of the checkpoint
    pub checkpoint_id: String,
    /// Touching this checkpoint releases the next queued athlete
    #[serde(default)]
    pub releases_next: bool,
    /// Touching this checkpoint finishes the athlete's run
    #[serde(default)]
    pub finishes_run: bool,
    /// Audio clip announced when this action is reached
    #[serde(default)]
    pub audio_clip: Option<String>,
}

impl CourseAction {
    pub fn new(checkpoint_id: &str) -> Self {
        Self {
            checkpoint_id: checkpoint_id.to_string(),
            releases_next: false,
            finishes_run: false,
            audio_clip: None,
        }
    }

    pub fn releasing_next(mut self) -> Self {
        self.releases_next = true;
        self
    }

    pub fn finishing_run(mut self) -> Self {
        self.finishes_run = true;
        self
    }

    pub fn with_audio_clip(mut self, clip: &str) -> Self {
        self.audio_clip = Some(clip.to_string());
        self
    }
}

/// A complete course: its identity, the start checkpoint and the ordered checkpoint actions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CourseDefinition {
    pub course_id: String,
    pub course_name: String,
    /// Device athletes depart from. Falls back to the configured default when absent.
    #[serde(default)]
    pub start_checkpoint: Option<String>,
    pub actions: Vec<CourseAction>,
}

impl CourseDefinition {
    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::InputFileError {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| RelayError::InputParseError {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn start_checkpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.start_checkpoint.as_deref().unwrap_or(default)
    }

    /// Action metadata for a checkpoint
    pub fn action_for(&self, checkpoint_id: &str) -> Option<&CourseAction> {
        self.actions
            .iter()
            .find(|a| a.checkpoint_id == checkpoint_id)
    }

    /// Clip played on the start checkpoint whenever an athlete is sent off.
    pub fn start_audio_clip(&self) -> Option<&str> {
        self.actions.first().and_then(|a| a.audio_clip.as_deref())
    }

    /// Build the checkpoint sequence, leaving out the start checkpoint.
    pub fn sequence(&self, start_checkpoint: &str) -> Result<CourseSequence, RelayError> {
        let checkpoints: Vec<String> = self
            .actions
            .iter()
            .filter(|a| a.checkpoint_id != start_checkpoint)
            .map(|a| a.checkpoint_id.clone())
            .collect();

        if checkpoints.is_empty() {
            return Err(RelayError::InvalidCourse {
                reason: format!("Course {} has no checkpoints", self.course_id),
            });
        }
        if !self.actions.iter().any(|a| a.finishes_run) {
            log::warn!(
                "Course {} has no checkpoint that finishes a run",
                self.course_id
            );
        }

        CourseSequence::new(checkpoints, start_checkpoint.to_string())
    }

    /// Segment edges every run traverses: start to first checkpoint, then each consecutive pair.
    pub fn segment_edges(&self, start_checkpoint: &str) -> Result<Vec<(String, String)>, RelayError> {
        let sequence = self.sequence(start_checkpoint)?;
        Ok(std::iter::once(sequence.start_checkpoint())
            .chain(sequence.checkpoints().iter().map(String::as_str))
            .tuple_windows()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect())
    }
}
