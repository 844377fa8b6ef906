use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// Ordered list of the checkpoints an athlete touches on the active course.
///
/// The start checkpoint is not part of the sequence. It is the device athletes depart from and
/// acts as the predecessor of position 0 when segments are resolved.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CourseSequence {
    checkpoints: Vec<String>,
    start_checkpoint: String,
}

impl CourseSequence {
    /// Build a sequence, rejecting duplicate checkpoints and a start checkpoint that also
    /// appears in the sequence.
    pub fn new(checkpoints: Vec<String>, start_checkpoint: String) -> Result<Self, RelayError> {
        let mut seen = std::collections::HashSet::new();
        for checkpoint in &checkpoints {
            if !seen.insert(checkpoint.as_str()) {
                return Err(RelayError::InvalidCourse {
                    reason: format!("Duplicate checkpoint in sequence: {}", checkpoint),
                });
            }
        }
        if seen.contains(start_checkpoint.as_str()) {
            return Err(RelayError::InvalidCourse {
                reason: format!(
                    "Start checkpoint {} cannot also be a sequence checkpoint",
                    start_checkpoint
                ),
            });
        }

        Ok(Self {
            checkpoints,
            start_checkpoint,
        })
    }

    /// Zero-based position of a checkpoint, `None` when it is not on the course.
    pub fn position_of(&self, checkpoint_id: &str) -> Option<usize> {
        self.checkpoints.iter().position(|c| c == checkpoint_id)
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.checkpoints.get(position).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn checkpoints(&self) -> &[String] {
        &self.checkpoints
    }

    pub fn start_checkpoint(&self) -> &str {
        &self.start_checkpoint
    }

    /// The checkpoint an athlete leaves from to reach `position`.
    pub fn predecessor(&self, position: usize) -> Option<&str> {
        if position == 0 {
            Some(&self.start_checkpoint)
        } else {
            self.get(position - 1)
        }
    }

    /// The directed edge (from, to) that ends at `position`.
    pub fn edge_into(&self, position: usize) -> Option<(&str, &str)> {
        Some((self.predecessor(position)?, self.get(position)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abcd() -> CourseSequence {
        CourseSequence::new(
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            "START".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_positions() {
        let sequence = abcd();
        assert_eq!(sequence.position_of("A"), Some(0));
        assert_eq!(sequence.position_of("D"), Some(3));
        assert_eq!(sequence.position_of("START"), None);
        assert_eq!(sequence.position_of("Z"), None);
        assert_eq!(sequence.len(), 4);
    }

    #[test]
    fn test_edges_use_start_checkpoint_for_first_position() {
        let sequence = abcd();
        assert_eq!(sequence.edge_into(0), Some(("START", "A")));
        assert_eq!(sequence.edge_into(2), Some(("B", "C")));
        assert_eq!(sequence.edge_into(4), None);
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(CourseSequence::new(vec!["A".into(), "A".into()], "S".into()).is_err());
        assert!(CourseSequence::new(vec!["A".into(), "S".into()], "S".into()).is_err());
    }
}
