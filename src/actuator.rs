// Audio and LED commands sent to course devices
// Commands are fire-and-forget, a failed command never affects relay state

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ActuatorCommand {
    /// Play an audio clip on a checkpoint's speaker
    PlayAudio { checkpoint_id: String, clip: String },
    /// Run an LED pattern, switching it off again after `for_secs` when set
    SetLedPattern {
        checkpoint_id: String,
        pattern: String,
        for_secs: Option<u64>,
    },
    /// Return every device on the course to standby
    DeactivateCourse,
}

impl std::fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuatorCommand::PlayAudio {
                checkpoint_id,
                clip,
            } => write!(f, "play {} on {}", clip, checkpoint_id),
            ActuatorCommand::SetLedPattern {
                checkpoint_id,
                pattern,
                ..
            } => write!(f, "led {} on {}", pattern, checkpoint_id),
            ActuatorCommand::DeactivateCourse => write!(f, "deactivate course"),
        }
    }
}

pub trait Actuator {
    fn dispatch(&self, command: &ActuatorCommand) -> Result<(), RelayError>;
}

/// Actuator that only logs the commands it receives
#[derive(Clone, Copy, Debug, Default)]
pub struct LogActuator;

impl Actuator for LogActuator {
    fn dispatch(&self, command: &ActuatorCommand) -> Result<(), RelayError> {
        info!("Actuator: {}", command);
        Ok(())
    }
}

/// Send every command, logging failures instead of returning them.
pub fn dispatch_all(actuator: &impl Actuator, commands: &[ActuatorCommand]) {
    for command in commands {
        if let Err(e) = actuator.dispatch(command) {
            warn!("Actuator command '{}' failed: {}", command, e);
        }
    }
}
