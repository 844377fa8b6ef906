// Library interface for fieldrelay
// This allows integration tests and benches to access internal modules

pub mod actuator;
pub mod config;
pub mod course;
pub mod errors;
pub mod ingest;
pub mod relay;
pub mod store;

// Re-export commonly used types
pub use actuator::{Actuator, ActuatorCommand, LogActuator};
pub use config::AppConfig;
pub use course::{CourseAction, CourseDefinition, CourseSequence};
pub use errors::RelayError;
pub use ingest::{OutcomeRecord, TouchEvent, TouchHandler};
pub use relay::{ReleaseDecision, RelayController, SessionSnapshot, TouchOutcome};
pub use store::{Athlete, MemoryStore, RelayStore};
