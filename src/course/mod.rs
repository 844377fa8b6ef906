// Course definitions and the checkpoint sequence derived from them

pub mod sequence;
pub mod types;

pub use sequence::CourseSequence;
pub use types::{CourseAction, CourseDefinition};
