pub mod alignment;

pub use alignment::{AttendedPair, Attended, AttentionWeights, ProjectedContext};
