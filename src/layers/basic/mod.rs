pub mod feedforward;

pub use feedforward::{FeedForward, FeedForwardWeights};
