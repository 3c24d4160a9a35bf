pub mod activation;
pub mod attention;
pub mod basic;
pub mod norm;
pub mod rnn;

pub use activation::Activation;
pub use attention::{AttentionWeights, ProjectedContext};
pub use basic::FeedForward;
pub use norm::LayerNormWeights;
pub use rnn::{ConditionalGru, ConditionalGruMulti, Gru, Lstm};
