pub mod layer_norm;

pub use layer_norm::{layer_norm, normalize_rows, LayerNormWeights, LN_EPS};
