// src/lib.rs
//! Recurrent layers for attentional sequence-to-sequence decoders:
//! GRU (with an optional layer-normalized step), LSTM, and conditional
//! GRUs that attend over one or two encoded source contexts.
//!
//! Every layer runs in two modes that agree step for step: `forward` scans
//! a whole target sequence, `forward_step` advances one timestep from a
//! caller-held state for incremental decoding.

pub mod config;
pub mod error;
pub mod init;
pub mod layers;
pub mod loader;
pub mod ops;
pub mod registry;
pub mod scan;
pub mod weights;

pub use config::{Dims, LayerConfig};
pub use error::{Error, Result};
pub use registry::{Layer, LayerKind};
pub use weights::{pp, WeightSet};
