//! Layer kinds and their initializers and constructors, resolved by `match`.

use crate::config::LayerConfig;
use crate::error::{Error, Result};
use crate::init::{init_ff, init_gru, init_gru_cond, init_lstm};
use crate::layers::{ConditionalGru, ConditionalGruMulti, FeedForward, Gru, Lstm};
use crate::weights::WeightSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Ff,
    Gru,
    GruCond,
    GruCondMulti,
    Lstm,
}

impl LayerKind {
    pub const ALL: [LayerKind; 5] = [
        LayerKind::Ff,
        LayerKind::Gru,
        LayerKind::GruCond,
        LayerKind::GruCondMulti,
        LayerKind::Lstm,
    ];

    /// Canonical name, also the default weight prefix.
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Ff => "ff",
            LayerKind::Gru => "gru",
            LayerKind::GruCond => "gru_cond",
            LayerKind::GruCondMulti => "gru_cond_multi",
            LayerKind::Lstm => "lstm",
        }
    }

    pub fn supports_layernorm(self) -> bool {
        matches!(self, LayerKind::Gru | LayerKind::GruCond)
    }

    /// Fresh weights for `cfg` under `cfg.prefix()`.
    pub fn init_params<R: Rng + ?Sized>(self, cfg: &LayerConfig, rng: &mut R) -> Result<WeightSet> {
        cfg.validate()?;
        let prefix = cfg.prefix();
        let dims = cfg.dims();
        let set = match self {
            LayerKind::Ff => init_ff(rng, prefix, dims.nin, dims.dim, cfg.scale, cfg.ortho),
            LayerKind::Gru => init_gru(rng, prefix, dims, cfg.scale, cfg.layernorm),
            LayerKind::GruCond | LayerKind::GruCondMulti => init_gru_cond(rng, prefix, dims, cfg.scale, cfg.layernorm),
            LayerKind::Lstm => init_lstm(rng, prefix, dims, cfg.scale, cfg.forget_bias),
        };
        Ok(set)
    }
}

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LayerKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::UnknownLayer(s.to_string()))
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A constructed layer of any kind.
#[derive(Clone, Debug)]
pub enum Layer {
    Ff(FeedForward),
    Gru(Gru),
    GruCond(ConditionalGru),
    GruCondMulti(ConditionalGruMulti),
    Lstm(Lstm),
}

impl Layer {
    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        Ok(match cfg.kind {
            LayerKind::Ff => Layer::Ff(FeedForward::from_config(cfg)?),
            LayerKind::Gru => Layer::Gru(Gru::from_config(cfg)?),
            LayerKind::GruCond => Layer::GruCond(ConditionalGru::from_config(cfg)?),
            LayerKind::GruCondMulti => Layer::GruCondMulti(ConditionalGruMulti::from_config(cfg)?),
            LayerKind::Lstm => Layer::Lstm(Lstm::from_config(cfg)?),
        })
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Ff(_) => LayerKind::Ff,
            Layer::Gru(_) => LayerKind::Gru,
            Layer::GruCond(_) => LayerKind::GruCond,
            Layer::GruCondMulti(_) => LayerKind::GruCondMulti,
            Layer::Lstm(_) => LayerKind::Lstm,
        }
    }
}

/// Initializes and constructs a layer in one go.
pub fn build<R: Rng + ?Sized>(cfg: &LayerConfig, rng: &mut R) -> Result<(Layer, WeightSet)> {
    let layer = Layer::from_config(cfg)?;
    let weights = cfg.kind.init_params(cfg, rng)?;
    tracing::debug!(kind = %cfg.kind, prefix = cfg.prefix(), tensors = weights.len(), "layer built");
    Ok((layer, weights))
}
