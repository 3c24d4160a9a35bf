// src/layers/basic/feedforward.rs
use crate::config::LayerConfig;
use crate::error::{Error, Result};
use crate::layers::activation::Activation;
use crate::ops::matmul::{affine, affine_seq};
use crate::weights::WeightSet;
use ndarray::{ArrayD, ArrayView1, ArrayView2, ArrayViewD, Ix2, Ix3};

/// `W` is stored `[nin, nout]`, so a layer is `x·W + b` with no transpose.
#[derive(Clone, Debug)]
pub struct FeedForwardWeights<'w> {
    pub w: ArrayView2<'w, f32>,
    pub b: ArrayView1<'w, f32>,
}

impl<'w> FeedForwardWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, nin: usize, nout: usize) -> Result<Self> {
        Ok(Self {
            w: set.matrix(prefix, "W", nin, nout)?,
            b: set.vector(prefix, "b", nout)?,
        })
    }
}

/// `activ(x·W + b)` over the last axis.
#[derive(Clone, Debug)]
pub struct FeedForward {
    prefix: String,
    nin: usize,
    nout: usize,
    activation: Activation,
}

impl FeedForward {
    pub fn new(prefix: impl Into<String>, nin: usize, nout: usize, activation: Activation) -> Self {
        Self {
            prefix: prefix.into(),
            nin,
            nout,
            activation,
        }
    }

    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg.prefix(), cfg.nin, cfg.dim, cfg.activation))
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Accepts `[B, nin]` or `[T, B, nin]`.
    pub fn forward(&self, weights: &WeightSet, x: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        let w = FeedForwardWeights::from_set(weights, &self.prefix, self.nin, self.nout)?;
        let name = format!("{}_W", self.prefix);

        let mut y = match x.ndim() {
            2 => affine(&x.into_dimensionality::<Ix2>()?, &w.w, &w.b, &name)?.into_dyn(),
            3 => affine_seq(&x.into_dimensionality::<Ix3>()?, &w.w, &w.b, &name)?.into_dyn(),
            _ => return Err(Error::shape("ff input", format!("[_, {}] or [_, _, {}]", self.nin, self.nin), x.shape())),
        };
        self.activation.apply_inplace(&mut y);
        Ok(y)
    }
}
