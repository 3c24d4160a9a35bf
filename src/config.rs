// src/config.rs
use crate::error::{Error, Result};
use crate::layers::activation::Activation;
use crate::registry::LayerKind;
use serde::{Deserialize, Serialize};

/// The three dimension scalars every recurrent weight shape derives from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    /// Input (embedding) dimension
    pub nin: usize,
    /// Hidden dimension
    pub dim: usize,
    /// Context (annotation) dimension, conventionally `2 * dim`
    pub dimctx: usize,
}

impl Dims {
    pub fn new(nin: usize, dim: usize) -> Self {
        Self { nin, dim, dimctx: 2 * dim }
    }

    pub fn with_ctx(nin: usize, dim: usize, dimctx: usize) -> Self {
        Self { nin, dim, dimctx }
    }
}

/// One layer of a model: what it is, where its weights live, and its sizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub kind: LayerKind,
    /// Weight-set prefix; defaults to the kind's canonical name
    #[serde(default)]
    pub prefix: Option<String>,
    pub nin: usize,
    /// Hidden size, or output size for feed-forward layers
    pub dim: usize,
    #[serde(default)]
    pub dimctx: Option<usize>,
    #[serde(default)]
    pub layernorm: bool,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_ortho")]
    pub ortho: bool,
    #[serde(default)]
    pub forget_bias: f32,
}

fn default_scale() -> f32 {
    0.01
}

fn default_ortho() -> bool {
    true
}

impl LayerConfig {
    pub fn new(kind: LayerKind, nin: usize, dim: usize) -> Self {
        Self {
            kind,
            prefix: None,
            nin,
            dim,
            dimctx: None,
            layernorm: false,
            activation: Activation::default(),
            scale: default_scale(),
            ortho: default_ortho(),
            forget_bias: 0.0,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_dimctx(mut self, dimctx: usize) -> Self {
        self.dimctx = Some(dimctx);
        self
    }

    pub fn with_layernorm(mut self, layernorm: bool) -> Self {
        self.layernorm = layernorm;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(self.kind.name())
    }

    pub fn dims(&self) -> Dims {
        Dims::with_ctx(self.nin, self.dim, self.dimctx.unwrap_or(2 * self.dim))
    }

    pub fn validate(&self) -> Result<()> {
        let dims = self.dims();
        if dims.nin == 0 || dims.dim == 0 || dims.dimctx == 0 {
            return Err(Error::InvalidArgument {
                arg: "dims",
                reason: format!("all dimensions must be positive, got {:?}", dims),
            });
        }
        if self.layernorm && !self.kind.supports_layernorm() {
            return Err(Error::InvalidArgument {
                arg: "layernorm",
                reason: format!("'{}' layers have no layer-normalized variant", self.kind),
            });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidArgument {
                arg: "scale",
                reason: format!("expected a positive scale, got {}", self.scale),
            });
        }
        Ok(())
    }
}
