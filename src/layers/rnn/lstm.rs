use crate::config::{Dims, LayerConfig};
use crate::error::{Error, Result};
use crate::layers::activation::sigmoid;
use crate::ops::matmul::{affine, affine_seq, project_state};
use crate::ops::shape::{apply_mask, as_batched, ensure_rows, gate_slice, mask_or_ones, step_mask_or_ones};
use crate::scan::{scan, stack_time, step_once, Step};
use crate::weights::WeightSet;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewD, Zip};

/// Stacked LSTM weights. The `4*dim` axis is laid out as
/// `[input | forget | output | cell candidate]`.
#[derive(Clone, Debug)]
pub struct LstmWeights<'w> {
    pub w: ArrayView2<'w, f32>,
    pub b: ArrayView1<'w, f32>,
    pub u: ArrayView2<'w, f32>,
}

impl<'w> LstmWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        let d = dims.dim;
        Ok(Self {
            w: set.matrix(prefix, "W", dims.nin, 4 * d)?,
            b: set.vector(prefix, "b", 4 * d)?,
            u: set.matrix(prefix, "U", d, 4 * d)?,
        })
    }
}

/// Memory (hidden output) and cell state.
#[derive(Clone, Debug, PartialEq)]
pub struct LstmState {
    pub memory: Array2<f32>,
    pub cell: Array2<f32>,
}

impl LstmState {
    pub fn zeros(batch: usize, dim: usize) -> Self {
        Self {
            memory: Array2::zeros((batch, dim)),
            cell: Array2::zeros((batch, dim)),
        }
    }
}

/// One LSTM transition over a pre-projected `[B, 4*dim]` input.
///
/// With `masked == false` the mask is ignored, which is how the layer has
/// always behaved on unpadded inputs. With `masked == true` padded rows keep
/// both their memory and cell.
#[derive(Clone, Debug)]
pub struct LstmStep<'w> {
    pub u: ArrayView2<'w, f32>,
    pub dim: usize,
    pub masked: bool,
}

impl<'a, 'w> Step<'a> for LstmStep<'w> {
    type Input = ArrayView2<'a, f32>;
    type State = LstmState;
    type Output = LstmState;

    fn step(&self, mask: ArrayView1<'_, f32>, x: ArrayView2<'a, f32>, prev: &LstmState) -> Result<(LstmState, LstmState)> {
        let batch = prev.memory.nrows();
        let d = self.dim;
        ensure_rows(&prev.memory.view(), batch, d, "previous memory")?;
        ensure_rows(&prev.cell.view(), batch, d, "previous cell")?;
        ensure_rows(&x, batch, 4 * d, "state_below")?;
        if self.masked && mask.len() != batch {
            return Err(Error::shape("mask", format!("[{}]", batch), mask.shape()));
        }

        // 融合计算: preact = m·U + x
        let mut preact = project_state(&prev.memory.view(), &self.u, "U")?;
        preact += &x;

        // chunk 0: input, 1: forget, 2: output, 3: cell candidate
        let i = gate_slice(preact.view(), 0, d)?;
        let f = gate_slice(preact.view(), 1, d)?;
        let o = gate_slice(preact.view(), 2, d)?;
        let g = gate_slice(preact.view(), 3, d)?;

        // c_t = f * c_{t-1} + i * g
        let mut cell = Array2::<f32>::zeros((batch, d));
        Zip::from(&mut cell)
            .and(&i)
            .and(&f)
            .and(&g)
            .and(&prev.cell)
            .par_for_each(|c, &i, &f, &g, &c_prev| {
                *c = sigmoid(f) * c_prev + sigmoid(i) * g.tanh();
            });

        // m_t = o * tanh(c_t)
        let mut memory = Array2::<f32>::zeros((batch, d));
        Zip::from(&mut memory)
            .and(&o)
            .and(&cell)
            .par_for_each(|m, &o, &c| *m = sigmoid(o) * c.tanh());

        if self.masked {
            apply_mask(&mut memory, &prev.memory.view(), &mask);
            apply_mask(&mut cell, &prev.cell.view(), &mask);
        }

        let next = LstmState { memory, cell };
        Ok((next.clone(), next))
    }
}

/// LSTM layer.
#[derive(Clone, Debug)]
pub struct Lstm {
    prefix: String,
    dims: Dims,
    masked: bool,
}

/// Memory and cell trajectories, both `[T, B, dim]`.
#[derive(Clone, Debug)]
pub struct LstmOutput {
    pub memories: Array3<f32>,
    pub cells: Array3<f32>,
}

impl Lstm {
    pub fn new(prefix: impl Into<String>, nin: usize, dim: usize) -> Self {
        Self {
            prefix: prefix.into(),
            dims: Dims::new(nin, dim),
            masked: false,
        }
    }

    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            prefix: cfg.prefix().to_string(),
            dims: cfg.dims(),
            masked: false,
        })
    }

    /// Let the target mask freeze padded rows, as the GRU layers do.
    pub fn with_masking(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    fn unit<'w>(&self, weights: &'w WeightSet) -> Result<(LstmWeights<'w>, LstmStep<'w>)> {
        let w = LstmWeights::from_set(weights, &self.prefix, self.dims)?;
        let step = LstmStep {
            u: w.u,
            dim: self.dims.dim,
            masked: self.masked,
        };
        Ok((w, step))
    }

    /// Runs the whole sequence. Missing initial states are zeros.
    pub fn forward(
        &self,
        weights: &WeightSet,
        state_below: ArrayViewD<'_, f32>,
        init: Option<LstmState>,
        mask: Option<ArrayView2<'_, f32>>,
    ) -> Result<LstmOutput> {
        let x = as_batched(state_below, "state_below")?;
        let (steps, batch, nin) = x.dim();
        if nin != self.dims.nin {
            return Err(Error::shape("state_below", format!("[{}, {}, {}]", steps, batch, self.dims.nin), x.shape()));
        }
        tracing::debug!(prefix = %self.prefix, steps, batch, masked = self.masked, "lstm forward");

        let (w, step) = self.unit(weights)?;
        let mask = mask_or_ones(mask, steps, batch, "mask")?;
        let proj = affine_seq(&x, &w.w, &w.b, "W")?;
        let init = init.unwrap_or_else(|| LstmState::zeros(batch, self.dims.dim));

        let out = scan(&step, mask.view(), proj.outer_iter(), init)?;
        let d = self.dims.dim;
        Ok(LstmOutput {
            memories: stack_time(out.outputs.iter().map(|s| &s.memory), batch, d)?,
            cells: stack_time(out.outputs.iter().map(|s| &s.cell), batch, d)?,
        })
    }

    /// One timestep from `prev` (zeros when absent).
    pub fn forward_step(
        &self,
        weights: &WeightSet,
        x: ArrayView2<'_, f32>,
        mask: Option<ArrayView1<'_, f32>>,
        prev: Option<&LstmState>,
    ) -> Result<LstmState> {
        let batch = x.nrows();
        ensure_rows(&x, batch, self.dims.nin, "state_below")?;
        let (w, step) = self.unit(weights)?;
        let proj = affine(&x, &w.w, &w.b, "W")?;

        let zeros;
        let prev = match prev {
            Some(p) => p,
            None => {
                zeros = LstmState::zeros(batch, self.dims.dim);
                &zeros
            }
        };
        let mask = step_mask_or_ones(mask, batch, "mask")?;

        let (next, _) = step_once(&step, mask.view(), proj.view(), prev)?;
        Ok(next)
    }
}
