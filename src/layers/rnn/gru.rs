// src/layers/rnn/gru.rs
use crate::config::{Dims, LayerConfig};
use crate::error::{Error, Result};
use crate::layers::activation::sigmoid_inplace;
use crate::layers::norm::{layer_norm, LayerNormWeights};
use crate::ops::matmul::{affine, affine_seq, project_state};
use crate::ops::shape::{apply_mask, as_batched, ensure_rows, gate_slice, mask_or_ones, step_mask_or_ones};
use crate::scan::{scan, stack_time, step_once, Step};
use crate::weights::WeightSet;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewD, Zip};

/// Input-side weights of a GRU: `W`/`b` feed the stacked reset and update
/// gates, `Wx`/`bx` feed the candidate. `U`/`Ux` are the recurrent halves.
#[derive(Clone, Debug)]
pub struct GruWeights<'w> {
    pub w: ArrayView2<'w, f32>,
    pub b: ArrayView1<'w, f32>,
    pub wx: ArrayView2<'w, f32>,
    pub bx: ArrayView1<'w, f32>,
    pub u: ArrayView2<'w, f32>,
    pub ux: ArrayView2<'w, f32>,
}

impl<'w> GruWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        let (nin, d) = (dims.nin, dims.dim);
        Ok(Self {
            w: set.matrix(prefix, "W", nin, 2 * d)?,
            b: set.vector(prefix, "b", 2 * d)?,
            wx: set.matrix(prefix, "Wx", nin, d)?,
            bx: set.vector(prefix, "bx", d)?,
            u: set.matrix(prefix, "U", d, 2 * d)?,
            ux: set.matrix(prefix, "Ux", d, d)?,
        })
    }

    /// Hoisted input projections for a whole `[T, B, nin]` sequence.
    pub fn project(&self, x: &ArrayView3<'_, f32>) -> Result<GruProjections> {
        Ok(GruProjections {
            gate: affine_seq(x, &self.w, &self.b, "W")?,
            candidate: affine_seq(x, &self.wx, &self.bx, "Wx")?,
        })
    }

    /// Input projections for a single `[B, nin]` timestep.
    pub fn project_step(&self, x: &ArrayView2<'_, f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        Ok((affine(x, &self.w, &self.b, "W")?, affine(x, &self.wx, &self.bx, "Wx")?))
    }
}

/// One timestep of precomputed input projections.
#[derive(Clone, Copy, Debug)]
pub struct GruInput<'a> {
    /// `x·W + b`, `[B, 2*dim]`
    pub gate: ArrayView2<'a, f32>,
    /// `x·Wx + bx`, `[B, dim]`
    pub candidate: ArrayView2<'a, f32>,
}

/// `state_below_` and `state_belowx` for every timestep.
#[derive(Clone, Debug)]
pub struct GruProjections {
    pub gate: Array3<f32>,
    pub candidate: Array3<f32>,
}

impl GruProjections {
    pub fn steps(&self) -> usize {
        self.gate.len_of(ndarray::Axis(0))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = GruInput<'_>> + '_ {
        self.gate
            .outer_iter()
            .zip(self.candidate.outer_iter())
            .map(|(gate, candidate)| GruInput { gate, candidate })
    }
}

/// Shared tail of every gated update:
/// `r, u = split(sigmoid(preact))`,
/// `h~ = tanh(rec * r + cand_in)`,
/// `h = u * h~ + (1 - u) * prev`.
pub(crate) fn gated_update(
    mut preact: Array2<f32>,
    rec: Array2<f32>,
    cand_in: &ArrayView2<'_, f32>,
    prev: &ArrayView2<'_, f32>,
    dim: usize,
) -> Result<Array2<f32>> {
    sigmoid_inplace(&mut preact);

    // 切片 (Split): [B, 2*H] -> r, u
    let r = gate_slice(preact.view(), 0, dim)?;
    let u = gate_slice(preact.view(), 1, dim)?;

    // 候选状态
    let mut h = rec;
    Zip::from(&mut h)
        .and(&r)
        .and(cand_in)
        .par_for_each(|h, &r, &x| *h = (*h * r + x).tanh());

    // 混合新旧状态
    Zip::from(&mut h)
        .and(&u)
        .and(prev)
        .par_for_each(|h, &u, &p| *h = u * *h + (1.0 - u) * p);

    Ok(h)
}

fn check_step_shapes(mask: &ArrayView1<'_, f32>, input: &GruInput<'_>, prev: &Array2<f32>, dim: usize) -> Result<()> {
    let batch = prev.nrows();
    ensure_rows(&prev.view(), batch, dim, "previous hidden state")?;
    ensure_rows(&input.gate, batch, 2 * dim, "state_below_")?;
    ensure_rows(&input.candidate, batch, dim, "state_belowx")?;
    if mask.len() != batch {
        return Err(Error::shape("mask", format!("[{}]", batch), mask.shape()));
    }
    Ok(())
}

/// Plain GRU transition.
#[derive(Clone, Debug)]
pub struct GruStep<'w> {
    pub u: ArrayView2<'w, f32>,
    pub ux: ArrayView2<'w, f32>,
    pub dim: usize,
}

impl<'w> GruStep<'w> {
    pub fn new(u: ArrayView2<'w, f32>, ux: ArrayView2<'w, f32>) -> Result<Self> {
        let dim = ux.ncols();
        ensure_rows(&ux, dim, dim, "Ux")?;
        ensure_rows(&u, dim, 2 * dim, "U")?;
        Ok(Self { u, ux, dim })
    }
}

impl<'a, 'w> Step<'a> for GruStep<'w> {
    type Input = GruInput<'a>;
    type State = Array2<f32>;
    type Output = Array2<f32>;

    fn step(&self, mask: ArrayView1<'_, f32>, input: GruInput<'a>, prev: &Array2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_step_shapes(&mask, &input, prev, self.dim)?;
        let prev_v = prev.view();

        let mut preact = project_state(&prev_v, &self.u, "U")?;
        preact += &input.gate;
        let rec = project_state(&prev_v, &self.ux, "Ux")?;

        let mut h = gated_update(preact, rec, &input.candidate, &prev_v, self.dim)?;
        apply_mask(&mut h, &prev_v, &mask);
        Ok((h.clone(), h))
    }
}

/// GRU transition with layer normalization on both input projections and
/// both recurrent products.
#[derive(Clone, Debug)]
pub struct GruStepNorm<'w> {
    pub u: ArrayView2<'w, f32>,
    pub ux: ArrayView2<'w, f32>,
    pub ln: LayerNormWeights<'w>,
    pub dim: usize,
}

impl<'a, 'w> Step<'a> for GruStepNorm<'w> {
    type Input = GruInput<'a>;
    type State = Array2<f32>;
    type Output = Array2<f32>;

    fn step(&self, mask: ArrayView1<'_, f32>, input: GruInput<'a>, prev: &Array2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_step_shapes(&mask, &input, prev, self.dim)?;
        let prev_v = prev.view();
        let ln = &self.ln;

        let x = layer_norm(&input.gate, &ln.b1, &ln.s1)?;
        let xx = layer_norm(&input.candidate, &ln.b2, &ln.s2)?;

        let mut preact = layer_norm(&project_state(&prev_v, &self.u, "U")?.view(), &ln.b3, &ln.s3)?;
        preact += &x;
        let rec = layer_norm(&project_state(&prev_v, &self.ux, "Ux")?.view(), &ln.b4, &ln.s4)?;

        let mut h = gated_update(preact, rec, &xx.view(), &prev_v, self.dim)?;
        apply_mask(&mut h, &prev_v, &mask);
        Ok((h.clone(), h))
    }
}

/// The GRU transition a layer runs, picked by its `layernorm` flag.
#[derive(Clone, Debug)]
pub enum GruUnit<'w> {
    Plain(GruStep<'w>),
    Norm(GruStepNorm<'w>),
}

impl<'w> GruUnit<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims, layernorm: bool) -> Result<Self> {
        let base = GruWeights::from_set(set, prefix, dims)?;
        let plain = GruStep::new(base.u, base.ux)?;
        if layernorm {
            Ok(GruUnit::Norm(GruStepNorm {
                u: plain.u,
                ux: plain.ux,
                ln: LayerNormWeights::from_set(set, prefix, dims)?,
                dim: plain.dim,
            }))
        } else {
            Ok(GruUnit::Plain(plain))
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            GruUnit::Plain(s) => s.dim,
            GruUnit::Norm(s) => s.dim,
        }
    }
}

impl<'a, 'w> Step<'a> for GruUnit<'w> {
    type Input = GruInput<'a>;
    type State = Array2<f32>;
    type Output = Array2<f32>;

    fn step(&self, mask: ArrayView1<'_, f32>, input: GruInput<'a>, prev: &Array2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        match self {
            GruUnit::Plain(s) => s.step(mask, input, prev),
            GruUnit::Norm(s) => s.step(mask, input, prev),
        }
    }
}

/// GRU layer over a whole sequence.
#[derive(Clone, Debug)]
pub struct Gru {
    prefix: String,
    dims: Dims,
    layernorm: bool,
}

impl Gru {
    pub fn new(prefix: impl Into<String>, nin: usize, dim: usize, layernorm: bool) -> Self {
        Self {
            prefix: prefix.into(),
            dims: Dims::new(nin, dim),
            layernorm,
        }
    }

    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            prefix: cfg.prefix().to_string(),
            dims: cfg.dims(),
            layernorm: cfg.layernorm,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Hidden trajectory `[T, B, dim]` from a zero initial state.
    /// `state_below` is `[T, B, nin]`, or `[T, nin]` for a single sample.
    pub fn forward(
        &self,
        weights: &WeightSet,
        state_below: ArrayViewD<'_, f32>,
        mask: Option<ArrayView2<'_, f32>>,
    ) -> Result<Array3<f32>> {
        let x = as_batched(state_below, "state_below")?;
        let (steps, batch, nin) = x.dim();
        if nin != self.dims.nin {
            return Err(Error::shape("state_below", format!("[{}, {}, {}]", steps, batch, self.dims.nin), x.shape()));
        }
        tracing::debug!(prefix = %self.prefix, steps, batch, layernorm = self.layernorm, "gru forward");

        let input_w = GruWeights::from_set(weights, &self.prefix, self.dims)?;
        let unit = GruUnit::from_set(weights, &self.prefix, self.dims, self.layernorm)?;
        let mask = mask_or_ones(mask, steps, batch, "mask")?;

        let proj = input_w.project(&x)?;
        let init = Array2::zeros((batch, self.dims.dim));
        let out = scan(&unit, mask.view(), proj.iter(), init)?;
        stack_time(&out.outputs, batch, self.dims.dim)
    }

    /// One timestep: `x` is `[B, nin]`, `prev` is `[B, dim]`.
    pub fn forward_step(
        &self,
        weights: &WeightSet,
        x: ArrayView2<'_, f32>,
        mask: Option<ArrayView1<'_, f32>>,
        prev: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let batch = x.nrows();
        ensure_rows(&x, batch, self.dims.nin, "state_below")?;

        let input_w = GruWeights::from_set(weights, &self.prefix, self.dims)?;
        let unit = GruUnit::from_set(weights, &self.prefix, self.dims, self.layernorm)?;
        let (gate, candidate) = input_w.project_step(&x)?;
        let mask = step_mask_or_ones(mask, batch, "mask")?;

        let input = GruInput {
            gate: gate.view(),
            candidate: candidate.view(),
        };
        let (h, _) = step_once(&unit, mask.view(), input, prev)?;
        Ok(h)
    }
}
