// src/layers/rnn/cond_gru.rs
//
// 两级 GRU + 注意力:
//   h1    = GRU(x_t, h_{t-1})
//   ctx_t = Attention(h1, context)
//   h2    = GRU'(ctx_t, h1)
use crate::config::{Dims, LayerConfig};
use crate::error::{Error, Result};
use crate::layers::attention::{AttentionWeights, ProjectedContext};
use crate::layers::rnn::gru::{gated_update, GruInput, GruUnit, GruWeights};
use crate::ops::matmul::{affine, matmul};
use crate::ops::shape::{apply_mask, as_batched, ensure_rows, mask_or_ones, step_mask_or_ones};
use crate::scan::{scan, stack_time, step_once, Step};
use crate::weights::WeightSet;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewD};

/// Second-stage weights: a GRU whose input is the attended context and
/// whose previous state is the first-stage output `h1`.
#[derive(Clone, Debug)]
pub struct ContextUpdate<'w> {
    pub u_nl: ArrayView2<'w, f32>,
    pub b_nl: ArrayView1<'w, f32>,
    pub ux_nl: ArrayView2<'w, f32>,
    pub bx_nl: ArrayView1<'w, f32>,
    pub wc: ArrayView2<'w, f32>,
    pub wcx: ArrayView2<'w, f32>,
    pub dim: usize,
}

impl<'w> ContextUpdate<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        let (d, c) = (dims.dim, dims.dimctx);
        Ok(Self {
            u_nl: set.matrix(prefix, "U_nl", d, 2 * d)?,
            b_nl: set.vector(prefix, "b_nl", 2 * d)?,
            ux_nl: set.matrix(prefix, "Ux_nl", d, d)?,
            bx_nl: set.vector(prefix, "bx_nl", d)?,
            wc: set.matrix(prefix, "Wc", c, 2 * d)?,
            wcx: set.matrix(prefix, "Wcx", c, d)?,
            dim: d,
        })
    }

    /// `h2` from `h1` and the context vector; masked rows fall back to `h1`.
    pub fn apply(&self, mask: &ArrayView1<'_, f32>, h1: &Array2<f32>, ctx: &ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let h1_v = h1.view();

        // preact = h1·U_nl + b_nl + ctx·Wc
        let mut preact = affine(&h1_v, &self.u_nl, &self.b_nl, "U_nl")?;
        preact += &matmul(ctx, &self.wc, "Wc")?;

        let rec = affine(&h1_v, &self.ux_nl, &self.bx_nl, "Ux_nl")?;
        let cand_in = matmul(ctx, &self.wcx, "Wcx")?;

        let mut h2 = gated_update(preact, rec, &cand_in.view(), &h1_v, self.dim)?;
        apply_mask(&mut h2, &h1_v, mask);
        Ok(h2)
    }
}

/// Every weight a conditional GRU reads.
#[derive(Clone, Debug)]
pub struct CondGruWeights<'w> {
    pub input: GruWeights<'w>,
    pub update: ContextUpdate<'w>,
    pub attention: AttentionWeights<'w>,
}

impl<'w> CondGruWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        Ok(Self {
            input: GruWeights::from_set(set, prefix, dims)?,
            update: ContextUpdate::from_set(set, prefix, dims)?,
            attention: AttentionWeights::from_set(set, prefix, dims)?,
        })
    }
}

/// What one decoder timestep emits.
#[derive(Clone, Debug)]
pub struct CondGruOutput {
    /// `h2`, `[B, dim]`
    pub hidden: Array2<f32>,
    /// Attended context, `[B, dimctx]`
    pub context: Array2<f32>,
    /// Source weights, batch-major: `[B, S]`
    pub alpha: Array2<f32>,
}

/// One conditional timestep over a fixed projected context.
#[derive(Clone, Debug)]
pub struct ConditionalGruStep<'w, 'p, 'c> {
    pub unit: GruUnit<'w>,
    pub attention: AttentionWeights<'w>,
    pub update: ContextUpdate<'w>,
    pub context: &'p ProjectedContext<'c>,
}

impl<'a, 'w, 'p, 'c> Step<'a> for ConditionalGruStep<'w, 'p, 'c> {
    type Input = GruInput<'a>;
    type State = Array2<f32>;
    type Output = CondGruOutput;

    fn step(&self, mask: ArrayView1<'_, f32>, input: GruInput<'a>, prev: &Array2<f32>) -> Result<(Array2<f32>, CondGruOutput)> {
        let (h1, _) = self.unit.step(mask, input, prev)?;
        let attended = self.attention.attend(&h1.view(), self.context)?;
        let h2 = self.update.apply(&mask, &h1, &attended.context.view())?;

        let out = CondGruOutput {
            hidden: h2.clone(),
            context: attended.context,
            alpha: attended.alpha.reversed_axes(),
        };
        Ok((h2, out))
    }
}

/// Trajectories of a full conditional run.
#[derive(Clone, Debug)]
pub struct CondGruSequence {
    /// `[T, B, dim]`
    pub hidden: Array3<f32>,
    /// `[T, B, dimctx]`
    pub contexts: Array3<f32>,
    /// `[T, B, S]`
    pub alphas: Array3<f32>,
}

/// GRU decoder layer conditioned on one source context through attention.
#[derive(Clone, Debug)]
pub struct ConditionalGru {
    prefix: String,
    dims: Dims,
    layernorm: bool,
}

impl ConditionalGru {
    pub fn new(prefix: impl Into<String>, dims: Dims, layernorm: bool) -> Self {
        Self {
            prefix: prefix.into(),
            dims,
            layernorm,
        }
    }

    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg.prefix(), cfg.dims(), cfg.layernorm))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Projects a `[S, B, dimctx]` context once, for reuse across every
    /// decoding step of the same source batch.
    pub fn project_context<'c>(
        &self,
        weights: &WeightSet,
        context: ArrayViewD<'c, f32>,
        context_mask: Option<ArrayView2<'c, f32>>,
    ) -> Result<ProjectedContext<'c>> {
        AttentionWeights::from_set(weights, &self.prefix, self.dims)?.project(context, context_mask)
    }

    fn step_fn<'w, 'p, 'c>(
        &self,
        w: &CondGruWeights<'w>,
        weights: &'w WeightSet,
        ctx: &'p ProjectedContext<'c>,
    ) -> Result<ConditionalGruStep<'w, 'p, 'c>> {
        Ok(ConditionalGruStep {
            unit: GruUnit::from_set(weights, &self.prefix, self.dims, self.layernorm)?,
            attention: w.attention.clone(),
            update: w.update.clone(),
            context: ctx,
        })
    }

    /// Full-sequence mode. `init_state` defaults to zeros.
    pub fn forward<'c>(
        &self,
        weights: &WeightSet,
        state_below: ArrayViewD<'_, f32>,
        context: ArrayViewD<'c, f32>,
        mask: Option<ArrayView2<'_, f32>>,
        context_mask: Option<ArrayView2<'c, f32>>,
        init_state: Option<&Array2<f32>>,
    ) -> Result<CondGruSequence> {
        let x = as_batched(state_below, "state_below")?;
        let (steps, batch, nin) = x.dim();
        if nin != self.dims.nin {
            return Err(Error::shape("state_below", format!("[{}, {}, {}]", steps, batch, self.dims.nin), x.shape()));
        }

        let w = CondGruWeights::from_set(weights, &self.prefix, self.dims)?;
        let projected = w.attention.project(context, context_mask)?;
        if projected.batch() != batch {
            return Err(Error::shape(
                "context",
                format!("[{}, {}, {}]", projected.src_len(), batch, self.dims.dimctx),
                projected.context.shape(),
            ));
        }
        tracing::debug!(
            prefix = %self.prefix,
            steps,
            batch,
            src_len = projected.src_len(),
            layernorm = self.layernorm,
            "conditional gru forward"
        );

        let mask = mask_or_ones(mask, steps, batch, "mask")?;
        let init = match init_state {
            Some(h) => {
                ensure_rows(&h.view(), batch, self.dims.dim, "init_state")?;
                h.clone()
            }
            None => Array2::zeros((batch, self.dims.dim)),
        };

        let proj = w.input.project(&x)?;
        let step = self.step_fn(&w, weights, &projected)?;
        let out = scan(&step, mask.view(), proj.iter(), init)?;

        let src_len = projected.src_len();
        Ok(CondGruSequence {
            hidden: stack_time(out.outputs.iter().map(|o| &o.hidden), batch, self.dims.dim)?,
            contexts: stack_time(out.outputs.iter().map(|o| &o.context), batch, self.dims.dimctx)?,
            alphas: stack_time(out.outputs.iter().map(|o| &o.alpha), batch, src_len)?,
        })
    }

    /// Single-step mode for incremental decoding.
    ///
    /// Unlike [`ConditionalGru::forward`], there is no implicit zero state:
    /// `prev` must be supplied.
    pub fn forward_step(
        &self,
        weights: &WeightSet,
        projected: &ProjectedContext<'_>,
        x: ArrayView2<'_, f32>,
        mask: Option<ArrayView1<'_, f32>>,
        prev: Option<&Array2<f32>>,
    ) -> Result<CondGruOutput> {
        let prev = prev.ok_or_else(|| Error::precondition("previous state must be provided in single-step mode"))?;
        let batch = x.nrows();
        ensure_rows(&x, batch, self.dims.nin, "state_below")?;

        let w = CondGruWeights::from_set(weights, &self.prefix, self.dims)?;
        let (gate, candidate) = w.input.project_step(&x)?;
        let mask = step_mask_or_ones(mask, batch, "mask")?;

        let step = self.step_fn(&w, weights, projected)?;
        let input = GruInput {
            gate: gate.view(),
            candidate: candidate.view(),
        };
        let (_, out) = step_once(&step, mask.view(), input, prev)?;
        Ok(out)
    }
}
