use crate::config::{Dims, LayerConfig};
use crate::error::{Error, Result};
use crate::layers::attention::{AttentionWeights, ProjectedContext};
use crate::layers::rnn::cond_gru::{CondGruWeights, ContextUpdate};
use crate::layers::rnn::gru::{GruInput, GruStep};
use crate::ops::shape::{as_batched, ensure_rows, mask_or_ones, step_mask_or_ones};
use crate::scan::{scan, stack_time, step_once, Step};
use crate::weights::WeightSet;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewD};

/// One dual-context decoder timestep.
#[derive(Clone, Debug)]
pub struct MultiOutput {
    pub hidden: Array2<f32>,
    /// `tanh(ctx1 + ctx2)`, `[B, dimctx]`
    pub context: Array2<f32>,
    /// `[B, S1]`
    pub alpha1: Array2<f32>,
    /// `[B, S2]`
    pub alpha2: Array2<f32>,
}

/// Like [`ConditionalGruStep`](super::cond_gru::ConditionalGruStep), but the
/// first stage is always the plain GRU and the query attends two contexts.
#[derive(Clone, Debug)]
pub struct ConditionalGruMultiStep<'w, 'p, 'c1, 'c2> {
    pub unit: GruStep<'w>,
    pub attention: AttentionWeights<'w>,
    pub update: ContextUpdate<'w>,
    pub first: &'p ProjectedContext<'c1>,
    pub second: &'p ProjectedContext<'c2>,
}

impl<'a, 'w, 'p, 'c1, 'c2> Step<'a> for ConditionalGruMultiStep<'w, 'p, 'c1, 'c2> {
    type Input = GruInput<'a>;
    type State = Array2<f32>;
    type Output = MultiOutput;

    fn step(&self, mask: ArrayView1<'_, f32>, input: GruInput<'a>, prev: &Array2<f32>) -> Result<(Array2<f32>, MultiOutput)> {
        let (h1, _) = self.unit.step(mask, input, prev)?;
        let attended = self.attention.attend_pair(&h1.view(), self.first, self.second)?;
        let h2 = self.update.apply(&mask, &h1, &attended.context.view())?;

        let out = MultiOutput {
            hidden: h2.clone(),
            context: attended.context,
            alpha1: attended.alpha1.reversed_axes(),
            alpha2: attended.alpha2.reversed_axes(),
        };
        Ok((h2, out))
    }
}

#[derive(Clone, Debug)]
pub struct MultiSequence {
    pub hidden: Array3<f32>,
    pub contexts: Array3<f32>,
    pub alphas1: Array3<f32>,
    pub alphas2: Array3<f32>,
}

/// Conditional GRU over two source contexts (e.g. text and a fixed-length
/// visual context) that share one set of attention weights.
#[derive(Clone, Debug)]
pub struct ConditionalGruMulti {
    prefix: String,
    dims: Dims,
}

impl ConditionalGruMulti {
    pub fn new(prefix: impl Into<String>, dims: Dims) -> Self {
        Self {
            prefix: prefix.into(),
            dims,
        }
    }

    pub fn from_config(cfg: &LayerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg.prefix(), cfg.dims()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Projects one of the two contexts. Either may carry its own mask.
    pub fn project_context<'c>(
        &self,
        weights: &WeightSet,
        context: ArrayViewD<'c, f32>,
        context_mask: Option<ArrayView2<'c, f32>>,
    ) -> Result<ProjectedContext<'c>> {
        AttentionWeights::from_set(weights, &self.prefix, self.dims)?.project(context, context_mask)
    }

    fn step_fn<'w, 'p, 'c1, 'c2>(
        &self,
        w: &CondGruWeights<'w>,
        first: &'p ProjectedContext<'c1>,
        second: &'p ProjectedContext<'c2>,
    ) -> Result<ConditionalGruMultiStep<'w, 'p, 'c1, 'c2>> {
        let contexts = [
            (first.ctx_dim(), first.context.shape()),
            (second.ctx_dim(), second.context.shape()),
        ];
        for (ctx_dim, shape) in contexts {
            if ctx_dim != self.dims.dimctx {
                return Err(Error::shape("context", format!("[_, _, {}]", self.dims.dimctx), shape));
            }
        }
        Ok(ConditionalGruMultiStep {
            unit: GruStep::new(w.input.u, w.input.ux)?,
            attention: w.attention.clone(),
            update: w.update.clone(),
            first,
            second,
        })
    }

    /// Full-sequence mode over two raw `[S, B, dimctx]` contexts, each with
    /// an optional `[S, B]` mask. `init_state` defaults to zeros.
    #[allow(clippy::too_many_arguments)]
    pub fn forward<'c>(
        &self,
        weights: &WeightSet,
        state_below: ArrayViewD<'_, f32>,
        context1: ArrayViewD<'c, f32>,
        context2: ArrayViewD<'c, f32>,
        mask: Option<ArrayView2<'_, f32>>,
        context1_mask: Option<ArrayView2<'c, f32>>,
        context2_mask: Option<ArrayView2<'c, f32>>,
        init_state: Option<&Array2<f32>>,
    ) -> Result<MultiSequence> {
        let first = self.project_context(weights, context1, context1_mask)?;
        let second = self.project_context(weights, context2, context2_mask)?;
        self.forward_projected(weights, state_below, &first, &second, mask, init_state)
    }

    /// Same as [`ConditionalGruMulti::forward`], over contexts already
    /// projected with [`ConditionalGruMulti::project_context`].
    pub fn forward_projected(
        &self,
        weights: &WeightSet,
        state_below: ArrayViewD<'_, f32>,
        first: &ProjectedContext<'_>,
        second: &ProjectedContext<'_>,
        mask: Option<ArrayView2<'_, f32>>,
        init_state: Option<&Array2<f32>>,
    ) -> Result<MultiSequence> {
        let x = as_batched(state_below, "state_below")?;
        let (steps, batch, nin) = x.dim();
        if nin != self.dims.nin {
            return Err(Error::shape("state_below", format!("[{}, {}, {}]", steps, batch, self.dims.nin), x.shape()));
        }
        let contexts = [
            ("first context", first.batch(), first.src_len(), first.context.shape()),
            ("second context", second.batch(), second.src_len(), second.context.shape()),
        ];
        for (name, ctx_batch, src_len, shape) in contexts {
            if ctx_batch != batch {
                return Err(Error::shape(name, format!("[{}, {}, {}]", src_len, batch, self.dims.dimctx), shape));
            }
        }
        tracing::debug!(
            prefix = %self.prefix,
            steps,
            batch,
            src_len1 = first.src_len(),
            src_len2 = second.src_len(),
            "conditional gru (two contexts) forward"
        );

        let w = CondGruWeights::from_set(weights, &self.prefix, self.dims)?;
        let mask = mask_or_ones(mask, steps, batch, "mask")?;
        let init = match init_state {
            Some(h) => {
                ensure_rows(&h.view(), batch, self.dims.dim, "init_state")?;
                h.clone()
            }
            None => Array2::zeros((batch, self.dims.dim)),
        };

        let proj = w.input.project(&x)?;
        let step = self.step_fn(&w, first, second)?;
        let out = scan(&step, mask.view(), proj.iter(), init)?;

        let d = self.dims.dim;
        Ok(MultiSequence {
            hidden: stack_time(out.outputs.iter().map(|o| &o.hidden), batch, d)?,
            contexts: stack_time(out.outputs.iter().map(|o| &o.context), batch, self.dims.dimctx)?,
            alphas1: stack_time(out.outputs.iter().map(|o| &o.alpha1), batch, first.src_len())?,
            alphas2: stack_time(out.outputs.iter().map(|o| &o.alpha2), batch, second.src_len())?,
        })
    }

    /// Single-step mode; `prev` is required.
    pub fn forward_step(
        &self,
        weights: &WeightSet,
        first: &ProjectedContext<'_>,
        second: &ProjectedContext<'_>,
        x: ArrayView2<'_, f32>,
        mask: Option<ArrayView1<'_, f32>>,
        prev: Option<&Array2<f32>>,
    ) -> Result<MultiOutput> {
        let prev = prev.ok_or_else(|| Error::precondition("previous state must be provided in single-step mode"))?;
        let batch = x.nrows();
        ensure_rows(&x, batch, self.dims.nin, "state_below")?;

        let w = CondGruWeights::from_set(weights, &self.prefix, self.dims)?;
        let (gate, candidate) = w.input.project_step(&x)?;
        let mask = step_mask_or_ones(mask, batch, "mask")?;

        let step = self.step_fn(&w, first, second)?;
        let input = GruInput {
            gate: gate.view(),
            candidate: candidate.view(),
        };
        let (_, out) = step_once(&step, mask.view(), input, prev)?;
        Ok(out)
    }
}
