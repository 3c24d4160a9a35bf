use crate::config::Dims;
use crate::error::{Error, Result};
use crate::ops::fused::{alignment_scores, masked_softmax_time};
use crate::ops::matmul::{affine_seq, matmul, weighted_sum_over_time};
use crate::ops::shape::ensure_mask;
use crate::weights::WeightSet;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3, Zip};

/// Additive (MLP) attention weights shared by the conditional layers.
#[derive(Clone, Debug)]
pub struct AttentionWeights<'w> {
    /// `[dimctx, dimctx]`: context projection
    pub wc_att: ArrayView2<'w, f32>,
    pub b_att: ArrayView1<'w, f32>,
    /// `[dim, dimctx]`: query projection
    pub w_comb_att: ArrayView2<'w, f32>,
    /// Stored as `[dimctx, 1]`, kept here as its only column
    pub u_att: ArrayView1<'w, f32>,
    pub c_att: f32,
}

impl<'w> AttentionWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        let c = dims.dimctx;
        let u_att = set.matrix(prefix, "U_att", c, 1)?;
        let c_att = set.vector(prefix, "c_att", 1)?;
        Ok(Self {
            wc_att: set.matrix(prefix, "Wc_att", c, c)?,
            b_att: set.vector(prefix, "b_att", c)?,
            w_comb_att: set.matrix(prefix, "W_comb_att", dims.dim, c)?,
            u_att: u_att.index_axis_move(Axis(1), 0),
            c_att: c_att[0],
        })
    }

    /// Hoists `context·Wc_att + b_att` out of the decoder loop.
    ///
    /// `context` must be `[S, B, dimctx]`; `mask`, when given, is `[S, B]`.
    pub fn project<'c>(&self, context: ArrayViewD<'c, f32>, mask: Option<ArrayView2<'c, f32>>) -> Result<ProjectedContext<'c>> {
        if context.ndim() != 3 {
            return Err(Error::precondition(format!(
                "context must be 3-d (source_time, batch, dimctx), got shape {:?}",
                context.shape()
            )));
        }
        let context = context.into_dimensionality::<Ix3>()?;
        let (src_len, batch, ctx_dim) = context.dim();
        if ctx_dim != self.wc_att.nrows() {
            return Err(Error::shape(
                "context",
                format!("[{}, {}, {}]", src_len, batch, self.wc_att.nrows()),
                context.shape(),
            ));
        }
        if let Some(m) = &mask {
            ensure_mask(m, src_len, batch, "context_mask")?;
        }

        let pctx = affine_seq(&context, &self.wc_att, &self.b_att, "Wc_att")?;
        Ok(ProjectedContext { context, pctx, mask })
    }

    /// `h1·W_comb_att`, shared by every context attended from the same query.
    fn query(&self, h1: &ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        matmul(h1, &self.w_comb_att, "W_comb_att")
    }

    fn attend_with(&self, pstate: &Array2<f32>, ctx: &ProjectedContext<'_>) -> Result<Attended> {
        if pstate.nrows() != ctx.batch() || pstate.ncols() != ctx.pctx.len_of(Axis(2)) {
            return Err(Error::shape(
                "projected query",
                format!("[{}, {}]", ctx.batch(), ctx.pctx.len_of(Axis(2))),
                pstate.shape(),
            ));
        }
        let mut alpha = alignment_scores(&ctx.pctx.view(), &pstate.view(), &self.u_att, self.c_att);
        masked_softmax_time(&mut alpha, ctx.mask.as_ref());
        let context = weighted_sum_over_time(&ctx.context, &alpha.view());
        Ok(Attended { context, alpha })
    }

    /// Attends one context from the query `h1` (`[B, dim]`).
    pub fn attend(&self, h1: &ArrayView2<'_, f32>, ctx: &ProjectedContext<'_>) -> Result<Attended> {
        let pstate = self.query(h1)?;
        self.attend_with(&pstate, ctx)
    }

    /// Attends two contexts with the same weights and query, then fuses the
    /// two context vectors as `tanh(ctx1 + ctx2)`.
    pub fn attend_pair(
        &self,
        h1: &ArrayView2<'_, f32>,
        first: &ProjectedContext<'_>,
        second: &ProjectedContext<'_>,
    ) -> Result<AttendedPair> {
        if first.ctx_dim() != second.ctx_dim() {
            return Err(Error::shape(
                "second context",
                format!("[_, _, {}]", first.ctx_dim()),
                second.context.shape(),
            ));
        }
        let pstate = self.query(h1)?;
        let a = self.attend_with(&pstate, first)?;
        let b = self.attend_with(&pstate, second)?;

        let mut context = a.context;
        Zip::from(&mut context)
            .and(&b.context)
            .par_for_each(|c, &other| *c = (*c + other).tanh());

        Ok(AttendedPair {
            context,
            alpha1: a.alpha,
            alpha2: b.alpha,
        })
    }
}

/// A source context together with its hoisted projection and optional mask.
#[derive(Clone, Debug)]
pub struct ProjectedContext<'c> {
    pub context: ArrayView3<'c, f32>,
    pub pctx: Array3<f32>,
    pub mask: Option<ArrayView2<'c, f32>>,
}

impl ProjectedContext<'_> {
    pub fn src_len(&self) -> usize {
        self.context.len_of(Axis(0))
    }

    pub fn batch(&self) -> usize {
        self.context.len_of(Axis(1))
    }

    pub fn ctx_dim(&self) -> usize {
        self.context.len_of(Axis(2))
    }
}

/// Context vector `[B, dimctx]` and source weights `[S, B]`.
#[derive(Clone, Debug)]
pub struct Attended {
    pub context: Array2<f32>,
    pub alpha: Array2<f32>,
}

#[derive(Clone, Debug)]
pub struct AttendedPair {
    /// `tanh(ctx1 + ctx2)`
    pub context: Array2<f32>,
    pub alpha1: Array2<f32>,
    pub alpha2: Array2<f32>,
}
