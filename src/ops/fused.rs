use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};

/// Added to the column sum before dividing, so an all-masked column yields
/// zeros instead of 0/0.
pub const ATTENTION_EPS: f32 = 1e-6;

/// Alignment energies `tanh(pctx + pstate[None]) · U_att + c_att`.
///
/// pctx `[S, B, C]`, pstate `[B, C]`, u_att `[C]` -> `[S, B]`.
/// The `[S, B, C]` tanh tensor is never materialized.
pub fn alignment_scores(
    pctx: &ArrayView3<'_, f32>,
    pstate: &ArrayView2<'_, f32>,
    u_att: &ArrayView1<'_, f32>,
    c_att: f32,
) -> Array2<f32> {
    let (src_len, batch, _) = pctx.dim();
    let mut scores = Array2::<f32>::zeros((src_len, batch));

    // 并行: 每个源位置一行
    Zip::from(scores.outer_iter_mut())
        .and(pctx.outer_iter())
        .par_for_each(|mut row, pctx_s| {
            for ((score, p_sb), q_b) in row.iter_mut().zip(pctx_s.outer_iter()).zip(pstate.outer_iter()) {
                let mut acc = c_att;
                for ((&p, &q), &u) in p_sb.iter().zip(q_b.iter()).zip(u_att.iter()) {
                    acc += (p + q).tanh() * u;
                }
                *score = acc;
            }
        });

    scores
}

/// In-place masked softmax over the source axis (axis 0) of `[S, B]` scores:
/// `alpha = exp(e) * mask / (sum_s(exp(e) * mask) + eps)`.
///
/// Energies are shifted by the column max of the unmasked positions before
/// `exp`, which leaves the normalized weights unchanged but keeps large
/// energies finite.
pub fn masked_softmax_time(scores: &mut Array2<f32>, mask: Option<&ArrayView2<'_, f32>>) {
    match mask {
        Some(mask) => {
            Zip::from(scores.lanes_mut(Axis(0)))
                .and(mask.lanes(Axis(0)))
                .par_for_each(|mut col, m_col| {
                    let max_val = col
                        .iter()
                        .zip(m_col.iter())
                        .filter(|&(_, &m)| m != 0.0)
                        .fold(f32::NEG_INFINITY, |a, (&e, _)| a.max(e));

                    if max_val == f32::NEG_INFINITY {
                        // 全部被 mask：上下文向量退化为 0
                        col.fill(0.0);
                        return;
                    }

                    let mut sum = 0.0f32;
                    for (e, &m) in col.iter_mut().zip(m_col.iter()) {
                        *e = (*e - max_val).exp() * m;
                        sum += *e;
                    }
                    let inv_sum = 1.0 / (sum + ATTENTION_EPS);
                    col.mapv_inplace(|a| a * inv_sum);
                });
        }
        None => {
            Zip::from(scores.lanes_mut(Axis(0))).par_for_each(|mut col| {
                let max_val = col.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let mut sum = 0.0f32;
                for e in col.iter_mut() {
                    *e = (*e - max_val).exp();
                    sum += *e;
                }
                let inv_sum = 1.0 / (sum + ATTENTION_EPS);
                col.mapv_inplace(|a| a * inv_sum);
            });
        }
    }
}
