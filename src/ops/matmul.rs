use crate::error::{Error, Result};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;

fn check_inner(x: &ArrayView2<'_, f32>, w: &ArrayView2<'_, f32>, name: &str) -> Result<()> {
    if x.ncols() != w.nrows() {
        return Err(Error::shape(
            name,
            format!("[{}, _] to match lhs {:?}", x.ncols(), x.shape()),
            w.shape(),
        ));
    }
    Ok(())
}

// x: [M, K] @ w: [K, N] -> [M, N]
// 权重按 [in, out] 存储（与参数初始化的 nin x nout 一致）
// 任意行数都走同一个 GEMM: 单独投影一行与整序列投影中的同一行逐位相同
pub fn matmul(x: &ArrayView2<'_, f32>, w: &ArrayView2<'_, f32>, name: &str) -> Result<Array2<f32>> {
    check_inner(x, w, name)?;
    let mut res = Array2::<f32>::zeros((x.nrows(), w.ncols()));
    general_mat_mul(1.0, x, w, 0.0, &mut res);
    Ok(res)
}

/// `x·W + b` on a batch of rows.
pub fn affine(
    x: &ArrayView2<'_, f32>,
    w: &ArrayView2<'_, f32>,
    b: &ArrayView1<'_, f32>,
    name: &str,
) -> Result<Array2<f32>> {
    let mut y = matmul(x, w, name)?;
    if b.len() != y.ncols() {
        return Err(Error::shape(
            format!("{} (bias)", name),
            format!("[{}]", y.ncols()),
            b.shape(),
        ));
    }
    y += b;
    Ok(y)
}

/// `x·W + b` over a whole sequence `[T, B, K]`, done as one `[T*B, K]` GEMM
/// so that the projection is hoisted out of the recurrence.
pub fn affine_seq(
    x: &ArrayView3<'_, f32>,
    w: &ArrayView2<'_, f32>,
    b: &ArrayView1<'_, f32>,
    name: &str,
) -> Result<Array3<f32>> {
    let (t, batch, k) = x.dim();
    let flat = x.to_shape((t * batch, k))?;
    let y = affine(&flat.view(), w, b, name)?;
    let n = y.ncols();
    Ok(y.into_shape_with_order((t, batch, n))?)
}

/// `h·W` for a `[B, K]` state, used for the recurrent terms.
///
/// Both the full-sequence and the single-step path call this with the same
/// `[B, K]` state, so the single-row kernel below is taken by both or by neither.
pub fn project_state(h: &ArrayView2<'_, f32>, w: &ArrayView2<'_, f32>, name: &str) -> Result<Array2<f32>> {
    if h.nrows() != 1 {
        return matmul(h, w, name);
    }
    check_inner(h, w, name)?;

    // 单样本解码热路径: Rayon 并行遍历输出维度 N, 每列一次点积
    let h_row = h.row(0);
    let out: Vec<f32> = (0..w.ncols())
        .into_par_iter()
        .map(|j| w.column(j).dot(&h_row))
        .collect();
    Ok(Array2::from_shape_vec((1, w.ncols()), out)?)
}

/// Sum over the leading axis of `cc * alpha[:, :, None]`:
/// cc `[S, B, C]`, alpha `[S, B]` -> `[B, C]`.
pub fn weighted_sum_over_time(cc: &ArrayView3<'_, f32>, alpha: &ArrayView2<'_, f32>) -> Array2<f32> {
    let (_, batch, ctx_dim) = cc.dim();
    let mut out = Array2::<f32>::zeros((batch, ctx_dim));

    // 每个 batch 列独立: out[b] = alpha[:, b] · cc[:, b, :]
    Zip::from(out.outer_iter_mut())
        .and(cc.axis_iter(Axis(1)))
        .and(alpha.axis_iter(Axis(1)))
        .par_for_each(|mut out_b, cc_b, alpha_b| {
            out_b.assign(&alpha_b.dot(&cc_b));
        });

    out
}
