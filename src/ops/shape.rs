use crate::error::{Error, Result};
use ndarray::{
    Array1, Array2, ArrayView, ArrayView1, ArrayView2, ArrayView3, ArrayViewD, Axis, CowArray, Dimension, Ix1,
    Ix2, Ix3, Slice, Zip,
};

// 门控权重按最后一维等宽拼接: [r | u] 或 [i | f | o | c]
// 第 n 块就是列区间 [n*dim, (n+1)*dim)

/// Gate `n` of a stacked tensor whose last axis is `k * dim` wide.
/// Works for rank 1 (biases), rank 2 (a timestep) and rank 3 (a sequence).
pub fn gate_slice<'a, D: Dimension>(x: ArrayView<'a, f32, D>, n: usize, dim: usize) -> Result<ArrayView<'a, f32, D>> {
    let last = x.ndim().checked_sub(1).ok_or_else(|| Error::InvalidArgument {
        arg: "x",
        reason: "cannot slice gates of a scalar".to_string(),
    })?;
    let width = x.len_of(Axis(last));
    let end = (n + 1) * dim;
    if dim == 0 || end > width {
        return Err(Error::shape(
            "stacked gates",
            format!("last axis >= {} (gate {} of width {})", end, n, dim),
            x.shape(),
        ));
    }
    Ok(x.slice_axis_move(Axis(last), Slice::from(n * dim..end)))
}

/// Accept either a batched sequence `[T, B, F]` or a single sample `[T, F]`,
/// which is viewed as `[T, 1, F]`.
pub fn as_batched<'a>(x: ArrayViewD<'a, f32>, name: &str) -> Result<ArrayView3<'a, f32>> {
    match x.ndim() {
        3 => Ok(x.into_dimensionality::<Ix3>()?),
        2 => Ok(x.into_dimensionality::<Ix2>()?.insert_axis(Axis(1))),
        _ => Err(Error::shape(name, "[time, batch, feature] or [time, feature]", x.shape())),
    }
}

/// Returns the given `(time, batch)` mask or an all-ones one.
pub fn mask_or_ones<'a>(
    mask: Option<ArrayView2<'a, f32>>,
    steps: usize,
    batch: usize,
    name: &str,
) -> Result<CowArray<'a, f32, Ix2>> {
    match mask {
        Some(m) => {
            ensure_mask(&m, steps, batch, name)?;
            Ok(CowArray::from(m))
        }
        None => Ok(CowArray::from(Array2::ones((steps, batch)))),
    }
}

/// Per-step counterpart of [`mask_or_ones`]: a `[batch]` mask, or all ones.
pub fn step_mask_or_ones<'a>(
    mask: Option<ArrayView1<'a, f32>>,
    batch: usize,
    name: &str,
) -> Result<CowArray<'a, f32, Ix1>> {
    match mask {
        Some(m) => {
            if m.len() != batch {
                return Err(Error::shape(name, format!("[{}]", batch), m.shape()));
            }
            ensure_binary(m.iter(), name)?;
            Ok(CowArray::from(m))
        }
        None => Ok(CowArray::from(Array1::ones(batch))),
    }
}

/// Checks a mask's shape and that every entry is 0 or 1.
pub fn ensure_mask(mask: &ArrayView2<'_, f32>, steps: usize, batch: usize, name: &str) -> Result<()> {
    if mask.dim() != (steps, batch) {
        return Err(Error::shape(name, format!("[{}, {}]", steps, batch), mask.shape()));
    }
    ensure_binary(mask.iter(), name)
}

fn ensure_binary<'m>(mut values: impl Iterator<Item = &'m f32>, name: &str) -> Result<()> {
    if values.any(|&m| m != 0.0 && m != 1.0) {
        return Err(Error::InvalidArgument {
            arg: "mask",
            reason: format!("'{}' must only contain 0 and 1", name),
        });
    }
    Ok(())
}

/// `h = m[:, None] * h + (1 - m)[:, None] * keep`, row by row.
/// With `m = 0` the row is copied from `keep` bit for bit.
pub fn apply_mask(h: &mut Array2<f32>, keep: &ArrayView2<'_, f32>, mask: &ArrayView1<'_, f32>) {
    Zip::from(h.outer_iter_mut())
        .and(keep.outer_iter())
        .and(mask)
        .for_each(|mut h_row, keep_row, &m| {
            if m == 0.0 {
                h_row.assign(&keep_row);
            } else if m != 1.0 {
                h_row.zip_mut_with(&keep_row, |h, &k| *h = m * *h + (1.0 - m) * k);
            }
        });
}

/// Checks that a per-step tensor is `[batch, width]`.
pub fn ensure_rows(x: &ArrayView2<'_, f32>, batch: usize, width: usize, name: &str) -> Result<()> {
    if x.dim() != (batch, width) {
        return Err(Error::shape(name, format!("[{}, {}]", batch, width), x.shape()));
    }
    Ok(())
}
