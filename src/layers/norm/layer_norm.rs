use crate::config::Dims;
use crate::error::{Error, Result};
use crate::weights::WeightSet;
use ndarray::{Array2, ArrayView1, ArrayView2, Zip};

/// Added to the variance under the square root.
pub const LN_EPS: f32 = 1e-5;

/// Per-row `(x - mean) / sqrt(var + eps)` without the affine part.
/// Variance is the population variance of the row.
pub fn normalize_rows(x: &ArrayView2<'_, f32>, eps: f32) -> Array2<f32> {
    let (rows, dim) = x.dim();
    let mut out = Array2::<f32>::zeros((rows, dim));
    let inv_dim = 1.0 / dim as f32;

    // 按行并行 (Fused Kernel)
    Zip::from(out.outer_iter_mut())
        .and(x.outer_iter())
        .par_for_each(|mut out_row, x_row| {
            let mean = x_row.sum() * inv_dim;
            let var = x_row.fold(0.0f32, |acc, &v| acc + (v - mean) * (v - mean)) * inv_dim;
            let inv_std = 1.0 / (var + eps).sqrt();

            for (o, &xi) in out_row.iter_mut().zip(x_row.iter()) {
                *o = (xi - mean) * inv_std;
            }
        });

    out
}

/// `s * normalize_rows(x) + b`, with `b` and `s` broadcast over rows.
pub fn layer_norm(
    x: &ArrayView2<'_, f32>,
    b: &ArrayView1<'_, f32>,
    s: &ArrayView1<'_, f32>,
) -> Result<Array2<f32>> {
    let dim = x.ncols();
    if b.len() != dim || s.len() != dim {
        return Err(Error::shape(
            "layer norm bias/scale",
            format!("[{}]", dim),
            if b.len() != dim { b.shape() } else { s.shape() },
        ));
    }

    let mut out = normalize_rows(x, LN_EPS);
    Zip::from(out.outer_iter_mut()).par_for_each(|mut row| {
        for ((o, &si), &bi) in row.iter_mut().zip(s.iter()).zip(b.iter()) {
            *o = si * *o + bi;
        }
    });
    Ok(out)
}

/// Bias/scale pairs of the layer-normalized GRU step.
///
/// 1: gate input (2*dim), 2: candidate input (dim),
/// 3: `h·U` (2*dim), 4: `h·Ux` (dim).
#[derive(Clone, Debug)]
pub struct LayerNormWeights<'w> {
    pub b1: ArrayView1<'w, f32>,
    pub b2: ArrayView1<'w, f32>,
    pub b3: ArrayView1<'w, f32>,
    pub b4: ArrayView1<'w, f32>,
    pub s1: ArrayView1<'w, f32>,
    pub s2: ArrayView1<'w, f32>,
    pub s3: ArrayView1<'w, f32>,
    pub s4: ArrayView1<'w, f32>,
}

impl<'w> LayerNormWeights<'w> {
    pub fn from_set(set: &'w WeightSet, prefix: &str, dims: Dims) -> Result<Self> {
        let d = dims.dim;
        Ok(Self {
            b1: set.vector(prefix, "b1", 2 * d)?,
            b2: set.vector(prefix, "b2", d)?,
            b3: set.vector(prefix, "b3", 2 * d)?,
            b4: set.vector(prefix, "b4", d)?,
            s1: set.vector(prefix, "s1", 2 * d)?,
            s2: set.vector(prefix, "s2", d)?,
            s3: set.vector(prefix, "s3", 2 * d)?,
            s4: set.vector(prefix, "s4", d)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array};

    #[test]
    fn normalized_rows_have_zero_mean_unit_variance() {
        let x = Array::from_shape_fn((3, 16), |(i, j)| ((i * 7 + j * 3) % 11) as f32 * (i as f32 + 1.0) - 4.0);
        let y = normalize_rows(&x.view(), LN_EPS);
        for row in y.outer_iter() {
            let mean = row.mean().unwrap();
            let var = row.mapv(|v| (v - mean) * (v - mean)).mean().unwrap();
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn constant_row_normalizes_to_zero() {
        let x = arr2(&[[2.0f32, 2.0, 2.0]]);
        let y = normalize_rows(&x.view(), LN_EPS);
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn scale_and_bias_are_applied_per_feature() {
        let x = arr2(&[[1.0f32, 3.0], [-1.0, 1.0]]);
        let b = arr1(&[0.5f32, -0.5]);
        let s = arr1(&[2.0f32, 1.0]);
        let y = layer_norm(&x.view(), &b.view(), &s.view()).unwrap();
        // each row normalizes to [-1, 1] (up to eps)
        let k = 1.0 / (1.0f32 + LN_EPS).sqrt();
        assert_abs_diff_eq!(y, arr2(&[[-2.0 * k + 0.5, k - 0.5], [-2.0 * k + 0.5, k - 0.5]]), epsilon = 1e-6);
    }

    #[test]
    fn mismatched_scale_is_rejected() {
        let x = arr2(&[[1.0f32, 3.0]]);
        let b = arr1(&[0.0f32, 0.0]);
        let s = arr1(&[1.0f32]);
        assert!(layer_norm(&x.view(), &b.view(), &s.view()).is_err());
    }
}
