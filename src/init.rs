// src/init.rs
//
// 参数初始化: 方阵用正交矩阵, 其余用 scale * N(0, 1).
// 门控权重按列拼接, 每块独立采样.
use crate::config::Dims;
use crate::weights::{pp, WeightSet};
use ndarray::{s, Array1, Array2, Axis};
use rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;

fn gaussian<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    Array2::random_using((rows, cols), StandardNormal, rng)
}

/// Orthonormalizes the columns of `a` in place (modified Gram-Schmidt).
/// Returns `None` if the columns are numerically dependent.
fn gram_schmidt(mut a: Array2<f32>) -> Option<Array2<f32>> {
    for j in 0..a.ncols() {
        let (done, mut rest) = a.view_mut().split_at(Axis(1), j);
        let mut col = rest.column_mut(0);
        for q in done.columns() {
            let proj = q.dot(&col);
            col.scaled_add(-proj, &q);
        }
        let norm = col.dot(&col).sqrt();
        if norm < 1e-6 {
            return None;
        }
        col.mapv_inplace(|v| v / norm);
    }
    Some(a)
}

/// A random `n x n` orthogonal matrix: the Q factor of a Gaussian matrix.
pub fn ortho_weight<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array2<f32> {
    loop {
        if let Some(q) = gram_schmidt(gaussian(n, n, rng)) {
            return q;
        }
    }
}

/// Orthogonal when square and `ortho` is set, `scale * N(0, 1)` otherwise.
pub fn norm_weight<R: Rng + ?Sized>(nin: usize, nout: usize, scale: f32, ortho: bool, rng: &mut R) -> Array2<f32> {
    if nin == nout && ortho {
        ortho_weight(nin, rng)
    } else {
        gaussian(nin, nout, rng) * scale
    }
}

/// `k` independently drawn `[rows, dim]` blocks side by side.
fn stacked<R, F>(rows: usize, dim: usize, k: usize, rng: &mut R, mut block: F) -> Array2<f32>
where
    R: Rng + ?Sized,
    F: FnMut(&mut R) -> Array2<f32>,
{
    let mut out = Array2::<f32>::zeros((rows, k * dim));
    for n in 0..k {
        out.slice_mut(s![.., n * dim..(n + 1) * dim]).assign(&block(&mut *rng));
    }
    out
}

pub fn init_ff<R: Rng + ?Sized>(rng: &mut R, prefix: &str, nin: usize, nout: usize, scale: f32, ortho: bool) -> WeightSet {
    let mut set = WeightSet::new();
    set.insert(pp(prefix, "W"), norm_weight(nin, nout, scale, ortho, rng));
    set.insert(pp(prefix, "b"), Array1::<f32>::zeros(nout));
    tracing::debug!(prefix, nin, nout, "init ff");
    set
}

/// Biases at zero and scales at one; see [`LayerNormWeights`](crate::layers::norm::LayerNormWeights) for the widths.
pub fn init_layer_norm(set: &mut WeightSet, prefix: &str, dim: usize) {
    for (i, width) in [(1, 2 * dim), (2, dim), (3, 2 * dim), (4, dim)] {
        set.insert(pp(prefix, &format!("b{}", i)), Array1::<f32>::zeros(width));
        set.insert(pp(prefix, &format!("s{}", i)), Array1::<f32>::ones(width));
    }
}

pub fn init_gru<R: Rng + ?Sized>(rng: &mut R, prefix: &str, dims: Dims, scale: f32, layernorm: bool) -> WeightSet {
    let (nin, d) = (dims.nin, dims.dim);
    let mut set = WeightSet::new();

    // W = [W_r | W_z], U = [U_r | U_z]
    set.insert(pp(prefix, "W"), stacked(nin, d, 2, rng, |r| norm_weight(nin, d, scale, true, r)));
    set.insert(pp(prefix, "b"), Array1::<f32>::zeros(2 * d));
    set.insert(pp(prefix, "U"), stacked(d, d, 2, rng, |r| ortho_weight(d, r)));

    set.insert(pp(prefix, "Wx"), norm_weight(nin, d, scale, true, rng));
    set.insert(pp(prefix, "bx"), Array1::<f32>::zeros(d));
    set.insert(pp(prefix, "Ux"), ortho_weight(d, rng));

    if layernorm {
        init_layer_norm(&mut set, prefix, d);
    }
    tracing::debug!(prefix, nin, dim = d, layernorm, "init gru");
    set
}

/// First-stage GRU plus the context-driven second stage and attention.
pub fn init_gru_cond<R: Rng + ?Sized>(rng: &mut R, prefix: &str, dims: Dims, scale: f32, layernorm: bool) -> WeightSet {
    let (d, c) = (dims.dim, dims.dimctx);
    let mut set = init_gru(rng, prefix, dims, scale, layernorm);

    set.insert(pp(prefix, "U_nl"), stacked(d, d, 2, rng, |r| ortho_weight(d, r)));
    set.insert(pp(prefix, "b_nl"), Array1::<f32>::zeros(2 * d));
    set.insert(pp(prefix, "Ux_nl"), ortho_weight(d, rng));
    set.insert(pp(prefix, "bx_nl"), Array1::<f32>::zeros(d));

    set.insert(pp(prefix, "Wc"), norm_weight(c, 2 * d, scale, true, rng));
    set.insert(pp(prefix, "Wcx"), norm_weight(c, d, scale, true, rng));

    // attention
    set.insert(pp(prefix, "W_comb_att"), norm_weight(d, c, scale, true, rng));
    set.insert(pp(prefix, "Wc_att"), norm_weight(c, c, scale, true, rng));
    set.insert(pp(prefix, "b_att"), Array1::<f32>::zeros(c));
    set.insert(pp(prefix, "U_att"), norm_weight(c, 1, scale, true, rng));
    set.insert(pp(prefix, "c_att"), Array1::<f32>::zeros(1));

    tracing::debug!(prefix, dim = d, dimctx = c, layernorm, "init conditional gru");
    set
}

/// Stacked `[i | f | o | c]` weights; `forget_bias` fills the forget slice of `b`.
pub fn init_lstm<R: Rng + ?Sized>(rng: &mut R, prefix: &str, dims: Dims, scale: f32, forget_bias: f32) -> WeightSet {
    let (nin, d) = (dims.nin, dims.dim);
    let mut set = WeightSet::new();

    set.insert(pp(prefix, "W"), stacked(nin, d, 4, rng, |r| norm_weight(nin, d, scale, true, r)));
    set.insert(pp(prefix, "U"), stacked(d, d, 4, rng, |r| ortho_weight(d, r)));

    let mut b = Array1::<f32>::zeros(4 * d);
    b.slice_mut(s![d..2 * d]).fill(forget_bias);
    set.insert(pp(prefix, "b"), b);

    tracing::debug!(prefix, nin, dim = d, forget_bias, "init lstm");
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::norm::LayerNormWeights;
    use crate::layers::rnn::cond_gru::CondGruWeights;
    use crate::layers::rnn::lstm::LstmWeights;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ortho_weight_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(42);
        let q = ortho_weight(8, &mut rng);
        assert_abs_diff_eq!(q.t().dot(&q), Array2::<f32>::eye(8), epsilon = 1e-4);
    }

    #[test]
    fn rectangular_weights_are_scaled_gaussians() {
        let mut rng = StdRng::seed_from_u64(1);
        let w = norm_weight(200, 50, 0.01, true, &mut rng);
        assert_eq!(w.dim(), (200, 50));
        let std = w.std(0.0);
        assert!(std > 0.008 && std < 0.012, "std = {}", std);
    }

    #[test]
    fn same_seed_same_weights() {
        let dims = Dims::new(5, 3);
        let a = init_gru(&mut StdRng::seed_from_u64(9), "gru", dims, 0.01, true);
        let b = init_gru(&mut StdRng::seed_from_u64(9), "gru", dims, 0.01, true);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6 + 8);
    }

    #[test]
    fn conditional_init_fills_every_key_with_the_right_shape() {
        let dims = Dims::with_ctx(5, 3, 6);
        let set = init_gru_cond(&mut StdRng::seed_from_u64(0), "dec", dims, 0.01, true);
        assert!(CondGruWeights::from_set(&set, "dec", dims).is_ok());
        assert!(LayerNormWeights::from_set(&set, "dec", dims).is_ok());
    }

    #[test]
    fn forget_bias_only_touches_the_forget_slice() {
        let dims = Dims::new(2, 3);
        let set = init_lstm(&mut StdRng::seed_from_u64(0), "lstm", dims, 0.01, 1.0);
        let w = LstmWeights::from_set(&set, "lstm", dims).unwrap();
        assert_eq!(w.b.to_vec(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
