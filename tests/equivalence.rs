//! Driving `forward_step` by hand must reproduce `forward`.

use approx::assert_abs_diff_eq;
use lumen_rnn::init::{init_gru, init_gru_cond, init_lstm};
use lumen_rnn::layers::rnn::{ConditionalGru, ConditionalGruMulti, Gru, Lstm};
use lumen_rnn::{Dims, Error};
use ndarray::{arr1, s, Array, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TOL: f32 = 1e-6;

fn inputs(steps: usize, batch: usize, nin: usize) -> Array3<f32> {
    Array::from_shape_fn((steps, batch, nin), |(t, b, i)| ((t * 13 + b * 5 + i) as f32 * 0.37).sin())
}

fn context(src: usize, batch: usize, dimctx: usize, phase: f32) -> Array3<f32> {
    Array::from_shape_fn((src, batch, dimctx), |(s, b, c)| ((s * 3 + b * 7 + c) as f32 * 0.21 + phase).cos())
}

fn target_mask() -> Array2<f32> {
    // 5 steps, 3 samples of lengths 5, 3 and 1
    Array::from_shape_fn((5, 3), |(t, b)| if t < [5, 3, 1][b] { 1.0f32 } else { 0.0 })
}

#[test]
fn gru_steps_match_full_sequence() {
    let dims = Dims::new(6, 5);
    let x = inputs(5, 3, 6);
    let mask = target_mask();

    for layernorm in [false, true] {
        let ws = init_gru(&mut StdRng::seed_from_u64(1), "enc", dims, 0.3, layernorm);
        let gru = Gru::new("enc", 6, 5, layernorm);
        let full = gru.forward(&ws, x.view().into_dyn(), Some(mask.view())).unwrap();

        let mut h = Array2::<f32>::zeros((3, 5));
        for t in 0..5 {
            h = gru.forward_step(&ws, x.index_axis(Axis(0), t), Some(mask.row(t)), &h).unwrap();
            assert_abs_diff_eq!(h, full.index_axis(Axis(0), t), epsilon = TOL);
        }
    }
}

#[test]
fn conditional_gru_steps_match_full_sequence() {
    let dims = Dims::with_ctx(6, 5, 10);
    let x = inputs(5, 3, 6);
    let mask = target_mask();
    let cc = context(4, 3, 10, 0.0);
    let ctx_mask = Array::from_shape_fn((4, 3), |(s, b)| if s < [4, 2, 3][b] { 1.0f32 } else { 0.0 });
    let init = Array::from_shape_fn((3, 5), |(b, j)| 0.1 * (b as f32 - j as f32));

    for layernorm in [false, true] {
        let ws = init_gru_cond(&mut StdRng::seed_from_u64(2), "dec", dims, 0.3, layernorm);
        let layer = ConditionalGru::new("dec", dims, layernorm);
        let full = layer
            .forward(
                &ws,
                x.view().into_dyn(),
                cc.view().into_dyn(),
                Some(mask.view()),
                Some(ctx_mask.view()),
                Some(&init),
            )
            .unwrap();

        let projected = layer.project_context(&ws, cc.view().into_dyn(), Some(ctx_mask.view())).unwrap();
        let mut h = init.clone();
        for t in 0..5 {
            let out = layer
                .forward_step(&ws, &projected, x.index_axis(Axis(0), t), Some(mask.row(t)), Some(&h))
                .unwrap();
            assert_abs_diff_eq!(out.hidden, full.hidden.index_axis(Axis(0), t), epsilon = TOL);
            assert_abs_diff_eq!(out.context, full.contexts.index_axis(Axis(0), t), epsilon = TOL);
            assert_abs_diff_eq!(out.alpha, full.alphas.index_axis(Axis(0), t), epsilon = TOL);
            h = out.hidden;
        }
        // padded steps leave the last hidden state untouched
        assert_eq!(full.hidden.slice(s![4, 2, ..]), full.hidden.slice(s![0, 2, ..]));
    }
}

#[test]
fn dual_context_steps_match_full_sequence() {
    let dims = Dims::with_ctx(6, 5, 10);
    let x = inputs(5, 3, 6);
    let mask = target_mask();
    let c1 = context(4, 3, 10, 0.0);
    let c1_mask = Array::from_shape_fn((4, 3), |(s, b)| if s < [4, 1, 2][b] { 1.0f32 } else { 0.0 });
    let c2 = context(7, 3, 10, 1.3);

    let ws = init_gru_cond(&mut StdRng::seed_from_u64(3), "mm", dims, 0.3, false);
    let layer = ConditionalGruMulti::new("mm", dims);
    let p1 = layer.project_context(&ws, c1.view().into_dyn(), Some(c1_mask.view())).unwrap();
    let p2 = layer.project_context(&ws, c2.view().into_dyn(), None).unwrap();

    let full = layer
        .forward(
            &ws,
            x.view().into_dyn(),
            c1.view().into_dyn(),
            c2.view().into_dyn(),
            Some(mask.view()),
            Some(c1_mask.view()),
            None,
            None,
        )
        .unwrap();
    assert_eq!(full.alphas1.shape(), &[5, 3, 4]);
    assert_eq!(full.alphas2.shape(), &[5, 3, 7]);

    let mut h = Array2::<f32>::zeros((3, 5));
    for t in 0..5 {
        let out = layer
            .forward_step(&ws, &p1, &p2, x.index_axis(Axis(0), t), Some(mask.row(t)), Some(&h))
            .unwrap();
        assert_abs_diff_eq!(out.hidden, full.hidden.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.context, full.contexts.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.alpha1, full.alphas1.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.alpha2, full.alphas2.index_axis(Axis(0), t), epsilon = TOL);
        h = out.hidden;
    }
}

#[test]
fn lstm_steps_match_full_sequence() {
    let dims = Dims::new(6, 5);
    let ws = init_lstm(&mut StdRng::seed_from_u64(4), "lstm", dims, 0.3, 1.0);
    let x = inputs(5, 3, 6);

    for masked in [false, true] {
        let lstm = Lstm::new("lstm", 6, 5).with_masking(masked);
        let mask = target_mask();
        let full = lstm.forward(&ws, x.view().into_dyn(), None, Some(mask.view())).unwrap();

        let mut state = None;
        for t in 0..5 {
            let next = lstm
                .forward_step(&ws, x.index_axis(Axis(0), t), Some(mask.row(t)), state.as_ref())
                .unwrap();
            assert_abs_diff_eq!(next.memory, full.memories.index_axis(Axis(0), t), epsilon = TOL);
            assert_abs_diff_eq!(next.cell, full.cells.index_axis(Axis(0), t), epsilon = TOL);
            state = Some(next);
        }
    }
}

#[test]
fn single_step_without_state_fails_fast() {
    let dims = Dims::with_ctx(6, 5, 10);
    let ws = init_gru_cond(&mut StdRng::seed_from_u64(5), "dec", dims, 0.3, false);
    let layer = ConditionalGru::new("dec", dims, false);
    let cc = context(4, 3, 10, 0.0);
    let projected = layer.project_context(&ws, cc.view().into_dyn(), None).unwrap();
    let x = inputs(1, 3, 6);

    let err = layer
        .forward_step(&ws, &projected, x.index_axis(Axis(0), 0), None, None)
        .unwrap_err();
    assert!(matches!(err, Error::Precondition { .. }));
}

// Incremental decoding runs one sample at a time with wide hidden states.
const WIDE: Dims = Dims { nin: 32, dim: 128, dimctx: 96 };

#[test]
fn single_sample_gru_steps_match_full_sequence() {
    let x = inputs(6, 1, WIDE.nin);
    for layernorm in [false, true] {
        let ws = init_gru(&mut StdRng::seed_from_u64(11), "enc", WIDE, 0.3, layernorm);
        let gru = Gru::new("enc", WIDE.nin, WIDE.dim, layernorm);
        let full = gru.forward(&ws, x.view().into_dyn(), None).unwrap();

        let mut h = Array2::<f32>::zeros((1, WIDE.dim));
        for t in 0..6 {
            h = gru.forward_step(&ws, x.index_axis(Axis(0), t), None, &h).unwrap();
            assert_abs_diff_eq!(h, full.index_axis(Axis(0), t), epsilon = TOL);
        }
    }
}

#[test]
fn single_sample_conditional_gru_steps_match_full_sequence() {
    let x = inputs(8, 1, WIDE.nin);
    let cc = context(7, 1, WIDE.dimctx, 0.4);

    for (seed, layernorm) in [(12, false), (13, true)] {
        let ws = init_gru_cond(&mut StdRng::seed_from_u64(seed), "dec", WIDE, 0.3, layernorm);
        let layer = ConditionalGru::new("dec", WIDE, layernorm);
        let full = layer
            .forward(&ws, x.view().into_dyn(), cc.view().into_dyn(), None, None, None)
            .unwrap();

        let projected = layer.project_context(&ws, cc.view().into_dyn(), None).unwrap();
        let mut h = Array2::<f32>::zeros((1, WIDE.dim));
        for t in 0..8 {
            let out = layer
                .forward_step(&ws, &projected, x.index_axis(Axis(0), t), None, Some(&h))
                .unwrap();
            assert_abs_diff_eq!(out.hidden, full.hidden.index_axis(Axis(0), t), epsilon = TOL);
            assert_abs_diff_eq!(out.context, full.contexts.index_axis(Axis(0), t), epsilon = TOL);
            assert_abs_diff_eq!(out.alpha, full.alphas.index_axis(Axis(0), t), epsilon = TOL);
            h = out.hidden;
        }
    }
}

#[test]
fn single_sample_dual_context_steps_match_full_sequence() {
    let x = inputs(8, 1, WIDE.nin);
    let c1 = context(6, 1, WIDE.dimctx, 0.0);
    let c2 = context(4, 1, WIDE.dimctx, 2.1);

    let ws = init_gru_cond(&mut StdRng::seed_from_u64(14), "mm", WIDE, 0.3, false);
    let layer = ConditionalGruMulti::new("mm", WIDE);
    let full = layer
        .forward(&ws, x.view().into_dyn(), c1.view().into_dyn(), c2.view().into_dyn(), None, None, None, None)
        .unwrap();

    let p1 = layer.project_context(&ws, c1.view().into_dyn(), None).unwrap();
    let p2 = layer.project_context(&ws, c2.view().into_dyn(), None).unwrap();
    let mut h = Array2::<f32>::zeros((1, WIDE.dim));
    for t in 0..8 {
        let out = layer
            .forward_step(&ws, &p1, &p2, x.index_axis(Axis(0), t), None, Some(&h))
            .unwrap();
        assert_abs_diff_eq!(out.hidden, full.hidden.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.context, full.contexts.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.alpha1, full.alphas1.index_axis(Axis(0), t), epsilon = TOL);
        assert_abs_diff_eq!(out.alpha2, full.alphas2.index_axis(Axis(0), t), epsilon = TOL);
        h = out.hidden;
    }
}

#[test]
fn both_modes_reject_fractional_masks() {
    let dims = Dims::new(6, 5);
    let x = inputs(1, 2, 6);
    let h = Array2::<f32>::zeros((2, 5));
    let half = arr1(&[1.0f32, 0.5]);

    let ws = init_gru(&mut StdRng::seed_from_u64(6), "enc", dims, 0.3, false);
    let gru = Gru::new("enc", 6, 5, false);
    let seq_err = gru
        .forward(&ws, x.view().into_dyn(), Some(half.view().insert_axis(Axis(0))))
        .unwrap_err();
    let step_err = gru
        .forward_step(&ws, x.index_axis(Axis(0), 0), Some(half.view()), &h)
        .unwrap_err();
    assert!(matches!(seq_err, Error::InvalidArgument { arg: "mask", .. }));
    assert!(matches!(step_err, Error::InvalidArgument { arg: "mask", .. }));

    let lstm_ws = init_lstm(&mut StdRng::seed_from_u64(6), "lstm", dims, 0.3, 1.0);
    let lstm = Lstm::new("lstm", 6, 5).with_masking(true);
    let err = lstm
        .forward_step(&lstm_ws, x.index_axis(Axis(0), 0), Some(half.view()), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { arg: "mask", .. }));
}
