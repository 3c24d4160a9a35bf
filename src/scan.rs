//! Scan executor: threads recurrent state through a time sequence.
//!
//! A [`Step`] computes one timestep. [`scan`] drives it over every row of a
//! `(time, batch)` mask and collects the per-step outputs; [`step_once`]
//! runs exactly one step from caller-supplied state, for incremental
//! decoding where the caller owns the loop.

use crate::error::{Error, Result};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};

/// One timestep of a recurrence.
///
/// `'a` is the lifetime of the per-step input views (slices of the
/// precomputed projections).
pub trait Step<'a> {
    /// Per-timestep sequence input
    type Input;
    /// State carried from step to step
    type State;
    /// What the step emits besides the new state
    type Output;

    fn step(&self, mask: ArrayView1<'_, f32>, input: Self::Input, prev: &Self::State) -> Result<(Self::State, Self::Output)>;
}

/// Result of a full-sequence scan.
#[derive(Debug)]
pub struct Scanned<S, O> {
    /// Per-timestep outputs in time order
    pub outputs: Vec<O>,
    /// State after the last timestep
    pub last: S,
}

/// Full-sequence mode: runs `step` for every timestep in order.
///
/// `inputs` yields exactly one item per row of `mask`; timestep `t` sees
/// the state produced by `t - 1`.
pub fn scan<'a, S, I>(step: &S, mask: ArrayView2<'_, f32>, inputs: I, init: S::State) -> Result<Scanned<S::State, S::Output>>
where
    S: Step<'a>,
    I: IntoIterator<Item = S::Input>,
    I::IntoIter: ExactSizeIterator,
{
    let inputs = inputs.into_iter();
    let steps = mask.nrows();
    if inputs.len() != steps {
        return Err(Error::shape(
            "scan inputs",
            format!("{} timesteps (mask rows)", steps),
            &[inputs.len()],
        ));
    }

    let mut state = init;
    let mut outputs = Vec::with_capacity(steps);
    for (t, (mask_t, input)) in mask.outer_iter().zip(inputs).enumerate() {
        tracing::trace!(t, "scan step");
        let (next, out) = step.step(mask_t, input, &state)?;
        state = next;
        outputs.push(out);
    }

    Ok(Scanned { outputs, last: state })
}

/// Single-step mode: one step from an explicitly supplied previous state.
#[inline]
pub fn step_once<'a, S: Step<'a>>(
    step: &S,
    mask: ArrayView1<'_, f32>,
    input: S::Input,
    prev: &S::State,
) -> Result<(S::State, S::Output)> {
    step.step(mask, input, prev)
}

/// Stacks per-step `[B, F]` tensors into a `[T, B, F]` trajectory.
pub fn stack_time<'b, I>(steps: I, batch: usize, width: usize) -> Result<Array3<f32>>
where
    I: IntoIterator<Item = &'b Array2<f32>>,
{
    let views: Vec<ArrayView2<'_, f32>> = steps.into_iter().map(|s| s.view()).collect();
    if views.is_empty() {
        return Ok(Array3::zeros((0, batch, width)));
    }
    Ok(ndarray::stack(Axis(0), &views)?)
}
