use tract_onnx::prelude::tract_ndarray::{Array1, Array2, Axis};
use tract_onnx::prelude::Tensor;

/// Added to the peak amplitude so silence never divides by zero.
pub const NORMALIZE_EPSILON: f32 = 1e-8;

/// A window of samples shaped `(1, len)` and scaled to a peak of ~1.0, ready
/// to be fed to the classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedWindow(Array2<f32>);

impl PreprocessedWindow {
    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }

    pub fn array(&self) -> &Array2<f32> {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.0.iter()
    }

    pub fn to_tensor(&self) -> Tensor {
        self.0.clone().into()
    }
}

/// Fit `window` to exactly `target_len` samples (zero-padding the end or
/// truncating), peak-normalize it and reshape to `(1, target_len)`.
pub fn prepare(window: &[f32], target_len: usize) -> PreprocessedWindow {
    let peak = window
        .iter()
        .take(target_len)
        .fold(0f32, |acc, s| acc.max(s.abs()));
    let scale = peak + NORMALIZE_EPSILON;

    let samples = Array1::from_iter(
        window
            .iter()
            .copied()
            .chain(std::iter::repeat(0f32))
            .take(target_len)
            .map(|s| s / scale),
    );

    PreprocessedWindow(samples.insert_axis(Axis(0)))
}
