use std::path::Path;

use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;

use crate::error::ClassifierError;
use crate::preprocess::PreprocessedWindow;

/// The fixed set of labels the keyword model distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Background,
    Increase,
    Decrease,
}

/// Per-label scores for one window. Holding one field per label means a
/// `Confidences` can never be missing a label or carry an extra one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Confidences {
    pub background: f32,
    pub increase: f32,
    pub decrease: f32,
}

impl Confidences {
    pub fn new(background: f32, increase: f32, decrease: f32) -> Self {
        Self {
            background,
            increase,
            decrease,
        }
    }

    pub fn get(&self, label: Label) -> f32 {
        match label {
            Label::Background => self.background,
            Label::Increase => self.increase,
            Label::Decrease => self.decrease,
        }
    }

    fn set(&mut self, label: Label, score: f32) {
        match label {
            Label::Background => self.background = score,
            Label::Increase => self.increase = score,
            Label::Decrease => self.decrease = score,
        }
    }
}

/// Which output index of the model carries which label.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelOrder(Vec<Label>);

impl LabelOrder {
    /// Accepts an ordering only if it names every label exactly once.
    pub fn new(labels: Vec<Label>) -> Result<Self, ClassifierError> {
        for label in [Label::Background, Label::Increase, Label::Decrease] {
            let count = labels.iter().filter(|l| **l == label).count();
            if count != 1 {
                return Err(ClassifierError::LabelOrder(format!(
                    "{:?} appears {} times in {:?}",
                    label, count, labels
                )));
            }
        }
        Ok(Self(labels))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Map a row of raw model scores onto labels.
    pub fn confidences(&self, scores: &[f32]) -> Result<Confidences, ClassifierError> {
        if scores.len() != self.0.len() {
            return Err(ClassifierError::MalformedOutput {
                expected: self.0.len(),
                got: scores.len(),
            });
        }
        let mut out = Confidences::default();
        self.0
            .iter()
            .zip(scores)
            .for_each(|(label, score)| out.set(*label, *score));
        Ok(out)
    }
}

impl Default for LabelOrder {
    /// The output layout of the bundled keyword model.
    fn default() -> Self {
        Self(vec![Label::Decrease, Label::Background, Label::Increase])
    }
}

/// Classifier maps one preprocessed window to per-label confidences.
pub trait Classifier: Send {
    fn infer(&mut self, window: &PreprocessedWindow) -> Result<Confidences, ClassifierError>;
}

/// OnnxClassifier runs a keyword model exported to ONNX.
pub struct OnnxClassifier {
    model: TypedRunnableModel<TypedModel>,
    labels: LabelOrder,
    window_samples: usize,
}

impl OnnxClassifier {
    /// Load the model at `path`, pin its input to `[1, window_samples]` and
    /// check its output can be mapped onto `labels`.
    pub fn load<P: AsRef<Path>>(
        path: P,
        window_samples: usize,
        labels: LabelOrder,
    ) -> Result<Self, ClassifierError> {
        let load_err = |e: TractError| ClassifierError::Load(format!("{:?}", e));

        let model = tract_onnx::onnx()
            // load the model
            .model_for_path(path.as_ref())
            .map_err(load_err)?
            .with_input_fact(0, f32::fact([1, window_samples]).into())
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?;

        check_signature(&model, &labels)?;

        let model = model.into_runnable().map_err(load_err)?;
        log::info!(
            "loaded keyword model {} (labels {:?})",
            path.as_ref().display(),
            labels.0
        );

        Ok(Self {
            model,
            labels,
            window_samples,
        })
    }
}

fn check_signature(model: &TypedModel, labels: &LabelOrder) -> Result<(), ClassifierError> {
    if model.outputs.is_empty() {
        return Err(ClassifierError::Signature("model has no outputs".into()));
    }
    let fact = model
        .output_fact(0)
        .map_err(|e| ClassifierError::Signature(format!("{:?}", e)))?;

    match fact.shape.as_concrete() {
        Some(shape) => {
            let scores = shape.last().copied().unwrap_or(0);
            let rows: usize = shape.iter().rev().skip(1).product();
            if scores != labels.len() || rows != 1 {
                return Err(ClassifierError::Signature(format!(
                    "output shape {:?} does not hold one row of {} scores",
                    shape,
                    labels.len()
                )));
            }
        }
        None => log::warn!(
            "model output shape {:?} is symbolic; checking score count per cycle",
            fact.shape
        ),
    }
    Ok(())
}

impl Classifier for OnnxClassifier {
    fn infer(&mut self, window: &PreprocessedWindow) -> Result<Confidences, ClassifierError> {
        let (_, len) = window.shape();
        if len != self.window_samples {
            return Err(ClassifierError::Inference(format!(
                "window has {} samples, model expects {}",
                len, self.window_samples
            )));
        }

        let out = self
            .model
            .run(tvec!(window.to_tensor().into()))
            .map_err(|e| ClassifierError::Inference(format!("{:?}", e)))?
            .remove(0);
        let scores = out
            .as_slice::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("{:?}", e)))?;

        self.labels.confidences(scores)
    }
}
