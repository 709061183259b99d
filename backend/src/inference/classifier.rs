use std::sync::Arc;

use crate::inference::model::InferenceError;
use crate::inference::preprocess::{INPUT_SHAPE, ImageTensor};
use crate::inference::registry::ModelRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Label/confidence pairs, highest confidence first.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    predictions: Vec<Prediction>,
}

impl PredictionResult {
    /// Pairs `scores[i]` with `labels[i]` and sorts by descending score. The sort
    /// is stable, so equal scores keep their label order.
    pub fn rank<'a>(labels: impl IntoIterator<Item = &'a str>, scores: &[f32]) -> Self {
        let mut predictions: Vec<Prediction> = labels
            .into_iter()
            .zip(scores.iter().copied())
            .map(|(label, confidence)| Prediction {
                label: label.to_string(),
                confidence,
            })
            .collect();
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self { predictions }
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn to_response(&self) -> Option<shared::PredictionResponse> {
        let top = self.top()?;
        Some(shared::PredictionResponse {
            prediction: top.label.clone(),
            confidence: top.confidence,
            all_predictions: self
                .predictions
                .iter()
                .map(|p| shared::RankedPrediction {
                    label: p.label.clone(),
                    confidence: p.confidence,
                    confidence_percent: shared::confidence_percent(p.confidence),
                })
                .collect(),
        })
    }
}

#[derive(Clone)]
pub struct Classifier {
    registry: Arc<ModelRegistry>,
}

impl Classifier {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Consumes the tensor; it is released before this returns, whatever the outcome.
    pub fn classify(&self, tensor: ImageTensor) -> Result<PredictionResult, InferenceError> {
        if tensor.shape() != INPUT_SHAPE {
            return Err(InferenceError::ShapeMismatch {
                expected: INPUT_SHAPE,
                actual: tensor.shape().to_vec(),
            });
        }

        let scores = self.registry.predict(&tensor)?;
        drop(tensor);

        let labels = self.registry.labels();
        if scores.len() != labels.len() {
            return Err(InferenceError::OutputMismatch {
                expected: labels.len(),
                actual: scores.len(),
            });
        }
        Ok(PredictionResult::rank(labels.iter(), &scores))
    }
}
