use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

use crate::inference::classifier::{Classifier, PredictionResult};
use crate::inference::model::InferenceError;
use crate::inference::preprocess::{ImagePreprocessor, PreprocessError};
use crate::inference::registry::ModelRegistry;
use crate::storage::naming::UploadNamer;
use crate::storage::uploader::StorageUploader;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Model not loaded")]
    ModelNotReady,
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Runs one request through preprocessing and classification, then hands the
/// image to the uploader without waiting on it.
#[derive(Clone)]
pub struct InferenceOrchestrator {
    registry: Arc<ModelRegistry>,
    preprocessor: ImagePreprocessor,
    classifier: Classifier,
    namer: Arc<UploadNamer>,
    uploader: StorageUploader,
}

impl InferenceOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, namer: UploadNamer, uploader: StorageUploader) -> Self {
        Self {
            classifier: Classifier::new(registry.clone()),
            registry,
            preprocessor: ImagePreprocessor::new(),
            namer: Arc::new(namer),
            uploader,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    pub async fn handle(
        &self,
        image: Bytes,
        original_file_name: &str,
        device_id: Option<&str>,
    ) -> Result<PredictionResult, OrchestratorError> {
        if !self.registry.is_ready() {
            return Err(OrchestratorError::ModelNotReady);
        }

        let request_id = Uuid::new_v4();
        log::info!(
            "[{}] Processing image: {}, size: {} bytes",
            request_id,
            original_file_name,
            image.len()
        );

        // Decode, resize and inference are CPU bound; keep them off the async workers.
        let preprocessor = self.preprocessor.clone();
        let classifier = self.classifier.clone();
        let pixels = image.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<_, OrchestratorError> {
            let tensor = preprocessor.preprocess(&pixels)?;
            Ok(classifier.classify(tensor)?)
        })
        .await
        .map_err(|e| InferenceError::Aborted(e.to_string()))??;

        let top = result.top().ok_or(InferenceError::OutputMismatch {
            expected: self.registry.labels().len(),
            actual: 0,
        })?;
        log::info!(
            "[{}] Prediction: {} ({:.2}%)",
            request_id,
            top.label,
            top.confidence * 100.0
        );

        let key = self.namer.make_key(original_file_name, &top.label, device_id);
        self.uploader.submit(image, key);

        Ok(result)
    }
}
