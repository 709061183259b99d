use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::inference::model::{InferenceError, Predictor};
use crate::inference::preprocess::{INPUT_SHAPE, INPUT_SIZE, ImageTensor};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed model metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Model metadata lists no labels")]
    NoLabels,
    #[error("Model expects {0}px input, only 224px is supported")]
    UnsupportedImageSize(u32),
    #[error("Model outputs {outputs} scores but metadata lists {labels} labels")]
    DimensionMismatch { labels: usize, outputs: usize },
    #[error("Failed to load model: {0}")]
    Model(#[from] InferenceError),
    #[error("No model backend compiled in; rebuild with the `torch` feature")]
    BackendUnavailable,
}

fn default_image_size() -> u32 {
    INPUT_SIZE as u32
}

/// Contents of the `metadata.json` exported next to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    #[serde(default)]
    pub model_name: String,
    pub labels: Vec<String>,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default)]
    pub tfjs_version: Option<String>,
    #[serde(default)]
    pub tm_version: Option<String>,
}

impl ModelMetadata {
    pub fn from_file(path: &Path) -> Result<Self, StartupError> {
        let contents = std::fs::read_to_string(path).map_err(|source| StartupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Class names, index-aligned with the model output.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

pub struct ModelRegistry {
    predictor: Box<dyn Predictor>,
    labels: LabelSet,
    metadata: ModelMetadata,
    ready: AtomicBool,
}

impl ModelRegistry {
    /// Loads the model and its metadata, then warms the model up. Any failure
    /// here means the process must not serve traffic.
    pub fn load(model_path: &Path, metadata_path: &Path) -> Result<Self, StartupError> {
        log::info!("Loading metadata from: {}", metadata_path.display());
        let metadata = ModelMetadata::from_file(metadata_path)?;

        log::info!("Loading model from: {}", model_path.display());
        let predictor = load_backend(model_path)?;

        let registry = Self::new(predictor, metadata)?;
        registry.warm_up()?;
        Ok(registry)
    }

    /// Validates the metadata. The registry is not ready until [`warm_up`](Self::warm_up)
    /// has succeeded.
    pub fn new(
        predictor: Box<dyn Predictor>,
        metadata: ModelMetadata,
    ) -> Result<Self, StartupError> {
        if metadata.labels.is_empty() {
            return Err(StartupError::NoLabels);
        }
        if metadata.image_size as usize != INPUT_SIZE {
            return Err(StartupError::UnsupportedImageSize(metadata.image_size));
        }

        Ok(Self {
            predictor,
            labels: LabelSet(metadata.labels.clone()),
            metadata,
            ready: AtomicBool::new(false),
        })
    }

    /// Runs one discarded inference on a zero tensor so lazy backend setup happens
    /// before the first request, and checks the output width against the labels.
    pub fn warm_up(&self) -> Result<(), StartupError> {
        log::info!("Warming up model...");
        let warmup = ImageTensor::zeros(INPUT_SHAPE);
        let outputs = self.predictor.predict(&warmup)?.len();
        if outputs != self.labels.len() {
            return Err(StartupError::DimensionMismatch {
                labels: self.labels.len(),
                outputs,
            });
        }

        self.ready.store(true, Ordering::Release);
        log::info!("Model warmed up, labels: {:?}", self.labels.as_slice());
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn predict(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        if !self.is_ready() {
            return Err(InferenceError::NotReady);
        }
        self.predictor.predict(tensor)
    }

    pub fn model_info(&self) -> shared::ModelInfo {
        shared::ModelInfo {
            model_name: self.metadata.model_name.clone(),
            labels: self.labels.as_slice().to_vec(),
            image_size: self.metadata.image_size,
            tfjs_version: self.metadata.tfjs_version.clone(),
            tm_version: self.metadata.tm_version.clone(),
        }
    }
}

#[cfg(feature = "torch")]
fn load_backend(model_path: &Path) -> Result<Box<dyn Predictor>, StartupError> {
    if !model_path.exists() {
        return Err(StartupError::Io {
            path: model_path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
        });
    }
    Ok(Box::new(crate::inference::model::TorchModel::load(model_path)?))
}

#[cfg(not(feature = "torch"))]
fn load_backend(_model_path: &Path) -> Result<Box<dyn Predictor>, StartupError> {
    Err(StartupError::BackendUnavailable)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// Returns fixed scores and counts how often it was called.
    pub(crate) struct FixedScores {
        pub scores: Vec<f32>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FixedScores {
        pub(crate) fn boxed(scores: &[f32]) -> Box<dyn Predictor> {
            Box::new(Self {
                scores: scores.to_vec(),
                calls: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl Predictor for FixedScores {
        fn predict(&self, _input: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    pub(crate) fn metadata(labels: &[&str]) -> ModelMetadata {
        ModelMetadata {
            model_name: "greenbin-waste".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            image_size: 224,
            tfjs_version: Some("1.3.1".to_string()),
            tm_version: Some("2.4.10".to_string()),
        }
    }

    pub(crate) fn waste_registry(scores: &[f32]) -> ModelRegistry {
        let registry = ModelRegistry::new(
            FixedScores::boxed(scores),
            metadata(&["cardboard", "glass", "metal", "plastic"]),
        )
        .unwrap();
        registry.warm_up().unwrap();
        registry
    }

    #[test]
    fn warm_up_runs_once_and_marks_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let predictor = FixedScores {
            scores: vec![0.5, 0.5],
            calls: calls.clone(),
        };
        let registry = ModelRegistry::new(Box::new(predictor), metadata(&["a", "b"])).unwrap();
        assert!(!registry.is_ready());

        registry.warm_up().unwrap();
        assert!(registry.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_dimension_must_match_labels() {
        let registry =
            ModelRegistry::new(FixedScores::boxed(&[0.2, 0.3, 0.5]), metadata(&["a", "b"]))
                .unwrap();
        let err = registry.warm_up().unwrap_err();
        assert!(matches!(
            err,
            StartupError::DimensionMismatch {
                labels: 2,
                outputs: 3
            }
        ));
        assert!(!registry.is_ready());
    }

    #[test]
    fn predict_before_warm_up_is_rejected() {
        let registry =
            ModelRegistry::new(FixedScores::boxed(&[1.0]), metadata(&["only"])).unwrap();
        let err = registry
            .predict(&ImageTensor::zeros(INPUT_SHAPE))
            .unwrap_err();
        assert!(matches!(err, InferenceError::NotReady));
    }

    #[test]
    fn empty_label_set_is_fatal() {
        let err = ModelRegistry::new(FixedScores::boxed(&[]), metadata(&[])).err();
        assert!(matches!(err, Some(StartupError::NoLabels)));
    }

    #[test]
    fn unsupported_image_size_is_fatal() {
        let mut meta = metadata(&["a"]);
        meta.image_size = 96;
        let err = ModelRegistry::new(FixedScores::boxed(&[1.0]), meta).err();
        assert!(matches!(err, Some(StartupError::UnsupportedImageSize(96))));
    }

    #[test]
    fn metadata_parses_teachable_machine_export() {
        let json = r#"{
            "tfjsVersion": "1.3.1",
            "tmVersion": "2.4.10",
            "packageVersion": "0.8.4",
            "packageName": "@teachablemachine/image",
            "timeStamp": "2024-03-01T10:00:00.000Z",
            "userMetadata": {},
            "modelName": "tm-my-image-model",
            "labels": ["cardboard", "glass", "metal", "plastic"],
            "imageSize": 224
        }"#;
        let metadata: ModelMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.model_name, "tm-my-image-model");
        assert_eq!(metadata.labels.len(), 4);
        assert_eq!(metadata.tm_version.as_deref(), Some("2.4.10"));
    }

    #[test]
    fn metadata_without_labels_is_malformed() {
        let result: Result<ModelMetadata, _> = serde_json::from_str(r#"{"modelName": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_metadata_file_is_fatal() {
        let err = ModelRegistry::load(
            Path::new("does/not/exist/model.pt"),
            Path::new("does/not/exist/metadata.json"),
        )
        .err();
        assert!(matches!(err, Some(StartupError::Io { .. })));
    }

    #[test]
    fn model_info_mirrors_metadata() {
        let registry = waste_registry(&[0.25, 0.25, 0.25, 0.25]);
        let info = registry.model_info();
        assert_eq!(info.model_name, "greenbin-waste");
        assert_eq!(info.labels, vec!["cardboard", "glass", "metal", "plastic"]);
        assert_eq!(info.image_size, 224);
    }
}
