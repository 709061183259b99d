use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedPrediction {
    pub label: String,
    pub confidence: f32,
    pub confidence_percent: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub all_predictions: Vec<RankedPrediction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_name: String,
    pub labels: Vec<String>,
    pub image_size: u32,
    pub tfjs_version: Option<String>,
    pub tm_version: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub health: String,
    pub predict: String,
    pub info: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceIndex {
    pub service: String,
    pub version: String,
    pub endpoints: Endpoints,
}

/// Formats a confidence in `[0, 1]` as a percentage with two decimals, e.g. `"70.00%"`.
pub fn confidence_percent(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}
