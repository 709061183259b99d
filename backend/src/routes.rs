use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use futures::TryStreamExt;
use log::error;
use shared::{Endpoints, ErrorResponse, HealthResponse, ServiceIndex};

use crate::config::ServerConfig;
use crate::orchestrator::{InferenceOrchestrator, OrchestratorError};

const IMAGE_FIELD: &str = "image";
const DEVICE_FIELD: &str = "deviceId";
const DEVICE_HEADER: &str = "x-device-id";
const MAX_DEVICE_ID_BYTES: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No image file provided")]
    MissingImage,
    #[error("Image exceeds the {0} byte upload limit")]
    TooLarge(usize),
    #[error("Invalid multipart payload")]
    Multipart(String),
    #[error("Model not loaded")]
    ModelNotReady,
    #[error("Invalid image")]
    InvalidImage(String),
    #[error("Prediction failed")]
    Prediction(String),
}

impl ApiError {
    fn details(&self) -> Option<String> {
        match self {
            ApiError::Multipart(details)
            | ApiError::InvalidImage(details)
            | ApiError::Prediction(details) => Some(details.clone()),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::Multipart(_) | ApiError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            details: self.details(),
        })
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::ModelNotReady => ApiError::ModelNotReady,
            OrchestratorError::Preprocess(e) => ApiError::InvalidImage(e.to_string()),
            OrchestratorError::Inference(e) => ApiError::Prediction(e.to_string()),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/info").route(web::get().to(info)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(ServiceIndex {
        service: "GreenBin Waste Classification API".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        endpoints: Endpoints {
            health: "GET /health".into(),
            predict: "POST /predict".into(),
            info: "GET /info".into(),
        },
    })
}

async fn health(orchestrator: web::Data<InferenceOrchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".into(),
        model_loaded: orchestrator.registry().is_ready(),
    })
}

async fn info(orchestrator: web::Data<InferenceOrchestrator>) -> Result<HttpResponse, ApiError> {
    let registry = orchestrator.registry();
    if !registry.is_ready() {
        return Err(ApiError::ModelNotReady);
    }
    Ok(HttpResponse::Ok().json(registry.model_info()))
}

#[derive(Default)]
struct PredictForm {
    image: Option<(String, Vec<u8>)>,
    device_id: Option<String>,
}

async fn read_form(mut payload: Multipart, max_upload_bytes: usize) -> Result<PredictForm, ApiError> {
    let mut form = PredictForm::default();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload")
            .to_string();
        let limit = match name.as_str() {
            IMAGE_FIELD => max_upload_bytes,
            DEVICE_FIELD => MAX_DEVICE_ID_BYTES,
            _ => 0,
        };

        let mut data = Vec::new();
        let mut overflowed = false;
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::Multipart(e.to_string()))?
        {
            if overflowed {
                continue;
            }
            if data.len() + chunk.len() > limit {
                if name == IMAGE_FIELD {
                    return Err(ApiError::TooLarge(max_upload_bytes));
                }
                // Drain the rest of the field but keep nothing from it.
                overflowed = true;
                data.clear();
                continue;
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            IMAGE_FIELD if !data.is_empty() => form.image = Some((file_name, data)),
            DEVICE_FIELD if !overflowed => {
                let device_id = String::from_utf8_lossy(&data).trim().to_string();
                form.device_id = Some(device_id).filter(|d| !d.is_empty());
            }
            DEVICE_FIELD => log::warn!("Ignoring deviceId over {} bytes", MAX_DEVICE_ID_BYTES),
            _ => {}
        }
    }
    Ok(form)
}

async fn predict(
    req: HttpRequest,
    orchestrator: web::Data<InferenceOrchestrator>,
    server: web::Data<ServerConfig>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if !orchestrator.registry().is_ready() {
        return Err(ApiError::ModelNotReady);
    }

    let form = read_form(payload, server.max_upload_bytes).await?;
    let (file_name, image) = form.image.ok_or(ApiError::MissingImage)?;
    let device_id = form.device_id.or_else(|| {
        req.headers()
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    });

    let result = orchestrator
        .handle(image.into(), &file_name, device_id.as_deref())
        .await
        .map_err(|e| {
            error!("Prediction error: {}", e);
            ApiError::from(e)
        })?;

    let response = result.to_response().ok_or_else(|| {
        ApiError::Prediction("model returned no predictions".into())
    })?;
    Ok(HttpResponse::Ok().json(response))
}
