use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use greenbin_backend::config::ServiceConfig;
use greenbin_backend::inference::registry::ModelRegistry;
use greenbin_backend::orchestrator::InferenceOrchestrator;
use greenbin_backend::routes::configure_routes;
use greenbin_backend::storage;
use greenbin_backend::storage::naming::UploadNamer;
use std::sync::Arc;
use std::time::Duration;

const UPLOAD_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServiceConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(format!("Invalid configuration: {}", e))
    })?;

    let registry =
        match ModelRegistry::load(&config.model.model_path, &config.model.metadata_path) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                log::error!("Failed to start server: {}", e);
                return Err(std::io::Error::other(format!("Model loading failed: {}", e)));
            }
        };

    let (uploader, upload_worker) = storage::build_uploader(&config.storage).await;
    let orchestrator = web::Data::new(InferenceOrchestrator::new(
        registry,
        UploadNamer::new(),
        uploader,
    ));
    let server_config = web::Data::new(config.server.clone());

    let bind_address = (config.server.host.clone(), config.server.port);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .allowed_header("x-device-id")
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(server_config.clone())
            .configure(configure_routes)
    })
    .bind(bind_address)?;

    log::info!("Server running on {}:{}", config.server.host, config.server.port);
    log::info!("Health check: http://localhost:{}/health", config.server.port);
    log::info!("Prediction endpoint: http://localhost:{}/predict", config.server.port);
    server.run().await?;

    if let Some(worker) = upload_worker {
        log::info!("Flushing pending uploads...");
        if tokio::time::timeout(UPLOAD_DRAIN_TIMEOUT, worker).await.is_err() {
            log::warn!("Pending uploads not finished after {:?}, exiting", UPLOAD_DRAIN_TIMEOUT);
        }
    }
    Ok(())
}
