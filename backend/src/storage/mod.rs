pub mod naming;
pub mod s3_service;
pub mod store;
pub mod supabase;
pub mod uploader;

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{StorageConfig, StorageProvider};
use s3_service::S3Service;
use store::ObjectStore;
use supabase::SupabaseStorage;
use uploader::{StorageUploader, UploadSettings};

/// Builds the uploader for the configured provider. Missing or unusable
/// credentials yield a disabled uploader rather than an error.
pub async fn build_uploader(config: &StorageConfig) -> (StorageUploader, Option<JoinHandle<()>>) {
    if !config.is_configured() {
        log::info!("Storage credentials not provided. Storage upload disabled.");
        return (StorageUploader::disabled(), None);
    }

    let store: Arc<dyn ObjectStore> = match config.provider {
        StorageProvider::Supabase => {
            let url = config.url.as_deref().unwrap_or_default();
            let key = config.key.as_deref().unwrap_or_default();
            match SupabaseStorage::new(url, key) {
                Ok(storage) => {
                    log::info!("Supabase client initialized successfully");
                    Arc::new(storage)
                }
                Err(e) => {
                    log::error!("Failed to initialize Supabase client: {}", e);
                    return (StorageUploader::disabled(), None);
                }
            }
        }
        StorageProvider::S3 => match S3Service::from_config(config).await {
            Ok(service) => {
                log::info!("Using S3 storage for bucket {}", config.bucket);
                Arc::new(service)
            }
            Err(e) => {
                log::info!("{}. Storage upload disabled.", e);
                return (StorageUploader::disabled(), None);
            }
        },
    };

    let (uploader, worker) = StorageUploader::spawn(store, UploadSettings::from(config));
    (uploader, Some(worker))
}
