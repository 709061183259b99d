use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";
pub const DEFAULT_BUCKET: &str = "greenbin-images";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Supabase,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub url: Option<String>,
    pub key: Option<String>,
    pub bucket: String,
    pub region: Option<String>,
    pub content_type: String,
    pub bucket_size_limit: u64,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/model.pt"),
            metadata_path: PathBuf::from("model/metadata.json"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            url: None,
            key: None,
            bucket: DEFAULT_BUCKET.to_string(),
            region: None,
            content_type: "image/jpeg".to_string(),
            bucket_size_limit: 10 * 1024 * 1024,
            queue_capacity: 64,
        }
    }
}

impl StorageConfig {
    /// Supabase needs both an endpoint and a key. S3 needs a bucket here; its
    /// credentials are resolved from the AWS chain when the store is built.
    pub fn is_configured(&self) -> bool {
        match self.provider {
            StorageProvider::Supabase => {
                non_empty(self.url.as_deref()) && non_empty(self.key.as_deref())
            }
            StorageProvider::S3 => !self.bucket.is_empty(),
        }
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl ServiceConfig {
    /// Reads the YAML file named by `GREENBIN_CONFIG` (or the default path when it
    /// exists), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = env::var("GREENBIN_CONFIG").ok();
        let path = explicit
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port,
            })?;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("METADATA_PATH") {
            self.model.metadata_path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("STORAGE_PROVIDER") {
            self.storage.provider = match provider.to_lowercase().as_str() {
                "supabase" => StorageProvider::Supabase,
                "s3" => StorageProvider::S3,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "STORAGE_PROVIDER",
                        value: provider,
                    });
                }
            };
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.storage.url = Some(url);
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.storage.key = Some(key);
        }
        if let Some(bucket) = lookup("SUPABASE_BUCKET").filter(|b| !b.is_empty()) {
            self.storage.bucket = bucket;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.storage.region = Some(region);
        }
        if let Some(capacity) = lookup("UPLOAD_QUEUE_CAPACITY") {
            self.storage.queue_capacity =
                capacity.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "UPLOAD_QUEUE_CAPACITY",
                    value: capacity,
                })?;
        }
        Ok(())
    }
}
