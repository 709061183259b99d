use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Storage returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid storage endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("S3 error: {0}")]
    S3(String),
    #[error("No usable AWS credentials: {0}")]
    Credentials(String),
    #[error("Object of {size} bytes exceeds the {limit} byte bucket limit")]
    TooLarge { size: usize, limit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Exists,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    pub public: bool,
    pub file_size_limit: u64,
}

/// Minimal bucket/object operations the upload worker relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus, StorageError>;

    async fn create_bucket(&self, bucket: &str, options: &BucketOptions)
    -> Result<(), StorageError>;

    /// Writes `body` to `key`, replacing any existing object when `upsert` is set.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: bytes::Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StorageError>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}
