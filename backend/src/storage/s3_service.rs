use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration};

use crate::config::StorageConfig;
use crate::storage::store::{BucketOptions, BucketStatus, ObjectStore, StorageError};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 (or S3-compatible, when an endpoint is configured) object store.
#[derive(Clone)]
pub struct S3Service {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl S3Service {
    pub fn new(client: Client, region: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            region,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    /// Credentials come from the standard AWS provider chain and are resolved
    /// once here; an empty chain is reported as `StorageError::Credentials`.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        resolve_credentials(sdk_config.credentials_provider()).await?;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Ok(Self::new(
            Client::from_conf(builder.build()),
            region,
            config.url.clone(),
        ))
    }
}

async fn resolve_credentials(
    provider: Option<SharedCredentialsProvider>,
) -> Result<(), StorageError> {
    let provider = provider
        .ok_or_else(|| StorageError::Credentials("no credentials provider configured".into()))?;
    provider
        .provide_credentials()
        .await
        .map_err(|e| StorageError::Credentials(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl ObjectStore for S3Service {
    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus, StorageError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(BucketStatus::Exists),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(BucketStatus::NotFound)
                } else {
                    Err(StorageError::S3(service_error.to_string()))
                }
            }
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &BucketOptions,
    ) -> Result<(), StorageError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if options.public {
            request = request.acl(BucketCannedAcl::PublicRead);
        }
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: bytes::Bytes,
        content_type: &str,
        _upsert: bool,
    ) -> Result<(), StorageError> {
        // PutObject always replaces an existing key.
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }
}
