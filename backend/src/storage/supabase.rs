use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use url::Url;

use crate::storage::store::{BucketOptions, BucketStatus, ObjectStore, StorageError};

/// Supabase Storage REST client authenticated with a service key.
#[derive(Clone)]
pub struct SupabaseStorage {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct CreateBucketRequest<'a> {
    id: &'a str,
    name: &'a str,
    public: bool,
    file_size_limit: u64,
}

impl SupabaseStorage {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, StorageError> {
        Url::parse(endpoint)?;
        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.endpoint, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
    }
}

/// Older Storage versions answer a missing bucket with 400 and a "Bucket not found" body.
fn is_missing_bucket(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || body.to_lowercase().contains("not found")
}

async fn error_from(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StorageError::Status { status, message }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus, StorageError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("bucket/{}", bucket))))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(BucketStatus::Exists);
        }
        let body = response.text().await.unwrap_or_default();
        if is_missing_bucket(status, &body) {
            Ok(BucketStatus::NotFound)
        } else {
            Err(StorageError::Status {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        options: &BucketOptions,
    ) -> Result<(), StorageError> {
        let request = CreateBucketRequest {
            id: bucket,
            name: bucket,
            public: options.public,
            file_size_limit: options.file_size_limit,
        };
        let response = self
            .authorized(self.client.post(self.url("bucket")))
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: bytes::Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), StorageError> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("object/{}/{}", bucket, key))),
            )
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.url(&format!("object/public/{}/{}", bucket, key))
    }
}
