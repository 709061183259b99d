use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::StorageConfig;
use crate::storage::naming::UploadKey;
use crate::storage::store::{BucketOptions, BucketStatus, ObjectStore, StorageError};

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub bucket: String,
    pub content_type: String,
    pub bucket_size_limit: u64,
    pub queue_capacity: usize,
}

impl From<&StorageConfig> for UploadSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            content_type: config.content_type.clone(),
            bucket_size_limit: config.bucket_size_limit,
            queue_capacity: config.queue_capacity.max(1),
        }
    }
}

struct UploadJob {
    key: UploadKey,
    bytes: Bytes,
}

/// Handle for fire-and-forget uploads. Submissions go onto a bounded queue
/// drained by a single background worker; nothing is reported back.
#[derive(Clone)]
pub struct StorageUploader {
    sender: Option<mpsc::Sender<UploadJob>>,
}

impl StorageUploader {
    /// Uploader for when no storage credentials are configured.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Starts the worker. It exits once every handle has been dropped and the
    /// queue is drained, so awaiting the returned task flushes pending uploads.
    pub fn spawn(store: Arc<dyn ObjectStore>, settings: UploadSettings) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = UploadWorker { store, settings };
        let handle = tokio::spawn(worker.run(receiver));
        (
            Self {
                sender: Some(sender),
            },
            handle,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn submit(&self, bytes: Bytes, key: UploadKey) {
        let Some(sender) = &self.sender else {
            log::info!("Storage not configured, skipping upload of {}", key);
            return;
        };

        match sender.try_send(UploadJob { key, bytes }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::warn!("Upload queue full, dropping {}", job.key);
            }
            Err(TrySendError::Closed(job)) => {
                log::error!("Upload worker stopped, dropping {}", job.key);
            }
        }
    }
}

struct UploadWorker {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
}

impl UploadWorker {
    async fn run(self, mut receiver: mpsc::Receiver<UploadJob>) {
        while let Some(job) = receiver.recv().await {
            match self.process(&job).await {
                Ok(public_url) => log::info!("Image uploaded successfully: {}", public_url),
                Err(e) => log::error!("Background upload of {} failed: {}", job.key, e),
            }
        }
        log::info!("Upload queue closed, worker exiting");
    }

    async fn process(&self, job: &UploadJob) -> Result<String, StorageError> {
        let size = job.bytes.len();
        if size as u64 > self.settings.bucket_size_limit {
            return Err(StorageError::TooLarge {
                size,
                limit: self.settings.bucket_size_limit,
            });
        }

        self.ensure_bucket().await?;

        let bucket = &self.settings.bucket;
        self.store
            .put_object(
                bucket,
                job.key.as_str(),
                job.bytes.clone(),
                &self.settings.content_type,
                true,
            )
            .await?;
        Ok(self.store.public_url(bucket, job.key.as_str()))
    }

    /// Creates the bucket when the store reports it missing.
    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let bucket = &self.settings.bucket;
        match self.store.bucket_status(bucket).await {
            Ok(BucketStatus::Exists) => Ok(()),
            Ok(BucketStatus::NotFound) => {
                log::info!("Creating bucket: {}", bucket);
                let options = BucketOptions {
                    public: true,
                    file_size_limit: self.settings.bucket_size_limit,
                };
                self.store
                    .create_bucket(bucket, &options)
                    .await
                    .inspect_err(|e| log::error!("Failed to create bucket {}: {}", bucket, e))?;
                log::info!("Bucket created successfully");
                Ok(())
            }
            Err(e) => {
                log::error!("Bucket check error for {}: {}", bucket, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Check(String),
        Create(String, BucketOptions),
        Put {
            bucket: String,
            key: String,
            size: usize,
            content_type: String,
            upsert: bool,
        },
    }

    /// In-memory store that records every call and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub buckets: Mutex<HashSet<String>>,
        pub calls: Mutex<Vec<Call>>,
        pub fail_check: bool,
        pub fail_create: bool,
        pub fail_put: bool,
        pub latency: Option<Duration>,
    }

    impl RecordingStore {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn creates(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Create(..)))
                .count()
        }

        pub(crate) fn puts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Put { key, .. } => Some(key),
                    _ => None,
                })
                .collect()
        }

        async fn delay(&self) {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
        }

        fn unreachable() -> StorageError {
            StorageError::Status {
                status: 503,
                message: "connection refused".into(),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus, StorageError> {
            self.delay().await;
            self.calls.lock().unwrap().push(Call::Check(bucket.into()));
            if self.fail_check {
                return Err(Self::unreachable());
            }
            if self.buckets.lock().unwrap().contains(bucket) {
                Ok(BucketStatus::Exists)
            } else {
                Ok(BucketStatus::NotFound)
            }
        }

        async fn create_bucket(
            &self,
            bucket: &str,
            options: &BucketOptions,
        ) -> Result<(), StorageError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Create(bucket.into(), options.clone()));
            if self.fail_create {
                return Err(Self::unreachable());
            }
            self.buckets.lock().unwrap().insert(bucket.into());
            Ok(())
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
            upsert: bool,
        ) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push(Call::Put {
                bucket: bucket.into(),
                key: key.into(),
                size: body.len(),
                content_type: content_type.into(),
                upsert,
            });
            if self.fail_put {
                return Err(Self::unreachable());
            }
            Ok(())
        }

        fn public_url(&self, bucket: &str, key: &str) -> String {
            format!("memory://{}/{}", bucket, key)
        }
    }

    pub(crate) fn settings() -> UploadSettings {
        UploadSettings::from(&StorageConfig::default())
    }

    fn key(name: &str) -> UploadKey {
        crate::storage::naming::UploadNamer::with_clock_and_seed(|| 1, 3).make_key(
            "photo.jpg",
            name,
            Some("dock-1"),
        )
    }

    async fn drain(uploader: StorageUploader, worker: JoinHandle<()>) {
        drop(uploader);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn missing_bucket_is_created_public_once() {
        let store = Arc::new(RecordingStore::default());
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings());

        uploader.submit(Bytes::from_static(b"one"), key("glass"));
        uploader.submit(Bytes::from_static(b"two"), key("metal"));
        drain(uploader, worker).await;

        let calls = store.calls();
        assert_eq!(calls[0], Call::Check("greenbin-images".into()));
        assert_eq!(
            calls[1],
            Call::Create(
                "greenbin-images".into(),
                BucketOptions {
                    public: true,
                    file_size_limit: 10 * 1024 * 1024,
                }
            )
        );
        assert!(matches!(
            &calls[2],
            Call::Put { content_type, upsert: true, size: 3, .. } if content_type == "image/jpeg"
        ));
        assert_eq!(store.creates(), 1);
        assert_eq!(store.puts().len(), 2);
    }

    #[tokio::test]
    async fn existing_bucket_skips_creation() {
        let store = Arc::new(RecordingStore::default());
        store.buckets.lock().unwrap().insert("greenbin-images".into());
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings());

        uploader.submit(Bytes::from_static(b"img"), key("paper"));
        drain(uploader, worker).await;

        assert_eq!(store.creates(), 0);
        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].starts_with("dock-1/paper/1-"));
    }

    #[tokio::test]
    async fn failed_creation_aborts_the_submission() {
        let store = Arc::new(RecordingStore {
            fail_create: true,
            ..Default::default()
        });
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings());

        uploader.submit(Bytes::from_static(b"img"), key("glass"));
        uploader.submit(Bytes::from_static(b"img"), key("glass"));
        drain(uploader, worker).await;

        assert_eq!(store.creates(), 2);
        assert!(store.puts().is_empty());
    }

    #[tokio::test]
    async fn failed_check_aborts_the_submission() {
        let store = Arc::new(RecordingStore {
            fail_check: true,
            ..Default::default()
        });
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings());

        uploader.submit(Bytes::from_static(b"img"), key("glass"));
        drain(uploader, worker).await;

        assert_eq!(store.creates(), 0);
        assert!(store.puts().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_does_not_stop_the_worker() {
        let store = Arc::new(RecordingStore {
            fail_put: true,
            ..Default::default()
        });
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings());

        uploader.submit(Bytes::from_static(b"a"), key("glass"));
        uploader.submit(Bytes::from_static(b"b"), key("metal"));
        drain(uploader, worker).await;

        assert_eq!(store.puts().len(), 2);
    }

    #[tokio::test]
    async fn oversized_images_are_not_sent() {
        let store = Arc::new(RecordingStore::default());
        let mut settings = settings();
        settings.bucket_size_limit = 4;
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings);

        uploader.submit(Bytes::from_static(b"too large"), key("glass"));
        drain(uploader, worker).await;

        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let store = Arc::new(RecordingStore {
            latency: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let mut settings = settings();
        settings.queue_capacity = 1;
        let (uploader, worker) = StorageUploader::spawn(store.clone(), settings);

        let started = std::time::Instant::now();
        for _ in 0..10 {
            uploader.submit(Bytes::from_static(b"img"), key("glass"));
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        drain(uploader, worker).await;
        assert!(store.puts().len() < 10);
    }

    #[test]
    fn disabled_uploader_is_a_no_op() {
        let uploader = StorageUploader::disabled();
        assert!(!uploader.is_enabled());
        uploader.submit(Bytes::from_static(b"img"), key("glass"));
    }
}
