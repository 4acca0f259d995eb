use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use axum::body::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::{Settings, StorageBackend};

/// A validated image file taken from an upload request.
#[derive(Debug, Clone)]
pub(crate) struct ImageUpload {
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredImage {
    pub(crate) path: String,
    pub(crate) size: u64,
    pub(crate) sha256: String,
}

#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object storage request failed: {0}")]
    Remote(String),
}

#[async_trait]
pub(crate) trait ImageStorage: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Writes the upload under a fresh random name and returns its storage path.
    async fn store(&self, upload: &ImageUpload) -> Result<StoredImage, StorageError>;

    async fn health(&self) -> Result<(), StorageError>;
}

pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn ImageStorage>> {
    let storage: Arc<dyn ImageStorage> = match settings.storage().backend {
        StorageBackend::Local => Arc::new(
            LocalDiskStorage::new(&settings.storage().root, &settings.storage().directory).await?,
        ),
        StorageBackend::S3 => Arc::new(S3ImageStorage::from_settings(settings).await),
    };
    Ok(storage)
}

/// Builds `<directory>/<uuid>.<ext>`, keeping the client's extension.
pub(crate) fn object_key(directory: &str, filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    let name = Uuid::new_v4().simple();
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        format!("{name}.{extension}")
    } else {
        format!("{directory}/{name}.{extension}")
    }
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Files on the local "public" disk, addressed by paths relative to `root`.
#[derive(Debug, Clone)]
pub(crate) struct LocalDiskStorage {
    root: PathBuf,
    directory: String,
}

impl LocalDiskStorage {
    pub(crate) async fn new(root: &str, directory: &str) -> Result<Self, StorageError> {
        let root = PathBuf::from(root);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io { path: root.display().to_string(), source })?;
        Ok(Self { root, directory: directory.to_string() })
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ImageStorage for LocalDiskStorage {
    fn backend(&self) -> &'static str {
        StorageBackend::Local.as_str()
    }

    async fn store(&self, upload: &ImageUpload) -> Result<StoredImage, StorageError> {
        let key = object_key(&self.directory, &upload.filename);
        let full_path = self.resolve(&key);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io { path: key.clone(), source })?;
        }
        tokio::fs::write(&full_path, &upload.bytes)
            .await
            .map_err(|source| StorageError::Io { path: key.clone(), source })?;

        tracing::debug!(path = %key, bytes = upload.bytes.len(), "Stored image on local disk");

        Ok(StoredImage {
            sha256: checksum(&upload.bytes),
            size: upload.bytes.len() as u64,
            path: key,
        })
    }

    async fn health(&self) -> Result<(), StorageError> {
        let metadata = tokio::fs::metadata(&self.root).await.map_err(|source| {
            StorageError::Io { path: self.root.display().to_string(), source }
        })?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Remote(format!("{} is not a directory", self.root.display())))
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct S3ImageStorage {
    client: Client,
    bucket: String,
    directory: String,
}

impl S3ImageStorage {
    pub(crate) async fn from_settings(settings: &Settings) -> Self {
        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "exam-intake-static",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds);
        if !settings.s3().endpoint.is_empty() {
            loader = loader.endpoint_url(settings.s3().endpoint.clone());
        }
        let config = loader.load().await;

        Self {
            client: Client::new(&config),
            bucket: settings.s3().bucket.clone(),
            directory: settings.storage().directory.clone(),
        }
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    fn backend(&self) -> &'static str {
        StorageBackend::S3.as_str()
    }

    async fn store(&self, upload: &ImageUpload) -> Result<StoredImage, StorageError> {
        let key = object_key(&self.directory, &upload.filename);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&upload.content_type)
            .body(ByteStream::from(upload.bytes.to_vec()))
            .send()
            .await
            .map_err(|err| StorageError::Remote(err.to_string()))?;

        tracing::debug!(bucket = %self.bucket, key = %key, "Stored image in object storage");

        Ok(StoredImage {
            sha256: checksum(&upload.bytes),
            size: upload.bytes.len() as u64,
            path: key,
        })
    }

    async fn health(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| StorageError::Remote(err.to_string()))?;
        Ok(())
    }
}
