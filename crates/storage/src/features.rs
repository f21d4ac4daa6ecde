//! Features store for converted data objects (local, in-memory or S3).
//!
//! The external features API reads what is written here; the pipeline only
//! writes canonical GeoJSON objects under their content-addressed keys.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};

/// Connection settings for an S3 compatible bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    #[serde(default = "default_region")]
    pub region: String,
    /// Allow HTTP (for local MinIO)
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Which backend holds the features.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum FeatureStoreConfig {
    Local { root: PathBuf },
    Memory,
    S3(S3Config),
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("./data/features"),
        }
    }
}

/// Write side of the features store.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// `object_store` backed features store.
pub struct ObjectFeatureStore {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectFeatureStore {
    pub fn from_config(config: &FeatureStoreConfig) -> StorageResult<Self> {
        match config {
            FeatureStoreConfig::Local { root } => Self::local(root.clone()),
            FeatureStoreConfig::Memory => Ok(Self::in_memory()),
            FeatureStoreConfig::S3(s3) => Self::s3(s3),
        }
    }

    /// Store objects under a local directory, creating it if needed.
    pub fn local(root: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;
        Ok(Self {
            store: Arc::new(store),
            label: root.display().to_string(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            label: "memory".to_string(),
        }
    }

    pub fn s3(config: &S3Config) -> StorageResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region)
            .with_allow_http(config.allow_http)
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            label: format!("s3://{}", config.bucket),
        })
    }

    /// Keys below a prefix.
    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let mut keys = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream.try_next().await? {
            keys.push(meta.location.to_string());
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl FeatureStore for ObjectFeatureStore {
    #[instrument(skip(self, data), fields(store = %self.label, key = %key))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        debug!(size = data.len(), "Writing data object");
        self.store.put(&Path::from(key), data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        match self.store.get(&Path::from(key)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.store.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
