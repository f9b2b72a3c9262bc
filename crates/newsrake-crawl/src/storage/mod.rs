//! Checkpoint destinations
//!
//! The pipeline only sees the [`Storage`] trait: logical `/`-separated paths
//! mapped to bytes. [`Destination::parse`] picks the backend from the
//! configured destination string.

use crate::error::StorageError;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod config;

pub use config::StorageConfig;

/// Logical path to bytes
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write (or overwrite) one object
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Names of the objects directly under `path`; empty when it does not exist
    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

/// Join logical path segments with a single `/`
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

/// Where checkpoints go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl Destination {
    /// `s3://bucket/prefix` selects S3, anything else is a local directory
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(StorageError::InvalidDestination(value.to_string()));
        }

        if let Some(rest) = value.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(StorageError::InvalidDestination(value.to_string()));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            });
        }

        Ok(Self::Local(PathBuf::from(value)))
    }

    /// Build the backend for this destination
    pub async fn open(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
        match self {
            Self::Local(root) => Ok(Arc::new(LocalStorage::new(root.clone()))),
            Self::S3 { bucket, prefix } => Ok(Arc::new(S3Storage::new(
                config,
                bucket.clone(),
                prefix.clone(),
            )?)),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(root) => write!(f, "{}", root.display()),
            Self::S3 { bucket, prefix } if prefix.is_empty() => write!(f, "s3://{}", bucket),
            Self::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
        }
    }
}

/// Directory tree on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Rename so a crash never leaves a half-written checkpoint visible
        let mut staging = target.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!(path = %target.display(), "Wrote object");
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.resolve(path);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".partial") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }
}

/// S3-compatible object store
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn new(
        config: &StorageConfig,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) else {
            return Err(StorageError::Config(
                "S3 destination requires S3_ACCESS_KEY and S3_SECRET_KEY".to_string(),
            ));
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, "newsrake-storage");

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let bucket = bucket.into();
        info!(bucket = %bucket, "Storage client initialized");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            prefix: prefix.into(),
        })
    }

    fn key(&self, path: &str) -> String {
        join_path(&self.prefix, path)
    }
}

#[async_trait]
impl Storage for S3Storage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let key = self.key(path);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::backend(format!("put s3://{}/{}: {}", self.bucket, key, e)))?;

        debug!(key = %key, "Uploaded object");
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", self.key(path).trim_end_matches('/'));
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    StorageError::backend(format!("list s3://{}/{}: {}", self.bucket, prefix, e))
                })?;

            names.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::backend(format!(
                "head s3://{}/{}: {}",
                self.bucket, key, e
            ))),
        }
    }
}
