use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::{ObjectStore, aws::AmazonS3Builder, path::Path as ObjectPath};
use tokio::{fs, io::AsyncWriteExt};

use crate::{config::AppConfig, error::FetchError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Where model weights come from when they are not on local disk.
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Mirror every object under the source's prefix into `target`.
    async fn fetch_into(&self, target: &Path) -> Result<FetchSummary, FetchError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Mirrors a key prefix of any `ObjectStore`; S3 in production.
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
    label: String,
    prefix: String,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>, prefix: &str) -> Self {
        Self {
            store,
            label: label.into(),
            prefix: ObjectPath::from(prefix).to_string(),
        }
    }

    /// S3 bucket source. Credentials, region and endpoint come from the
    /// standard `AWS_*` environment variables.
    pub fn s3(bucket: &str, prefix: &str) -> Result<Self, FetchError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(Arc::new(store), format!("s3://{bucket}"), prefix))
    }

    fn relative_path(&self, key: &str) -> Result<Option<PathBuf>, FetchError> {
        let rel = key
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(key)
            .trim_start_matches('/');
        if rel.is_empty() || rel.ends_with('/') {
            return Ok(None);
        }

        let path = PathBuf::from(rel);
        if !path.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(FetchError::InvalidKey(key.to_string()));
        }
        Ok(Some(path))
    }

    async fn download(&self, location: &ObjectPath, local: &Path) -> Result<u64, FetchError> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = local.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let mut body = self.store.get(location).await?.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        fs::rename(&partial, local).await?;
        Ok(written)
    }
}

#[async_trait]
impl ModelSource for ObjectStoreSource {
    async fn fetch_into(&self, target: &Path) -> Result<FetchSummary, FetchError> {
        fs::create_dir_all(target).await?;

        let prefix = (!self.prefix.is_empty()).then(|| ObjectPath::from(self.prefix.as_str()));
        let mut listing = self.store.list(prefix.as_ref());

        let mut summary = FetchSummary::default();
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            let Some(relative) = self.relative_path(meta.location.as_ref())? else {
                continue;
            };

            tracing::debug!(key = %meta.location, size = meta.size, "downloading");
            let local = target.join(relative);
            summary.bytes += self.download(&meta.location, &local).await?;
            summary.files += 1;
        }

        if summary.files == 0 {
            tracing::warn!(source = %self.describe(), "no objects found under prefix");
        }
        Ok(summary)
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.label, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    AlreadyPresent,
    Fetched(FetchSummary),
    /// Directory absent and nothing configured to fetch it from.
    Missing,
}

/// Fetches the model directory from the configured bucket when it is absent.
pub async fn prepare_model_dir(config: &AppConfig) -> Result<Preparation, FetchError> {
    let source = match config.s3_bucket.as_deref() {
        Some(bucket) if !config.model_path.exists() => {
            Some(ObjectStoreSource::s3(bucket, &config.s3_prefix)?)
        }
        _ => None,
    };
    prepare_with(&config.model_path, source.as_ref().map(|s| s as &dyn ModelSource)).await
}

pub async fn prepare_with(
    target: &Path,
    source: Option<&dyn ModelSource>,
) -> Result<Preparation, FetchError> {
    if target.exists() {
        return Ok(Preparation::AlreadyPresent);
    }

    let Some(source) = source else {
        tracing::warn!(
            path = %target.display(),
            "model directory does not exist and S3_BUCKET is not set"
        );
        return Ok(Preparation::Missing);
    };

    let staging = staging_path(target);
    remove_stale(&staging).await?;

    tracing::info!(from = %source.describe(), to = %target.display(), "model not found locally, downloading");
    let summary = match source.fetch_into(&staging).await {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(cleanup) = remove_stale(&staging).await {
                tracing::warn!(path = %staging.display(), error = %cleanup, "failed to clean up staging directory");
            }
            return Err(err);
        }
    };
    // `target` only appears once every object is on disk.
    fs::rename(&staging, target).await?;
    tracing::info!(
        files = summary.files,
        bytes = summary.bytes,
        path = %target.display(),
        "model downloaded"
    );
    Ok(Preparation::Fetched(summary))
}

/// Sibling directory a fetch writes into before it is renamed onto `target`.
fn staging_path(target: &Path) -> PathBuf {
    // Normalizing through components drops a trailing separator.
    let mut staging = target.components().collect::<PathBuf>().into_os_string();
    staging.push(".partial");
    PathBuf::from(staging)
}

async fn remove_stale(path: &Path) -> Result<(), FetchError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await?,
        Ok(_) => fs::remove_file(path).await?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
