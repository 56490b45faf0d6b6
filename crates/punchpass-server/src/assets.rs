//! Asset storage ("store by key") for rendered images.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Asset storage is not configured")]
    NotConfigured,

    #[error("Invalid asset key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores bytes under a key and returns a public URL for them.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, AssetError>;
}

/// Store used when no asset location is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAssetStore;

#[async_trait]
impl AssetStore for NoAssetStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, AssetError> {
        Err(AssetError::NotConfigured)
    }
}

/// Writes assets under a directory that some other server exposes at
/// `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Keys are relative slash paths of plain segments.
fn check_key(key: &str) -> Result<(), AssetError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(AssetError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, AssetError> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(key, content_type, size = bytes.len(), "Stored asset");
        Ok(format!("{}/{key}", self.public_base_url))
    }
}
