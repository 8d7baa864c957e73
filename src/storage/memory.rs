use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use tokio::sync::RwLock;

use super::{duplicate_error, save_failed, StorageDriver};
use crate::remote::{NoopFetcher, RemoteFetcher};
use crate::submission::{FileSubmission, Source};
use crate::StorageError;

/// In-memory driver keyed by the relative save path.
///
/// Directories are implicit; every directory operation succeeds. Saving a
/// local upload consumes its temp file, like a move.
#[derive(Clone)]
pub struct MemoryDriver {
    root: PathBuf,
    files: Arc<RwLock<HashMap<String, Bytes>>>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("root", &self.root)
            .field("fetcher", &"<dyn RemoteFetcher>")
            .finish_non_exhaustive()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Creates an empty in-memory driver without remote access.
    pub fn new() -> Self {
        Self::with_fetcher("memory://", Arc::new(NoopFetcher))
    }

    /// Creates an empty in-memory driver using `fetcher` for `put`.
    pub fn with_fetcher(root: impl Into<PathBuf>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            root: root.into(),
            files: Arc::default(),
            fetcher,
        }
    }

    /// Returns stored bytes for a relative path such as `2024-01-01/abc.png`.
    pub async fn get(&self, path: &str) -> Option<Bytes> {
        self.files.read().await.get(path).cloned()
    }

    /// Returns the stored relative paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns the current number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    /// Returns `true` when no files are currently stored.
    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    async fn insert(
        &self,
        file: &FileSubmission,
        body: Bytes,
        replace: bool,
    ) -> Result<(), StorageError> {
        let key = file.relative_path();
        let mut files = self.files.write().await;
        if !replace && files.contains_key(&key) {
            return Err(duplicate_error(file));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            path = key.as_str(),
            size = body.len(),
            "memory driver: stored file"
        );
        files.insert(key, body);
        Ok(())
    }

    async fn refuse_duplicate(
        &self,
        file: &FileSubmission,
        replace: bool,
    ) -> Result<(), StorageError> {
        if !replace && self.files.read().await.contains_key(&file.relative_path()) {
            return Err(duplicate_error(file));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageDriver for MemoryDriver {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn check_root_path(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn check_save_path(&self, _save_path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(&self, file: &FileSubmission, replace: bool) -> Result<(), StorageError> {
        let Source::Local(tmp_name) = &file.source else {
            return Err(save_failed());
        };
        self.refuse_duplicate(file, replace).await?;

        let body = tokio::fs::read(tmp_name).await.map_err(|_| save_failed())?;
        self.insert(file, Bytes::from(body), replace).await?;
        let _ = tokio::fs::remove_file(tmp_name).await;
        Ok(())
    }

    async fn put(
        &self,
        file: &FileSubmission,
        body: Option<Bytes>,
        replace: bool,
    ) -> Result<(), StorageError> {
        let Source::Remote(url) = &file.source else {
            return Err(save_failed());
        };
        self.refuse_duplicate(file, replace).await?;

        let body = match body {
            Some(body) => body,
            None => self.fetcher.fetch(url).await.map_err(|_| save_failed())?,
        };
        self.insert(file, body, replace).await
    }
}
