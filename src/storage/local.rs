use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{duplicate_error, save_failed, StorageDriver};
use crate::remote::RemoteFetcher;
use crate::submission::{FileSubmission, Source};
use crate::StorageError;

/// Filesystem driver writing files under a configured root path.
#[derive(Clone)]
pub struct LocalDriver {
    root: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl fmt::Debug for LocalDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDriver")
            .field("root", &self.root)
            .field("fetcher", &"<dyn RemoteFetcher>")
            .finish()
    }
}

impl LocalDriver {
    /// Creates a driver rooted at `root`, fetching remote resources with `fetcher`.
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    fn destination(&self, file: &FileSubmission) -> PathBuf {
        self.root.join(file.relative_path())
    }

    async fn refuse_duplicate(
        &self,
        file: &FileSubmission,
        destination: &Path,
        replace: bool,
    ) -> Result<(), StorageError> {
        if !replace && is_file(destination).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                path = %destination.display(),
                "local driver: destination exists and replace is off"
            );
            return Err(duplicate_error(file));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageDriver for LocalDriver {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn check_root_path(&self) -> Result<(), StorageError> {
        if !is_writable_dir(&self.root).await {
            return Err(StorageError::new(format!(
                "上传根目录不存在！请尝试手动创建:{}",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn check_save_path(&self, save_path: &str) -> Result<(), StorageError> {
        self.mkdir(save_path).await?;

        if !is_writable_dir(&self.root.join(save_path)).await {
            return Err(StorageError::new(format!("上传目录 {save_path} 不可写！")));
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let dir = self.root.join(path);
        if is_dir(&dir).await {
            return Ok(());
        }

        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o777);

        builder.create(&dir).await.map_err(|_err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %dir.display(), error = %_err, "local driver: mkdir failed");
            StorageError::new(format!("目录 {path} 创建失败！"))
        })
    }

    async fn save(&self, file: &FileSubmission, replace: bool) -> Result<(), StorageError> {
        let Source::Local(tmp_name) = &file.source else {
            return Err(save_failed());
        };
        let destination = self.destination(file);
        self.refuse_duplicate(file, &destination, replace).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            from = %tmp_name.display(),
            to = %destination.display(),
            "local driver: moving upload into place"
        );

        if tokio::fs::rename(tmp_name, &destination).await.is_ok() {
            return Ok(());
        }

        // rename cannot cross filesystems; fall back to copy + unlink
        if let Err(_err) = tokio::fs::copy(tmp_name, &destination).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "local driver: copy fallback failed");
            return Err(save_failed());
        }
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
        let destination = self.destination(file);
        self.refuse_duplicate(file, &destination, replace).await?;

        let body = match body {
            Some(body) => body,
            None => self.fetcher.fetch(url).await.map_err(|_err| {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = url.as_str(), error = %_err, "local driver: fetch failed");
                save_failed()
            })?,
        };

        let partial = with_partial_suffix(&destination);
        let written = async {
            let mut out = tokio::fs::File::create(&partial).await?;
            out.write_all(&body).await?;
            out.flush().await?;
            drop(out);
            tokio::fs::rename(&partial, &destination).await
        }
        .await;

        if let Err(_err) = written {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                path = %destination.display(),
                error = %_err,
                "local driver: writing fetched resource failed"
            );
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(save_failed());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            url = url.as_str(),
            size = body.len(),
            path = %destination.display(),
            "local driver: stored remote resource"
        );
        Ok(())
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Writability is tested by creating and removing a marker file.
async fn is_writable_dir(path: &Path) -> bool {
    if !is_dir(path).await {
        return false;
    }

    let marker = path.join(format!(".write-check-{}", Uuid::new_v4().simple()));
    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .await;
    match created {
        Ok(handle) => {
            drop(handle);
            let _ = tokio::fs::remove_file(&marker).await;
            true
        }
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                path = %path.display(),
                error = %_err,
                "local driver: directory is not writable"
            );
            false
        }
    }
}

fn with_partial_suffix(path: &Path) -> PathBuf {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("file");
    path.with_file_name(format!(".{name}.{suffix}.part"))
}
