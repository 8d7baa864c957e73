//! Storage driver abstraction and built-in drivers.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::DriverKind;
use crate::remote::RemoteFetcher;
use crate::submission::FileSubmission;
use crate::StorageError;

/// Local filesystem driver.
pub mod local;
/// In-memory driver.
pub mod memory;
pub use local::LocalDriver;
pub use memory::MemoryDriver;

/// Async trait abstraction for physical persistence of validated files.
///
/// Paths passed in are relative to the driver root and use `/` separators.
/// Every failure carries the driver's error message.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Root every relative path is resolved against.
    fn root(&self) -> &Path;

    /// Verifies the root exists and is writable.
    async fn check_root_path(&self) -> Result<(), StorageError>;

    /// Creates `save_path` under the root if needed and verifies it is writable.
    async fn check_save_path(&self, save_path: &str) -> Result<(), StorageError>;

    /// Creates `path` under the root, recursively. Existing directories succeed.
    async fn mkdir(&self, path: &str) -> Result<(), StorageError>;

    /// Moves a local temp file to `save_path + save_name`.
    async fn save(&self, file: &FileSubmission, replace: bool) -> Result<(), StorageError>;

    /// Stores a remote resource at `save_path + save_name`.
    ///
    /// `body` is the content already downloaded for the submission. The
    /// driver fetches the resource itself only when it is `None`.
    async fn put(
        &self,
        file: &FileSubmission,
        body: Option<Bytes>,
        replace: bool,
    ) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl StorageDriver for Box<dyn StorageDriver> {
    fn root(&self) -> &Path {
        (**self).root()
    }

    async fn check_root_path(&self) -> Result<(), StorageError> {
        (**self).check_root_path().await
    }

    async fn check_save_path(&self, save_path: &str) -> Result<(), StorageError> {
        (**self).check_save_path(save_path).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        (**self).mkdir(path).await
    }

    async fn save(&self, file: &FileSubmission, replace: bool) -> Result<(), StorageError> {
        (**self).save(file, replace).await
    }

    async fn put(
        &self,
        file: &FileSubmission,
        body: Option<Bytes>,
        replace: bool,
    ) -> Result<(), StorageError> {
        (**self).put(file, body, replace).await
    }
}

impl std::fmt::Debug for dyn StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDriver")
            .field("root", &self.root())
            .finish_non_exhaustive()
    }
}

impl DriverKind {
    /// Instantiates the driver this kind names.
    pub fn build(
        self,
        root: impl Into<std::path::PathBuf>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Box<dyn StorageDriver> {
        match self {
            Self::Local => Box::new(LocalDriver::new(root, fetcher)),
            Self::Memory => Box::new(MemoryDriver::with_fetcher(root, fetcher)),
        }
    }
}

pub(crate) fn duplicate_error(file: &FileSubmission) -> StorageError {
    StorageError::new(format!("存在同名文件{}", file.save_name))
}

pub(crate) fn save_failed() -> StorageError {
    StorageError::new("文件上传保存错误！")
}
