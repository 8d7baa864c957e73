#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core crate surface for `stowage`: validated file uploads and remote
//! resource ingestion over pluggable storage drivers.

/// Fluent builder API.
pub mod builder;
/// Upload pipeline configuration.
pub mod config;
/// Error types exposed by this crate.
pub mod error;
pub mod hash;
/// Size, MIME and extension limits.
pub mod limits;
pub mod naming;
pub mod probe;
pub mod remote;
pub mod storage;
pub mod submission;
pub mod uploader;

pub use builder::UploaderBuilder;
pub use config::{DriverConfig, DriverKind, UploadConfig};
pub use error::{ConfigError, FileError, Rejection, StorageError, UploadError};
pub use hash::FileDigests;
pub use limits::Limits;
pub use naming::{NamingContext, NamingRule};
pub use probe::{ImageInfo, ImageKind};
#[cfg(feature = "http")]
pub use remote::HttpFetcher;
pub use remote::{NoopFetcher, RemoteFetcher, RemoteInfo};
pub use storage::{LocalDriver, MemoryDriver, StorageDriver};
pub use submission::{
    ExistingFile, FileSubmission, PutTargets, RawUpload, RawUploadArrays, SavedFile, Source,
    UploadErrorCode, UploadField, UploadFiles, UploadResult,
};
pub use uploader::{put_file_name, Uploader};
