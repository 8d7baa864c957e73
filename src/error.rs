use thiserror::Error;

use crate::submission::UploadErrorCode;

/// Configuration-time validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The storage root path was empty.
    #[error("upload root path cannot be empty")]
    EmptyRootPath,
    /// The save path must stay relative to the root path.
    #[error("save path `{path}` must be relative and cannot contain `..`")]
    InvalidSavePath {
        /// Offending save path.
        path: String,
    },
    /// A date naming rule carries a malformed format string.
    #[error("invalid date format `{format}` in naming rule")]
    InvalidDateFormat {
        /// Offending strftime format.
        format: String,
    },
    /// A literal naming rule was empty.
    #[error("literal naming rule cannot be empty")]
    EmptyLiteralRule,
    /// A content-hash naming rule was configured while hashing is disabled.
    #[error("naming rule `{rule}` needs content hashing, but `hash` is disabled")]
    ContentRuleWithoutHash {
        /// Name of the rule requiring digests.
        rule: &'static str,
    },
    /// A configured extension is malformed.
    #[error("invalid file extension `{ext}`")]
    InvalidExtension {
        /// Offending extension.
        ext: String,
    },
    /// A driver name did not match any known driver.
    #[error("unknown upload driver `{name}`")]
    UnknownDriver {
        /// Driver name as provided.
        name: String,
    },
    /// The default remote fetcher could not be built.
    #[error("remote fetcher unavailable: {reason}")]
    FetcherUnavailable {
        /// Transport construction failure.
        reason: String,
    },
}

/// Storage driver failures.
///
/// The message is the driver's last error, reported verbatim by
/// [`Uploader::last_error`](crate::Uploader::last_error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Generic storage failure with message context.
    #[error("{message}")]
    Message {
        /// Storage failure message.
        message: String,
    },
}

impl StorageError {
    /// Creates a storage error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        match self {
            Self::Message { message } => message,
        }
    }
}

/// Reason a single submission was dropped from the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FileError {
    /// The host reported a non-zero upload error code.
    #[error("{}", .0.message())]
    Transfer(UploadErrorCode),
    /// The submission carried no file name.
    #[error("未知上传错误！")]
    MissingName,
    /// The temp file is not a genuine upload artifact.
    #[error("非法上传文件！")]
    NotUploaded,
    /// The file exceeds `max_size`.
    #[error("上传文件大小不符！")]
    SizeNotAllowed {
        /// Declared file size.
        size: u64,
        /// Configured limit.
        max_size: u64,
    },
    /// The MIME type is not in the allow-list.
    #[error("上传文件MIME类型不允许！")]
    MimeNotAllowed {
        /// MIME type that was rejected.
        mime: String,
    },
    /// The extension is not in the allow-list.
    #[error("上传文件后缀不允许")]
    ExtensionNotAllowed {
        /// Extension that was rejected.
        ext: String,
    },
    /// File content could not be read for hashing or probing.
    #[error("文件读取失败：{reason}")]
    Unreadable {
        /// Underlying I/O or transport failure.
        reason: String,
    },
    /// A naming rule produced no usable name.
    #[error("文件命名规则错误！")]
    InvalidName,
    /// Image extension whose content failed the integrity probe.
    #[error("非法图像文件！")]
    InvalidImage,
    /// The storage driver refused or failed the operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One dropped submission and the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Submission key the file was normalized under.
    pub key: String,
    /// Reason for the rejection.
    pub error: FileError,
}

/// Call-level failure of [`Uploader::upload`](crate::Uploader::upload) or
/// [`Uploader::put`](crate::Uploader::put).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// The input contained no submissions.
    #[error("没有上传的文件！")]
    NoFiles,
    /// The root path is missing or not writable.
    #[error("{0}")]
    RootPath(StorageError),
    /// The save path could not be created or is not writable.
    #[error("{0}")]
    SavePath(StorageError),
    /// Every submission was rejected; the message is the last rejection.
    #[error("{}", last_message(.rejected))]
    NothingSaved {
        /// All rejections, in input order.
        rejected: Vec<Rejection>,
    },
}

fn last_message(rejected: &[Rejection]) -> String {
    rejected
        .last()
        .map(|rejection| rejection.error.to_string())
        .unwrap_or_default()
}
