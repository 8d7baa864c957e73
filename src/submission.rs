//! Submission input shapes, the per-file working record and result records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Rejection;
use crate::hash::FileDigests;
use crate::naming::file_extension;

/// Upload error code reported by the host for one file.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadErrorCode {
    /// No error (code 0).
    #[default]
    Ok,
    /// Exceeds the server-wide maximum upload size (code 1).
    IniSize,
    /// Exceeds the form-declared maximum size (code 2).
    FormSize,
    /// Only part of the file arrived (code 3).
    Partial,
    /// No file was sent (code 4).
    NoFile,
    /// The temp directory is missing (code 6).
    NoTmpDir,
    /// The temp file could not be written (code 7).
    CantWrite,
    /// The remote resource could not be probed (code 8, `put` only).
    InvalidResource,
    /// Any other code.
    Unknown(i64),
}

impl UploadErrorCode {
    /// Maps a raw numeric code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::IniSize,
            2 => Self::FormSize,
            3 => Self::Partial,
            4 => Self::NoFile,
            6 => Self::NoTmpDir,
            7 => Self::CantWrite,
            8 => Self::InvalidResource,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw numeric code.
    pub fn code(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::IniSize => 1,
            Self::FormSize => 2,
            Self::Partial => 3,
            Self::NoFile => 4,
            Self::NoTmpDir => 6,
            Self::CantWrite => 7,
            Self::InvalidResource => 8,
            Self::Unknown(other) => other,
        }
    }

    /// Returns `true` for code 0.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Human-readable message for the code.
    pub fn message(self) -> &'static str {
        match self {
            Self::IniSize => "上传的文件超过了 php.ini 中 upload_max_filesize 选项限制的值！",
            Self::FormSize => "上传文件的大小超过了 HTML 表单中 MAX_FILE_SIZE 选项指定的值！",
            Self::Partial => "文件只有部分被上传！",
            Self::NoFile => "没有文件被上传！",
            Self::NoTmpDir => "找不到临时文件夹！",
            Self::CantWrite => "文件写入失败！",
            Self::InvalidResource => "无效资源文件",
            Self::Ok | Self::Unknown(_) => "未知上传错误！",
        }
    }
}

impl From<i64> for UploadErrorCode {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

/// One file as handed over by the host's multipart parser.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawUpload {
    /// Original client-side file name.
    pub name: String,
    /// Temporary location the host wrote the body to.
    pub tmp_name: PathBuf,
    /// Declared size in bytes.
    pub size: u64,
    /// Declared MIME type.
    pub content_type: String,
    /// Host upload error code.
    pub error: UploadErrorCode,
}

impl RawUpload {
    /// Creates a successful upload record.
    pub fn new(
        name: impl Into<String>,
        tmp_name: impl Into<PathBuf>,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tmp_name: tmp_name.into(),
            size,
            content_type: content_type.into(),
            error: UploadErrorCode::Ok,
        }
    }

    /// Sets the host error code.
    pub fn with_error(mut self, error: impl Into<UploadErrorCode>) -> Self {
        self.error = error.into();
        self
    }
}

/// Several files under one field, as parallel attribute arrays.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawUploadArrays {
    /// File names; their count is the number of files.
    pub names: Vec<String>,
    /// Temp paths.
    pub tmp_names: Vec<PathBuf>,
    /// Declared sizes.
    pub sizes: Vec<u64>,
    /// Declared MIME types.
    pub types: Vec<String>,
    /// Host error codes.
    pub errors: Vec<UploadErrorCode>,
}

impl RawUploadArrays {
    /// Splits the arrays into individual records.
    ///
    /// The name array drives the count; missing entries in the other arrays
    /// fall back to their defaults.
    pub fn into_uploads(self) -> Vec<RawUpload> {
        let Self {
            names,
            tmp_names,
            sizes,
            types,
            errors,
        } = self;

        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| RawUpload {
                name,
                tmp_name: tmp_names.get(index).cloned().unwrap_or_default(),
                size: sizes.get(index).copied().unwrap_or_default(),
                content_type: types.get(index).cloned().unwrap_or_default(),
                error: errors.get(index).copied().unwrap_or_default(),
            })
            .collect()
    }
}

impl FromIterator<RawUpload> for RawUploadArrays {
    fn from_iter<I: IntoIterator<Item = RawUpload>>(iter: I) -> Self {
        let mut arrays = Self::default();
        for upload in iter {
            arrays.names.push(upload.name);
            arrays.tmp_names.push(upload.tmp_name);
            arrays.sizes.push(upload.size);
            arrays.types.push(upload.content_type);
            arrays.errors.push(upload.error);
        }
        arrays
    }
}

/// Value attached to one form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadField {
    /// A single file.
    Single(RawUpload),
    /// Several files as parallel arrays.
    Multiple(RawUploadArrays),
}

/// Ordered upload input keyed by form field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadFiles {
    fields: Vec<(String, UploadField)>,
}

impl UploadFiles {
    /// Creates an empty input set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-file field.
    pub fn single(mut self, key: impl Into<String>, upload: RawUpload) -> Self {
        self.fields.push((key.into(), UploadField::Single(upload)));
        self
    }

    /// Adds a multi-file field in parallel-array form.
    pub fn multiple(mut self, key: impl Into<String>, arrays: RawUploadArrays) -> Self {
        self.fields.push((key.into(), UploadField::Multiple(arrays)));
        self
    }

    /// Adds an arbitrary field.
    pub fn push(&mut self, key: impl Into<String>, field: UploadField) {
        self.fields.push((key.into(), field));
    }

    /// Returns `true` when no field was added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flattens every field into individual submissions, in input order.
    ///
    /// Single fields keep their field key; entries of a multi-file field are
    /// keyed `{field}.{index}` and record the field name as their `key`.
    pub fn normalize(self) -> Vec<FileSubmission> {
        let mut submissions = Vec::new();
        for (field, value) in self.fields {
            match value {
                UploadField::Single(upload) => {
                    submissions.push(FileSubmission::from_upload(field.clone(), field, upload));
                }
                UploadField::Multiple(arrays) => {
                    for (index, upload) in arrays.into_uploads().into_iter().enumerate() {
                        submissions.push(FileSubmission::from_upload(
                            format!("{field}.{index}"),
                            field.clone(),
                            upload,
                        ));
                    }
                }
            }
        }
        submissions
    }
}

impl<K: Into<String>> FromIterator<(K, RawUpload)> for UploadFiles {
    fn from_iter<I: IntoIterator<Item = (K, RawUpload)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |files, (key, upload)| files.single(key, upload))
    }
}

/// Where a submission's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Temp file written by the host.
    Local(PathBuf),
    /// Remote resource fetched on demand.
    Remote(String),
}

/// Working record for one file moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSubmission {
    /// Key the result is recorded under.
    pub result_key: String,
    /// Form field (or list index) the file came from.
    pub key: String,
    /// Original file name.
    pub name: String,
    /// MIME type, declared or sniffed.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Extension of `name`, as submitted.
    pub ext: String,
    /// Content source.
    pub source: Source,
    /// Host upload error code.
    pub error: UploadErrorCode,
    /// Content digests, when hashing ran.
    pub digests: Option<FileDigests>,
    /// Resolved save name, including extension.
    pub save_name: String,
    /// Resolved save path relative to the root, `/`-terminated or empty.
    pub save_path: String,
}

impl FileSubmission {
    pub(crate) fn from_upload(result_key: String, key: String, upload: RawUpload) -> Self {
        let ext = file_extension(&upload.name).to_owned();
        Self {
            result_key,
            key,
            name: upload.name,
            content_type: upload.content_type,
            size: upload.size,
            ext,
            source: Source::Local(upload.tmp_name),
            error: upload.error,
            digests: None,
            save_name: String::new(),
            save_path: String::new(),
        }
    }

    /// Path of the saved file relative to the driver root.
    pub fn relative_path(&self) -> String {
        format!("{}{}", self.save_path, self.save_name)
    }
}

/// Stored file metadata returned to the caller.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Original file name.
    pub name: String,
    /// MIME type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Original extension.
    pub ext: String,
    /// Name the file was saved under.
    #[cfg_attr(feature = "serde", serde(rename = "savename"))]
    pub save_name: String,
    /// Directory relative to the root, `/`-terminated or empty.
    #[cfg_attr(feature = "serde", serde(rename = "savepath"))]
    pub save_path: String,
    /// MD5 of the content, when hashing ran.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub md5: Option<String>,
    /// SHA-1 of the content, when hashing ran.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub sha1: Option<String>,
    /// Form field (or list index) the file came from.
    pub key: String,
}

impl From<FileSubmission> for SavedFile {
    fn from(file: FileSubmission) -> Self {
        let (md5, sha1) = match file.digests {
            Some(digests) => (Some(digests.md5), Some(digests.sha1)),
            None => (None, None),
        };
        Self {
            name: file.name,
            content_type: file.content_type,
            size: file.size,
            ext: file.ext,
            save_name: file.save_name,
            save_path: file.save_path,
            md5,
            sha1,
            key: file.key,
        }
    }
}

/// Record returned by an existence-check hook for content already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingFile {
    /// Location of the stored copy; it must exist for the short-circuit.
    pub path: PathBuf,
    /// Metadata recorded in the result in place of a fresh save.
    pub file: SavedFile,
}

/// Outcome of an `upload` or `put` call that saved at least one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadResult {
    /// Saved files by submission key.
    pub files: BTreeMap<String, SavedFile>,
    /// Submissions dropped along the way, in input order.
    pub rejected: Vec<Rejection>,
}

impl UploadResult {
    /// Returns the saved file recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&SavedFile> {
        self.files.get(key)
    }

    /// Returns `true` when a file was recorded under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }

    /// Number of saved files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` when nothing was saved.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates saved files in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SavedFile)> {
        self.files.iter()
    }
}

/// Remote resources for [`Uploader::put`](crate::Uploader::put).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PutTargets(pub Vec<String>);

impl PutTargets {
    /// Returns `true` when no URL was given.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|url| url.trim().is_empty())
    }
}

impl From<&str> for PutTargets {
    fn from(url: &str) -> Self {
        Self(vec![url.to_owned()])
    }
}

impl From<String> for PutTargets {
    fn from(url: String) -> Self {
        Self(vec![url])
    }
}

impl<S: Into<String>> From<Vec<S>> for PutTargets {
    fn from(urls: Vec<S>) -> Self {
        Self(urls.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String> + Clone> From<&[S]> for PutTargets {
    fn from(urls: &[S]) -> Self {
        Self(urls.iter().cloned().map(Into::into).collect())
    }
}
