//! The validate-then-save pipeline driving a [`StorageDriver`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::builder::UploaderBuilder;
use crate::config::{is_relative_subpath, normalize_save_path, validate_extension, UploadConfig};
use crate::error::{ConfigError, FileError, Rejection, UploadError};
use crate::hash::{digest_bytes, digest_file, md5_hex, FileDigests};
use crate::limits::Limits;
use crate::naming::{sanitize_filename, NamingContext};
use crate::probe::{is_image_extension, probe_bytes, probe_file, ImageInfo};
use crate::remote::RemoteFetcher;
use crate::storage::StorageDriver;
use crate::submission::{
    ExistingFile, FileSubmission, PutTargets, RawUpload, SavedFile, Source, UploadErrorCode,
    UploadFiles, UploadResult,
};

/// Existence check run after hashing; returning a record whose path exists
/// skips the physical save.
pub type ExistingFileHook = dyn Fn(&FileSubmission) -> Option<ExistingFile> + Send + Sync;

/// Fire-and-forget cleanup for records whose stored copy has vanished.
pub type TrashHook = dyn Fn(&ExistingFile) + Send + Sync;

const SNIFF_LEN: usize = 8 * 1024;

/// Upload orchestrator: validates submissions, names them and hands them to
/// the storage driver.
///
/// Files are processed strictly one after another; a failing file is dropped
/// and the batch continues. The message of the most recent failure is kept in
/// [`Uploader::last_error`].
pub struct Uploader<D = Box<dyn StorageDriver>> {
    config: UploadConfig,
    driver: D,
    fetcher: Arc<dyn RemoteFetcher>,
    existing: Option<Arc<ExistingFileHook>>,
    trash: Option<Arc<TrashHook>>,
    force_put_ext: Option<String>,
    last_error: String,
}

impl<D: fmt::Debug> fmt::Debug for Uploader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .field("driver", &self.driver)
            .field("existing", &self.existing.as_ref().map(|_| "<fn>"))
            .field("trash", &self.trash.as_ref().map(|_| "<fn>"))
            .field("force_put_ext", &self.force_put_ext)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Creates an uploader with the driver named by `config.driver`.
    pub fn new(config: UploadConfig) -> Result<Self, ConfigError> {
        UploaderBuilder::new().with_config(config).build()
    }

    /// Creates a fluent builder with default configuration.
    pub fn builder() -> UploaderBuilder {
        UploaderBuilder::new()
    }
}

impl<D> Uploader<D>
where
    D: StorageDriver,
{
    /// Creates an uploader over an explicit driver.
    pub fn with_driver(driver: D, config: UploadConfig) -> Result<Self, ConfigError> {
        UploaderBuilder::new().with_config(config).build_with_driver(driver)
    }

    pub(crate) fn from_parts(
        mut config: UploadConfig,
        driver: D,
        fetcher: Arc<dyn RemoteFetcher>,
        existing: Option<Arc<ExistingFileHook>>,
        trash: Option<Arc<TrashHook>>,
        force_put_ext: Option<String>,
    ) -> Result<Self, ConfigError> {
        config.normalize();
        config.validate()?;
        let force_put_ext = force_put_ext.map(|ext| clean_extension(&ext)).transpose()?;

        Ok(Self {
            config,
            driver,
            fetcher,
            existing,
            trash,
            force_put_ext,
            last_error: String::new(),
        })
    }

    /// Returns an immutable reference to the active configuration.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Returns an immutable reference to the storage driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Message of the most recent failure, empty if nothing failed yet.
    ///
    /// Each failing step overwrites it, so after a batch only the last
    /// rejection's message remains here.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Changes the directory files are saved under, relative to the root.
    pub fn set_save_path(&mut self, save_path: impl Into<String>) -> Result<(), ConfigError> {
        let save_path = normalize_save_path(&save_path.into());
        if !is_relative_subpath(&save_path) {
            return Err(ConfigError::InvalidSavePath { path: save_path });
        }
        self.config.save_path = save_path;
        Ok(())
    }

    /// Sets whether existing destination files are overwritten.
    pub fn set_replace(&mut self, replace: bool) {
        self.config.replace = replace;
    }

    /// Enables or disables content hashing.
    pub fn set_hash(&mut self, hash: bool) -> Result<(), ConfigError> {
        let mut candidate = self.config.clone();
        candidate.hash = hash;
        candidate.validate()?;
        self.config.hash = hash;
        Ok(())
    }

    /// Replaces the size, MIME and extension limits.
    pub fn set_limits(&mut self, mut limits: Limits) {
        limits.normalize();
        self.config.limits = limits;
    }

    /// Forces every `put` target to be named `md5(url).ext`.
    pub fn set_force_put_ext(&mut self, ext: impl AsRef<str>) -> Result<(), ConfigError> {
        self.force_put_ext = Some(clean_extension(ext.as_ref())?);
        Ok(())
    }

    /// Restores URL-derived names for `put`.
    pub fn clear_force_put_ext(&mut self) {
        self.force_put_ext = None;
    }

    /// Validates and stores every submitted file.
    ///
    /// Returns the saved files keyed by submission key. Fails as a whole when
    /// the input is empty, the root or save path is unusable, or every file
    /// was rejected.
    pub async fn upload(&mut self, files: UploadFiles) -> Result<UploadResult, UploadError> {
        let submissions = files.normalize();
        if submissions.is_empty() {
            return Err(self.fail_call(UploadError::NoFiles));
        }
        self.preflight().await?;

        let mut result = UploadResult::default();
        for file in submissions {
            let key = file.result_key.clone();
            let outcome = self.process_upload(file).await;
            self.record(&mut result, key, outcome);
        }
        self.finish(result)
    }

    /// Uploads a single file under `key`.
    pub async fn upload_one(
        &mut self,
        key: impl Into<String>,
        upload: RawUpload,
    ) -> Result<SavedFile, UploadError> {
        let result = self.upload(UploadFiles::new().single(key, upload)).await?;
        result
            .files
            .into_values()
            .next()
            .ok_or(UploadError::NothingSaved {
                rejected: result.rejected,
            })
    }

    /// Fetches remote resources and stores them like uploads.
    ///
    /// Accepts one URL or a list; results are keyed by list index.
    pub async fn put(
        &mut self,
        targets: impl Into<PutTargets>,
    ) -> Result<UploadResult, UploadError> {
        let targets = targets.into();
        if targets.is_empty() {
            return Err(self.fail_call(UploadError::NoFiles));
        }
        self.preflight().await?;

        let PutTargets(urls) = targets;

        let mut result = UploadResult::default();
        for (index, url) in urls.into_iter().enumerate() {
            let file = self.remote_submission(index, url).await;
            let key = file.result_key.clone();
            let outcome = self.process_put(file).await;
            self.record(&mut result, key, outcome);
        }
        self.finish(result)
    }

    async fn preflight(&mut self) -> Result<(), UploadError> {
        let root = self.driver.check_root_path().await;
        if let Err(err) = root {
            return Err(self.fail_call(UploadError::RootPath(err)));
        }

        let save = self.driver.check_save_path(&self.config.save_path).await;
        if let Err(err) = save {
            return Err(self.fail_call(UploadError::SavePath(err)));
        }
        Ok(())
    }

    fn fail_call(&mut self, error: UploadError) -> UploadError {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, "uploader: call aborted before processing files");
        self.last_error = error.to_string();
        error
    }

    fn record(
        &mut self,
        result: &mut UploadResult,
        key: String,
        outcome: Result<SavedFile, FileError>,
    ) {
        match outcome {
            Ok(saved) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    key = key.as_str(),
                    save_path = saved.save_path.as_str(),
                    save_name = saved.save_name.as_str(),
                    "uploader: file stored"
                );
                result.files.insert(key, saved);
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = key.as_str(), error = %error, "uploader: file rejected");
                self.last_error = error.to_string();
                result.rejected.push(Rejection { key, error });
            }
        }
    }

    fn finish(&self, result: UploadResult) -> Result<UploadResult, UploadError> {
        if result.files.is_empty() {
            return Err(UploadError::NothingSaved {
                rejected: result.rejected,
            });
        }
        Ok(result)
    }

    async fn process_upload(&self, mut file: FileSubmission) -> Result<SavedFile, FileError> {
        check_transfer(&file)?;

        let tmp_name = match &file.source {
            Source::Local(path) => path.clone(),
            Source::Remote(_) => return Err(FileError::NotUploaded),
        };
        if !self.is_genuine_upload(&tmp_name).await {
            return Err(FileError::NotUploaded);
        }

        if self.config.sniff_mime {
            if let Some(detected) = sniff_mime(&tmp_name).await {
                file.content_type = detected;
            }
        }

        self.check_limits(&file)?;
        let mut content = Content::new(file.source.clone(), self.fetcher.as_ref());
        self.store(file, &mut content, Persist::Save).await
    }

    async fn process_put(&self, file: FileSubmission) -> Result<SavedFile, FileError> {
        check_transfer(&file)?;
        self.check_limits(&file)?;
        let mut content = Content::new(file.source.clone(), self.fetcher.as_ref());
        self.store(file, &mut content, Persist::Put).await
    }

    fn check_limits(&self, file: &FileSubmission) -> Result<(), FileError> {
        let limits = &self.config.limits;
        if !limits.is_size_allowed(file.size) {
            return Err(FileError::SizeNotAllowed {
                size: file.size,
                max_size: limits.max_size,
            });
        }
        if !limits.is_mime_allowed(&file.content_type) {
            return Err(FileError::MimeNotAllowed {
                mime: file.content_type.clone(),
            });
        }
        if !limits.is_ext_allowed(&file.ext) {
            return Err(FileError::ExtensionNotAllowed {
                ext: file.ext.clone(),
            });
        }
        Ok(())
    }

    /// Shared tail of both pipelines: hash, existence hook, naming, image
    /// probe and persistence.
    async fn store(
        &self,
        mut file: FileSubmission,
        content: &mut Content<'_>,
        persist: Persist,
    ) -> Result<SavedFile, FileError> {
        if self.config.hash {
            file.digests = Some(content.digests().await?);
        }

        if let Some(existing) = self.existing_copy(&file).await {
            return Ok(existing.file);
        }

        file.save_name = self.save_name(&file)?;
        file.save_path = self.sub_path(&file).await?;

        if is_image_extension(&file.ext) {
            let valid = content
                .probe()
                .await
                .is_some_and(|info| info.passes_for_extension(&file.ext));
            if !valid {
                return Err(FileError::InvalidImage);
            }
        }

        match persist {
            Persist::Save => self.driver.save(&file, self.config.replace).await?,
            Persist::Put => {
                let body = content.remote().await?;
                self.driver.put(&file, body, self.config.replace).await?
            }
        }
        Ok(SavedFile::from(file))
    }

    async fn existing_copy(&self, file: &FileSubmission) -> Option<ExistingFile> {
        let hook = self.existing.as_ref()?;
        let existing = hook(file)?;

        if tokio::fs::try_exists(&existing.path).await.unwrap_or(false) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                key = file.key.as_str(),
                path = %existing.path.display(),
                "uploader: existing copy found, skipping save"
            );
            return Some(existing);
        }

        if let Some(trash) = &self.trash {
            trash(&existing);
        }
        None
    }

    fn save_name(&self, file: &FileSubmission) -> Result<String, FileError> {
        let ctx = NamingContext::new(&file.name).with_digests(file.digests.as_ref());
        let stem = self
            .config
            .save_name
            .resolve(&ctx)
            .ok_or(FileError::InvalidName)?;

        let ext = self.config.save_ext.as_deref().unwrap_or(&file.ext);
        let name = if ext.is_empty() {
            stem
        } else {
            format!("{stem}.{ext}")
        };
        Ok(sanitize_filename(&name))
    }

    async fn sub_path(&self, file: &FileSubmission) -> Result<String, FileError> {
        let save_path = &self.config.save_path;
        let rule = match &self.config.sub_name {
            Some(rule) if self.config.auto_sub => rule,
            _ => return Ok(save_path.clone()),
        };

        let ctx = NamingContext::new(&file.name).with_digests(file.digests.as_ref());
        let Some(sub) = rule.resolve(&ctx) else {
            return Ok(save_path.clone());
        };
        let sub = sub.trim_matches('/');
        if sub.is_empty() {
            return Ok(save_path.clone());
        }
        if !is_relative_subpath(sub) {
            return Err(FileError::InvalidName);
        }

        let path = format!("{save_path}{sub}/");
        self.driver.mkdir(&path).await?;
        Ok(path)
    }

    async fn is_genuine_upload(&self, tmp_name: &Path) -> bool {
        if tmp_name.as_os_str().is_empty() {
            return false;
        }
        let is_regular = tokio::fs::symlink_metadata(tmp_name)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_regular {
            return false;
        }

        let Some(tmp_dir) = &self.config.upload_tmp_dir else {
            return true;
        };
        match (
            tokio::fs::canonicalize(tmp_dir).await,
            tokio::fs::canonicalize(tmp_name).await,
        ) {
            (Ok(dir), Ok(file)) => file.starts_with(dir),
            _ => false,
        }
    }

    async fn remote_submission(&self, index: usize, url: String) -> FileSubmission {
        let name = put_file_name(&url, self.force_put_ext.as_deref());
        let key = index.to_string();
        let mut file = FileSubmission::from_upload(
            key.clone(),
            key,
            RawUpload::new(name, PathBuf::new(), 0, String::new()),
        );

        match self.fetcher.head(&url).await {
            Ok(info) => {
                file.content_type = info.content_type;
                file.size = info.content_length;
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = url.as_str(), error = %_err, "uploader: remote probe failed");
                file.error = UploadErrorCode::InvalidResource;
            }
        }
        file.source = Source::Remote(url);
        file
    }
}

#[derive(Debug, Clone, Copy)]
enum Persist {
    Save,
    Put,
}

/// Lazily read file content, fetched at most once for remote sources.
struct Content<'a> {
    source: Source,
    fetcher: &'a dyn RemoteFetcher,
    body: Option<Bytes>,
}

impl<'a> Content<'a> {
    fn new(source: Source, fetcher: &'a dyn RemoteFetcher) -> Self {
        Self {
            source,
            fetcher,
            body: None,
        }
    }

    async fn remote_body(&mut self, url: &str) -> Result<Bytes, FileError> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        let body = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|err| FileError::Unreadable {
                reason: err.to_string(),
            })?;
        self.body = Some(body.clone());
        Ok(body)
    }

    /// Cached remote body; hashed and stored bytes are the same download.
    async fn remote(&mut self) -> Result<Option<Bytes>, FileError> {
        match self.source.clone() {
            Source::Remote(url) => self.remote_body(&url).await.map(Some),
            Source::Local(_) => Ok(None),
        }
    }

    async fn digests(&mut self) -> Result<FileDigests, FileError> {
        match self.source.clone() {
            Source::Local(path) => digest_file(&path).await.map_err(|err| FileError::Unreadable {
                reason: err.to_string(),
            }),
            Source::Remote(url) => Ok(digest_bytes(&self.remote_body(&url).await?)),
        }
    }

    async fn probe(&mut self) -> Option<ImageInfo> {
        match self.source.clone() {
            Source::Local(path) => tokio::task::spawn_blocking(move || probe_file(&path))
                .await
                .ok()
                .flatten(),
            Source::Remote(url) => {
                let body = self.remote_body(&url).await.ok()?;
                probe_bytes(&body)
            }
        }
    }
}

fn check_transfer(file: &FileSubmission) -> Result<(), FileError> {
    if !file.error.is_ok() {
        return Err(FileError::Transfer(file.error));
    }
    if file.name.is_empty() {
        return Err(FileError::MissingName);
    }
    Ok(())
}

async fn sniff_mime(path: &Path) -> Option<String> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await
        .ok()?;
    infer::get(&head).map(|kind| kind.mime_type().to_owned())
}

fn clean_extension(ext: &str) -> Result<String, ConfigError> {
    validate_extension(ext)?;
    Ok(ext.trim().trim_start_matches('.').to_owned())
}

/// Derives the stored name of a remote resource.
///
/// With a forced extension the name is `md5(url).ext`; otherwise it is the
/// last path segment with its extension cut to the leading alphanumeric run.
pub fn put_file_name(url: &str, force_ext: Option<&str>) -> String {
    if let Some(ext) = force_ext {
        return format!("{}.{ext}", md5_hex(url));
    }

    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let rest = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let path = rest.split_once('/').map_or("", |(_, path)| path);
    let basename = path.rsplit('/').next().unwrap_or_default();

    match basename.rfind('.') {
        None => basename.to_owned(),
        Some(pos) => {
            let stem = &basename[..pos];
            let ext: String = basename[pos + 1..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            if ext.is_empty() {
                stem.to_owned()
            } else {
                format!("{stem}.{ext}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_names_follow_the_url_path() {
        assert_eq!(put_file_name("http://host/a/b/photo.png", None), "photo.png");
        assert_eq!(put_file_name("https://host/photo.jpg?w=100#top", None), "photo.jpg");
        assert_eq!(put_file_name("http://host/x.png!thumb", None), "x.png");
        assert_eq!(put_file_name("http://host/README", None), "README");
        assert_eq!(put_file_name("http://host/", None), "");
        assert_eq!(put_file_name("http://host", None), "");
    }

    #[test]
    fn forced_extension_hashes_the_literal_url() {
        let url = "http://host/file.png";
        assert_eq!(
            put_file_name(url, Some("jpg")),
            format!("{}.jpg", md5_hex(url))
        );
    }

    #[test]
    fn transfer_codes_short_circuit_before_name_checks() {
        let upload = RawUpload::new("", "/tmp/x", 1, "text/plain").with_error(4_i64);
        let file = FileSubmission::from_upload("f".into(), "f".into(), upload);
        assert_eq!(
            check_transfer(&file),
            Err(FileError::Transfer(UploadErrorCode::NoFile))
        );

        let unnamed = FileSubmission::from_upload(
            "f".into(),
            "f".into(),
            RawUpload::new("", "/tmp/x", 1, "text/plain"),
        );
        assert_eq!(check_transfer(&unnamed), Err(FileError::MissingName));
    }
}
