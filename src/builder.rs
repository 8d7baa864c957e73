use std::{fmt, path::PathBuf, sync::Arc};

use crate::{
    config::{DriverConfig, DriverKind, UploadConfig},
    error::ConfigError,
    limits::Limits,
    naming::NamingRule,
    remote::RemoteFetcher,
    storage::StorageDriver,
    submission::{ExistingFile, FileSubmission},
    uploader::{ExistingFileHook, TrashHook, Uploader},
};

/// Builder for configuring an [`Uploader`].
#[derive(Clone, Default)]
pub struct UploaderBuilder {
    config: UploadConfig,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    existing: Option<Arc<ExistingFileHook>>,
    trash: Option<Arc<TrashHook>>,
    force_put_ext: Option<String>,
}

impl fmt::Debug for UploaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploaderBuilder")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.as_ref().map(|_| "<dyn RemoteFetcher>"))
            .field("existing", &self.existing.as_ref().map(|_| "<fn>"))
            .field("trash", &self.trash.as_ref().map(|_| "<fn>"))
            .field("force_put_ext", &self.force_put_ext)
            .finish()
    }
}

impl UploaderBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current builder configuration snapshot.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Replaces the full builder configuration.
    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets size, MIME and extension limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Sets the maximum file size in bytes; `0` disables the check.
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.config.limits.max_size = max_size;
        self
    }

    /// Sets the MIME allow-list.
    pub fn mimes<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.limits.mimes = mimes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the extension allow-list.
    pub fn exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.limits.exts = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables generated sub-directories.
    pub fn auto_sub(mut self, auto_sub: bool) -> Self {
        self.config.auto_sub = auto_sub;
        self
    }

    /// Sets the sub-directory naming rule.
    pub fn sub_name(mut self, rule: impl Into<Option<NamingRule>>) -> Self {
        self.config.sub_name = rule.into();
        self
    }

    /// Sets the storage root.
    pub fn root_path(mut self, root_path: impl Into<PathBuf>) -> Self {
        self.config.root_path = root_path.into();
        self
    }

    /// Sets the save path relative to the root.
    pub fn save_path(mut self, save_path: impl Into<String>) -> Self {
        self.config.save_path = save_path.into();
        self
    }

    /// Sets the save-name rule.
    pub fn save_name(mut self, rule: NamingRule) -> Self {
        self.config.save_name = rule;
        self
    }

    /// Forces the extension of saved files.
    pub fn save_ext(mut self, ext: impl Into<String>) -> Self {
        self.config.save_ext = Some(ext.into());
        self
    }

    /// Sets whether existing destination files are overwritten.
    pub fn replace(mut self, replace: bool) -> Self {
        self.config.replace = replace;
        self
    }

    /// Enables or disables MD5/SHA-1 hashing.
    pub fn hash(mut self, hash: bool) -> Self {
        self.config.hash = hash;
        self
    }

    /// Enables or disables content-based MIME detection.
    pub fn sniff_mime(mut self, sniff_mime: bool) -> Self {
        self.config.sniff_mime = sniff_mime;
        self
    }

    /// Restricts accepted temp files to `dir` instead of the system temp directory.
    pub fn upload_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_tmp_dir = Some(dir.into());
        self
    }

    /// Accepts temp files from any location.
    ///
    /// Only the regular-file check remains, so callers must vouch for every
    /// temp path they hand over.
    pub fn allow_any_tmp_location(mut self) -> Self {
        self.config.upload_tmp_dir = None;
        self
    }

    /// Selects the built-in driver.
    pub fn driver(mut self, driver: DriverKind) -> Self {
        self.config.driver = driver;
        self
    }

    /// Sets driver transport settings.
    pub fn driver_config(mut self, driver_config: DriverConfig) -> Self {
        self.config.driver_config = driver_config;
        self
    }

    /// Uses `fetcher` for remote resources instead of the default transport.
    pub fn fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Installs the existence check consulted after hashing.
    pub fn on_existing<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FileSubmission) -> Option<ExistingFile> + Send + Sync + 'static,
    {
        self.existing = Some(Arc::new(hook));
        self
    }

    /// Installs the cleanup hook for records whose stored copy is gone.
    pub fn on_trash<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExistingFile) + Send + Sync + 'static,
    {
        self.trash = Some(Arc::new(hook));
        self
    }

    /// Names every `put` target `md5(url).ext`.
    pub fn force_put_ext(mut self, ext: impl Into<String>) -> Self {
        self.force_put_ext = Some(ext.into());
        self
    }

    /// Validates builder configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        config.normalize();
        config.validate()
    }

    /// Finalizes and returns validated configuration.
    pub fn build_config(mut self) -> Result<UploadConfig, ConfigError> {
        self.config.normalize();
        self.config.validate()?;
        Ok(self.config)
    }

    /// Builds an uploader over the driver named by the configuration.
    pub fn build(self) -> Result<Uploader, ConfigError> {
        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => default_fetcher(&self.config.driver_config)?,
        };
        let driver = self
            .config
            .driver
            .build(self.config.root_path.clone(), Arc::clone(&fetcher));
        self.finish(driver, fetcher)
    }

    /// Builds an uploader over an explicit driver.
    ///
    /// The driver brings its own root; `root_path` and `driver` are ignored.
    pub fn build_with_driver<D>(self, driver: D) -> Result<Uploader<D>, ConfigError>
    where
        D: StorageDriver,
    {
        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => default_fetcher(&self.config.driver_config)?,
        };
        self.finish(driver, fetcher)
    }

    fn finish<D>(
        self,
        driver: D,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Result<Uploader<D>, ConfigError>
    where
        D: StorageDriver,
    {
        Uploader::from_parts(
            self.config,
            driver,
            fetcher,
            self.existing,
            self.trash,
            self.force_put_ext,
        )
    }
}

#[cfg(feature = "http")]
fn default_fetcher(config: &DriverConfig) -> Result<Arc<dyn RemoteFetcher>, ConfigError> {
    let fetcher = crate::remote::HttpFetcher::new(config).map_err(|err| {
        ConfigError::FetcherUnavailable {
            reason: err.to_string(),
        }
    })?;
    Ok(Arc::new(fetcher))
}

#[cfg(not(feature = "http"))]
fn default_fetcher(_config: &DriverConfig) -> Result<Arc<dyn RemoteFetcher>, ConfigError> {
    Ok(Arc::new(crate::remote::NoopFetcher))
}
