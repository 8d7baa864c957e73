use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::limits::Limits;
use crate::naming::NamingRule;

/// Built-in storage drivers, selectable by name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// Files are moved into a directory tree on the local filesystem.
    #[default]
    Local,
    /// Files are kept in process memory.
    Memory,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::UnknownDriver {
                name: name.to_owned(),
            }),
        }
    }
}

/// Transport settings handed to the driver's remote fetcher.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriverConfig {
    /// Whole-request timeout for remote fetches, in seconds.
    pub timeout_secs: Option<u64>,
    /// `User-Agent` sent with remote fetches.
    pub user_agent: Option<String>,
}

/// Upload pipeline configuration.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Size, MIME and extension limits.
    pub limits: Limits,
    /// Place files in a generated sub-directory of `save_path`.
    pub auto_sub: bool,
    /// Rule for the sub-directory name.
    pub sub_name: Option<NamingRule>,
    /// Storage root; must already exist.
    pub root_path: PathBuf,
    /// Directory under the root, `/`-terminated or empty; created on demand.
    pub save_path: String,
    /// Rule for the saved file name (extension excluded).
    pub save_name: NamingRule,
    /// Forced extension for saved files; `None` keeps the original one.
    pub save_ext: Option<String>,
    /// Overwrite files that already exist at the destination.
    pub replace: bool,
    /// Compute MD5 and SHA-1 digests of every file.
    pub hash: bool,
    /// Replace the declared MIME type with one detected from content.
    pub sniff_mime: bool,
    /// Directory the host writes temp files to; uploads outside it are refused.
    ///
    /// Defaults to [`std::env::temp_dir`]. `None` accepts any regular file.
    pub upload_tmp_dir: Option<PathBuf>,
    /// Driver to instantiate.
    pub driver: DriverKind,
    /// Driver transport settings.
    pub driver_config: DriverConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            auto_sub: true,
            sub_name: Some(NamingRule::date("%Y-%m-%d")),
            root_path: PathBuf::from("./Uploads/"),
            save_path: String::new(),
            save_name: NamingRule::UniqueId,
            save_ext: None,
            replace: false,
            hash: true,
            sniff_mime: true,
            upload_tmp_dir: Some(std::env::temp_dir()),
            driver: DriverKind::Local,
            driver_config: DriverConfig::default(),
        }
    }
}

impl UploadConfig {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every invariant the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRootPath);
        }

        if !is_relative_subpath(&self.save_path) {
            return Err(ConfigError::InvalidSavePath {
                path: self.save_path.clone(),
            });
        }

        self.save_name.validate(self.hash)?;
        if let Some(rule) = &self.sub_name {
            rule.validate(self.hash)?;
        }

        if let Some(ext) = &self.save_ext {
            validate_extension(ext)?;
        }

        Ok(())
    }

    /// Lower-cases allow-lists, drops empty optional values and terminates
    /// `save_path` with `/`.
    pub(crate) fn normalize(&mut self) {
        self.limits.normalize();
        if self.save_ext.as_deref().is_some_and(|ext| ext.trim().is_empty()) {
            self.save_ext = None;
        }
        if let Some(ext) = &mut self.save_ext {
            *ext = ext.trim().trim_start_matches('.').to_owned();
        }
        self.save_path = normalize_save_path(&self.save_path);
    }
}

pub(crate) fn normalize_save_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/")
    }
}

/// `true` when `path` cannot leave the directory it is joined onto.
pub(crate) fn is_relative_subpath(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

pub(crate) fn validate_extension(ext: &str) -> Result<(), ConfigError> {
    let bare = ext.trim().trim_start_matches('.');
    let valid = !bare.is_empty()
        && bare
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidExtension {
            ext: ext.to_owned(),
        })
    }
}
