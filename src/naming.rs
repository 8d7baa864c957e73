//! Rules deriving save names and sub-directory names.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::hash::{md5_hex, sha1_hex, FileDigests};

/// Placeholder replaced by the original file name in template rules.
pub const FILE_PLACEHOLDER: &str = "__FILE__";

/// Strategy used to derive a save name or sub-directory name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "rule", content = "arg", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingRule {
    /// Keep the stem of the incoming file name.
    Original,
    /// Use the given string verbatim.
    Literal(String),
    /// Format the current local time with a strftime pattern, e.g. `%Y-%m-%d`.
    Date(String),
    /// Current unix time in seconds.
    Timestamp,
    /// Random 32-character hex identifier.
    UniqueId,
    /// Template where [`FILE_PLACEHOLDER`] is replaced by the file name.
    Template(String),
    /// MD5 hex of a template after placeholder substitution.
    Md5(String),
    /// SHA-1 hex of a template after placeholder substitution.
    Sha1(String),
    /// MD5 hex of the file content. Needs hashing enabled.
    ContentMd5,
    /// SHA-1 hex of the file content. Needs hashing enabled.
    ContentSha1,
}

impl Default for NamingRule {
    fn default() -> Self {
        Self::UniqueId
    }
}

/// Inputs available to a naming rule.
#[derive(Debug, Clone, Copy)]
pub struct NamingContext<'a> {
    /// Original file name as submitted.
    pub file_name: &'a str,
    /// Content digests, when hashing ran.
    pub digests: Option<&'a FileDigests>,
}

impl<'a> NamingContext<'a> {
    /// Creates a context for a file name without digests.
    pub fn new(file_name: &'a str) -> Self {
        Self {
            file_name,
            digests: None,
        }
    }

    /// Attaches content digests.
    pub fn with_digests(mut self, digests: Option<&'a FileDigests>) -> Self {
        self.digests = digests;
        self
    }
}

impl NamingRule {
    /// Shorthand for [`NamingRule::Date`].
    pub fn date(format: impl Into<String>) -> Self {
        Self::Date(format.into())
    }

    /// Shorthand for [`NamingRule::Literal`].
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Shorthand for [`NamingRule::Template`].
    pub fn template(value: impl Into<String>) -> Self {
        Self::Template(value.into())
    }

    /// Returns `true` for rules that read content digests.
    pub fn needs_digests(&self) -> bool {
        matches!(self, Self::ContentMd5 | Self::ContentSha1)
    }

    /// Checks that the rule can ever resolve.
    pub fn validate(&self, hash_enabled: bool) -> Result<(), ConfigError> {
        match self {
            Self::Literal(value) if value.is_empty() => Err(ConfigError::EmptyLiteralRule),
            Self::Date(format) => {
                let malformed = format.is_empty()
                    || StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
                if malformed {
                    Err(ConfigError::InvalidDateFormat {
                        format: format.clone(),
                    })
                } else {
                    Ok(())
                }
            }
            Self::ContentMd5 if !hash_enabled => Err(ConfigError::ContentRuleWithoutHash {
                rule: "content_md5",
            }),
            Self::ContentSha1 if !hash_enabled => Err(ConfigError::ContentRuleWithoutHash {
                rule: "content_sha1",
            }),
            _ => Ok(()),
        }
    }

    /// Resolves the rule. `None` or an empty string means no usable name.
    pub fn resolve(&self, ctx: &NamingContext<'_>) -> Option<String> {
        let name = match self {
            Self::Original => file_stem(ctx.file_name).to_owned(),
            Self::Literal(value) => value.clone(),
            Self::Date(format) => {
                let mut out = String::new();
                write!(out, "{}", Local::now().format(format)).ok()?;
                out
            }
            Self::Timestamp => Local::now().timestamp().to_string(),
            Self::UniqueId => Uuid::new_v4().simple().to_string(),
            Self::Template(template) => substitute(template, ctx.file_name),
            Self::Md5(template) => md5_hex(&substitute(template, ctx.file_name)),
            Self::Sha1(template) => sha1_hex(&substitute(template, ctx.file_name)),
            Self::ContentMd5 => ctx.digests?.md5.clone(),
            Self::ContentSha1 => ctx.digests?.sha1.clone(),
        };

        (!name.is_empty()).then_some(name)
    }
}

fn substitute(template: &str, file_name: &str) -> String {
    template.replace(FILE_PLACEHOLDER, file_name)
}

/// File name without its final extension. Dotfiles keep their full name.
pub(crate) fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(pos) => &file_name[..pos],
    }
}

/// Extension after the final dot, or empty.
pub(crate) fn file_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &file_name[pos + 1..],
    }
}

/// Reduces a generated name to a single safe path component.
///
/// Only the text after the last `/` or `\` is kept, control characters
/// become `_` and leading dots are dropped. Everything else, punctuation and
/// non-ASCII letters included, passes through unchanged.
pub fn sanitize_filename(input: &str) -> String {
    let base = input.rsplit(['/', '\\']).next().unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|ch| if ch.is_control() { '_' } else { ch })
        .collect();

    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.trim().is_empty() {
        return "file".to_owned();
    }

    sanitized.to_owned()
}
