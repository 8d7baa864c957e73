/// Size, MIME and extension limits enforced on every submission.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Limits {
    /// Maximum accepted file size in bytes. `0` disables the check.
    pub max_size: u64,
    /// Allowed MIME patterns (for example: `image/png`, `image/*`).
    ///
    /// An empty list accepts every MIME type.
    pub mimes: Vec<String>,
    /// Allowed file extensions without the leading dot.
    ///
    /// An empty list accepts every extension, including none.
    pub exts: Vec<String>,
}

impl Limits {
    /// Creates a permissive limits configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum file size in bytes.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the MIME allow-list.
    pub fn with_mimes<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mimes = mimes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the extension allow-list.
    pub fn with_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exts = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Splits a comma-separated list such as `"jpg, png,gif"`.
    pub fn parse_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Lower-cases both allow-lists and strips leading dots from extensions.
    pub(crate) fn normalize(&mut self) {
        for mime in &mut self.mimes {
            *mime = mime.trim().to_ascii_lowercase();
        }
        for ext in &mut self.exts {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
        self.mimes.retain(|mime| !mime.is_empty());
        self.exts.retain(|ext| !ext.is_empty());
    }

    /// Returns `true` when `size` fits the configured maximum.
    pub fn is_size_allowed(&self, size: u64) -> bool {
        self.max_size == 0 || size <= self.max_size
    }

    /// Returns `true` when `mime` is allowed by the configured allowlist.
    ///
    /// Parameters such as `; charset=utf-8` are ignored.
    pub fn is_mime_allowed(&self, mime: &str) -> bool {
        if self.mimes.is_empty() {
            return true;
        }

        let essence = mime_essence(mime);
        let allowed = self
            .mimes
            .iter()
            .any(|pattern| mime_matches_pattern(&essence, pattern));

        #[cfg(feature = "tracing")]
        if !allowed {
            tracing::debug!(
                mime = essence.as_str(),
                allowed_patterns = ?self.mimes,
                "limits: MIME rejected by allowlist"
            );
        }

        allowed
    }

    /// Returns `true` when `ext` is allowed by the configured allowlist.
    pub fn is_ext_allowed(&self, ext: &str) -> bool {
        self.exts.is_empty() || self.exts.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

fn mime_essence(mime: &str) -> String {
    match mime.parse::<mime::Mime>() {
        Ok(parsed) => parsed.essence_str().to_ascii_lowercase(),
        Err(_) => mime.trim().to_ascii_lowercase(),
    }
}

fn mime_matches_pattern(essence: &str, pattern: &str) -> bool {
    if let Some((kind, subtype)) = pattern.split_once('/') {
        if subtype == "*" {
            return essence
                .split_once('/')
                .is_some_and(|(actual, _)| actual.eq_ignore_ascii_case(kind));
        }
    }

    essence.eq_ignore_ascii_case(pattern)
}
