//! Content digests recorded for saved files.

use std::path::Path;

use md5::{Digest, Md5};
use sha1::Sha1;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// MD5 and SHA-1 digests of a file's full content, as lowercase hex.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    /// 32-character MD5 digest.
    pub md5: String,
    /// 40-character SHA-1 digest.
    pub sha1: String,
}

#[derive(Default)]
struct DualHasher {
    md5: Md5,
    sha1: Sha1,
}

impl DualHasher {
    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
    }

    fn finish(self) -> FileDigests {
        FileDigests {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
        }
    }
}

/// Computes both digests over an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> FileDigests {
    let mut hasher = DualHasher::default();
    hasher.update(data);
    hasher.finish()
}

/// Computes both digests over a file, reading it in 64 KiB chunks.
///
/// # Errors
/// Returns the I/O error if the file cannot be opened or read.
pub async fn digest_file(path: &Path) -> std::io::Result<FileDigests> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = DualHasher::default();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finish())
}

/// Hex MD5 of a string, used for forced `put` names and hashed naming rules.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Hex SHA-1 of a string.
pub fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}
