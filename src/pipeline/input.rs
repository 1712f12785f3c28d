//! Upload boundary: turn a user-supplied path, URL or byte buffer into an
//! [`UploadedDocument`].
//!
//! This is the only place file names are validated. Anything past this
//! module may assume the name carries one of the accepted extensions
//! (`png`, `jpg`, `jpeg`, `pdf`).

use crate::error::IntakeError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions accepted at the upload boundary (lower-case, without dot).
pub const ACCEPTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "pdf"];

/// An uploaded file: declared name plus raw bytes.
///
/// Lives for one run only; nothing is persisted.
#[derive(Clone)]
pub struct UploadedDocument {
    name: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for UploadedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedDocument")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl UploadedDocument {
    /// Wrap in-memory bytes, rejecting unsupported file names.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, IntakeError> {
        let name = name.into();
        if !has_accepted_extension(&name) {
            return Err(IntakeError::UnsupportedFileType { name });
        }
        Ok(Self { name, bytes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the content, hex-encoded. Used as the cache key so that
    /// reusing a file name with different bytes never hits a stale entry.
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// Lower-cased extension of `name`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// `true` if `name` ends in an accepted extension (case-insensitive).
pub fn has_accepted_extension(name: &str) -> bool {
    extension_of(name)
        .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to an [`UploadedDocument`].
pub async fn resolve_document(
    input: &str,
    timeout_secs: u64,
) -> Result<UploadedDocument, IntakeError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Read a local file, validating its extension before touching the disk.
async fn read_local(path_str: &str) -> Result<UploadedDocument, IntakeError> {
    let path = PathBuf::from(path_str);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());

    if !has_accepted_extension(&name) {
        return Err(IntakeError::UnsupportedFileType { name });
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => IntakeError::PermissionDenied { path: path.clone() },
        _ => IntakeError::FileNotFound { path: path.clone() },
    })?;

    debug!("Read {} ({} bytes)", path.display(), bytes.len());
    UploadedDocument::new(name, bytes)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadedDocument, IntakeError> {
    info!("Downloading document from: {}", url);

    let name = extract_filename(url);
    if !has_accepted_extension(&name) {
        return Err(IntakeError::UnsupportedFileType { name });
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IntakeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            IntakeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IntakeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(IntakeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IntakeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    UploadedDocument::new(name, bytes.to_vec())
}

/// Last path segment of the URL; empty string if the URL has none.
fn extract_filename(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_default()
}
