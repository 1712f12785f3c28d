//! Error types for the receipt2xlsx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IntakeError`]: **Fatal**. The run cannot proceed at all (missing
//!   credential, unsupported file type, provider not configured, nothing to
//!   export). Returned as `Err(IntakeError)` from the top-level entry points.
//!
//! * [`DocumentError`]: **Non-fatal**. A single document failed (decode
//!   glitch, missing file, model returned prose instead of JSON) but the
//!   rest of the batch is fine. Stored inside [`crate::output::DocumentResult`]
//!   so one bad receipt never costs the whole spreadsheet.

use crate::pipeline::ocr::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the receipt2xlsx library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::DocumentResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The API credential environment variable is missing or empty.
    #[error("Missing API credential: {var} is not set.\nExport it or add it to a .env file, e.g. {var}=...")]
    MissingCredential { var: String },

    /// The configured provider could not be created.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file name does not carry one of the accepted extensions.
    #[error("Unsupported file type '{name}': expected .png, .jpg, .jpeg or .pdf")]
    UnsupportedFileType { name: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The OCR engine could not be loaded.
    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),

    // ── Export errors ─────────────────────────────────────────────────────
    /// Every document failed; there are no rows to write.
    #[error("Nothing to export: none of the {attempted} documents produced a record")]
    NothingToExport { attempted: usize },

    /// The spreadsheet writer failed.
    #[error("Spreadsheet export failed: {0}")]
    ExportFailed(String),

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<OcrError> for IntakeError {
    fn from(e: OcrError) -> Self {
        IntakeError::OcrUnavailable(e.to_string())
    }
}

/// Pipeline stage that hit a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Ocr,
    Request,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ocr => f.write_str("OCR"),
            Stage::Request => f.write_str("LLM request"),
        }
    }
}

/// A non-fatal error for a single document.
///
/// The document is excluded from the spreadsheet; the batch continues.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DocumentError {
    /// The input could not be read (missing file, no permission, failed
    /// download).
    #[error("{name}: could not read input: {detail}")]
    Unreadable { name: String, detail: String },

    /// The image or one of the PDF pages could not be decoded.
    #[error("{name}: could not decode document: {detail}")]
    Decode { name: String, detail: String },

    /// OCR ran but recognised no text.
    #[error("{name}: OCR found no text")]
    EmptyOcrResult { name: String },

    /// The OCR engine itself failed.
    #[error("{name}: OCR failed: {detail}")]
    Ocr { name: String, detail: String },

    /// The generative-text call failed after retries.
    #[error("{name}: LLM request failed after {retries} retries: {detail}")]
    RequestFailed {
        name: String,
        retries: u32,
        detail: String,
    },

    /// A stage exceeded its time budget.
    #[error("{name}: {stage} timed out after {secs}s")]
    Timeout { name: String, stage: Stage, secs: u64 },

    /// The model response was not a usable JSON object.
    #[error("{name}: {failure}")]
    Parse { name: String, failure: ParseFailure },
}

impl DocumentError {
    /// File name of the document this error belongs to.
    pub fn document_name(&self) -> &str {
        match self {
            DocumentError::Unreadable { name, .. }
            | DocumentError::Decode { name, .. }
            | DocumentError::EmptyOcrResult { name }
            | DocumentError::Ocr { name, .. }
            | DocumentError::RequestFailed { name, .. }
            | DocumentError::Timeout { name, .. }
            | DocumentError::Parse { name, .. } => name,
        }
    }

    /// `true` for conditions that are expected rather than broken
    /// (currently only an empty OCR result).
    pub fn is_soft(&self) -> bool {
        matches!(self, DocumentError::EmptyOcrResult { .. })
    }
}

/// Why a model response could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseFailureReason {
    /// Not valid JSON at all.
    InvalidJson(String),
    /// Valid JSON, but the top level is not an object.
    NotAnObject,
    /// `items` is present but is not a list of objects.
    ItemsNotAList,
    /// A scalar field holds an object or array.
    WrongFieldType { field: String },
}

impl fmt::Display for ParseFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailureReason::InvalidJson(detail) => write!(f, "invalid JSON ({detail})"),
            ParseFailureReason::NotAnObject => f.write_str("top-level JSON value is not an object"),
            ParseFailureReason::ItemsNotAList => f.write_str("\"items\" is not a list of objects"),
            ParseFailureReason::WrongFieldType { field } => {
                write!(f, "field \"{field}\" is not a text or number value")
            }
        }
    }
}

/// A model response that could not be normalised.
///
/// Carries the raw text so callers can log exactly what the model said.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid model response: {reason}")]
pub struct ParseFailure {
    pub reason: ParseFailureReason,
    pub raw: String,
}

impl ParseFailure {
    pub fn new(reason: ParseFailureReason, raw: impl Into<String>) -> Self {
        Self {
            reason,
            raw: raw.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_variable() {
        let e = IntakeError::MissingCredential {
            var: "GEMINI_API_KEY".into(),
        };
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn nothing_to_export_display() {
        let e = IntakeError::NothingToExport { attempted: 3 };
        let msg = e.to_string();
        assert!(msg.contains("Nothing to export"), "got: {msg}");
        assert!(msg.contains('3'));
    }

    #[test]
    fn ocr_load_failure_is_fatal_unavailable() {
        let e = IntakeError::from(OcrError::ModelLoad("models/det.onnx not found".into()));
        assert!(matches!(e, IntakeError::OcrUnavailable(ref m) if m.contains("det.onnx")));
    }

    #[test]
    fn document_error_names_file() {
        let e = DocumentError::EmptyOcrResult {
            name: "blank.png".into(),
        };
        assert_eq!(e.document_name(), "blank.png");
        assert!(e.to_string().starts_with("blank.png"));
        assert!(e.is_soft());
    }

    #[test]
    fn parse_failure_display_includes_reason() {
        let e = DocumentError::Parse {
            name: "r.jpg".into(),
            failure: ParseFailure::new(ParseFailureReason::NotAnObject, "[1, 2]"),
        };
        assert!(e.to_string().contains("not an object"));
        assert!(!e.is_soft());
    }

    #[test]
    fn timeout_display() {
        let e = DocumentError::Timeout {
            name: "scan.pdf".into(),
            stage: Stage::Request,
            secs: 60,
        };
        assert!(e.to_string().contains("LLM request timed out after 60s"));
    }
}
