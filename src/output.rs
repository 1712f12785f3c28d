//! Result types returned by the extraction pipeline.

use crate::aggregate::Aggregator;
use crate::error::{DocumentError, IntakeError};
use crate::record::StructuredRecord;
use serde::Serialize;

/// Outcome of one document.
///
/// Exactly one of `record` / `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    /// 0-based submission position.
    pub index: usize,

    /// File name as uploaded.
    pub name: String,

    /// Extracted record, when the document succeeded.
    pub record: Option<StructuredRecord>,

    /// Why the document was skipped.
    pub error: Option<DocumentError>,

    /// Lines recognised by OCR (0 on cache hits).
    pub ocr_lines: usize,

    pub input_tokens: usize,
    pub output_tokens: usize,

    /// Wall-clock time for this document.
    pub duration_ms: u64,

    /// Served from the record cache without OCR or model calls.
    pub cached: bool,
}

impl DocumentResult {
    /// A document that failed before any stage ran.
    pub fn skipped(error: DocumentError) -> Self {
        Self {
            index: 0,
            name: error.document_name().to_string(),
            record: None,
            error: Some(error),
            ocr_lines: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.record.is_some()
    }
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Documents submitted.
    pub total_documents: usize,

    /// Documents that produced a row.
    pub succeeded: usize,

    /// Documents skipped for any reason.
    pub failed: usize,

    /// Documents skipped because OCR found no text.
    pub empty: usize,

    /// Documents served from the cache.
    pub cache_hits: usize,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything a batch run produced.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// One entry per submitted document, in submission order.
    pub results: Vec<DocumentResult>,

    /// Rows for the successful documents, in submission order.
    pub aggregator: Aggregator,

    pub stats: BatchStats,
}

impl BatchOutput {
    /// Spreadsheet bytes for the successful documents.
    ///
    /// Fails with [`IntakeError::NothingToExport`] when no document succeeded.
    pub fn export(&self) -> Result<Vec<u8>, IntakeError> {
        self.ensure_rows()?;
        self.aggregator.export()
    }

    /// Rows as pretty-printed JSON.
    pub fn export_json(&self) -> Result<String, IntakeError> {
        self.ensure_rows()?;
        self.aggregator.export_json()
    }

    /// Errors of the skipped documents, in submission order.
    pub fn skipped(&self) -> impl Iterator<Item = &DocumentError> {
        self.results.iter().filter_map(|r| r.error.as_ref())
    }

    fn ensure_rows(&self) -> Result<(), IntakeError> {
        if self.aggregator.is_empty() {
            return Err(IntakeError::NothingToExport {
                attempted: self.results.len(),
            });
        }
        Ok(())
    }
}
