//! Pipeline orchestration: documents in, ordered results and rows out.
//!
//! ```text
//! UploadedDocument
//!  │
//!  ├─ cache   content hash hit → reuse record, skip everything below
//!  ├─ render  image decode / pdfium rasterise
//!  ├─ ocr     TextRecognizer, reading-ordered lines
//!  ├─ prompt  lines joined into the extraction template
//!  ├─ request TextGenerator with retry + timeout
//!  └─ parse   fence strip + JSON → StructuredRecord
//! ```
//!
//! Every per-document failure becomes a [`DocumentError`] in that document's
//! [`DocumentResult`]; the batch always runs to the end.

use crate::aggregate::Aggregator;
use crate::cache::RecordCache;
use crate::config::{credential_var, IntakeConfig};
use crate::error::{DocumentError, IntakeError};
use crate::output::{BatchOutput, BatchStats, DocumentResult};
use crate::pipeline::input::{resolve_document, UploadedDocument};
use crate::pipeline::llm::{request, Generation, LlmTextGenerator, TextGenerator};
use crate::pipeline::normalize::normalize_response;
use crate::pipeline::ocr::{extract_text, TextRecognizer};
use crate::prompts::build_prompt;
use crate::record::StructuredRecord;
use edgequake_llm::ProviderFactory;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of the stages after the cache lookup.
struct Extraction {
    record: StructuredRecord,
    ocr_lines: usize,
    generation: Generation,
}

/// A configured extraction pipeline.
///
/// Holds the OCR engine, the text generator and the record cache, so one
/// `Pipeline` should be reused across batches.
pub struct Pipeline {
    config: IntakeConfig,
    recognizer: Arc<dyn TextRecognizer>,
    generator: Arc<dyn TextGenerator>,
    cache: RecordCache,
}

impl Pipeline {
    /// Build a pipeline around `recognizer`.
    ///
    /// The text generator is `config.generator` when set; otherwise a provider
    /// is created from `config.provider_name` / `config.model`. Fails with
    /// [`IntakeError::MissingCredential`] before any network call when the
    /// provider needs a key and none is available.
    pub fn new(config: IntakeConfig, recognizer: Arc<dyn TextRecognizer>) -> Result<Self, IntakeError> {
        let generator = resolve_generator(&config)?;
        let cache = RecordCache::new(config.cache_capacity);
        Ok(Self {
            config,
            recognizer,
            generator,
            cache,
        })
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// The record cache, for explicit invalidation.
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Run one document through every stage.
    ///
    /// Never fails as a whole; a failure is reported in
    /// [`DocumentResult::error`]. `index` is left at 0 for the caller to set.
    pub async fn process_document(&self, document: &UploadedDocument) -> DocumentResult {
        let start = Instant::now();
        let name = document.name().to_string();
        let hash = document.content_hash();
        info!("Processing {}", name);

        let mut result = DocumentResult {
            index: 0,
            name: name.clone(),
            record: None,
            error: None,
            ocr_lines: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            cached: false,
        };

        if let Some(record) = self.cache.get(&hash) {
            debug!("{}: cache hit ({})", name, &hash[..12]);
            result.record = Some(record);
            result.cached = true;
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }

        match self.extract(document).await {
            Ok(extraction) => {
                info!(
                    "{}: extracted {} items in {}ms",
                    name,
                    extraction.record.items.len(),
                    start.elapsed().as_millis()
                );
                self.cache.insert(&hash, extraction.record.clone());
                result.ocr_lines = extraction.ocr_lines;
                result.input_tokens = extraction.generation.input_tokens;
                result.output_tokens = extraction.generation.output_tokens;
                result.record = Some(extraction.record);
            }
            Err(e) => {
                log_skipped(&e);
                result.error = Some(e);
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Process `documents` and aggregate the successes.
    ///
    /// Up to `config.concurrency` documents run at once. Results and rows are
    /// always in submission order, whatever order the work finishes in.
    pub async fn process_batch(&self, documents: Vec<UploadedDocument>) -> BatchOutput {
        self.run_batch(documents.into_iter().map(Ok).collect()).await
    }

    /// Resolve paths/URLs and process them as one batch.
    ///
    /// An input that cannot be read takes its slot as a skipped document;
    /// only an unsupported file type fails the whole call.
    pub async fn process_inputs<S: AsRef<str>>(&self, inputs: &[S]) -> Result<BatchOutput, IntakeError> {
        let slots = resolve_all(inputs, self.config.download_timeout_secs).await?;
        Ok(self.run_batch(slots).await)
    }

    async fn run_batch(&self, slots: Vec<Result<UploadedDocument, DocumentError>>) -> BatchOutput {
        let start = Instant::now();
        let total = slots.len();
        let progress = self.config.progress_callback.clone();

        if let Some(ref cb) = progress {
            cb.on_batch_start(total);
        }

        let results: Vec<DocumentResult> = stream::iter(slots.into_iter().enumerate().map(|(index, slot)| {
            let progress = progress.clone();
            async move {
                let mut result = match slot {
                    Ok(doc) => {
                        if let Some(ref cb) = progress {
                            cb.on_document_start(index, doc.name());
                        }
                        self.process_document(&doc).await
                    }
                    Err(error) => {
                        if let Some(ref cb) = progress {
                            cb.on_document_start(index, error.document_name());
                        }
                        log_skipped(&error);
                        DocumentResult::skipped(error)
                    }
                };
                result.index = index;
                if let Some(ref cb) = progress {
                    match (&result.record, &result.error) {
                        (Some(record), _) => cb.on_document_complete(index, &result.name, record.items.len()),
                        (None, Some(e)) => cb.on_document_skipped(index, &result.name, e),
                        (None, None) => {}
                    }
                }
                result
            }
        }))
        .buffered(self.config.concurrency)
        .collect()
        .await;

        let mut aggregator = Aggregator::new();
        let mut stats = BatchStats {
            total_documents: total,
            ..Default::default()
        };

        for result in &results {
            stats.total_input_tokens += result.input_tokens as u64;
            stats.total_output_tokens += result.output_tokens as u64;
            if result.cached {
                stats.cache_hits += 1;
            }
            match (&result.record, &result.error) {
                (Some(record), _) => {
                    aggregator.add(record);
                    stats.succeeded += 1;
                }
                (None, Some(e)) => {
                    stats.failed += 1;
                    if e.is_soft() {
                        stats.empty += 1;
                    }
                }
                (None, None) => stats.failed += 1,
            }
        }
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch complete: {}/{} documents succeeded, {}ms total",
            stats.succeeded, total, stats.total_duration_ms
        );

        if let Some(ref cb) = progress {
            cb.on_batch_complete(total, stats.succeeded);
        }

        BatchOutput {
            results,
            aggregator,
            stats,
        }
    }

    async fn extract(&self, document: &UploadedDocument) -> Result<Extraction, DocumentError> {
        let lines = extract_text(document, &self.recognizer, &self.config).await?;
        let prompt = build_prompt(&lines, self.config.prompt_template());
        debug!("{}: prompt is {} chars", document.name(), prompt.len());

        let generation = request(&self.generator, document.name(), &prompt, &self.config).await?;
        let record = normalize_response(&generation.text).map_err(|failure| DocumentError::Parse {
            name: document.name().to_string(),
            failure,
        })?;

        Ok(Extraction {
            record,
            ocr_lines: lines.len(),
            generation,
        })
    }
}

/// Resolve every input in order.
///
/// A missing file, unreadable file or failed download becomes
/// [`DocumentError::Unreadable`] in that input's slot. An unsupported file
/// type is rejected for the whole batch.
pub async fn resolve_all<S: AsRef<str>>(
    inputs: &[S],
    download_timeout_secs: u64,
) -> Result<Vec<Result<UploadedDocument, DocumentError>>, IntakeError> {
    let mut slots = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        match resolve_document(input, download_timeout_secs).await {
            Ok(document) => slots.push(Ok(document)),
            Err(e @ IntakeError::UnsupportedFileType { .. }) => return Err(e),
            Err(e) => {
                let detail = e.to_string().lines().next().unwrap_or_default().to_string();
                slots.push(Err(DocumentError::Unreadable {
                    name: input.to_string(),
                    detail,
                }));
            }
        }
    }
    Ok(slots)
}

/// Extract every input and write the spreadsheet to `output_path`.
///
/// Returns the batch so callers can report skipped documents. Fails with
/// [`IntakeError::NothingToExport`] when no document produced a record; the
/// output file is not created in that case.
pub async fn extract_to_file<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &IntakeConfig,
    recognizer: Arc<dyn TextRecognizer>,
) -> Result<BatchOutput, IntakeError> {
    let pipeline = Pipeline::new(config.clone(), recognizer)?;
    let batch = pipeline.process_inputs(inputs).await?;
    if batch.aggregator.is_empty() {
        return Err(IntakeError::NothingToExport {
            attempted: batch.results.len(),
        });
    }
    batch.aggregator.export_to_file(output_path).await?;
    Ok(batch)
}

fn log_skipped(error: &DocumentError) {
    match error {
        DocumentError::Parse { name, failure } => warn!(
            "Skipping {}: {}\n--- model response ---\n{}",
            name, failure.reason, failure.raw
        ),
        e if e.is_soft() => warn!("Skipping {}: no text recognised", e.document_name()),
        e => warn!("Skipping {}", e),
    }
}

/// Pick the text generator, from most to least specific.
///
/// 1. `config.generator`, used as-is.
/// 2. `config.provider_name` + `config.model` through
///    [`ProviderFactory::create_llm_provider`], which reads the provider's key
///    from its environment variable. A key given only in `config.api_key` is
///    exported to that variable first.
fn resolve_generator(config: &IntakeConfig) -> Result<Arc<dyn TextGenerator>, IntakeError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }

    if let Some(var) = credential_var(&config.provider_name) {
        let in_env = std::env::var(&var).map(|v| !v.trim().is_empty()).unwrap_or(false);
        match (&config.api_key, in_env) {
            (Some(key), false) => std::env::set_var(&var, key),
            (None, false) => return Err(IntakeError::MissingCredential { var }),
            _ => {}
        }
    }

    let provider = ProviderFactory::create_llm_provider(&config.provider_name, &config.model).map_err(|e| {
        IntakeError::ProviderNotConfigured {
            provider: config.provider_name.clone(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using {} model {}", config.provider_name, config.model);
    Ok(Arc::new(LlmTextGenerator::new(provider, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::{OcrError, OcrLine};
    use crate::pipeline::render::PageImage;

    struct NoOcr;

    impl TextRecognizer for NoOcr {
        fn recognize(&self, _page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn missing_credential_fails_before_any_call() {
        let config = IntakeConfig::builder()
            .provider_name("acme-unit-test")
            .build()
            .unwrap();
        let err = Pipeline::new(config, Arc::new(NoOcr)).err().unwrap();
        match err {
            IntakeError::MissingCredential { var } => assert_eq!(var, "ACME_UNIT_TEST_API_KEY"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn skipped_parse_failure_is_logged_without_panicking() {
        log_skipped(&DocumentError::Parse {
            name: "r.png".into(),
            failure: crate::error::ParseFailure::new(
                crate::error::ParseFailureReason::NotAnObject,
                "[]",
            ),
        });
    }
}
