//! # receipt2xlsx
//!
//! Turn photographed or scanned receipts into one spreadsheet row each.
//!
//! ## Pipeline Overview
//!
//! ```text
//! png / jpg / pdf
//!  │
//!  ├─ 1. Input      validate name, read file or download URL
//!  ├─ 2. Render     decode image, or rasterise PDF pages via pdfium
//!  ├─ 3. OCR        PaddleOCR models → reading-ordered text lines
//!  ├─ 4. Request    lines + prompt → generative model (Gemini by default)
//!  ├─ 5. Normalize  strip ```json fences, parse into a StructuredRecord
//!  └─ 6. Aggregate  one row per receipt → .xlsx
//! ```
//!
//! A document that fails at any stage is logged and left out; the rest of the
//! batch still lands in the spreadsheet.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt2xlsx::{extract_to_file, IntakeConfig, PaddleOcrRecognizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads GEMINI_API_KEY (and .env) and fails fast when it is missing.
//!     let config = IntakeConfig::from_env()?;
//!     let ocr = Arc::new(PaddleOcrRecognizer::from_dir("models".as_ref())?);
//!     let batch = extract_to_file(&["r1.jpg", "r2.pdf"], "receipts.xlsx", &config, ocr).await?;
//!     eprintln!("{}/{} receipts exported", batch.stats.succeeded, batch.stats.total_documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2xlsx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## PDF support
//!
//! PDFs are rendered with pdfium. Set `PDFIUM_LIB_PATH` to the directory or
//! file of `libpdfium`, or install it where the system loader finds it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod intake;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{Aggregator, TableRow, XLSX_MIME_TYPE};
pub use cache::RecordCache;
pub use config::{IntakeConfig, IntakeConfigBuilder};
pub use error::{DocumentError, IntakeError, ParseFailure, ParseFailureReason};
pub use intake::{extract_to_file, Pipeline};
pub use output::{BatchOutput, BatchStats, DocumentResult};
pub use pipeline::input::UploadedDocument;
pub use pipeline::llm::{Generation, GenerationError, LlmTextGenerator, TextGenerator};
pub use pipeline::ocr::{OcrError, OcrLine, PaddleOcrRecognizer, TextRecognizer};
pub use progress::{IntakeProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{LineItem, StructuredRecord};
