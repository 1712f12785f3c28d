//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn IntakeProgressCallback>`] via
//! [`crate::config::IntakeConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a batch. The CLI uses this to drive
//! its progress bar; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use receipt2xlsx::{IntakeConfig, IntakeProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl IntakeProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, name: &str, items: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {items} line items");
//!     }
//! }
//!
//! let config = IntakeConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::DocumentError;
use std::sync::Arc;

/// Called by the pipeline as it processes each document.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the
/// per-document methods may be called from several tasks at once. All
/// methods default to no-ops.
pub trait IntakeProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the pipeline.
    ///
    /// `index` is the 0-based submission position.
    fn on_document_start(&self, index: usize, name: &str) {
        let _ = (index, name);
    }

    /// Called when a document produced a record.
    fn on_document_complete(&self, index: usize, name: &str, item_count: usize) {
        let _ = (index, name, item_count);
    }

    /// Called when a document was dropped from the batch.
    fn on_document_skipped(&self, index: usize, name: &str, error: &DocumentError) {
        let _ = (index, name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, succeeded: usize) {
        let _ = (total_documents, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IntakeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IntakeConfig`].
pub type ProgressCallback = Arc<dyn IntakeProgressCallback>;
