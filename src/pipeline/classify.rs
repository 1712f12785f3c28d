//! File classification by extension.

use super::input::extension_of;
use serde::{Deserialize, Serialize};

/// How a document has to be turned into page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A single decodable image (png, jpg, jpeg).
    RasterImage,
    /// A multi-page document whose pages must be rasterised (pdf).
    PagedDocument,
}

/// Classify a file by its (case-insensitive) extension.
///
/// The upload boundary has already rejected unsupported names, so anything
/// that is not a PDF is treated as a raster image.
pub fn classify(name: &str) -> DocumentKind {
    match extension_of(name).as_deref() {
        Some("pdf") => DocumentKind::PagedDocument,
        _ => DocumentKind::RasterImage,
    }
}
