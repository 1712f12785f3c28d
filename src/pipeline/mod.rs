//! Pipeline stages for receipt extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; [`crate::intake`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ classify ──▶ render ──▶ ocr ──▶ llm ──▶ normalize
//! (path/URL)  (by ext)   (pdfium)  (Paddle) (JSON)  (record)
//! ```
//!
//! 1. [`input`]: validate the file name and load the bytes
//! 2. [`classify`]: raster image or paged document
//! 3. [`render`]: decode or rasterise; pdfium runs in `spawn_blocking`
//! 4. [`ocr`]: recognise text lines in reading order
//! 5. [`llm`]: ask the model for JSON with retry/backoff; the only
//!    stage with network I/O besides URL downloads
//! 6. [`normalize`]: strip code fences and parse into a record

pub mod classify;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod render;
