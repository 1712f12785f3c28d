//! Text recognition: page images → ordered text lines.
//!
//! The OCR engine sits behind [`TextRecognizer`] so the pipeline can be
//! driven by a fake in tests and by [`PaddleOcrRecognizer`] in production.
//! Recognition is CPU-bound and runs on the blocking pool, bounded by
//! [`IntakeConfig::ocr_timeout_secs`].

use super::input::UploadedDocument;
use super::render::{render_pages, PageImage};
use crate::config::IntakeConfig;
use crate::error::{DocumentError, Stage};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Errors raised by an OCR engine.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Model files missing or unreadable.
    #[error("failed to load OCR models: {0}")]
    ModelLoad(String),

    /// The engine failed on an image.
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// One recognised line. Confidence is reported by the engine but unused
/// downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub confidence: Option<f64>,
}

impl OcrLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }
}

/// An OCR capability: one image in, reading-ordered lines out.
///
/// Returning an empty vector is not an error; the caller decides what an
/// empty page means.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError>;
}

/// Render `document` and recognise every page, concatenating lines in page
/// order.
///
/// Returns [`DocumentError::EmptyOcrResult`] when no page yields any text, so
/// an empty prompt is never sent to the model.
pub async fn extract_text(
    document: &UploadedDocument,
    recognizer: &Arc<dyn TextRecognizer>,
    config: &IntakeConfig,
) -> Result<Vec<String>, DocumentError> {
    let name = document.name().to_string();
    let budget = Duration::from_secs(config.ocr_timeout_secs);
    let start = Instant::now();

    let work = async {
        let pages = render_pages(document, config).await?;
        let recognizer = Arc::clone(recognizer);
        let task_name = name.clone();
        tokio::task::spawn_blocking(move || recognize_pages(&task_name, recognizer.as_ref(), &pages))
            .await
            .map_err(|e| DocumentError::Ocr {
                name: name.clone(),
                detail: format!("OCR task panicked: {e}"),
            })?
    };

    // The blocking OCR thread keeps running after a timeout; we only stop
    // waiting for it.
    let lines = tokio::time::timeout(budget, work)
        .await
        .map_err(|_| DocumentError::Timeout {
            name: name.clone(),
            stage: Stage::Ocr,
            secs: config.ocr_timeout_secs,
        })??;

    if lines.is_empty() {
        return Err(DocumentError::EmptyOcrResult { name });
    }

    info!(
        "{}: recognised {} lines in {}ms",
        name,
        lines.len(),
        start.elapsed().as_millis()
    );
    Ok(lines)
}

/// Recognise pages in order, dropping blank lines.
pub fn recognize_pages(
    name: &str,
    recognizer: &dyn TextRecognizer,
    pages: &[PageImage],
) -> Result<Vec<String>, DocumentError> {
    let mut lines = Vec::new();
    for page in pages {
        let recognised = recognizer.recognize(page).map_err(|e| DocumentError::Ocr {
            name: name.to_string(),
            detail: format!("page {}: {e}", page.page_num),
        })?;
        debug!("{}: page {} → {} lines", name, page.page_num, recognised.len());
        lines.extend(
            recognised
                .into_iter()
                .map(|l| l.text.trim().to_string())
                .filter(|t| !t.is_empty()),
        );
    }
    Ok(lines)
}

// ── PaddleOCR via pure-onnx-ocr ──────────────────────────────────────────

/// File names expected inside the model directory.
pub const DETECTION_MODEL: &str = "det.onnx";
pub const RECOGNITION_MODEL: &str = "rec.onnx";
pub const DICTIONARY: &str = "dict.txt";

/// Text boxes whose top edges are within this many pixels share a row.
const ROW_TOLERANCE_PX: f64 = 12.0;

/// One page sent to the OCR thread, with the channel its answer goes back on.
struct OcrJob {
    page: PageImage,
    reply: oneshot::Sender<Result<Vec<OcrLine>, OcrError>>,
}

/// PaddleOCR detection + recognition models run by `pure-onnx-ocr`.
///
/// The engine is not `Send`, so it is built on and owned by a dedicated
/// thread. [`TextRecognizer::recognize`] queues the page and blocks until
/// that thread replies; pages are recognised one at a time. The thread exits
/// when the recognizer is dropped.
pub struct PaddleOcrRecognizer {
    jobs: mpsc::Sender<OcrJob>,
}

impl PaddleOcrRecognizer {
    /// Load `det.onnx`, `rec.onnx` and `dict.txt` from `model_dir`.
    pub fn from_dir(model_dir: &Path) -> Result<Self, OcrError> {
        for file in [DETECTION_MODEL, RECOGNITION_MODEL, DICTIONARY] {
            let path = model_dir.join(file);
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!("{} not found", path.display())));
            }
        }

        let (jobs, queue) = mpsc::channel::<OcrJob>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), OcrError>>(1);
        let dir = model_dir.to_path_buf();

        std::thread::Builder::new()
            .name("paddle-ocr".into())
            .spawn(move || {
                let engine = match pure_onnx_ocr::engine::OcrEngineBuilder::new()
                    .det_model_path(dir.join(DETECTION_MODEL))
                    .rec_model_path(dir.join(RECOGNITION_MODEL))
                    .dictionary_path(dir.join(DICTIONARY))
                    .build()
                {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(OcrError::ModelLoad(format!("pure-onnx-ocr: {e}"))));
                        return;
                    }
                };
                while let Ok(job) = queue.recv() {
                    let _ = job.reply.send(run_engine(&engine, &job.page));
                }
                debug!("OCR thread stopped");
            })
            .map_err(|e| OcrError::ModelLoad(format!("could not start OCR thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| OcrError::ModelLoad("OCR thread exited while loading models".into()))??;

        info!("Loaded PaddleOCR models from {}", model_dir.display());
        Ok(Self { jobs })
    }
}

impl TextRecognizer for PaddleOcrRecognizer {
    /// Blocks the calling thread; call it from the blocking pool.
    fn recognize(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(OcrJob {
                page: page.clone(),
                reply,
            })
            .map_err(|_| OcrError::Recognition("OCR thread is not running".into()))?;
        answer
            .blocking_recv()
            .map_err(|_| OcrError::Recognition("OCR thread dropped the request".into()))?
    }
}

fn run_engine(engine: &pure_onnx_ocr::engine::OcrEngine, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
    let results = engine
        .run_from_image(&page.image)
        .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {e}")))?;

    let mut boxes: Vec<(f64, f64, OcrLine)> = results
        .iter()
        .map(|r| {
            let (x, y) = top_left(&r.bounding_box);
            let line = OcrLine {
                text: r.text.replace("[UNK]", " "),
                confidence: Some(f64::from(r.confidence)),
            };
            (x, y, line)
        })
        .collect();

    boxes.sort_by(|a, b| reading_order((a.0, a.1), (b.0, b.1)));
    Ok(boxes.into_iter().map(|(_, _, line)| line).collect())
}

fn top_left(polygon: &pure_onnx_ocr::Polygon<f64>) -> (f64, f64) {
    polygon
        .exterior()
        .coords()
        .fold((f64::MAX, f64::MAX), |(x, y), c| (x.min(c.x), y.min(c.y)))
}

/// Top-to-bottom, then left-to-right within a row.
fn reading_order(a: (f64, f64), b: (f64, f64)) -> Ordering {
    let row_a = (a.1 / ROW_TOLERANCE_PX).floor() as i64;
    let row_b = (b.1 / ROW_TOLERANCE_PX).floor() as i64;
    row_a
        .cmp(&row_b)
        .then_with(|| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    /// Returns one canned line set per page, keyed by page number.
    struct PerPage(Vec<Vec<&'static str>>);

    impl TextRecognizer for PerPage {
        fn recognize(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
            Ok(self.0[page.page_num - 1].iter().map(|t| OcrLine::new(*t)).collect())
        }
    }

    struct Failing;

    impl TextRecognizer for Failing {
        fn recognize(&self, _page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
            Err(OcrError::Recognition("engine crashed".into()))
        }
    }

    fn page(n: usize) -> PageImage {
        PageImage {
            page_num: n,
            image: DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
        }
    }

    #[test]
    fn pages_concatenate_in_order() {
        let ocr = PerPage(vec![vec!["STORE", "ADDR"], vec!["TOTAL 9.00"]]);
        let lines = recognize_pages("r.pdf", &ocr, &[page(1), page(2)]).unwrap();
        assert_eq!(lines, vec!["STORE", "ADDR", "TOTAL 9.00"]);
    }

    #[test]
    fn blank_lines_dropped() {
        let ocr = PerPage(vec![vec!["  ", "A ", ""]]);
        let lines = recognize_pages("r.png", &ocr, &[page(1)]).unwrap();
        assert_eq!(lines, vec!["A"]);
    }

    #[test]
    fn engine_failure_names_page() {
        let err = recognize_pages("r.pdf", &Failing, &[page(1)]).unwrap_err();
        assert!(matches!(err, DocumentError::Ocr { ref detail, .. } if detail.contains("page 1")));
    }

    #[test]
    fn reading_order_rows_then_columns() {
        let mut points = vec![(200.0, 3.0), (10.0, 40.0), (5.0, 0.0), (90.0, 41.0)];
        points.sort_by(|a, b| reading_order(*a, *b));
        assert_eq!(points, vec![(5.0, 0.0), (200.0, 3.0), (10.0, 40.0), (90.0, 41.0)]);
    }

    #[test]
    fn paddle_recognizer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PaddleOcrRecognizer>();
    }

    #[test]
    fn missing_model_dir_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PaddleOcrRecognizer::from_dir(dir.path()).err().unwrap();
        assert!(matches!(err, OcrError::ModelLoad(ref m) if m.contains(DETECTION_MODEL)));
    }

    #[tokio::test]
    async fn empty_recognition_is_soft_error() {
        let ocr: Arc<dyn TextRecognizer> = Arc::new(PerPage(vec![vec![]]));
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let doc = UploadedDocument::new("blank.png", png).unwrap();

        let err = extract_text(&doc, &ocr, &IntakeConfig::default()).await.unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.document_name(), "blank.png");
    }
}
