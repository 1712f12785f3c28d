//! Pipeline integration tests.
//!
//! OCR and the model are replaced by fakes so every scenario runs offline:
//! the fake recogniser reads a receipt id from the image width, and the fake
//! generator answers according to the store name found in the prompt.

use async_trait::async_trait;
use calamine::{open_workbook_auto, DataType, Reader};
use image::{DynamicImage, ImageFormat, RgbImage};
use pretty_assertions::assert_eq;
use receipt2xlsx::aggregate::COLUMN_HEADERS;
use receipt2xlsx::pipeline::render::PageImage;
use receipt2xlsx::{
    extract_to_file, DocumentError, Generation, GenerationError, IntakeConfig, IntakeError, IntakeProgressCallback,
    LineItem, OcrError, OcrLine, ParseFailureReason, Pipeline, StructuredRecord, TextGenerator, TextRecognizer,
    UploadedDocument,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Maps image width to the lines "printed" on that receipt.
struct FakeOcr {
    pages: HashMap<u32, Vec<&'static str>>,
}

impl FakeOcr {
    fn standard() -> Self {
        let mut pages = HashMap::new();
        pages.insert(1, vec!["STORE ALPHA", "TOTAL 2.00"]);
        pages.insert(2, vec!["STORE BETA", "TOTAL 9.90"]);
        pages.insert(3, vec!["STORE GAMMA", "TOTAL 60.30"]);
        pages.insert(4, vec!["STORE PROSE"]);
        pages.insert(5, vec!["STORE FENCED"]);
        pages.insert(9, vec![]);
        Self { pages }
    }
}

impl TextRecognizer for FakeOcr {
    fn recognize(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
        self.pages
            .get(&page.width())
            .map(|lines| lines.iter().map(|l| OcrLine::new(*l)).collect())
            .ok_or_else(|| OcrError::Recognition(format!("no fixture for width {}", page.width())))
    }
}

/// Answers by store name; counts calls; optionally slows down early stores.
struct FakeModel {
    calls: AtomicUsize,
    delays: HashMap<&'static str, u64>,
}

impl FakeModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delays: HashMap::new(),
        })
    }

    fn with_delays(delays: &[(&'static str, u64)]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delays: delays.iter().copied().collect(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeModel {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let store = ["ALPHA", "BETA", "GAMMA", "PROSE", "FENCED"]
            .into_iter()
            .find(|s| prompt.contains(&format!("STORE {s}")))
            .ok_or_else(|| GenerationError::Permanent("unknown receipt".into()))?;

        if let Some(ms) = self.delays.get(store) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }

        let text = match store {
            "ALPHA" => r#"{"store_name":"A","items":[{"name":"X","quantity":"1","unit_price":"2.00","total_price":"2.00"}]}"#
                .to_string(),
            "PROSE" => "Sorry, I cannot read this receipt.".to_string(),
            "FENCED" => "```json\n{\"store_name\":\"Fenced Mart\",\"final_total\":\"RM 5.00\"}\n```".to_string(),
            other => format!(r#"{{"store_name":"{other}","final_total":"1.00"}}"#),
        };
        Ok(Generation {
            text,
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A PNG whose width identifies the receipt to [`FakeOcr`].
fn receipt_png(id: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(id, 2))
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn doc(name: &str, id: u32) -> UploadedDocument {
    UploadedDocument::new(name, receipt_png(id)).unwrap()
}

fn broken(name: &str) -> UploadedDocument {
    UploadedDocument::new(name, b"definitely not an image".to_vec()).unwrap()
}

fn pipeline_with(model: Arc<FakeModel>, concurrency: usize) -> Pipeline {
    let config = IntakeConfig::builder()
        .generator(model)
        .concurrency(concurrency)
        .max_retries(0)
        .build()
        .unwrap();
    Pipeline::new(config, Arc::new(FakeOcr::standard())).unwrap()
}

// ── Batch semantics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn single_receipt_produces_one_row() {
    let pipeline = pipeline_with(FakeModel::new(), 1);
    let batch = pipeline.process_batch(vec![doc("r1.png", 1)]).await;

    assert_eq!(batch.aggregator.len(), 1);
    let row = &batch.aggregator.rows()[0];
    assert_eq!(row.store_name, "A");
    assert_eq!(row.items, "X (Qty: 1, Price: 2.00, Total: 2.00)");
    assert_eq!(row.address, "");
    assert_eq!(
        batch.results[0].record.as_ref().unwrap().items,
        vec![LineItem {
            name: Some("X".into()),
            quantity: Some("1".into()),
            unit_price: Some("2.00".into()),
            total_price: Some("2.00".into()),
        }]
    );
}

#[tokio::test]
async fn failing_document_is_skipped_and_order_kept() {
    let pipeline = pipeline_with(FakeModel::new(), 1);
    let batch = pipeline
        .process_batch(vec![doc("a.png", 2), broken("b.jpg"), doc("c.png", 3)])
        .await;

    let stores: Vec<_> = batch.aggregator.rows().iter().map(|r| r.store_name.as_str()).collect();
    assert_eq!(stores, vec!["BETA", "GAMMA"]);

    assert_eq!(batch.results.len(), 3);
    assert!(matches!(
        batch.results[1].error,
        Some(DocumentError::Decode { ref name, .. }) if name == "b.jpg"
    ));
    assert_eq!(batch.stats.succeeded, 2);
    assert_eq!(batch.stats.failed, 1);
    assert!(batch.export().is_ok());
}

#[tokio::test]
async fn corrupt_pdf_is_skipped_and_order_kept() {
    let pipeline = pipeline_with(FakeModel::new(), 2);
    let pdf = UploadedDocument::new("scan.pdf", b"%PDF-1.4\nnot really a pdf".to_vec()).unwrap();
    let batch = pipeline.process_batch(vec![doc("a.png", 2), pdf, doc("c.png", 3)]).await;

    let stores: Vec<_> = batch.aggregator.rows().iter().map(|r| r.store_name.as_str()).collect();
    assert_eq!(stores, vec!["BETA", "GAMMA"]);
    assert!(matches!(
        batch.results[1].error,
        Some(DocumentError::Decode { ref name, .. }) if name == "scan.pdf"
    ));
    assert_eq!(batch.stats.failed, 1);
}

#[tokio::test]
async fn missing_input_is_skipped_and_rest_processed() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.png");
    let missing = dir.path().join("missing.png");
    std::fs::write(&good, receipt_png(1)).unwrap();

    let pipeline = pipeline_with(FakeModel::new(), 1);
    let inputs = [good, missing].map(|p| p.to_string_lossy().to_string());
    let batch = pipeline.process_inputs(&inputs).await.unwrap();

    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.aggregator.len(), 1);
    assert_eq!(batch.aggregator.rows()[0].store_name, "A");
    match &batch.results[1].error {
        Some(DocumentError::Unreadable { name, .. }) => assert!(name.ends_with("missing.png")),
        other => panic!("expected Unreadable, got {other:?}"),
    }
    assert_eq!(batch.results[1].index, 1);
    assert_eq!(batch.stats.failed, 1);
}

#[tokio::test]
async fn all_failures_mean_nothing_to_export() {
    let pipeline = pipeline_with(FakeModel::new(), 1);
    let batch = pipeline.process_batch(vec![broken("x.png"), doc("blank.png", 9)]).await;

    assert!(batch.aggregator.is_empty());
    match batch.export() {
        Err(IntakeError::NothingToExport { attempted }) => assert_eq!(attempted, 2),
        other => panic!("expected NothingToExport, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_ocr_never_reaches_the_model() {
    let model = FakeModel::new();
    let pipeline = pipeline_with(model.clone(), 1);
    let batch = pipeline.process_batch(vec![doc("blank.png", 9), doc("r1.png", 1)]).await;

    assert!(matches!(batch.results[0].error, Some(DocumentError::EmptyOcrResult { .. })));
    assert_eq!(batch.stats.empty, 1);
    assert_eq!(batch.aggregator.len(), 1);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn prose_response_is_a_parse_failure() {
    let pipeline = pipeline_with(FakeModel::new(), 1);
    let batch = pipeline.process_batch(vec![doc("prose.png", 4), doc("r1.png", 1)]).await;

    match &batch.results[0].error {
        Some(DocumentError::Parse { name, failure }) => {
            assert_eq!(name, "prose.png");
            assert!(matches!(failure.reason, ParseFailureReason::InvalidJson(_)));
            assert_eq!(failure.raw, "Sorry, I cannot read this receipt.");
        }
        other => panic!("expected parse failure, got {other:?}"),
    }
    assert_eq!(batch.aggregator.len(), 1);
}

#[tokio::test]
async fn fenced_response_is_accepted() {
    let pipeline = pipeline_with(FakeModel::new(), 1);
    let result = pipeline.process_document(&doc("fenced.jpg", 5)).await;

    assert_eq!(
        result.record,
        Some(StructuredRecord {
            store_name: Some("Fenced Mart".into()),
            final_total: Some("RM 5.00".into()),
            ..Default::default()
        })
    );
    assert_eq!(result.ocr_lines, 1);
    assert_eq!(result.input_tokens, 100);
}

#[tokio::test]
async fn concurrent_batch_keeps_submission_order() {
    // The first receipt answers last.
    let model = FakeModel::with_delays(&[("ALPHA", 150), ("BETA", 50)]);
    let pipeline = pipeline_with(model, 3);
    let batch = pipeline
        .process_batch(vec![doc("1.png", 1), doc("2.png", 2), doc("3.png", 3)])
        .await;

    let stores: Vec<_> = batch.aggregator.rows().iter().map(|r| r.store_name.as_str()).collect();
    assert_eq!(stores, vec!["A", "BETA", "GAMMA"]);
    let indices: Vec<_> = batch.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_bytes_hit_the_cache_under_another_name() {
    let model = FakeModel::new();
    let pipeline = pipeline_with(model.clone(), 1);
    let batch = pipeline
        .process_batch(vec![doc("monday.png", 2), doc("copy-of-monday.png", 2)])
        .await;

    assert_eq!(model.calls(), 1);
    assert!(!batch.results[0].cached);
    assert!(batch.results[1].cached);
    assert_eq!(batch.stats.cache_hits, 1);
    assert_eq!(batch.aggregator.len(), 2);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let model = FakeModel::new();
    let pipeline = pipeline_with(model.clone(), 1);
    pipeline.process_batch(vec![doc("prose.png", 4)]).await;
    pipeline.process_batch(vec![doc("prose.png", 4)]).await;

    assert_eq!(model.calls(), 2);
    assert!(pipeline.cache().is_empty());
}

#[tokio::test]
async fn invalidated_entry_is_recomputed() {
    let model = FakeModel::new();
    let pipeline = pipeline_with(model.clone(), 1);
    let receipt = doc("r.png", 3);

    pipeline.process_document(&receipt).await;
    assert!(pipeline.cache().invalidate(&receipt.content_hash()));
    let again = pipeline.process_document(&receipt).await;

    assert!(!again.cached);
    assert_eq!(model.calls(), 2);
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl IntakeProgressCallback for Recorder {
    fn on_batch_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("start {total}"));
    }

    fn on_document_complete(&self, index: usize, name: &str, item_count: usize) {
        self.events.lock().unwrap().push(format!("ok {index} {name} {item_count}"));
    }

    fn on_document_skipped(&self, index: usize, name: &str, _error: &DocumentError) {
        self.events.lock().unwrap().push(format!("skip {index} {name}"));
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.events.lock().unwrap().push(format!("done {succeeded}/{total}"));
    }
}

#[tokio::test]
async fn progress_events_follow_the_batch() {
    let recorder = Arc::new(Recorder::default());
    let config = IntakeConfig::builder()
        .generator(FakeModel::new())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, Arc::new(FakeOcr::standard())).unwrap();

    pipeline.process_batch(vec![doc("r1.png", 1), broken("bad.png")]).await;

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["start 2", "ok 0 r1.png 1", "skip 1 bad.png", "done 1/2"]
    );
}

// ── Configuration ────────────────────────────────────────────────────────────

#[test]
fn missing_credential_fails_before_processing() {
    let config = IntakeConfig::builder()
        .provider_name("receipt-test-cloud")
        .build()
        .unwrap();
    let err = Pipeline::new(config, Arc::new(FakeOcr::standard())).err().unwrap();
    assert!(matches!(
        err,
        IntakeError::MissingCredential { ref var } if var == "RECEIPT_TEST_CLOUD_API_KEY"
    ));
    assert!(err.to_string().contains("RECEIPT_TEST_CLOUD_API_KEY"));
}

// ── File export ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_to_file_writes_readable_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.png");
    let bad = dir.path().join("bad.jpg");
    let third = dir.path().join("third.png");
    std::fs::write(&first, receipt_png(1)).unwrap();
    std::fs::write(&bad, b"garbage").unwrap();
    std::fs::write(&third, receipt_png(3)).unwrap();
    let out = dir.path().join("out/receipts.xlsx");

    let config = IntakeConfig::builder().generator(FakeModel::new()).build().unwrap();
    let inputs = [first, bad, third].map(|p| p.to_string_lossy().to_string());
    let batch = extract_to_file(&inputs, &out, &config, Arc::new(FakeOcr::standard()))
        .await
        .unwrap();
    assert_eq!(batch.stats.succeeded, 2);

    let mut workbook = open_workbook_auto(&out).unwrap();
    let range = workbook.worksheet_range("Receipts").unwrap();
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|c| c.as_string().unwrap_or_default()).collect())
        .collect();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], COLUMN_HEADERS.map(String::from).to_vec());
    assert_eq!(rows[1][0], "A");
    assert_eq!(rows[1][10], "X (Qty: 1, Price: 2.00, Total: 2.00)");
    assert_eq!(rows[2][0], "GAMMA");
    assert_eq!(rows[2][7], "1.00");
}

#[tokio::test]
async fn extract_to_file_with_no_rows_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.png");
    std::fs::write(&bad, b"garbage").unwrap();
    let out = dir.path().join("receipts.xlsx");

    let config = IntakeConfig::builder().generator(FakeModel::new()).build().unwrap();
    let err = extract_to_file(&[bad.to_string_lossy()], &out, &config, Arc::new(FakeOcr::standard()))
        .await
        .unwrap_err();

    assert!(matches!(err, IntakeError::NothingToExport { attempted: 1 }));
    assert!(!out.exists());
}

#[tokio::test]
async fn unsupported_input_is_rejected_up_front() {
    let config = IntakeConfig::builder().generator(FakeModel::new()).build().unwrap();
    let err = extract_to_file(&["notes.txt"], "unused.xlsx", &config, Arc::new(FakeOcr::standard()))
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::UnsupportedFileType { ref name } if name == "notes.txt"));
}
