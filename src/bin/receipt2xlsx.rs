//! CLI binary for receipt2xlsx.
//!
//! A thin shim over the library crate that maps CLI flags to `IntakeConfig`,
//! runs one batch and writes the spreadsheet.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use receipt2xlsx::config::{credential_var, DEFAULT_MODEL, DEFAULT_PROVIDER};
use receipt2xlsx::{
    BatchOutput, DocumentError, IntakeConfig, IntakeError, IntakeProgressCallback, PaddleOcrRecognizer, Pipeline,
    ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Exit status when every document was skipped.
const EXIT_NOTHING_TO_EXPORT: i32 = 2;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per receipt. Lines are printed as
/// documents finish, which with `--concurrency > 1` may be out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} receipts  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            skipped: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IntakeProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_documents} receipts…"))
        ));
    }

    fn on_document_start(&self, index: usize, name: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, name: &str, item_count: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<32}  {:<10}  {}",
            green("✓"),
            name,
            dim(&format!("{item_count:>3} items")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_skipped(&self, index: usize, name: &str, error: &DocumentError) {
        let secs = self.elapsed_secs(index);
        self.skipped.fetch_add(1, Ordering::SeqCst);

        let reason = skip_reason(error);
        let (mark, reason) = if error.is_soft() {
            (yellow("–"), yellow(&reason))
        } else {
            (red("✗"), red(&reason))
        };
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            mark,
            name,
            reason,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if skipped == 0 {
            eprintln!("{} {} receipts extracted", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} receipts extracted  ({} skipped)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_documents,
                red(&skipped.to_string()),
            );
        }
    }
}

/// One-line reason, without the file name the line already shows.
fn skip_reason(error: &DocumentError) -> String {
    let full = error.to_string();
    let prefix = format!("{}: ", error.document_name());
    let reason = full.strip_prefix(&prefix).unwrap_or(&full);
    let first_line = reason.lines().next().unwrap_or_default();
    if first_line.chars().count() > 80 {
        format!("{}…", first_line.chars().take(79).collect::<String>())
    } else {
        first_line.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a folder of receipt photos
  receipt2xlsx scans/*.jpg -o receipts.xlsx

  # Mixed images and PDFs, four at a time
  receipt2xlsx r1.png r2.pdf r3.jpeg --concurrency 4

  # Different provider and model
  receipt2xlsx --provider openai --model gpt-4.1-mini receipt.jpg

  # Rows as JSON on stdout instead of a spreadsheet
  receipt2xlsx --json receipt.jpg > rows.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY             Google Gemini API key (default provider)
  <PROVIDER>_API_KEY         Key for any other provider, e.g. OPENAI_API_KEY
  RECEIPT2XLSX_PROVIDER      Provider name
  RECEIPT2XLSX_MODEL         Model id
  RECEIPT2XLSX_OCR_MODELS    Directory holding det.onnx, rec.onnx and dict.txt
  PDFIUM_LIB_PATH            Path to libpdfium, needed for PDF input

  A .env file in the working directory is loaded first.

EXIT STATUS:
  0  spreadsheet written
  1  fatal error (bad input, missing key, unreadable models)
  2  every receipt was skipped; nothing to export
"#;

/// Extract receipt fields into a spreadsheet using OCR and an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2xlsx",
    version,
    about = "Extract receipt photos and PDFs into an .xlsx spreadsheet",
    long_about = "Run OCR on receipt images (png, jpg, jpeg) and PDFs, ask a generative model to \
turn the text into structured fields, and write one spreadsheet row per receipt. Receipts that \
fail at any stage are reported and left out.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Receipt files or HTTP/HTTPS URLs (png, jpg, jpeg, pdf).
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Spreadsheet to write.
    #[arg(short, long, env = "RECEIPT2XLSX_OUTPUT", default_value = "receipts.xlsx")]
    output: PathBuf,

    /// LLM model ID.
    #[arg(long, env = "RECEIPT2XLSX_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// LLM provider: gemini, openai, anthropic, ollama, …
    #[arg(long, env = "RECEIPT2XLSX_PROVIDER", default_value = DEFAULT_PROVIDER)]
    provider: String,

    /// Directory with the PaddleOCR ONNX models.
    #[arg(long, env = "RECEIPT2XLSX_OCR_MODELS", default_value = "models")]
    ocr_models: PathBuf,

    /// Receipts processed at once.
    #[arg(short, long, env = "RECEIPT2XLSX_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u16).range(1..=64))]
    concurrency: u16,

    /// Retries per receipt on LLM failure.
    #[arg(long, env = "RECEIPT2XLSX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt LLM call timeout in seconds.
    #[arg(long, env = "RECEIPT2XLSX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Time budget for OCR of one receipt, in seconds.
    #[arg(long, env = "RECEIPT2XLSX_OCR_TIMEOUT", default_value_t = 120)]
    ocr_timeout: u64,

    /// PDF render scale (1.0 = 72 DPI).
    #[arg(long, env = "RECEIPT2XLSX_SCALE", default_value_t = 1.0)]
    scale: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "RECEIPT2XLSX_PASSWORD")]
    password: Option<String>,

    /// Text file with a custom prompt; must contain {receipt_text}.
    #[arg(long, env = "RECEIPT2XLSX_PROMPT")]
    prompt: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "RECEIPT2XLSX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print rows as JSON on stdout instead of writing the spreadsheet.
    #[arg(long, env = "RECEIPT2XLSX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "RECEIPT2XLSX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECEIPT2XLSX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RECEIPT2XLSX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing so .env values feed the `env = ...` flag defaults.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports every receipt; keep library logs to
    // errors while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IntakeProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    let recognizer = PaddleOcrRecognizer::from_dir(&cli.ocr_models)
        .map_err(IntakeError::from)
        .with_context(|| {
            format!(
                "Failed to load OCR models from {} (set --ocr-models)",
                cli.ocr_models.display()
            )
        })?;

    let pipeline = Pipeline::new(config, Arc::new(recognizer)).context("Failed to set up the pipeline")?;

    let batch = pipeline
        .process_inputs(&cli.inputs)
        .await
        .context("Failed to read inputs")?;

    if !show_progress && !cli.quiet {
        for error in batch.skipped() {
            eprintln!("{} skipped {}", yellow("⚠"), error);
        }
    }

    let written = if cli.json {
        batch.export_json().map(|json| println!("{json}"))
    } else {
        write_spreadsheet(&batch, &cli).await
    };

    match written {
        Ok(()) => Ok(()),
        Err(IntakeError::NothingToExport { attempted }) => {
            eprintln!(
                "{} Nothing to export: none of the {} receipts could be extracted.",
                red("✘"),
                attempted
            );
            std::process::exit(EXIT_NOTHING_TO_EXPORT);
        }
        Err(e) => Err(e).context("Export failed"),
    }
}

async fn write_spreadsheet(batch: &BatchOutput, cli: &Cli) -> Result<(), IntakeError> {
    if batch.aggregator.is_empty() {
        return Err(IntakeError::NothingToExport {
            attempted: batch.results.len(),
        });
    }
    let rows = batch.aggregator.export_to_file(&cli.output).await?;

    if !cli.quiet {
        let stats = &batch.stats;
        eprintln!(
            "{}  {}/{} receipts  {}ms  →  {}",
            if stats.failed == 0 { green("✔") } else { cyan("⚠") },
            rows,
            stats.total_documents,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
    }
    Ok(())
}

/// Map CLI args to `IntakeConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IntakeConfig> {
    let mut builder = IntakeConfig::builder()
        .provider_name(&cli.provider)
        .model(&cli.model)
        .concurrency(usize::from(cli.concurrency))
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .ocr_timeout_secs(cli.ocr_timeout)
        .render_scale(cli.scale)
        .download_timeout_secs(cli.download_timeout);

    if let Some(var) = credential_var(&cli.provider) {
        if let Some(key) = std::env::var(&var).ok().filter(|k| !k.trim().is_empty()) {
            builder = builder.api_key(key);
        }
    }

    if let Some(ref path) = cli.prompt {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
