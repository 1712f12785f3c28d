//! Configuration types for receipt extraction runs.
//!
//! All run behaviour is controlled through [`IntakeConfig`], built via its
//! [`IntakeConfigBuilder`] or loaded with [`IntakeConfig::from_env`]. The
//! config is constructed once at startup and passed by reference into every
//! pipeline stage; no stage reads the process environment on its own.

use crate::error::IntakeError;
use crate::pipeline::llm::TextGenerator;
use crate::progress::ProgressCallback;
use crate::prompts::RECEIPT_TEXT_PLACEHOLDER;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Model used when none is named.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

/// Configuration for an extraction run.
///
/// # Example
/// ```rust
/// use receipt2xlsx::IntakeConfig;
///
/// let config = IntakeConfig::builder()
///     .api_key("test-key")
///     .model("gemini-1.5-flash-latest")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 2);
/// ```
#[derive(Clone)]
pub struct IntakeConfig {
    /// LLM provider name (e.g. "gemini", "openai", "anthropic", "ollama"). Default: "gemini".
    pub provider_name: String,

    /// LLM model identifier. Default: "gemini-1.5-flash-latest".
    pub model: String,

    /// Secret credential for the provider. Required unless `generator` is set
    /// or the provider is local (ollama, lmstudio).
    pub api_key: Option<String>,

    /// Pre-constructed text generator. Takes precedence over `provider_name`.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on a transient LLM failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-attempt LLM call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Time budget for rendering and recognising one document. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Page render scale relative to the PDF's intrinsic size (1.0 = 72 DPI). Default: 1.0.
    pub render_scale: f32,

    /// Cap on either dimension of a rendered page, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Documents processed at once. Default: 1 (strictly sequential).
    ///
    /// Output order is always submission order, whatever the concurrency.
    pub concurrency: usize,

    /// Custom prompt template. Must contain `{receipt_text}`.
    pub prompt_template: Option<String>,

    /// Records kept in the content-addressed cache. 0 disables caching. Default: 64.
    pub cache_capacity: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress events receiver.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            provider_name: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            generator: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            ocr_timeout_secs: 120,
            render_scale: 1.0,
            max_rendered_pixels: 4000,
            password: None,
            concurrency: 1,
            prompt_template: None,
            cache_capacity: 64,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("generator", &self.generator.as_ref().map(|_| "<dyn TextGenerator>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("render_scale", &self.render_scale)
            .field("concurrency", &self.concurrency)
            .field("cache_capacity", &self.cache_capacity)
            .finish()
    }
}

impl IntakeConfig {
    /// Create a new builder for `IntakeConfig`.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load provider, model and credential from the environment.
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Recognised variables:
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `RECEIPT2XLSX_PROVIDER` | provider name (default `gemini`) |
    /// | `RECEIPT2XLSX_MODEL` | model id (default `gemini-1.5-flash-latest`) |
    /// | `<PROVIDER>_API_KEY` | credential, e.g. `GEMINI_API_KEY` |
    ///
    /// Fails with [`IntakeError::MissingCredential`] when the provider needs a
    /// key and none is set, before any network call is made.
    pub fn from_env() -> Result<Self, IntakeError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let provider = non_empty_env("RECEIPT2XLSX_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.into());
        let model = non_empty_env("RECEIPT2XLSX_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());

        let mut builder = Self::builder().provider_name(&provider).model(model);
        if let Some(var) = credential_var(&provider) {
            let key = non_empty_env(&var).ok_or(IntakeError::MissingCredential { var })?;
            builder = builder.api_key(key);
        }
        builder.build()
    }

    /// The effective prompt template.
    pub fn prompt_template(&self) -> &str {
        self.prompt_template
            .as_deref()
            .unwrap_or(crate::prompts::RECEIPT_PROMPT_TEMPLATE)
    }
}

/// Environment variable holding the credential for `provider`, or `None`
/// for local providers that need no key.
pub fn credential_var(provider: &str) -> Option<String> {
    match provider.to_ascii_lowercase().as_str() {
        "ollama" | "lmstudio" | "mock" => None,
        "gemini" | "google" => Some("GEMINI_API_KEY".into()),
        other => Some(format!(
            "{}_API_KEY",
            other.to_ascii_uppercase().replace('-', "_")
        )),
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`IntakeConfig`].
#[derive(Debug)]
pub struct IntakeConfigBuilder {
    config: IntakeConfig,
}

impl IntakeConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.25, 4.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.config.cache_capacity = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IntakeConfig, IntakeError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(IntakeError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.provider_name.trim().is_empty() {
            return Err(IntakeError::InvalidConfig("Provider name is empty".into()));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains(RECEIPT_TEXT_PLACEHOLDER) {
                return Err(IntakeError::InvalidConfig(format!(
                    "Prompt template must contain {RECEIPT_TEXT_PLACEHOLDER}"
                )));
            }
        }
        Ok(self.config)
    }
}
