//! Configuration types for intake-form extraction.
//!
//! Everything the pipeline needs that is not a per-call argument lives in
//! [`PipelineConfig`]: where records are persisted, which instruction prompt
//! is sent, how pages are rendered, and how the vision provider is chosen.
//! A config is built once and handed to [`crate::IntakePipeline::new`]; there
//! is no process-wide state.

use crate::error::IntakeError;
use crate::pipeline::extract::VisionService;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default location of the persisted record collection.
pub const DEFAULT_RECORDS_PATH: &str = "patient_records.json";

/// Configuration for the extraction pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use intake_parser::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .records_path("clinic/records.json")
///     .scale(2.0)
///     .model("claude-sonnet-4-20250514")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Uniform render scale applied to both page axes. Range: 0.5–4.0. Default: 2.0.
    ///
    /// At 2.0 a US-letter page renders to 1224 × 1584 px: enough for the model
    /// to read handwriting without the upload growing past a few hundred KB.
    pub scale: f32,

    /// LLM model identifier, e.g. "claude-sonnet-4-20250514", "gpt-4.1".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision service. Takes precedence over every provider
    /// setting; used to plug in non-LLM backends and test doubles.
    pub service: Option<Arc<dyn VisionService>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 1024.
    ///
    /// A fully populated form serialises to well under 600 tokens of JSON.
    pub max_tokens: usize,

    /// Instruction text sent with every page image.
    pub extraction_prompt: String,

    /// Number of extraction calls in flight at once. Default: 1 (sequential).
    ///
    /// Results are always merged in page order regardless of this value.
    pub concurrency: usize,

    /// Retry attempts on a failed service call. Default: 0.
    ///
    /// Only [`crate::ServiceError`]s are retried; a malformed reply fails the
    /// page immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: None (the core waits indefinitely).
    pub api_timeout_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// JSON file holding the record collection. Default: `patient_records.json`.
    pub records_path: PathBuf,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            model: None,
            provider_name: None,
            provider: None,
            service: None,
            temperature: 0.1,
            max_tokens: 1024,
            extraction_prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: None,
            password: None,
            records_path: PathBuf::from(DEFAULT_RECORDS_PATH),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("scale", &self.scale)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("records_path", &self.records_path)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn service(mut self, service: Arc<dyn VisionService>) -> Self {
        self.config.service = Some(service);
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

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = prompt.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
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
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn records_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.records_path = path.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IntakeError> {
        let c = &self.config;
        if !(0.5..=4.0).contains(&c.scale) {
            return Err(IntakeError::InvalidConfig(format!(
                "Scale must be 0.5–4.0, got {}",
                c.scale
            )));
        }
        if c.max_tokens == 0 {
            return Err(IntakeError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.extraction_prompt.trim().is_empty() {
            return Err(IntakeError::InvalidConfig(
                "Extraction prompt must not be empty".into(),
            ));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(IntakeError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.records_path.as_os_str().is_empty() {
            return Err(IntakeError::InvalidConfig(
                "Records path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
