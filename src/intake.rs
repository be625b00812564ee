//! Intake orchestration: document path in, stored patient record out.
//!
//! [`IntakePipeline`] wires the stages together. A document is all or
//! nothing: if any page fails to rasterise, extract, or parse, the run is
//! abandoned and the store is not touched.

use crate::config::PipelineConfig;
use crate::error::IntakeError;
use crate::pipeline::extract::{ExtractionClient, LlmVisionService, VisionService};
use crate::pipeline::input;
use crate::pipeline::merge;
use crate::pipeline::render::{PageImage, PageRasterizer, PdfiumRasterizer};
use crate::record::{PageExtraction, PatientRecord};
use crate::store::RecordStore;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when Anthropic is picked without an explicit model.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// The intake pipeline: rasterise, extract, merge, store.
pub struct IntakePipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn PageRasterizer>,
    client: ExtractionClient,
    store: RecordStore,
}

impl IntakePipeline {
    /// Build a pipeline from configuration.
    ///
    /// The vision service is `config.service` when set; otherwise an LLM
    /// provider is resolved (see [`resolve_provider`]) and wrapped.
    ///
    /// # Errors
    /// [`IntakeError::ProviderNotConfigured`] when no provider can be found.
    pub fn new(config: PipelineConfig) -> Result<Self, IntakeError> {
        let service: Arc<dyn VisionService> = match config.service {
            Some(ref service) => Arc::clone(service),
            None => {
                let (provider, label) = resolve_provider(&config)?;
                Arc::new(LlmVisionService::new(provider, label, &config))
            }
        };
        info!("Using vision service: {}", service.name());

        Ok(Self {
            rasterizer: Arc::new(PdfiumRasterizer::new(config.scale, config.password.clone())),
            client: ExtractionClient::new(service, &config),
            store: RecordStore::new(config.records_path.clone()),
            config,
        })
    }

    /// Replace the page rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Extract a document and append the record to the store.
    ///
    /// # Errors
    /// Any page-level or document-level failure; the store is unchanged when
    /// this returns an error.
    pub async fn run(&self, pdf_path: impl AsRef<Path>) -> Result<PatientRecord, IntakeError> {
        let record = self.process(pdf_path).await?;
        self.store.append(record.clone()).await?;
        Ok(record)
    }

    /// Extract a document into a record without persisting it.
    pub async fn process(&self, pdf_path: impl AsRef<Path>) -> Result<PatientRecord, IntakeError> {
        let start = Instant::now();
        let pdf_path = pdf_path.as_ref();
        info!("Processing {}", pdf_path.display());

        // ── Step 1: Rasterise ────────────────────────────────────────────
        let pages = self.rasterize(pdf_path).await?;
        let total_pages = pages.len();
        info!("Rasterised {} pages in {:?}", total_pages, start.elapsed());

        // ── Step 2: Extract every page ───────────────────────────────────
        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_document_start(total_pages);
        }

        let succeeded = AtomicUsize::new(0);
        let extracted = self.extract_pages(&pages, &succeeded).await;

        if let Some(ref cb) = callback {
            cb.on_document_complete(total_pages, succeeded.load(Ordering::SeqCst));
        }
        let extracted = extracted?;

        // ── Step 3: Merge and tag ────────────────────────────────────────
        let mut record = merge::merge_pages(&extracted);
        record.set_source_file(input::document_file_name(pdf_path));

        info!(
            "Extracted {} fields from {} pages in {:?}",
            record.fields().len(),
            total_pages,
            start.elapsed()
        );
        Ok(record)
    }

    /// Blocking wrapper around [`IntakePipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn run_sync(&self, pdf_path: impl AsRef<Path>) -> Result<PatientRecord, IntakeError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| IntakeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(pdf_path))
    }

    /// All stored records, in store order.
    pub async fn load(&self) -> Result<Vec<PatientRecord>, IntakeError> {
        self.store.load().await
    }

    /// Stored records whose full name contains `query`, case-insensitively.
    pub async fn find_by_name(&self, query: &str) -> Result<Vec<PatientRecord>, IntakeError> {
        self.store.find_by_name(query).await
    }

    /// pdfium is synchronous; keep it off the async worker threads.
    async fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>, IntakeError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || rasterizer.rasterize(&path))
            .await
            .map_err(|e| IntakeError::Internal(format!("Rasteriser task failed: {}", e)))?
    }

    /// Extract pages with up to `concurrency` calls in flight.
    ///
    /// Results come back in page order, and the first failure in page order
    /// ends the stream; calls still in flight are dropped.
    async fn extract_pages(
        &self,
        pages: &[PageImage],
        succeeded: &AtomicUsize,
    ) -> Result<Vec<PageExtraction>, IntakeError> {
        let total_pages = pages.len();
        let callback = self.config.progress_callback.as_ref();

        stream::iter(pages.iter().map(|page| async move {
            if let Some(cb) = callback {
                cb.on_page_start(page.page_num, total_pages);
            }
            match self.client.extract(page).await {
                Ok(result) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                    debug!("Page {}/{}: {} fields", page.page_num, total_pages, result.len());
                    if let Some(cb) = callback {
                        cb.on_page_complete(page.page_num, total_pages, result.len());
                    }
                    Ok(PageExtraction {
                        page_num: page.page_num,
                        result,
                    })
                }
                Err(e) => {
                    if let Some(cb) = callback {
                        cb.on_page_error(page.page_num, total_pages, &e.to_string());
                    }
                    Err(e)
                }
            }
        }))
        .buffered(self.config.concurrency.max(1))
        .try_collect()
        .await
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String), IntakeError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IntakeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok((provider, format!("{provider_name}/{model}")))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`, or the
///    Anthropic default model when none is given.
/// 3. **Environment pair**: `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
///    when both are set and non-empty.
/// 4. **Anthropic preference**: `ANTHROPIC_API_KEY` present selects
///    `anthropic` with `config.model` or [`DEFAULT_ANTHROPIC_MODEL`].
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
///
/// Returns the provider and a label for logs.
pub fn resolve_provider(
    config: &PipelineConfig,
) -> Result<(Arc<dyn LLMProvider>, String), IntakeError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("ANTHROPIC_API_KEY").is_ok_and(|key| !key.is_empty()) {
        return create_vision_provider("anthropic", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IntakeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY (or another provider key), or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}
