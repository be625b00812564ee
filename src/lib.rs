//! # intake-parser
//!
//! Turn scanned or filled-in patient intake forms (PDF) into structured
//! patient records using a vision-capable language model.
//!
//! Intake forms are mostly handwriting in boxes, which text extraction cannot
//! read. Each page is rasterised and sent to a vision model together with a
//! fixed instruction listing the fields to read. The per-page answers are
//! merged into one record and appended to a JSON file of records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      path checks, %PDF magic
//!  ├─ 2. Render     rasterise every page via pdfium (spawn_blocking)
//!  ├─ 3. Encode     PNG → base64 ImageData
//!  ├─ 4. Extract    one vision call per page (claude / gpt / gemini / …)
//!  ├─ 5. Normalize  strip ```json fences, parse the JSON object
//!  ├─ 6. Merge      page order, last write wins per field
//!  └─ 7. Store      append to patient_records.json
//! ```
//!
//! A document is all or nothing: any failing page abandons the run and the
//! store is left as it was.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use intake_parser::{IntakePipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected; ANTHROPIC_API_KEY is preferred when set.
//!     let config = PipelineConfig::builder()
//!         .records_path("patient_records.json")
//!         .build()?;
//!     let pipeline = IntakePipeline::new(config)?;
//!
//!     let record = pipeline.run("intake_form.pdf").await?;
//!     println!("Stored {}", record.full_name());
//!
//!     for found in pipeline.find_by_name("gonzalez").await? {
//!         println!("{:?}", found.source_file());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `intake-parser` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! ## Runtime requirements
//!
//! Rendering needs the pdfium shared library. Set `PDFIUM_LIB_PATH` to its
//! location, or install it where the system loader finds it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, DEFAULT_RECORDS_PATH};
pub use error::{
    DocumentOpenError, IntakeError, MalformedResponseError, ServiceError, ValidationError,
};
pub use intake::{resolve_provider, IntakePipeline};
pub use pipeline::extract::{ExtractionClient, LlmVisionService, VisionService};
pub use pipeline::render::{PageImage, PageRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::DEFAULT_EXTRACTION_PROMPT;
pub use record::{ExtractionResult, PageExtraction, PatientRecord};
pub use store::RecordStore;
