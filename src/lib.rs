//! # pdf2records
//!
//! Rasterise PDF documents and extract per-page Markdown and keyword records
//! with Vision Language Models (VLMs).
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Ingest     size limit, %PDF magic, stored as <uuid>.pdf
//!  ├─ 2. Rasterise  pdfium on a bounded blocking pool, sharpened PNG per page
//!  ├─ 3. Extract    whole-document / windowed / keyword / independent-per-page
//!  ├─ 4. Aggregate  lift the keyword section, one record per page
//!  └─ 5. Persist    records to a RecordSink, one at a time
//! ```
//!
//! Every stage writes its artifacts under deterministic names, so stages can
//! also run in separate invocations against the same work directory.
//! Progress lines for each session go to a [`ProgressTracker`] that callers
//! poll.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2records::vision::{ProviderSelection, ProviderVisionClient};
//! use pdf2records::{ExtractionJob, JsonlSink, PdfiumBackend, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let client = ProviderVisionClient::resolve(&ProviderSelection::default())?;
//!     let job = ExtractionJob::new(
//!         "work",
//!         PipelineConfig::default(),
//!         Arc::new(PdfiumBackend::bind()?),
//!         Arc::new(client),
//!         Arc::new(JsonlSink::new("work/store")),
//!     )?;
//!     let summary = job.run_per_page("report.pdf".as_ref(), "cli").await?;
//!     eprintln!("{} pages saved", summary.saved.saved.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2records` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod error;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{AggregateReport, ResultAggregator};
pub use config::{ExtractionType, PipelineConfig, PipelineConfigBuilder, PromptSpec};
pub use error::{PipelineError, StoreError, UnitError, VisionError};
pub use job::{ExtractionJob, JobSummary};
pub use model::{
    Document, ExtractionResult, Page, PageImage, PersistedRecord, UnitKey, UnitStatus,
};
pub use orchestrator::{ExtractionOrchestrator, ExtractionReport};
pub use pipeline::render::{PageRasterizer, PdfiumBackend, RasterReport, RenderBackend};
pub use progress::{ProgressEvent, ProgressTracker, SessionLog};
pub use store::{JsonlSink, MemorySink, RecordSink};
pub use vision::{VisionClient, VisionRequest};
