//! Job facade: ingest → rasterize → extract → persist.
//!
//! An [`ExtractionJob`] owns one work directory and the two bounded pools
//! (rendering, per-page extraction). Each document gets its own
//! subdirectory:
//!
//! ```text
//! <work_dir>/
//!   uploads/<docId>.pdf
//!   <docId>/pages/<docId>_page<N>.png
//!   <docId>/extract/allpages_*.json, window_*.json, page_<i>.{json,txt}
//! ```
//!
//! Because every artifact is found by name, the stages can run in separate
//! invocations against the same work directory; [`ExtractionJob::resume`]
//! rebuilds a [`Document`] from what is on disk.

use crate::aggregate::{AggregateReport, ResultAggregator};
use crate::config::{PipelineConfig, PromptSpec};
use crate::error::PipelineError;
use crate::model::{Document, Page};
use crate::orchestrator::{ExtractionOrchestrator, ExtractionReport};
use crate::pipeline::artifact::discover_page_images;
use crate::pipeline::input;
use crate::pipeline::keywords::KeywordStrategy;
use crate::pipeline::render::{PageRasterizer, RasterReport, RenderBackend};
use crate::progress::{ProgressTracker, SessionLog};
use crate::store::RecordSink;
use crate::vision::VisionClient;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

/// Outcome of [`ExtractionJob::run_per_page`].
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub document: Document,
    pub raster: RasterReport,
    pub extraction: ExtractionReport,
    pub saved: AggregateReport,
}

pub struct ExtractionJob {
    work_dir: PathBuf,
    config: RwLock<PipelineConfig>,
    rasterizer: PageRasterizer,
    orchestrator: ExtractionOrchestrator,
    sink: Arc<dyn RecordSink>,
    tracker: ProgressTracker,
    // One rasterization at a time per job.
    conversion_lock: tokio::sync::Mutex<()>,
}

impl ExtractionJob {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        config: PipelineConfig,
        backend: Arc<dyn RenderBackend>,
        client: Arc<dyn VisionClient>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            work_dir: work_dir.into(),
            rasterizer: PageRasterizer::new(backend, config.render_workers),
            orchestrator: ExtractionOrchestrator::new(client, config.page_concurrency),
            config: RwLock::new(config),
            sink,
            tracker: ProgressTracker::new(),
            conversion_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_keyword_strategy(mut self, strategy: Arc<dyn KeywordStrategy>) -> Self {
        self.orchestrator = self.orchestrator.with_keyword_strategy(strategy);
        self
    }

    /// Share an existing tracker (e.g. one a UI is already polling).
    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> PipelineConfig {
        match self.config.read() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    pub fn pages_dir(&self, document_id: &str) -> PathBuf {
        self.work_dir.join(document_id).join("pages")
    }

    pub fn artifacts_dir(&self, document_id: &str) -> PathBuf {
        self.work_dir.join(document_id).join("extract")
    }

    /// Current `(render, per-page)` pool sizes.
    pub fn pool_sizes(&self) -> (usize, usize) {
        (self.rasterizer.workers(), self.orchestrator.page_workers())
    }

    /// Replace the configuration and resize both pools.
    ///
    /// Each pool is drained-and-replaced: work spawned before the call
    /// finishes on the old bound, later work runs on the new one.
    pub async fn reconfigure(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;
        let grace = Duration::from_millis(config.pool_grace_ms);
        let render = self.rasterizer.resize(config.render_workers, grace).await;
        let pages = self
            .orchestrator
            .resize_page_pool(config.page_concurrency, grace)
            .await;
        info!(
            "Reconfigured: render pool {} → {}, per-page pool {} → {}",
            render.old_size, render.new_size, pages.old_size, pages.new_size
        );
        match self.config.write() {
            Ok(mut c) => *c = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        Ok(())
    }

    // ── Stages ───────────────────────────────────────────────────────────

    pub async fn ingest_file(&self, path: &Path) -> Result<Document, PipelineError> {
        input::ingest_file(path, &self.upload_dir(), &self.config()).await
    }

    pub async fn ingest_bytes(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<Document, PipelineError> {
        input::ingest_bytes(original_filename, bytes, &self.upload_dir(), &self.config()).await
    }

    /// Rebuild a document from page images already on disk.
    pub fn resume(
        &self,
        document_id: &str,
        original_filename: &str,
    ) -> Result<Document, PipelineError> {
        let dir = self.pages_dir(document_id);
        let images = discover_page_images(&dir, Some(document_id))
            .map_err(|e| PipelineError::io(&dir, e))?;
        if images.is_empty() {
            return Err(PipelineError::NoPageImages { dir });
        }
        let last = images.last().map_or(0, |i| i.page);
        let pages = (1..=last)
            .map(|index| Page {
                index,
                image_path: images
                    .iter()
                    .find(|i| i.page == index)
                    .map(|i| i.path.clone()),
                results: Vec::new(),
            })
            .collect();
        Ok(Document {
            id: document_id.to_string(),
            original_filename: original_filename.to_string(),
            stored_path: PathBuf::new(),
            pages,
        })
    }

    /// Rasterize every page and record the page images on `document`.
    pub async fn rasterize(
        &self,
        document: &mut Document,
        session: &str,
    ) -> Result<RasterReport, PipelineError> {
        let log = self.tracker.session(session);
        let _converting = self.conversion_lock.lock().await;
        let config = self.config();
        let report = self
            .rasterizer
            .rasterize(
                &document.stored_path,
                &document.id,
                &self.pages_dir(&document.id),
                &config,
                &log,
            )
            .await?;
        document.pages = report
            .pages
            .iter()
            .map(|p| Page {
                index: p.page,
                image_path: p.outcome.as_ref().ok().cloned(),
                results: Vec::new(),
            })
            .collect();
        Ok(report)
    }

    /// Whole-document, windowed and keyword prompts.
    pub async fn extract(
        &self,
        document: &Document,
        prompts: &[PromptSpec],
        session: &str,
    ) -> Result<ExtractionReport, PipelineError> {
        let log = self.tracker.session(session);
        self.orchestrator
            .extract(
                &document.page_images(),
                prompts,
                &self.artifacts_dir(&document.id),
                &self.config(),
                &log,
            )
            .await
    }

    /// Independent-per-page extraction; results are attached to their pages.
    pub async fn extract_per_page(
        &self,
        document: &mut Document,
        session: &str,
    ) -> Result<ExtractionReport, PipelineError> {
        let log = self.tracker.session(session);
        let report = self
            .orchestrator
            .extract_per_page(
                &document.page_images(),
                &self.artifacts_dir(&document.id),
                &self.config(),
                &log,
            )
            .await?;
        for result in &report.results {
            document.attach(result.clone());
        }
        Ok(report)
    }

    /// Aggregate per-page artifacts into records for the configured collection.
    pub async fn persist(
        &self,
        document: &Document,
        session: &str,
    ) -> Result<AggregateReport, PipelineError> {
        let log = self.tracker.session(session);
        let config = self.config();
        ResultAggregator::new(Arc::clone(&self.sink), config.collection)
            .aggregate(
                &self.artifacts_dir(&document.id),
                &document.id,
                &document.original_filename,
                &log,
            )
            .await
    }

    /// Ingest, rasterize, extract per page and persist in one go.
    pub async fn run_per_page(
        &self,
        pdf: &Path,
        session: &str,
    ) -> Result<JobSummary, PipelineError> {
        let log = self.tracker.session(session);
        let mut document = self.ingest_file(pdf).await?;
        log.append(format!(
            "Uploaded {} as {}",
            document.original_filename, document.id
        ));
        let raster = self.rasterize(&mut document, session).await?;
        let extraction = self.extract_per_page(&mut document, session).await?;
        let saved = self.persist(&document, session).await?;
        log.append(format!(
            "Job finished: {}/{} pages rendered, {} extracted, {} saved",
            raster.succeeded(),
            raster.total,
            extraction.succeeded(),
            saved.saved.len()
        ));
        Ok(JobSummary {
            document,
            raster,
            extraction,
            saved,
        })
    }

    /// Progress log for `session`.
    pub fn session(&self, session: &str) -> SessionLog {
        self.tracker.session(session)
    }
}
