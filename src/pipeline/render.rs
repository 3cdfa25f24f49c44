//! PDF rasterisation: every page to a sharpened PNG, in parallel.
//!
//! ## Render contexts
//!
//! The PDF is read once into an immutable `Arc<[u8]>`. Each page task opens
//! its own document handle over those bytes, so no pdfium document object is
//! ever shared between concurrent tasks.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is CPU-bound C++ and not async-aware. Page tasks run through
//! [`WorkerPool::spawn_blocking`], which bounds how many pages render at once
//! and keeps the Tokio worker threads free.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps both edges
//! regardless of physical size, keeping memory bounded.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, UnitError};
use crate::pipeline::artifact::{page_image_name, write_atomic};
use crate::pipeline::encode::encode_png;
use crate::pipeline::pool::{ResizeOutcome, WorkerPool};
use crate::pipeline::sharpen::sharpen;
use crate::progress::{spawn_reporter, CompletionCounter, SessionLog};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reported by a [`RenderBackend`].
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The document could not be opened. Fatal for the whole call.
    #[error("{0}")]
    Load(String),
    /// One page could not be rendered.
    #[error("{0}")]
    Page(String),
}

/// Per-call render settings taken from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_pixels: u32,
    pub password: Option<String>,
}

impl From<&PipelineConfig> for RenderOptions {
    fn from(c: &PipelineConfig) -> Self {
        Self {
            dpi: c.dpi,
            max_pixels: c.max_rendered_pixels,
            password: c.password.clone(),
        }
    }
}

/// Turns PDF bytes into page bitmaps.
///
/// Implementations are called from blocking threads, concurrently. Every
/// call opens its own view of `pdf`.
pub trait RenderBackend: Send + Sync + 'static {
    fn page_count(&self, pdf: &[u8], password: Option<&str>) -> Result<usize, RenderError>;

    /// Render the 0-based page `index`.
    fn render_page(
        &self,
        pdf: &[u8],
        index: usize,
        opts: &RenderOptions,
    ) -> Result<DynamicImage, RenderError>;
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// [`RenderBackend`] over a bound pdfium library.
pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    /// Bind pdfium: `PDFIUM_LIB_PATH` (a file or a directory) first, then
    /// the working directory, then the system library.
    pub fn bind() -> Result<Self, PipelineError> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(p) if Path::new(&p).is_file() => Pdfium::bind_to_library(&p),
            Ok(p) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&p)),
            Err(_) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")),
        }
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{e:?}")))?;
        info!("pdfium bound");
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

impl std::fmt::Debug for PdfiumBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfiumBackend").finish_non_exhaustive()
    }
}

impl RenderBackend for PdfiumBackend {
    fn page_count(&self, pdf: &[u8], password: Option<&str>) -> Result<usize, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(pdf, password)
            .map_err(|e| RenderError::Load(format!("{e:?}")))?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        pdf: &[u8],
        index: usize,
        opts: &RenderOptions,
    ) -> Result<DynamicImage, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(pdf, opts.password.as_deref())
            .map_err(|e| RenderError::Load(format!("{e:?}")))?;
        let page_index =
            u16::try_from(index).map_err(|_| RenderError::Page(format!("page {index} out of range")))?;
        let page = document
            .pages()
            .get(page_index)
            .map_err(|e| RenderError::Page(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(opts.dpi as f32 / 72.0)
            .set_maximum_width(opts.max_pixels as i32)
            .set_maximum_height(opts.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page(format!("{e:?}")))?;
        Ok(bitmap.as_image())
    }
}

// ── Rasteriser ───────────────────────────────────────────────────────────

/// Outcome for one page.
#[derive(Debug, Clone)]
pub struct PageRender {
    /// 1-based page number.
    pub page: usize,
    pub outcome: Result<PathBuf, UnitError>,
}

/// Result of a rasterisation call: one entry per page, in page order.
#[derive(Debug, Clone, Default)]
pub struct RasterReport {
    pub total: usize,
    pub pages: Vec<PageRender>,
}

impl RasterReport {
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.outcome.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &UnitError)> {
        self.pages
            .iter()
            .filter_map(|p| p.outcome.as_ref().err().map(|e| (p.page, e)))
    }
}

/// Renders every page of a PDF through a bounded pool.
pub struct PageRasterizer {
    backend: Arc<dyn RenderBackend>,
    pool: WorkerPool,
}

impl PageRasterizer {
    pub fn new(backend: Arc<dyn RenderBackend>, workers: usize) -> Self {
        Self {
            backend,
            pool: WorkerPool::new("render", workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Drain-and-replace the render pool.
    pub async fn resize(&self, workers: usize, grace: Duration) -> ResizeOutcome {
        self.pool.resize(workers, grace).await
    }

    /// Rasterise `pdf_path` into `out_dir` as `<document_id>_page<N>.png`.
    ///
    /// Returns once every page task has settled and the progress reporter has
    /// observed completion. A page failure is recorded for that page only;
    /// a document that cannot be opened fails the whole call.
    pub async fn rasterize(
        &self,
        pdf_path: &Path,
        document_id: &str,
        out_dir: &Path,
        config: &PipelineConfig,
        log: &SessionLog,
    ) -> Result<RasterReport, PipelineError> {
        let display_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf_path.display().to_string());
        log.append(format!("Starting conversion for {display_name}"));

        let result = self
            .rasterize_inner(pdf_path, document_id, out_dir, config, log)
            .await;
        match &result {
            Ok(report) => {
                info!(
                    "Rasterised {}/{} pages of {display_name}",
                    report.succeeded(),
                    report.total
                );
                log.append(format!("Conversion complete for {display_name}"));
            }
            Err(e) => {
                warn!("Rasterisation of {display_name} failed: {e}");
                log.append(format!("Error during conversion: {e}"));
            }
        }
        result
    }

    async fn rasterize_inner(
        &self,
        pdf_path: &Path,
        document_id: &str,
        out_dir: &Path,
        config: &PipelineConfig,
        log: &SessionLog,
    ) -> Result<RasterReport, PipelineError> {
        let bytes: Arc<[u8]> = match tokio::fs::read(pdf_path).await {
            Ok(b) => b.into(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::FileNotFound {
                    path: pdf_path.to_path_buf(),
                })
            }
            Err(e) => return Err(PipelineError::io(pdf_path, e)),
        };
        let opts = Arc::new(RenderOptions::from(config));

        let total = {
            let backend = Arc::clone(&self.backend);
            let bytes = Arc::clone(&bytes);
            let password = opts.password.clone();
            tokio::task::spawn_blocking(move || backend.page_count(&bytes, password.as_deref()))
                .await
                .map_err(|e| PipelineError::Internal(format!("Page count task panicked: {e}")))?
                .map_err(|e| PipelineError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: e.to_string(),
                })?
        };
        info!("PDF loaded: {total} pages");

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PipelineError::io(out_dir, e))?;

        let finished = CompletionCounter::default();
        let reporter = spawn_reporter(
            finished.clone(),
            total,
            Duration::from_millis(config.progress_interval_ms),
            log.clone(),
        );

        let handles: Vec<_> = (0..total)
            .map(|index| {
                let backend = Arc::clone(&self.backend);
                let bytes = Arc::clone(&bytes);
                let opts = Arc::clone(&opts);
                let path = out_dir.join(page_image_name(document_id, index + 1));
                let log = log.clone();
                let token = finished.token();
                self.pool.spawn_blocking(move || {
                    let _settled = token;
                    let outcome = render_one(backend.as_ref(), &bytes, index, &opts, &path);
                    match &outcome {
                        Ok(p) => log.append(format!(
                            "Converted page {}/{total} to {}",
                            index + 1,
                            p.display()
                        )),
                        Err(e) => log.append(format!("Error converting page {}: {e}", index + 1)),
                    }
                    outcome
                })
            })
            .collect();

        // Each handle yields its own page's outcome; position = page index.
        let mut pages = Vec::with_capacity(total);
        for (index, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) | Err(e) => Err(UnitError::RenderFailed {
                    page: index + 1,
                    detail: format!("render task failed: {e}"),
                }),
            };
            pages.push(PageRender {
                page: index + 1,
                outcome,
            });
        }

        if let Some(reporter) = reporter {
            if let Err(e) = reporter.await {
                warn!("Progress reporter ended abnormally: {e}");
            }
        }
        Ok(RasterReport { total, pages })
    }
}

fn render_one(
    backend: &dyn RenderBackend,
    pdf: &[u8],
    index: usize,
    opts: &RenderOptions,
    path: &Path,
) -> Result<PathBuf, UnitError> {
    let page = index + 1;
    let failed = |detail: String| UnitError::RenderFailed { page, detail };

    let image = backend
        .render_page(pdf, index, opts)
        .map_err(|e| failed(e.to_string()))?;
    let image = sharpen(&image);
    let png = encode_png(&image).map_err(|e| failed(e.to_string()))?;
    write_atomic(path, &png).map_err(|e| failed(format!("{}: {e}", path.display())))?;
    debug!(
        "Rendered page {page} → {}x{} px → {}",
        image.width(),
        image.height(),
        path.display()
    );
    Ok(path.to_path_buf())
}
