//! Integration tests for the full job pipeline.
//!
//! Rendering goes through a fake backend and vision calls through a scripted
//! client, so these run offline and without pdfium.

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use pdf2records::pipeline::render::{RenderError, RenderOptions};
use pdf2records::{
    ExtractionJob, ExtractionType, MemorySink, PipelineConfig, PipelineError, PromptSpec,
    RenderBackend, UnitError, UnitStatus, VisionClient, VisionError, VisionRequest,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

struct FakeBackend {
    pages: usize,
    fail_on: Vec<usize>,
}

impl RenderBackend for FakeBackend {
    fn page_count(&self, _: &[u8], _: Option<&str>) -> Result<usize, RenderError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        _: &[u8],
        index: usize,
        _: &RenderOptions,
    ) -> Result<DynamicImage, RenderError> {
        if self.fail_on.contains(&index) {
            return Err(RenderError::Page(format!("cannot draw page {index}")));
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            6,
            6,
            Rgba([250, 250, 250, 255]),
        )))
    }
}

/// Answers from the first image's page number; tracks peak concurrency.
#[derive(Default)]
struct PageEcho {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    calls_by_page: Mutex<HashMap<usize, usize>>,
    /// Rate-limit rejections still to hand out, per page.
    rate_limits: Mutex<HashMap<usize, usize>>,
    prompts: Mutex<Vec<String>>,
}

impl PageEcho {
    fn reset_peak(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }
}

fn page_of(path: &Path) -> usize {
    let name = path.file_stem().unwrap().to_string_lossy();
    name.rsplit("_page").next().unwrap().parse().unwrap()
}

#[async_trait]
impl VisionClient for PageEcho {
    async fn extract(&self, request: &VisionRequest) -> Result<String, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let page = request.images.first().map(|p| page_of(p)).unwrap_or(0);
        *self.calls_by_page.lock().unwrap().entry(page).or_default() += 1;
        {
            let mut limits = self.rate_limits.lock().unwrap();
            if let Some(left) = limits.get_mut(&page).filter(|n| **n > 0) {
                *left -= 1;
                return Err(VisionError::RateLimited {
                    message: "429 Too Many Requests".into(),
                });
            }
        }
        let content = format!(
            "```markdown\n# Page {page}\n\nBody of page {page}.\n\n## Extracted Keywords\n[\"k{page}\", \"shared\"]\n```"
        );
        Ok(serde_json::json!({
            "choices": [{"message": {"content": content}}],
            "usage": {"total_tokens": 10},
        })
        .to_string())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    pdf: PathBuf,
    work: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("Quarterly Report.PDF");
    std::fs::write(&pdf, b"%PDF-1.7\nfake body").unwrap();
    let work = dir.path().join("work");
    Fixture {
        _dir: dir,
        pdf,
        work,
    }
}

fn config(page_concurrency: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .render_workers(2)
        .page_concurrency(page_concurrency)
        .progress_interval_ms(5)
        .retry_base_delay_ms(1)
        .build()
        .unwrap()
}

fn job(
    fx: &Fixture,
    backend: FakeBackend,
    client: Arc<PageEcho>,
    sink: Arc<MemorySink>,
    page_concurrency: usize,
) -> ExtractionJob {
    ExtractionJob::new(
        &fx.work,
        config(page_concurrency),
        Arc::new(backend),
        client,
        sink,
    )
    .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn per_page_run_saves_one_record_per_page() {
    init_tracing();
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    let sink = Arc::new(MemorySink::new());
    let job = job(
        &fx,
        FakeBackend {
            pages: 3,
            fail_on: vec![],
        },
        client.clone(),
        sink.clone(),
        2,
    );

    let summary = job.run_per_page(&fx.pdf, "s1").await.unwrap();
    assert_eq!(summary.raster.succeeded(), 3);
    assert_eq!(summary.extraction.succeeded(), 3);
    assert_eq!(summary.saved.saved, vec![1, 2, 3]);
    assert_eq!(summary.document.original_filename, "Quarterly Report.PDF");
    assert!(summary
        .document
        .stored_path
        .to_string_lossy()
        .ends_with(".pdf"));
    assert!(summary.document.pages.iter().all(|p| p.results.len() == 1));

    let records = sink.records();
    assert_eq!(records.len(), 3);
    for (i, (collection, record)) in records.iter().enumerate() {
        let page = i + 1;
        assert_eq!(collection, "extracted_documents");
        assert_eq!(record.page_index, page);
        assert_eq!(record.document_id, summary.document.id);
        assert_eq!(record.original_file_name, "Quarterly Report.PDF");
        assert_eq!(record.keywords, vec![format!("k{page}"), "shared".to_string()]);
        let md = record.markdown.as_deref().unwrap();
        assert!(md.starts_with(&format!("# Page {page}")));
        assert!(!md.contains("Extracted Keywords"));
    }

    let lines: Vec<String> = job
        .tracker()
        .snapshot("s1")
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert!(lines.iter().any(|l| l == "Progress: 3/3 pages finished"));
    assert!(lines.iter().any(|l| l.starts_with("Conversion complete for")));
    assert!(lines.last().unwrap().starts_with("Job finished: 3/3 pages rendered"));
}

#[tokio::test]
async fn failed_render_only_drops_that_page() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    let sink = Arc::new(MemorySink::new());
    let job = job(
        &fx,
        FakeBackend {
            pages: 4,
            fail_on: vec![1],
        },
        client.clone(),
        sink.clone(),
        4,
    );

    let summary = job.run_per_page(&fx.pdf, "s").await.unwrap();
    assert_eq!(summary.raster.succeeded(), 3);
    assert!(summary.document.pages[1].image_path.is_none());
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    let saved: Vec<usize> = sink.records().iter().map(|(_, r)| r.page_index).collect();
    assert_eq!(saved, vec![1, 3, 4]);
}

#[tokio::test]
async fn rate_limited_page_is_retried_without_touching_siblings() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    client.rate_limits.lock().unwrap().insert(2, 2);
    let sink = Arc::new(MemorySink::new());
    let job = job(
        &fx,
        FakeBackend {
            pages: 3,
            fail_on: vec![],
        },
        client.clone(),
        sink.clone(),
        3,
    );

    let summary = job.run_per_page(&fx.pdf, "s").await.unwrap();
    let statuses: Vec<&UnitStatus> = summary.extraction.results.iter().map(|r| &r.status).collect();
    assert_eq!(statuses[0], &UnitStatus::Success);
    assert_eq!(statuses[1], &UnitStatus::RetriedThenSuccess { retries: 2 });
    assert_eq!(statuses[2], &UnitStatus::Success);
    assert_eq!(client.calls.load(Ordering::SeqCst), 5);
    assert_eq!(sink.len(), 3);
}

#[tokio::test]
async fn page_that_stays_rate_limited_fails_alone() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    client.rate_limits.lock().unwrap().insert(2, usize::MAX);
    let sink = Arc::new(MemorySink::new());
    let job = job(
        &fx,
        FakeBackend {
            pages: 3,
            fail_on: vec![],
        },
        client.clone(),
        sink.clone(),
        3,
    );

    let summary = job.run_per_page(&fx.pdf, "s").await.unwrap();
    assert_eq!(client.calls_by_page.lock().unwrap()[&2], 6);
    match &summary.extraction.results[1].status {
        UnitStatus::Failed {
            error: UnitError::RetriesExhausted { retries, .. },
        } => assert_eq!(*retries, 5),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(summary.extraction.succeeded(), 2);
    let saved: Vec<usize> = sink.records().iter().map(|(_, r)| r.page_index).collect();
    assert_eq!(saved, vec![1, 3]);
}

#[tokio::test]
async fn failed_rerun_does_not_persist_the_previous_page() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    let sink = Arc::new(MemorySink::new());
    let job = job(
        &fx,
        FakeBackend {
            pages: 2,
            fail_on: vec![],
        },
        client.clone(),
        sink.clone(),
        2,
    );
    let mut doc = job.ingest_file(&fx.pdf).await.unwrap();
    job.rasterize(&mut doc, "s").await.unwrap();
    job.extract_per_page(&mut doc, "s").await.unwrap();
    assert!(job.artifacts_dir(&doc.id).join("page_1.txt").exists());

    client.rate_limits.lock().unwrap().insert(2, usize::MAX);
    let report = job.extract_per_page(&mut doc, "s").await.unwrap();
    assert_eq!(report.failed(), 1);
    assert!(!job.artifacts_dir(&doc.id).join("page_1.json").exists());
    assert!(!job.artifacts_dir(&doc.id).join("page_1.txt").exists());

    let saved = job.persist(&doc, "s").await.unwrap();
    assert_eq!(saved.saved, vec![1]);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn reconfigure_changes_per_page_bound() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    let job = job(
        &fx,
        FakeBackend {
            pages: 6,
            fail_on: vec![],
        },
        client.clone(),
        Arc::new(MemorySink::new()),
        3,
    );
    let mut doc = job.ingest_file(&fx.pdf).await.unwrap();
    job.rasterize(&mut doc, "s").await.unwrap();

    job.extract_per_page(&mut doc, "s").await.unwrap();
    let before = client.peak.load(Ordering::SeqCst);
    assert!(before <= 3, "peak {before} exceeds bound 3");

    let mut narrower = job.config();
    narrower.page_concurrency = 1;
    narrower.render_workers = 1;
    job.reconfigure(narrower).await.unwrap();
    assert_eq!(job.pool_sizes(), (1, 1));
    assert_eq!(job.config().page_concurrency, 1);

    client.reset_peak();
    let report = job.extract_per_page(&mut doc, "s").await.unwrap();
    assert_eq!(report.succeeded(), 6);
    assert_eq!(client.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_reconfigure_keeps_old_config() {
    let fx = fixture();
    let job = job(
        &fx,
        FakeBackend {
            pages: 1,
            fail_on: vec![],
        },
        Arc::new(PageEcho::default()),
        Arc::new(MemorySink::new()),
        2,
    );
    let mut bad = job.config();
    bad.dpi = 10;
    assert!(matches!(
        job.reconfigure(bad).await,
        Err(PipelineError::InvalidConfig(_))
    ));
    assert_eq!(job.config().dpi, 150);
}

#[tokio::test]
async fn stages_can_resume_from_disk() {
    init_tracing();
    let fx = fixture();
    let first = job(
        &fx,
        FakeBackend {
            pages: 5,
            fail_on: vec![],
        },
        Arc::new(PageEcho::default()),
        Arc::new(MemorySink::new()),
        2,
    );
    let mut doc = first.ingest_file(&fx.pdf).await.unwrap();
    first.rasterize(&mut doc, "a").await.unwrap();
    drop(first);

    let client = Arc::new(PageEcho::default());
    let second = job(
        &fx,
        FakeBackend {
            pages: 0,
            fail_on: vec![],
        },
        client.clone(),
        Arc::new(MemorySink::new()),
        2,
    );
    let resumed = second.resume(&doc.id, "Quarterly Report.PDF").unwrap();
    assert_eq!(resumed.pages.len(), 5);

    let prompts = vec![PromptSpec::new(
        "Explain the content.",
        vec![
            ExtractionType::Raw,
            ExtractionType::Semantic,
            ExtractionType::Keywords,
        ],
    )];
    let report = second.extract(&resumed, &prompts, "b").await.unwrap();
    // raw + 3 semantic windows + 3 keyword units
    assert_eq!(report.results.len(), 7);
    assert_eq!(client.calls.load(Ordering::SeqCst), 4);

    let dir = second.artifacts_dir(&doc.id);
    for name in [
        "allpages_0_raw.json",
        "allpages_0_raw.txt",
        "window_0_0_semantic.json",
        "window_2_0_semantic.txt",
        "window_2_0_keywords.json",
    ] {
        assert!(dir.join(name).exists(), "missing {name}");
    }
    let prompts_seen = client.prompts.lock().unwrap();
    assert!(prompts_seen[2].starts_with("Previous context (Markdown):\n\n# Page 1"));
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_before_storage() {
    let fx = fixture();
    std::fs::write(&fx.pdf, b"PK\x03\x04 zip").unwrap();
    let job = job(
        &fx,
        FakeBackend {
            pages: 1,
            fail_on: vec![],
        },
        Arc::new(PageEcho::default()),
        Arc::new(MemorySink::new()),
        1,
    );
    let err = job.ingest_file(&fx.pdf).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotAPdf { .. }));
    assert!(!job.upload_dir().exists() || std::fs::read_dir(job.upload_dir()).unwrap().count() == 0);
}

#[tokio::test]
async fn all_pages_failing_stops_before_extraction() {
    let fx = fixture();
    let client = Arc::new(PageEcho::default());
    let job = job(
        &fx,
        FakeBackend {
            pages: 2,
            fail_on: vec![0, 1],
        },
        client.clone(),
        Arc::new(MemorySink::new()),
        1,
    );
    let err = job.run_per_page(&fx.pdf, "s").await.unwrap_err();
    assert!(matches!(err, PipelineError::NoPageImages { .. }));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}
