//! Extraction orchestration: which prompt runs on which pages, and how.
//!
//! ## Strategies
//!
//! | Tag | Strategy | Vision calls |
//! |---|---|---|
//! | `raw` | whole-document | one per prompt, every page attached |
//! | `semantic`, `qa` | windowed | one per (window, prompt, type) |
//! | `keywords` | aggregation | none; reads earlier artifacts |
//! | *(simple mode)* | independent-per-page | one per page, fanned out |
//!
//! [`ExtractionOrchestrator::extract`] runs the first three in that order,
//! sequentially. Windows after the first are prefixed with the markdown of
//! the whole-document pass so the model keeps its bearings.
//! [`ExtractionOrchestrator::extract_per_page`] fans pages out over a
//! bounded pool and only there are rate-limited calls retried.
//!
//! A failed unit is recorded in its [`ExtractionResult`] and logged; it
//! never stops its siblings.

use crate::config::{ExtractionType, PipelineConfig, PromptSpec};
use crate::error::{PipelineError, UnitError, VisionError};
use crate::model::{ExtractionResult, PageImage, UnitKey, UnitStatus};
use crate::pipeline::artifact::{json_path, remove_if_exists, text_path, write_atomic_async};
use crate::pipeline::keywords::{KeywordSources, KeywordStrategy, PlaceholderKeywords};
use crate::pipeline::pool::{ResizeOutcome, WorkerPool};
use crate::pipeline::postprocess::prepare_markdown;
use crate::pipeline::response::{total_tokens, VisionPayload};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::window::{windows, ExtractionWindow};
use crate::progress::{spawn_reporter, CompletionCounter, SessionLog};
use crate::prompts::{whole_document_prompt, window_prompt, PER_PAGE_PROMPT};
use crate::vision::{VisionClient, VisionRequest};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Every unit outcome of one orchestration call, in execution order
/// (per-page results in page order).
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub results: Vec<ExtractionResult>,
}

impl ExtractionReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn get(&self, key: &UnitKey) -> Option<&ExtractionResult> {
        self.results.iter().find(|r| &r.key == key)
    }

    /// Sum of reported token usage.
    pub fn total_tokens(&self) -> u64 {
        self.results.iter().filter_map(|r| r.total_tokens).sum()
    }
}

/// One vision call of the sequential pass.
#[derive(Debug, Clone)]
struct PlannedUnit {
    key: UnitKey,
    prompt: usize,
    window: Option<ExtractionWindow>,
}

pub struct ExtractionOrchestrator {
    client: Arc<dyn VisionClient>,
    keywords: Arc<dyn KeywordStrategy>,
    page_pool: WorkerPool,
}

impl ExtractionOrchestrator {
    pub fn new(client: Arc<dyn VisionClient>, page_concurrency: usize) -> Self {
        Self {
            client,
            keywords: Arc::new(PlaceholderKeywords),
            page_pool: WorkerPool::new("extract", page_concurrency),
        }
    }

    pub fn with_keyword_strategy(mut self, strategy: Arc<dyn KeywordStrategy>) -> Self {
        self.keywords = strategy;
        self
    }

    pub fn page_workers(&self) -> usize {
        self.page_pool.size()
    }

    /// Drain-and-replace the per-page pool.
    pub async fn resize_page_pool(&self, workers: usize, grace: Duration) -> ResizeOutcome {
        self.page_pool.resize(workers, grace).await
    }

    // ── Sequential pass: whole-document, windowed, keywords ──────────────

    /// Run every prompt over `images` and write artifacts to `out_dir`.
    ///
    /// Prompt indices in artifact names are positions in `prompts`. Tags not
    /// enabled in `config` are skipped.
    pub async fn extract(
        &self,
        images: &[PageImage],
        prompts: &[PromptSpec],
        out_dir: &Path,
        config: &PipelineConfig,
        log: &SessionLog,
    ) -> Result<ExtractionReport, PipelineError> {
        prepare(images, out_dir)?;
        let page_windows = windows(images.len(), config.window_size, config.step_size);
        let plan = plan_units(prompts, &page_windows, config);
        let total = plan.len();
        info!(
            "Extracting {} pages: {total} vision calls over {} windows",
            images.len(),
            page_windows.len()
        );

        let mut report = ExtractionReport::default();
        let mut raw_context: Option<String> = None;

        for (round, unit) in plan.iter().enumerate() {
            let spec = &prompts[unit.prompt];
            let (unit_images, prompt_text) = match unit.window {
                None => (
                    images.iter().map(|i| i.path.clone()).collect::<Vec<_>>(),
                    whole_document_prompt(&spec.detail),
                ),
                Some(w) => {
                    let context = if w.index > 0 {
                        match &raw_context {
                            Some(c) => Some(c.clone()),
                            None => read_prior_context(out_dir).await,
                        }
                    } else {
                        None
                    };
                    let ty = match unit.key {
                        UnitKey::Window { ty, .. } => ty,
                        _ => ExtractionType::Semantic,
                    };
                    (
                        images[w.range()].iter().map(|i| i.path.clone()).collect(),
                        window_prompt(&spec.detail, ty, context.as_deref()),
                    )
                }
            };

            let scope = match unit.window {
                Some(w) => format!(" (pages {}-{})", images[w.start].page, images[w.end - 1].page),
                None => String::new(),
            };
            log.append(format!(
                "[Extraction] Round {}/{total}: {}{scope}",
                round + 1,
                unit.key
            ));

            let started = Instant::now();
            let request = VisionRequest::new(prompt_text, unit_images, spec.include_image);
            let result = match self.client.extract(&request).await {
                Ok(payload) => finish_unit(unit.key, payload, UnitStatus::Success, out_dir).await,
                Err(e) => {
                    let err = unit_error(&unit.key, e);
                    warn!("{err}");
                    discard_artifacts(out_dir, &unit.key).await;
                    ExtractionResult::failed(unit.key, err)
                }
            };
            log.append(describe(&result, started.elapsed()));

            if matches!(unit.key, UnitKey::AllPages { .. }) && raw_context.is_none() {
                raw_context = result.markdown.clone();
            }
            report.results.push(result);
        }

        for (prompt, spec) in prompts.iter().enumerate() {
            if !(spec.has(ExtractionType::Keywords) && config.is_enabled(ExtractionType::Keywords)) {
                continue;
            }
            for w in &page_windows {
                let result = self.keyword_unit(w.index, prompt, out_dir).await;
                log.append(format!(
                    "[Keywords Extraction] Window {}, prompt {prompt} -> {}",
                    w.index,
                    json_path(out_dir, &result.key).display()
                ));
                report.results.push(result);
            }
        }

        info!(
            "Extraction finished: {} ok, {} failed, {} tokens",
            report.succeeded(),
            report.failed(),
            report.total_tokens()
        );
        Ok(report)
    }

    async fn keyword_unit(&self, window: usize, prompt: usize, out_dir: &Path) -> ExtractionResult {
        let key = UnitKey::Window {
            window,
            prompt,
            ty: ExtractionType::Keywords,
        };
        let candidates = [
            UnitKey::AllPages {
                prompt,
                ty: ExtractionType::Raw,
            },
            UnitKey::Window {
                window,
                prompt,
                ty: ExtractionType::Semantic,
            },
            UnitKey::Window {
                window,
                prompt,
                ty: ExtractionType::Qa,
            },
        ];
        let mut sources = KeywordSources {
            window,
            prompt,
            artifacts: Vec::new(),
        };
        for candidate in &candidates {
            let path = json_path(out_dir, candidate);
            if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                let text = VisionPayload::decode(&raw).into_text().unwrap_or(raw);
                sources.artifacts.push((path, text));
            }
        }

        let output = self.keywords.synthesize(&sources);
        let names: Vec<String> = sources
            .artifacts
            .iter()
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let payload = json!({
            "keywords": output.keywords,
            "placeholder": output.placeholder,
            "sourceArtifacts": names,
        })
        .to_string();

        let path = json_path(out_dir, &key);
        match write_atomic_async(&path, payload.clone().into_bytes()).await {
            Ok(()) => ExtractionResult {
                key,
                payload: Some(payload),
                markdown: None,
                total_tokens: None,
                status: UnitStatus::Success,
            },
            Err(e) => ExtractionResult::failed(
                key,
                UnitError::ArtifactWriteFailed {
                    unit: key.to_string(),
                    detail: format!("{}: {e}", path.display()),
                },
            ),
        }
    }

    // ── Independent-per-page ─────────────────────────────────────────────

    /// Extract every page on its own, concurrently, with the built-in
    /// per-page prompt. Returns once every page (retries included) has
    /// settled.
    pub async fn extract_per_page(
        &self,
        images: &[PageImage],
        out_dir: &Path,
        config: &PipelineConfig,
        log: &SessionLog,
    ) -> Result<ExtractionReport, PipelineError> {
        prepare(images, out_dir)?;
        let total = images.len();
        let policy = RetryPolicy::from_config(config);
        let settled = CompletionCounter::default();
        let reporter = spawn_reporter(
            settled.clone(),
            total,
            Duration::from_millis(config.progress_interval_ms),
            log.clone(),
        );
        info!(
            "Per-page extraction of {total} pages with {} workers",
            self.page_pool.size()
        );

        let handles: Vec<_> = images
            .iter()
            .map(|img| {
                let key = UnitKey::Page {
                    page: img.page.saturating_sub(1),
                };
                let client = Arc::clone(&self.client);
                let log = log.clone();
                let out_dir = out_dir.to_path_buf();
                let path = img.path.clone();
                let token = settled.token();
                let page = img.page;
                self.page_pool.spawn(async move {
                    let _settled = token;
                    log.append(format!("[SimpleExtract] Page {page} of {total}"));
                    let started = Instant::now();
                    let result = page_unit(key, page, path, client, policy, &out_dir, &log).await;
                    log.append(describe(&result, started.elapsed()));
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (img, joined) in images.iter().zip(futures::future::join_all(handles).await) {
            let key = UnitKey::Page {
                page: img.page.saturating_sub(1),
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    discard_artifacts(out_dir, &key).await;
                    ExtractionResult::failed(
                        key,
                        UnitError::VisionFailed {
                            unit: key.to_string(),
                            detail: format!("extraction task panicked: {e}"),
                        },
                    )
                }
            };
            results.push(result);
        }
        if let Some(reporter) = reporter {
            if let Err(e) = reporter.await {
                warn!("Progress reporter ended abnormally: {e}");
            }
        }

        let report = ExtractionReport { results };
        info!(
            "Per-page extraction finished: {} ok, {} failed, {} tokens",
            report.succeeded(),
            report.failed(),
            report.total_tokens()
        );
        Ok(report)
    }
}

async fn page_unit(
    key: UnitKey,
    page: usize,
    image: PathBuf,
    client: Arc<dyn VisionClient>,
    policy: RetryPolicy,
    out_dir: &Path,
    log: &SessionLog,
) -> ExtractionResult {
    let request = VisionRequest::new(PER_PAGE_PROMPT, vec![image], true);
    let unit = key.to_string();
    let outcome = policy
        .run(
            &unit,
            || client.extract(&request),
            |retry, delay| {
                log.append(format!(
                    "Rate limit hit for page {page}, retry {retry} after {}ms",
                    delay.as_millis()
                ))
            },
        )
        .await;
    match outcome {
        Ok(done) => {
            let status = if done.retries == 0 {
                UnitStatus::Success
            } else {
                UnitStatus::RetriedThenSuccess {
                    retries: done.retries,
                }
            };
            finish_unit(key, done.value, status, out_dir).await
        }
        Err(err) => {
            discard_artifacts(out_dir, &key).await;
            ExtractionResult::failed(key, err)
        }
    }
}

/// Decode a payload, then write its `.json` artifact and, when it carried
/// any markdown, its `.txt` artifact. A `.txt` left by an earlier run is
/// removed when this payload has none.
async fn finish_unit(
    key: UnitKey,
    payload: String,
    status: UnitStatus,
    out_dir: &Path,
) -> ExtractionResult {
    let tokens = total_tokens(&payload);
    let markdown = VisionPayload::decode(&payload)
        .text()
        .and_then(prepare_markdown);
    match &tokens {
        Some(n) => debug!("{key}: {n} tokens"),
        None => debug!("{key}: token usage not found in response"),
    }

    let write_err = |path: &Path, e: std::io::Error| UnitError::ArtifactWriteFailed {
        unit: key.to_string(),
        detail: format!("{}: {e}", path.display()),
    };
    let json = json_path(out_dir, &key);
    if let Err(e) = write_atomic_async(&json, payload.clone().into_bytes()).await {
        discard_artifacts(out_dir, &key).await;
        return ExtractionResult::failed(key, write_err(&json, e));
    }
    let txt = text_path(out_dir, &key);
    let written = match &markdown {
        Some(md) => write_atomic_async(&txt, md.clone().into_bytes()).await,
        None => remove_if_exists(&txt).await,
    };
    if let Err(e) = written {
        discard_artifacts(out_dir, &key).await;
        return ExtractionResult::failed(key, write_err(&txt, e));
    }

    ExtractionResult {
        key,
        payload: Some(payload),
        markdown,
        total_tokens: tokens,
        status,
    }
}

fn plan_units(
    prompts: &[PromptSpec],
    page_windows: &[ExtractionWindow],
    config: &PipelineConfig,
) -> Vec<PlannedUnit> {
    let mut plan = Vec::new();
    for (prompt, spec) in prompts.iter().enumerate() {
        if spec.has(ExtractionType::Raw) && config.is_enabled(ExtractionType::Raw) {
            plan.push(PlannedUnit {
                key: UnitKey::AllPages {
                    prompt,
                    ty: ExtractionType::Raw,
                },
                prompt,
                window: None,
            });
        }
    }
    for w in page_windows {
        for (prompt, spec) in prompts.iter().enumerate() {
            for &ty in &spec.extraction_types {
                if !ty.is_windowed() || !config.is_enabled(ty) {
                    continue;
                }
                plan.push(PlannedUnit {
                    key: UnitKey::Window {
                        window: w.index,
                        prompt,
                        ty,
                    },
                    prompt,
                    window: Some(*w),
                });
            }
        }
    }
    plan
}

fn prepare(images: &[PageImage], out_dir: &Path) -> Result<(), PipelineError> {
    if images.is_empty() {
        return Err(PipelineError::NoPageImages {
            dir: out_dir.to_path_buf(),
        });
    }
    std::fs::create_dir_all(out_dir).map_err(|e| PipelineError::io(out_dir, e))
}

// Drop whatever an earlier run wrote for a unit that failed this time.
async fn discard_artifacts(out_dir: &Path, key: &UnitKey) {
    for path in [json_path(out_dir, key), text_path(out_dir, key)] {
        if let Err(e) = remove_if_exists(&path).await {
            warn!("Could not remove stale {}: {e}", path.display());
        }
    }
}

// Earlier run's whole-document markdown, when this run produced none.
async fn read_prior_context(out_dir: &Path) -> Option<String> {
    let key = UnitKey::AllPages {
        prompt: 0,
        ty: ExtractionType::Raw,
    };
    tokio::fs::read_to_string(text_path(out_dir, &key))
        .await
        .ok()
        .filter(|s| !s.trim().is_empty())
}

fn unit_error(key: &UnitKey, e: VisionError) -> UnitError {
    UnitError::VisionFailed {
        unit: key.to_string(),
        detail: e.to_string(),
    }
}

fn describe(result: &ExtractionResult, elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    match &result.status {
        UnitStatus::Failed { error } => format!("Extraction failed for {}: {error}", result.key),
        status => {
            let tokens = result
                .total_tokens
                .map(|n| n.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let retried = match status {
                UnitStatus::RetriedThenSuccess { retries } => format!(", {retries} retries"),
                _ => String::new(),
            };
            format!(
                "Finished {} in {ms} ms (tokens: {tokens}{retried})",
                result.key
            )
        }
    }
}
