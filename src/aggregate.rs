//! Turn per-page artifacts into persisted records.
//!
//! For each `page_<i>.json` in a job directory the aggregator reads the
//! page's markdown (the `.txt` next to it, or the JSON payload when the text
//! artifact is missing), lifts the keyword section out of it and hands one
//! [`PersistedRecord`] to the sink. Pages are submitted one at a time; a
//! sink rejection is logged and the next page proceeds.

use crate::error::PipelineError;
use crate::model::{PersistedRecord, UnitKey};
use crate::pipeline::artifact::{discover_page_artifacts, json_path, text_path};
use crate::pipeline::decode::{decode_text, TextEncoding};
use crate::pipeline::keywords::extract_keywords;
use crate::pipeline::postprocess::prepare_markdown;
use crate::pipeline::response::VisionPayload;
use crate::progress::SessionLog;
use crate::store::RecordSink;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extraction-mode tag stamped on records built from per-page artifacts.
pub const PER_PAGE_MODE: &str = "simple-per-page";

/// What one aggregation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    /// 1-based page numbers that reached the sink.
    pub saved: Vec<usize>,
    /// `(page, reason)` for pages the sink rejected or that could not be read.
    pub failed: Vec<(usize, String)>,
}

impl AggregateReport {
    pub fn total(&self) -> usize {
        self.saved.len() + self.failed.len()
    }
}

pub struct ResultAggregator {
    sink: Arc<dyn RecordSink>,
    collection: String,
}

impl ResultAggregator {
    pub fn new(sink: Arc<dyn RecordSink>, collection: impl Into<String>) -> Self {
        Self {
            sink,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Build and submit one record per per-page artifact in `dir`.
    pub async fn aggregate(
        &self,
        dir: &Path,
        document_id: &str,
        original_filename: &str,
        log: &SessionLog,
    ) -> Result<AggregateReport, PipelineError> {
        let pages = discover_page_artifacts(dir).map_err(|e| PipelineError::io(dir, e))?;
        if pages.is_empty() {
            return Err(PipelineError::NoPageArtifacts {
                dir: dir.to_path_buf(),
            });
        }
        info!(
            "Aggregating {} pages of {document_id} into '{}'",
            pages.len(),
            self.collection
        );

        let mut report = AggregateReport::default();
        for i in pages {
            let page = i + 1;
            let record = match build_record(dir, i, document_id, original_filename).await {
                Ok(record) => record,
                Err(reason) => {
                    warn!("Skipping page {page}: {reason}");
                    log.append(format!("[Save] Page {page} skipped: {reason}"));
                    report.failed.push((page, reason));
                    continue;
                }
            };
            match self.sink.insert(&self.collection, &record).await {
                Ok(()) => {
                    debug!(
                        "Page {page}: {} keywords, {} chars",
                        record.keywords.len(),
                        record.markdown.as_deref().map_or(0, str::len)
                    );
                    log.append(format!("[Save] Page {page} saved"));
                    report.saved.push(page);
                }
                Err(e) => {
                    warn!("Failed to save page {page}: {e}");
                    log.append(format!("[Save] Page {page} failed: {e}"));
                    report.failed.push((page, e.to_string()));
                }
            }
        }

        info!(
            "Aggregation finished: {} saved, {} failed",
            report.saved.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// Read page `i` (0-based) and build its record.
async fn build_record(
    dir: &Path,
    i: usize,
    document_id: &str,
    original_filename: &str,
) -> Result<PersistedRecord, String> {
    let key = UnitKey::Page { page: i };
    let text = match read_text(&text_path(dir, &key)).await {
        Some(text) => Some(text),
        None => {
            let path = json_path(dir, &key);
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("{}: {e}", path.display()))?;
            let (raw, _) = decode_text(&raw);
            VisionPayload::decode(&raw).text().and_then(prepare_markdown)
        }
    };

    let (markdown, keywords) = match text {
        Some(text) => {
            let (body, keywords) = extract_keywords(&text);
            let body = body.trim().to_string();
            ((!body.is_empty()).then_some(body), keywords)
        }
        None => (None, Vec::new()),
    };
    if keywords.is_empty() {
        debug!("Page {}: no keywords found", i + 1);
    }

    Ok(PersistedRecord {
        document_id: document_id.to_string(),
        page_index: i + 1,
        markdown,
        keywords,
        extraction_mode: PER_PAGE_MODE.to_string(),
        extraction_timestamp: Utc::now(),
        original_file_name: original_filename.to_string(),
    })
}

async fn read_text(path: &Path) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let (text, encoding) = decode_text(&bytes);
    if encoding == TextEncoding::Windows1252 {
        warn!(
            "{} is not valid UTF-8; decoded as Windows-1252",
            path.display()
        );
    }
    Some(text.into_owned())
}
