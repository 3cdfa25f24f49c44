//! Data model shared by the pipeline stages.

use crate::config::ExtractionType;
use crate::error::UnitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// An ingested upload and its rasterised pages.
///
/// Page indices are 1-based and contiguous: `pages[i].index == i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Identifier minted at ingestion (a UUID).
    pub id: String,
    pub original_filename: String,
    /// Where the upload was stored, named `<id>.<ext>`.
    pub stored_path: PathBuf,
    pub pages: Vec<Page>,
}

impl Document {
    /// Page images that rendered successfully, in page order.
    pub fn page_images(&self) -> Vec<PageImage> {
        self.pages
            .iter()
            .filter_map(|p| {
                p.image_path.as_ref().map(|path| PageImage {
                    page: p.index,
                    path: path.clone(),
                })
            })
            .collect()
    }

    /// Attach an extraction result to its page (per-page units only).
    pub fn attach(&mut self, result: ExtractionResult) {
        if let UnitKey::Page { page } = result.key {
            if let Some(p) = self.pages.get_mut(page) {
                p.results.push(result);
            }
        }
    }
}

/// One page of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based page number.
    pub index: usize,
    /// Rasterised image; `None` when this page failed to render.
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub results: Vec<ExtractionResult>,
}

/// A page image handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page number.
    pub page: usize,
    pub path: PathBuf,
}

/// Key of one extraction unit. Each key maps to exactly one artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnitKey {
    /// Whole-document call for one prompt.
    AllPages { prompt: usize, ty: ExtractionType },
    /// One window of a windowed prompt.
    Window {
        window: usize,
        prompt: usize,
        ty: ExtractionType,
    },
    /// Independent-per-page unit; `page` is 0-based.
    Page { page: usize },
}

impl UnitKey {
    /// Deterministic artifact stem; the JSON and text artifacts append
    /// `.json` / `.txt`.
    pub fn file_stem(&self) -> String {
        match self {
            UnitKey::AllPages { prompt, ty } => format!("allpages_{prompt}_{ty}"),
            UnitKey::Window { window, prompt, ty } => format!("window_{window}_{prompt}_{ty}"),
            UnitKey::Page { page } => format!("page_{page}"),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKey::AllPages { prompt, ty } => write!(f, "all pages (prompt {prompt}, {ty})"),
            UnitKey::Window { window, prompt, ty } => {
                write!(f, "window {window} (prompt {prompt}, {ty})")
            }
            UnitKey::Page { page } => write!(f, "page {}", page + 1),
        }
    }
}

/// Outcome of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UnitStatus {
    Success,
    RetriedThenSuccess { retries: u32 },
    Failed { error: UnitError },
}

impl UnitStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, UnitStatus::Failed { .. })
    }
}

/// Result of one extraction unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub key: UnitKey,
    /// Opaque response payload as returned by the vision client.
    pub payload: Option<String>,
    /// Cleaned markdown, when the payload carried any.
    pub markdown: Option<String>,
    /// `usage.total_tokens`, when present and well-formed.
    pub total_tokens: Option<u64>,
    pub status: UnitStatus,
}

impl ExtractionResult {
    pub fn failed(key: UnitKey, error: UnitError) -> Self {
        Self {
            key,
            payload: None,
            markdown: None,
            total_tokens: None,
            status: UnitStatus::Failed { error },
        }
    }
}

/// One row handed to the storage sink. Created once per page, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub document_id: String,
    /// 1-based page number.
    pub page_index: usize,
    pub markdown: Option<String>,
    pub keywords: Vec<String>,
    pub extraction_mode: String,
    pub extraction_timestamp: DateTime<Utc>,
    pub original_file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stems_are_distinct_per_key() {
        let keys = [
            UnitKey::AllPages {
                prompt: 0,
                ty: ExtractionType::Raw,
            },
            UnitKey::Window {
                window: 0,
                prompt: 0,
                ty: ExtractionType::Semantic,
            },
            UnitKey::Window {
                window: 0,
                prompt: 0,
                ty: ExtractionType::Qa,
            },
            UnitKey::Window {
                window: 1,
                prompt: 0,
                ty: ExtractionType::Qa,
            },
            UnitKey::Page { page: 0 },
        ];
        let stems: std::collections::HashSet<String> = keys.iter().map(|k| k.file_stem()).collect();
        assert_eq!(stems.len(), keys.len());
        assert_eq!(keys[0].file_stem(), "allpages_0_raw");
        assert_eq!(keys[3].file_stem(), "window_1_0_qa");
        assert_eq!(keys[4].file_stem(), "page_0");
    }

    #[test]
    fn page_images_skip_failed_renders() {
        let doc = Document {
            id: "d".into(),
            original_filename: "a.pdf".into(),
            stored_path: PathBuf::from("d.pdf"),
            pages: vec![
                Page {
                    index: 1,
                    image_path: Some(PathBuf::from("d_page1.png")),
                    results: vec![],
                },
                Page {
                    index: 2,
                    image_path: None,
                    results: vec![],
                },
                Page {
                    index: 3,
                    image_path: Some(PathBuf::from("d_page3.png")),
                    results: vec![],
                },
            ],
        };
        let images = doc.page_images();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].page, 3);
    }

    #[test]
    fn record_serialises_with_store_field_names() {
        let rec = PersistedRecord {
            document_id: "abc".into(),
            page_index: 1,
            markdown: Some("# T".into()),
            keywords: vec!["k".into()],
            extraction_mode: "simple-per-page".into(),
            extraction_timestamp: Utc::now(),
            original_file_name: "report.pdf".into(),
        };
        let v = serde_json::to_value(&rec).unwrap();
        for field in [
            "documentId",
            "pageIndex",
            "markdown",
            "keywords",
            "extractionMode",
            "extractionTimestamp",
            "originalFileName",
        ] {
            assert!(v.get(field).is_some(), "missing {field}");
        }
    }
}
