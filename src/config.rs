//! Configuration types for rasterisation and extraction.
//!
//! Every knob lives in one explicit [`PipelineConfig`] value that is handed
//! to the rasteriser and the orchestrator. Nothing is process-global: a job
//! that needs new settings receives a new config and resizes its pools by
//! drain-and-replace (see [`crate::pipeline::pool::WorkerPool::resize`]).

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configuration for an extraction job.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2records::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .render_workers(8)
///     .page_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered image dimension in pixels. Default: 4000.
    ///
    /// A 600-DPI render of a large-format page would otherwise allocate a
    /// bitmap of several hundred megabytes.
    pub max_rendered_pixels: u32,

    /// Size of the rasterisation worker pool. Range: 1–64. Default: 20.
    pub render_workers: usize,

    /// Maximum accepted upload size in megabytes. Range: 1–500. Default: 200.
    pub max_upload_mb: u64,

    /// Pages per extraction window (`W`). Default: 2.
    pub window_size: usize,

    /// Pages between consecutive window starts (`S`). Default: 2.
    pub step_size: usize,

    /// Extraction types that may run. Prompt tags outside this set are skipped.
    pub enabled_types: Vec<ExtractionType>,

    /// Workers for independent-per-page extraction. Range: 1–32. Default: 6.
    pub page_concurrency: usize,

    /// Retries after a rate-limit rejection, per unit. Default: 5.
    pub max_retries: u32,

    /// Linear backoff base: retry `n` waits `base × n`. Default: 2000 ms.
    pub retry_base_delay_ms: u64,

    /// Cadence of the "`done`/`total` pages finished" reporter. Default: 700 ms.
    pub progress_interval_ms: u64,

    /// How long a replaced pool may keep draining in-flight work. Default: 5000 ms.
    pub pool_grace_ms: u64,

    /// Storage collection that receives persisted records.
    pub collection: String,

    /// PDF user password for encrypted documents.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 4000,
            render_workers: 20,
            max_upload_mb: 200,
            window_size: 2,
            step_size: 2,
            enabled_types: ExtractionType::ALL.to_vec(),
            page_concurrency: 6,
            max_retries: 5,
            retry_base_delay_ms: 2000,
            progress_interval_ms: 700,
            pool_grace_ms: 5000,
            collection: "extracted_documents".to_string(),
            password: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn is_enabled(&self, ty: ExtractionType) -> bool {
        self.enabled_types.contains(&ty)
    }

    /// Check every range constraint.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(72..=600).contains(&self.dpi) {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                self.dpi
            )));
        }
        if self.max_rendered_pixels < 100 {
            return Err(PipelineError::InvalidConfig(format!(
                "Max rendered pixels must be ≥ 100, got {}",
                self.max_rendered_pixels
            )));
        }
        if !(1..=64).contains(&self.render_workers) {
            return Err(PipelineError::InvalidConfig(format!(
                "Render workers must be 1–64, got {}",
                self.render_workers
            )));
        }
        if !(1..=500).contains(&self.max_upload_mb) {
            return Err(PipelineError::InvalidConfig(format!(
                "Max upload size must be 1–500 MB, got {}",
                self.max_upload_mb
            )));
        }
        if !(1..=32).contains(&self.page_concurrency) {
            return Err(PipelineError::InvalidConfig(format!(
                "Per-page concurrency must be 1–32, got {}",
                self.page_concurrency
            )));
        }
        if self.window_size == 0 || self.step_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "Window size and step size must be ≥ 1".into(),
            ));
        }
        if self.enabled_types.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "At least one extraction type must be enabled".into(),
            ));
        }
        if self.progress_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "Progress interval must be ≥ 1 ms".into(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Collection name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn render_workers(mut self, n: usize) -> Self {
        self.config.render_workers = n;
        self
    }

    pub fn max_upload_mb(mut self, mb: u64) -> Self {
        self.config.max_upload_mb = mb;
        self
    }

    pub fn window_size(mut self, pages: usize) -> Self {
        self.config.window_size = pages;
        self
    }

    pub fn step_size(mut self, pages: usize) -> Self {
        self.config.step_size = pages;
        self
    }

    pub fn enabled_types(mut self, types: Vec<ExtractionType>) -> Self {
        self.config.enabled_types = types;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn progress_interval_ms(mut self, ms: u64) -> Self {
        self.config.progress_interval_ms = ms;
        self
    }

    pub fn pool_grace_ms(mut self, ms: u64) -> Self {
        self.config.pool_grace_ms = ms;
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Prompt specification ─────────────────────────────────────────────────

/// Extraction-type tag carried by a [`PromptSpec`].
///
/// The tag decides the strategy: `Raw` runs once over the whole document,
/// `Semantic` and `Qa` run per window, `Keywords` never calls the vision
/// client and aggregates previously written artifacts instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionType {
    Raw,
    Semantic,
    Qa,
    Keywords,
}

impl ExtractionType {
    pub const ALL: [ExtractionType; 4] = [
        ExtractionType::Raw,
        ExtractionType::Semantic,
        ExtractionType::Qa,
        ExtractionType::Keywords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionType::Raw => "raw",
            ExtractionType::Semantic => "semantic",
            ExtractionType::Qa => "qa",
            ExtractionType::Keywords => "keywords",
        }
    }

    /// Whether this type is processed window by window.
    pub fn is_windowed(&self) -> bool {
        matches!(self, ExtractionType::Semantic | ExtractionType::Qa)
    }
}

impl fmt::Display for ExtractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(ExtractionType::Raw),
            "semantic" => Ok(ExtractionType::Semantic),
            "qa" => Ok(ExtractionType::Qa),
            "keywords" => Ok(ExtractionType::Keywords),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown extraction type '{other}' (expected raw, semantic, qa, keywords)"
            ))),
        }
    }
}

/// One prompt of an extraction request.
///
/// Several prompts may be active at once; each is addressed by its position
/// in the request list, which becomes the prompt index in artifact names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    /// Free-text instruction sent to the model.
    #[serde(default)]
    pub detail: String,
    /// Tags selecting which strategies this prompt takes part in.
    #[serde(default)]
    pub extraction_types: Vec<ExtractionType>,
    /// Attach page images to the request.
    #[serde(default)]
    pub include_image: bool,
}

impl PromptSpec {
    pub fn new(detail: impl Into<String>, types: Vec<ExtractionType>) -> Self {
        Self {
            detail: detail.into(),
            extraction_types: types,
            include_image: true,
        }
    }

    pub fn with_include_image(mut self, include: bool) -> Self {
        self.include_image = include;
        self
    }

    pub fn has(&self, ty: ExtractionType) -> bool {
        self.extraction_types.contains(&ty)
    }

    /// The prompt list used when a request carries none.
    pub fn default_list() -> Vec<PromptSpec> {
        vec![PromptSpec::new(
            "Extract all paragraphs.",
            vec![ExtractionType::Raw],
        )]
    }
}
