//! Error types for the pdf2records library.
//!
//! * [`PipelineError`] aborts the whole job: unreadable upload, corrupt PDF,
//!   no provider. Returned as `Err(PipelineError)` from the job-level entry
//!   points.
//!
//! * [`UnitError`] fails one page render or one extraction call. It is
//!   stored inside [`crate::model::UnitStatus::Failed`] and the other units
//!   carry on.
//!
//! * [`VisionError`] is what a [`crate::vision::VisionClient`] call returns.
//!   Only [`VisionError::RateLimited`] is retried.
//!
//! * [`StoreError`] means a record sink rejected one record. The aggregator
//!   logs it and moves on to the next page.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2records library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The upload was read, but is not a PDF.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// The upload exceeds the configured maximum size.
    #[error("File too large: '{name}' is {size} bytes, limit is {limit} bytes")]
    UploadTooLarge { name: String, size: u64, limit: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Extraction was requested but no page images exist.
    #[error("No page images found for extraction in '{dir}'")]
    NoPageImages { dir: PathBuf },

    /// Aggregation was requested but no per-page artifacts exist.
    #[error("No per-page JSON artifacts found in '{dir}'")]
    NoPageArtifacts { dir: PathBuf },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A filesystem operation on a job directory failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, runtime failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single unit of work (a page or an extraction call).
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// A non-retryable vision call failure.
    #[error("{unit}: vision call failed: {detail}")]
    VisionFailed { unit: String, detail: String },

    /// Every attempt was rate limited.
    #[error("{unit}: still rate limited after {retries} retries: {detail}")]
    RetriesExhausted {
        unit: String,
        retries: u32,
        detail: String,
    },

    /// The unit succeeded but its artifact could not be written.
    #[error("{unit}: could not write artifact: {detail}")]
    ArtifactWriteFailed { unit: String, detail: String },
}

/// Error returned by a [`crate::vision::VisionClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisionError {
    /// Transient quota rejection; the caller may back off and retry.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Anything else. Never retried.
    #[error("{message}")]
    Failed { message: String },
}

impl VisionError {
    /// Classify a provider error message.
    ///
    /// Only an HTTP 429 or an explicit "rate limit" mention is transient.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            Self::RateLimited { message }
        } else {
            Self::Failed { message }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RateLimited { message } | Self::Failed { message } => message,
        }
    }
}

/// Error returned by a [`crate::store::RecordSink`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("record rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limit_by_status() {
        let e = VisionError::classify("HTTP 429 Too Many Requests");
        assert!(e.is_rate_limited());
    }

    #[test]
    fn classify_rate_limit_by_message_case_insensitive() {
        assert!(VisionError::classify("Rate Limit reached for gpt-4o").is_rate_limited());
    }

    #[test]
    fn classify_other_errors_as_failed() {
        let e = VisionError::classify("401 invalid api key");
        assert!(!e.is_rate_limited());
        assert_eq!(e.message(), "401 invalid api key");
    }

    #[test]
    fn upload_too_large_display() {
        let e = PipelineError::UploadTooLarge {
            name: "big.pdf".into(),
            size: 300,
            limit: 200,
        };
        let msg = e.to_string();
        assert!(msg.contains("big.pdf"), "got: {msg}");
        assert!(msg.contains("200"), "got: {msg}");
    }

    #[test]
    fn retries_exhausted_display() {
        let e = UnitError::RetriesExhausted {
            unit: "page 3".into(),
            retries: 5,
            detail: "429".into(),
        };
        assert!(e.to_string().contains("after 5 retries"));
    }
}
