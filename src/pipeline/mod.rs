//! Pipeline stages for PDF-to-records extraction.
//!
//! Each submodule implements one step or one reusable policy. The
//! orchestration that strings them together lives in
//! [`crate::orchestrator`] and [`crate::aggregate`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ (vision) ──▶ response ──▶ postprocess ──▶ artifact
//! (upload)  (pdfium)   (base64)               (decode)     (cleanup)       (json/txt)
//! ```
//!
//! 1. [`input`]  validates an upload (size, `%PDF` magic) and stores it
//! 2. [`render`] rasterises every page through a bounded [`pool`], with
//!    [`sharpen`] applied before each PNG is written
//! 3. [`encode`] base64-wraps page images for the request body
//! 4. [`window`] partitions pages for windowed prompts
//! 5. [`retry`] wraps per-page vision calls with rate-limit backoff
//! 6. [`response`] decodes a payload once into a tagged variant
//! 7. [`postprocess`] strips fences and sanitises markdown
//! 8. [`artifact`] names and writes per-unit outputs
//! 9. [`keywords`] and [`decode`] serve the aggregation pass

pub mod artifact;
pub mod decode;
pub mod encode;
pub mod input;
pub mod keywords;
pub mod pool;
pub mod postprocess;
pub mod render;
pub mod response;
pub mod retry;
pub mod sharpen;
pub mod window;
