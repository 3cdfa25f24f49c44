//! Upload ingestion: validate an incoming PDF and store it under a fresh id.
//!
//! Size and `%PDF` magic are checked before anything touches disk, so a
//! rejected upload leaves no trace. Accepted uploads are stored as
//! `<uuid>.<ext>` in the upload directory; the original filename travels
//! with the [`Document`] for the persisted records.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::Document;
use crate::pipeline::artifact::write_atomic_async;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Validate `bytes` and store them in `upload_dir`.
pub async fn ingest_bytes(
    original_filename: &str,
    bytes: &[u8],
    upload_dir: &Path,
    config: &PipelineConfig,
) -> Result<Document, PipelineError> {
    let name = base_name(original_filename);
    check_upload(&name, bytes, config.max_upload_bytes())?;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| PipelineError::io(upload_dir, e))?;

    let id = Uuid::new_v4().to_string();
    let stored_path = upload_dir.join(format!("{id}.{}", extension_of(&name)));
    write_atomic_async(&stored_path, bytes.to_vec())
        .await
        .map_err(|e| PipelineError::io(&stored_path, e))?;

    info!(
        "Stored upload '{name}' ({} bytes) as {}",
        bytes.len(),
        stored_path.display()
    );
    Ok(Document {
        id,
        original_filename: name,
        stored_path,
        pages: Vec::new(),
    })
}

/// Read a local PDF and ingest it as an upload.
pub async fn ingest_file(
    path: &Path,
    upload_dir: &Path,
    config: &PipelineConfig,
) -> Result<Document, PipelineError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => {
            return Err(PipelineError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(PipelineError::io(path, e)),
    };
    let name = base_name(&path.to_string_lossy());
    // Reject oversized files without reading them.
    if meta.len() > config.max_upload_bytes() {
        return Err(PipelineError::UploadTooLarge {
            name,
            size: meta.len(),
            limit: config.max_upload_bytes(),
        });
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    debug!("Read {} ({} bytes)", path.display(), bytes.len());
    ingest_bytes(&name, &bytes, upload_dir, config).await
}

fn check_upload(name: &str, bytes: &[u8], limit: u64) -> Result<(), PipelineError> {
    let size = bytes.len() as u64;
    if size > limit {
        return Err(PipelineError::UploadTooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(PipelineError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

// Browsers may send a full client path as the filename.
fn base_name(original: &str) -> String {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();
    if name.is_empty() {
        "upload.pdf".to_string()
    } else {
        name.to_string()
    }
}

fn extension_of(name: &str) -> String {
    PathBuf::from(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "pdf".to_string())
}
