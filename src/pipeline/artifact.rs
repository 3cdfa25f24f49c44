//! Artifact naming and writing.
//!
//! Every name is a pure function of its key, so a rerun overwrites the same
//! files instead of accumulating new ones:
//!
//! | Artifact | Name |
//! |---|---|
//! | page image | `<docId>_page<N>.png` (N 1-based) |
//! | whole-document unit | `allpages_<prompt>_<type>.{json,txt}` |
//! | window unit | `window_<w>_<prompt>_<type>.{json,txt}` |
//! | per-page unit | `page_<i>.{json,txt}` (i 0-based) |
//! | keyword unit | `window_<w>_<prompt>_keywords.json` |
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! reader never sees a half-written artifact.

use crate::model::{PageImage, UnitKey};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};

pub fn page_image_name(document_id: &str, page: usize) -> String {
    format!("{document_id}_page{page}.png")
}

pub fn json_path(dir: &Path, key: &UnitKey) -> PathBuf {
    dir.join(format!("{}.json", key.file_stem()))
}

pub fn text_path(dir: &Path, key: &UnitKey) -> PathBuf {
    dir.join(format!("{}.txt", key.file_stem()))
}

/// Write `bytes` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

pub async fn write_atomic_async(path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Delete `path`; a file that is already gone is not an error.
pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Discovery ────────────────────────────────────────────────────────────

static PAGE_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<doc>.+)_page(?P<n>\d+)\.png$").unwrap());

static PAGE_ARTIFACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_(?P<i>\d+)\.json$").unwrap());

/// Page images for `document_id` in `dir`, sorted by page number.
///
/// With `document_id = None` every `*_pageN.png` is accepted.
pub fn discover_page_images(dir: &Path, document_id: Option<&str>) -> io::Result<Vec<PageImage>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = PAGE_IMAGE_RE.captures(name) else {
            continue;
        };
        if document_id.is_some_and(|id| id != &caps["doc"]) {
            continue;
        }
        if let Ok(page) = caps["n"].parse::<usize>() {
            found.push(PageImage {
                page,
                path: entry.path(),
            });
        }
    }
    found.sort_by_key(|p| p.page);
    Ok(found)
}

/// 0-based indices of the `page_<i>.json` artifacts in `dir`, ascending.
pub fn discover_page_artifacts(dir: &Path) -> io::Result<Vec<usize>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(i) = PAGE_ARTIFACT_RE
            .captures(name)
            .and_then(|c| c["i"].parse::<usize>().ok())
        {
            found.push(i);
        }
    }
    found.sort_unstable();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionType;

    #[test]
    fn names_follow_keys() {
        let dir = Path::new("/out");
        let key = UnitKey::Window {
            window: 2,
            prompt: 1,
            ty: ExtractionType::Semantic,
        };
        assert_eq!(json_path(dir, &key), PathBuf::from("/out/window_2_1_semantic.json"));
        assert_eq!(text_path(dir, &key), PathBuf::from("/out/window_2_1_semantic.txt"));
        assert_eq!(page_image_name("abc", 3), "abc_page3.png");
    }

    #[test]
    fn atomic_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_0.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("page_0.json.tmp").exists());
    }

    #[tokio::test]
    async fn removing_a_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_0.txt");
        remove_if_exists(&path).await.unwrap();
        write_atomic(&path, b"x").unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn discovery_sorts_numerically_and_filters_document() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 1] {
            std::fs::write(dir.path().join(page_image_name("doc", n)), b"").unwrap();
        }
        std::fs::write(dir.path().join(page_image_name("other", 5)), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let pages: Vec<usize> = discover_page_images(dir.path(), Some("doc"))
            .unwrap()
            .iter()
            .map(|p| p.page)
            .collect();
        assert_eq!(pages, vec![1, 2, 10]);
        assert_eq!(discover_page_images(dir.path(), None).unwrap().len(), 4);
    }

    #[test]
    fn page_artifact_discovery() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page_11.json", "page_2.json", "page_2.txt", "window_0_0_qa.json"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        assert_eq!(discover_page_artifacts(dir.path()).unwrap(), vec![2, 11]);
    }
}
