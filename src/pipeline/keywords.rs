//! Keyword sections: parsing page text and the keyword-type strategy.

use crate::prompts::KEYWORDS_HEADING;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Split `text` into its body and the keyword list under
/// [`KEYWORDS_HEADING`].
///
/// The first well-formed JSON array after the heading is the keyword list.
/// The heading and the array are removed from the body; text after the
/// array is kept. A malformed array yields no keywords and the body is cut
/// at the heading. Without the heading the text is returned unchanged.
pub fn extract_keywords(text: &str) -> (String, Vec<String>) {
    let Some(marker) = text.find(KEYWORDS_HEADING) else {
        return (text.to_string(), Vec::new());
    };
    let head = text[..marker].trim_end();
    let after_marker = &text[marker + KEYWORDS_HEADING.len()..];

    let Some(open) = after_marker.find('[') else {
        debug!("keyword heading without an array");
        return (head.to_string(), Vec::new());
    };
    let array_src = &after_marker[open..];
    let mut stream = serde_json::Deserializer::from_str(array_src).into_iter::<Vec<Value>>();
    match stream.next() {
        Some(Ok(items)) => {
            let consumed = stream.byte_offset();
            let tail = strip_closing_fence(&array_src[consumed..]);
            let keywords = items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let body = join_body(head, tail.trim());
            (body, keywords)
        }
        _ => {
            debug!("malformed keyword array, keeping text before the heading");
            (head.to_string(), Vec::new())
        }
    }
}

// A ```json fence around the array leaves its closing fence behind.
fn strip_closing_fence(tail: &str) -> &str {
    let trimmed = tail.trim_start();
    trimmed.strip_prefix("```").unwrap_or(trimmed)
}

fn join_body(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (_, true) => head.to_string(),
        (true, false) => tail.to_string(),
        (false, false) => format!("{head}\n\n{tail}"),
    }
}

// ── Keyword strategy ─────────────────────────────────────────────────────

/// Input to a [`KeywordStrategy`]: the artifacts other extraction types
/// wrote for the same window and prompt.
#[derive(Debug, Clone, Default)]
pub struct KeywordSources {
    pub window: usize,
    pub prompt: usize,
    /// `(artifact path, decoded text)` for every source that exists.
    pub artifacts: Vec<(PathBuf, String)>,
}

/// What a keyword unit derives from its sources.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordOutput {
    pub keywords: Vec<String>,
    /// Set when the strategy did not derive anything real.
    pub placeholder: bool,
}

/// Aggregation point for keyword-type prompts. Never calls a vision client.
pub trait KeywordStrategy: Send + Sync {
    fn synthesize(&self, sources: &KeywordSources) -> KeywordOutput;
}

/// Emits an empty, flagged placeholder for every window.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderKeywords;

impl KeywordStrategy for PlaceholderKeywords {
    fn synthesize(&self, _sources: &KeywordSources) -> KeywordOutput {
        KeywordOutput {
            keywords: Vec::new(),
            placeholder: true,
        }
    }
}

/// Collects keyword sections already present in the source artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionKeywords;

impl KeywordStrategy for SectionKeywords {
    fn synthesize(&self, sources: &KeywordSources) -> KeywordOutput {
        let mut keywords: Vec<String> = Vec::new();
        for (_, text) in &sources.artifacts {
            for kw in extract_keywords(text).1 {
                if !keywords.contains(&kw) {
                    keywords.push(kw);
                }
            }
        }
        KeywordOutput {
            keywords,
            placeholder: false,
        }
    }
}
