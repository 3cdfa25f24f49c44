//! Post-processing: deterministic cleanup of VLM-generated Markdown.
//!
//! Two steps run before any markdown is written:
//!
//! 1. [`strip_code_fences`] removes an outer ```` ``` ```` wrapper that models
//!    add despite being asked not to.
//! 2. [`clean_markdown`] sanitises the text. It is idempotent:
//!    `clean_markdown(&clean_markdown(x)) == clean_markdown(x)`.
//!
//! ## Rule Order
//!
//! Control characters are dropped before line endings are normalised so a
//! stray `\r` survives long enough to become `\n`; trailing whitespace is
//! trimmed last, once every line break is final.

/// Sanitise model output.
///
/// Rules (applied in order):
/// 1. Drop non-printable control characters except `\n`, `\r`, `\t`
/// 2. Drop invisible Unicode (zero-width spaces, BOM, soft hyphen, word joiner)
/// 3. Normalise line endings (CRLF / CR → LF)
/// 4. Trim trailing whitespace per line
pub fn clean_markdown(input: &str) -> String {
    let s = remove_control_chars(input);
    let s = remove_invisible_chars(&s);
    let s = normalise_line_endings(&s);
    trim_trailing_whitespace(&s)
}

/// Fence-strip, sanitise and trim extracted text.
///
/// `None` when nothing but whitespace remains.
pub fn prepare_markdown(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = clean_markdown(&strip_code_fences(text));
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ── Fences ───────────────────────────────────────────────────────────────────

/// Remove an outer fenced code block (with or without a language tag).
///
/// Text that does not start with a fence is returned unchanged.
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return input.to_string();
    };
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => return input.to_string(),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).to_string()
}

// ── Rule 1: Control characters ───────────────────────────────────────────────

fn remove_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

// ── Rule 2: Invisible Unicode ────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Line endings ─────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Trailing whitespace ──────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
