//! Prompt texts and prompt composition.
//!
//! Every prompt the pipeline sends is built here so the orchestrator only
//! decides *which* prompt a unit gets, never *what* it says.

use crate::config::ExtractionType;

/// Heading under which the per-page prompt asks for the keyword array.
pub const KEYWORDS_HEADING: &str = "## Extracted Keywords";

/// Built-in prompt for independent-per-page extraction.
pub const PER_PAGE_PROMPT: &str = r#"Extract the content of this page as a Markdown document.
- For paragraphs, keep the raw text as-is, preserving the original wording and order.
- For diagrams, charts, or non-paragraph elements, perform a detailed extraction, not a summary:
    - Identify and list every distinct element, label, node, relationship, and text present in the diagram.
    - For each, provide the exact wording, and if possible, describe its role or meaning in context.
    - Do not summarize; instead, enumerate all visible items, including minor or peripheral details.
    - Present the extracted information in a structured Markdown format, using bullet points or tables as appropriate.
    - If the diagram contains groups or categories, reflect this structure in your output.
- In addition, extract and return a list of 30-50 concrete keywords, including direct terms, synonyms, related concepts, scenarios, use cases, processes, and consequences that appear on the page.
- Present the keywords as a JSON array at the end of the Markdown, under a heading '## Extracted Keywords'.
- Do not invent or add information that is not present on the page.
Return only the final result as a well-structured Markdown document, with the keywords section at the end."#;

/// Trailing instruction for windowed prompts.
pub const WINDOW_OUTPUT_INSTRUCTION: &str = "Output your answer as a well-structured Markdown document, using headings, bullet points, and code blocks as appropriate.";

/// Prompt for a whole-document (`raw`) unit.
pub fn whole_document_prompt(detail: &str) -> String {
    format!("{detail}\n[Extraction Type: {}]", ExtractionType::Raw)
}

/// Prompt for one window unit, optionally prefixed with earlier markdown.
pub fn window_prompt(detail: &str, ty: ExtractionType, prior_context: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(prior) = prior_context.filter(|p| !p.trim().is_empty()) {
        prompt.push_str("Previous context (Markdown):\n\n");
        prompt.push_str(prior);
        prompt.push_str("\n\n");
    }
    prompt.push_str(detail);
    prompt.push_str(&format!("\n[Extraction Type: {ty}]\n"));
    prompt.push_str(WINDOW_OUTPUT_INSTRUCTION);
    prompt
}
