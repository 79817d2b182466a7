//! Context hints for a figure: the section it sits in and the paragraphs
//! around it.
//!
//! Headings are recognised by their Markdown prefix (`# ` to `#### `). A
//! heading resets every deeper level, so the section name of a figure under
//! `## Results` under `# Report` is `Report / Results`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Heading depth tracked for section names.
pub const MAX_HEADING_LEVEL: usize = 4;

/// Paragraphs taken on each side of a figure.
pub const CONTEXT_PARAGRAPHS: usize = 2;

/// Separator between nested heading titles.
pub const SECTION_SEPARATOR: &str = " / ";

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Surrounding-text hints passed to the model with every image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextHints {
    pub section_name: Option<String>,
    pub prior_context: Option<String>,
    pub post_context: Option<String>,
}

impl ContextHints {
    /// Hints for a figure occupying `text[start..end]`.
    pub fn around(text: &str, start: usize, end: usize) -> Self {
        Self {
            section_name: section_name_at(text, start),
            prior_context: prior_context(text, start),
            post_context: post_context(text, end),
        }
    }
}

fn floor_boundary(text: &str, mut offset: usize) -> usize {
    offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > MAX_HEADING_LEVEL {
        return None;
    }
    let rest = line[hashes..].strip_prefix(' ')?;
    let title = rest.trim().trim_end_matches('#').trim();
    (!title.is_empty()).then_some((hashes, title))
}

/// Nested heading path in effect at `offset`, or `None` before any heading.
pub fn section_name_at(text: &str, offset: usize) -> Option<String> {
    let before = &text[..floor_boundary(text, offset)];
    let mut levels: [Option<&str>; MAX_HEADING_LEVEL] = [None; MAX_HEADING_LEVEL];

    for line in before.lines() {
        if let Some((level, title)) = heading_level(line) {
            levels[level - 1] = Some(title);
            for deeper in levels.iter_mut().skip(level) {
                *deeper = None;
            }
        }
    }

    let parts: Vec<&str> = levels.iter().flatten().copied().collect();
    (!parts.is_empty()).then(|| parts.join(SECTION_SEPARATOR))
}

fn is_context_paragraph(p: &str) -> bool {
    !p.is_empty() && !p.starts_with("<!--")
}

/// Up to [`CONTEXT_PARAGRAPHS`] paragraphs ending right before `offset`.
pub fn prior_context(text: &str, offset: usize) -> Option<String> {
    let before = &text[..floor_boundary(text, offset)];
    let mut paragraphs: Vec<&str> = RE_PARAGRAPH_BREAK
        .split(before)
        .map(str::trim)
        .filter(|p| is_context_paragraph(p))
        .collect();
    let keep_from = paragraphs.len().saturating_sub(CONTEXT_PARAGRAPHS);
    paragraphs.drain(..keep_from);
    (!paragraphs.is_empty()).then(|| paragraphs.join("\n\n"))
}

/// Up to [`CONTEXT_PARAGRAPHS`] paragraphs starting right after `end`.
pub fn post_context(text: &str, end: usize) -> Option<String> {
    let after = &text[floor_boundary(text, end)..];
    let paragraphs: Vec<&str> = RE_PARAGRAPH_BREAK
        .split(after)
        .map(str::trim)
        .filter(|p| is_context_paragraph(p))
        .take(CONTEXT_PARAGRAPHS)
        .collect();
    (!paragraphs.is_empty()).then(|| paragraphs.join("\n\n"))
}
