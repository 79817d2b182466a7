//! Pending replacements: one record per figure span.
//!
//! Every record points into the *original* text. Offsets are validated here
//! (in bounds, on character boundaries) and never recomputed afterwards.

use crate::analysis::AnalysisResult;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Placeholder for a figure nobody described (yet).
pub const NO_DESCRIPTION: &str = "<!-- No description available -->";

/// Placeholder for a figure whose description failed.
pub const ANALYSIS_ERROR: &str = "<!-- There was an error analysing the image -->";

/// The eventual substitution of `text[start..end]` for one figure occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReplacement {
    /// Index of the figure in [`AnalysisResult::figures`].
    pub figure_index: usize,
    /// Byte offset into the original text.
    pub start: usize,
    /// Exclusive byte offset into the original text.
    pub end: usize,
    pub caption: String,
    /// Starts as [`NO_DESCRIPTION`].
    pub description: String,
    /// File names of the figure's extracted regions, in region order.
    pub image_names: Vec<String>,
}

impl PendingReplacement {
    pub fn new(figure_index: usize, start: usize, end: usize, caption: String) -> Self {
        Self {
            figure_index,
            start,
            end,
            caption,
            description: NO_DESCRIPTION.to_string(),
            image_names: Vec::new(),
        }
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text.find(close)?;
    (start <= end).then(|| &text[start..end])
}

/// Caption of a figure occurrence.
///
/// Opening marker: `<figure>`, else `<figcaption>`. Closing marker:
/// `</figure>`, else `</figcaption>`. The text between them when both exist
/// in that order, otherwise the whole span text. Literal `\n` escapes and
/// runs of whitespace collapse to single spaces.
pub fn extract_caption(span_text: &str) -> String {
    let open = if span_text.contains("<figure>") {
        "<figure>"
    } else {
        "<figcaption>"
    };
    let close = if span_text.contains("</figure>") {
        "</figure>"
    } else {
        "</figcaption>"
    };
    let raw = between(span_text, open, close).unwrap_or(span_text);

    raw.replace("\\n", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build one [`PendingReplacement`] per figure span, sorted by `start`.
///
/// Spans outside the text or splitting a character are dropped. So is a span
/// that overlaps one starting earlier, leaving a non-overlapping set.
pub fn build_replacements(analysis: &AnalysisResult) -> Vec<PendingReplacement> {
    let text = analysis.text.as_str();
    let mut out = Vec::new();

    for (figure_index, figure) in analysis.figures.iter().enumerate() {
        for span in &figure.spans {
            let (start, end) = (span.offset, span.end());
            let Some(span_text) = text.get(start..end) else {
                warn!(
                    "Figure {}: span {}..{} is not a valid range of the {}-byte text; skipped",
                    figure_index,
                    start,
                    end,
                    text.len()
                );
                continue;
            };
            out.push(PendingReplacement::new(
                figure_index,
                start,
                end,
                extract_caption(span_text),
            ));
        }
    }

    out.sort_by_key(|r| (r.start, r.end));

    let mut kept: Vec<PendingReplacement> = Vec::with_capacity(out.len());
    for rep in out {
        if let Some(prev) = kept.last() {
            if rep.start < prev.end {
                warn!(
                    "Figure {}: span {}..{} overlaps figure {} span {}..{}; skipped",
                    rep.figure_index, rep.start, rep.end, prev.figure_index, prev.start, prev.end
                );
                continue;
            }
        }
        kept.push(rep);
    }
    kept
}

/// The lowest-offset replacement of a figure.
pub fn first_span_of(
    replacements: &[PendingReplacement],
    figure_index: usize,
) -> Option<&PendingReplacement> {
    replacements
        .iter()
        .filter(|r| r.figure_index == figure_index)
        .min_by_key(|r| r.start)
}
