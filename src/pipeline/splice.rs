//! Text splicer: apply every replacement to the original text, once.
//!
//! Replacements are applied in descending `start` order, so an edit never
//! moves the offsets of the edits still to come: each of those lies entirely
//! before the region just rewritten. The non-overlap precondition is checked
//! up front and the text is left untouched when it does not hold.

use crate::analysis::AnalysisResult;
use crate::error::SpliceError;
use crate::pipeline::replacements::PendingReplacement;

/// Block substituted for a figure span.
///
/// Start and end markers are HTML comments so the block can be found (or
/// stripped) mechanically and stays invisible when rendered.
pub fn render_block(rep: &PendingReplacement) -> String {
    let paths = if rep.image_names.is_empty() {
        "<!-- Image Path:  -->".to_string()
    } else {
        rep.image_names
            .iter()
            .map(|name| format!("<!-- Image Path: {name} -->"))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    format!(
        "<!-- Start of description of image at this position in the source document -->\n\n\
         {paths}\n\n\
         **Caption:** {}\n\n\
         **Description:** {}\n\
         <!-- End of Image Description -->",
        rep.caption, rep.description
    )
}

/// Replace `text[start..end]` of every replacement with its rendered block.
///
/// Fails without modifying anything when a range is out of bounds, splits a
/// character, or overlaps another range.
pub fn splice(text: &str, mut replacements: Vec<PendingReplacement>) -> Result<String, SpliceError> {
    for rep in &replacements {
        if rep.start > rep.end || rep.end > text.len() {
            return Err(SpliceError::OutOfBounds {
                start: rep.start,
                end: rep.end,
                len: text.len(),
            });
        }
        for offset in [rep.start, rep.end] {
            if !text.is_char_boundary(offset) {
                return Err(SpliceError::NotCharBoundary { offset });
            }
        }
    }

    replacements.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    // Descending order: each entry must end before the previous one starts.
    for pair in replacements.windows(2) {
        let (later, earlier) = (&pair[0], &pair[1]);
        if earlier.end > later.start {
            return Err(SpliceError::Overlap {
                first_start: earlier.start,
                first_end: earlier.end,
                second_start: later.start,
                second_end: later.end,
            });
        }
    }

    let mut out = text.to_string();
    for rep in &replacements {
        out.replace_range(rep.start..rep.end, &render_block(rep));
    }
    Ok(out)
}

/// Document title: a `title` paragraph, else the first `# ` heading, else `stem`.
pub fn detect_title(analysis: &AnalysisResult, text: &str, stem: &str) -> String {
    if let Some(title) = analysis.title_paragraph() {
        return title.to_string();
    }
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Paragraph;
    use crate::pipeline::replacements::NO_DESCRIPTION;

    fn rep(start: usize, end: usize, caption: &str, description: &str) -> PendingReplacement {
        let mut r = PendingReplacement::new(0, start, end, caption.into());
        r.description = description.into();
        r.image_names = vec!["doc_1_0_0.png".into()];
        r
    }

    #[test]
    fn block_layout() {
        let block = render_block(&rep(0, 0, "Fig 1", "A bar chart."));
        assert_eq!(
            block,
            "<!-- Start of description of image at this position in the source document -->\n\n\
             <!-- Image Path: doc_1_0_0.png -->\n\n\
             **Caption:** Fig 1\n\n\
             **Description:** A bar chart.\n\
             <!-- End of Image Description -->"
        );
    }

    #[test]
    fn block_without_image_keeps_empty_marker() {
        let block = render_block(&PendingReplacement::new(0, 0, 0, "c".into()));
        assert!(block.contains("<!-- Image Path:  -->"));
        assert!(block.contains(NO_DESCRIPTION));
    }

    #[test]
    fn descending_order_keeps_offsets_valid() {
        let text = "AAA[one]BBB[two]CCC";
        // Given in ascending order on purpose.
        let reps = vec![rep(3, 8, "1", "first"), rep(11, 16, "2", "second")];
        let blocks: Vec<String> = reps.iter().map(render_block).collect();

        let out = splice(text, reps).unwrap();

        assert_eq!(out, format!("AAA{}BBB{}CCC", blocks[0], blocks[1]));
    }

    #[test]
    fn length_is_preserved_arithmetically() {
        let text = "0123456789abcdefghij";
        let reps = vec![rep(15, 20, "c", "d3"), rep(0, 2, "a", "d1"), rep(5, 5, "b", "d2")];
        let removed: usize = reps.iter().map(|r| r.end - r.start).sum();
        let inserted: usize = reps.iter().map(|r| render_block(r).len()).sum();

        let out = splice(text, reps).unwrap();

        assert_eq!(out.len(), text.len() - removed + inserted);
    }

    #[test]
    fn overlap_is_rejected() {
        let err = splice("0123456789", vec![rep(2, 6, "", ""), rep(5, 8, "", "")]).unwrap_err();
        assert_eq!(
            err,
            SpliceError::Overlap {
                first_start: 2,
                first_end: 6,
                second_start: 5,
                second_end: 8
            }
        );
    }

    #[test]
    fn adjacent_ranges_are_fine() {
        assert!(splice("0123456789", vec![rep(2, 5, "", ""), rep(5, 8, "", "")]).is_ok());
    }

    #[test]
    fn bad_ranges_are_rejected() {
        assert!(matches!(
            splice("short", vec![rep(2, 10, "", "")]),
            Err(SpliceError::OutOfBounds { len: 5, .. })
        ));
        assert_eq!(
            splice("héllo", vec![rep(2, 3, "", "")]).unwrap_err(),
            SpliceError::NotCharBoundary { offset: 2 }
        );
    }

    #[test]
    fn no_replacements_returns_text_unchanged() {
        assert_eq!(splice("same", Vec::new()).unwrap(), "same");
    }

    #[test]
    fn title_detection_order() {
        let mut a = AnalysisResult::default();
        assert_eq!(detect_title(&a, "no heading", "stem"), "stem");
        assert_eq!(detect_title(&a, "intro\n# Heading One\n# Two", "stem"), "Heading One");

        a.paragraphs.push(Paragraph {
            role: Some("title".into()),
            content: "The Title".into(),
            ..Default::default()
        });
        assert_eq!(detect_title(&a, "# Heading One", "stem"), "The Title");
    }
}
