//! Classification replies and the category → template lookup.
//!
//! The first iterative-mode call returns `{"category": …, "sub_category": …}`.
//! [`parse_classification`] turns that into a [`Classification`] and
//! [`template_for`] maps it to the specialised instruction through one static
//! table. Unknown sub-categories resolve to the category's `other` entry and
//! unknown categories to the generic instruction.

use crate::error::DescribeError;
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Sub-category used when the reply has none or an unknown one.
pub const OTHER: &str = "other";

/// Top-level image category reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Table,
    Chart,
    Formula,
    Text,
    Picture,
    Radiograph,
    /// Anything the lookup table has no entry for.
    Other,
}

impl Category {
    /// Case-insensitive, tolerant of a few common synonyms.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "table" | "tables" => Self::Table,
            "chart" | "graph" | "plot" | "charts" => Self::Chart,
            "formula" | "equation" | "math" => Self::Formula,
            "text" => Self::Text,
            "picture" | "image" | "photo" | "diagram" => Self::Picture,
            "radiograph" | "medical" | "scan" => Self::Radiograph,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Chart => "chart",
            Self::Formula => "formula",
            Self::Text => "text",
            Self::Picture => "picture",
            Self::Radiograph => "radiograph",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed classifier reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    /// Normalised: lowercase, `_` and spaces replaced by `-`. Never empty.
    pub sub_category: String,
}

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Parse the classifier reply.
///
/// * empty reply → `Ok(None)` (no description)
/// * no JSON object, or invalid JSON → `Err(UnparsableClassification)`
/// * object without a usable `category` → `Ok(None)`
/// * missing `sub_category` → `"other"`
pub fn parse_classification(raw: &str) -> Result<Option<Classification>, DescribeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let unfenced = FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    let object = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => {
            return Err(DescribeError::UnparsableClassification {
                raw: raw.to_string(),
                detail: "no JSON object found".into(),
            })
        }
    };

    let value: Value =
        serde_json::from_str(object).map_err(|e| DescribeError::UnparsableClassification {
            raw: raw.to_string(),
            detail: e.to_string(),
        })?;

    let field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let Some(category) = field(&["category", "Category"]) else {
        debug!("Classifier reply has no category: {}", object);
        return Ok(None);
    };
    let sub_category = field(&["sub_category", "subcategory", "subCategory", "sub-category"])
        .map(|s| normalize_sub_category(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| OTHER.to_string());

    Ok(Some(Classification {
        category: Category::from_label(&category),
        sub_category,
    }))
}

/// `"Time Series"`, `"time_series"` and `"TIME-SERIES"` all become `"time-series"`.
pub fn normalize_sub_category(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

type TemplateTable = HashMap<Category, HashMap<&'static str, String>>;

static TEMPLATES: Lazy<TemplateTable> = Lazy::new(|| {
    use prompts::*;
    let mut t: TemplateTable = HashMap::new();
    let mut put = |c: Category, sub: &'static str, text: String| {
        t.entry(c).or_default().insert(sub, text);
    };

    put(Category::Table, "standard", TABLE_STANDARD.into());
    put(Category::Table, "matrix", TABLE_MATRIX.into());
    put(Category::Table, "pivot", TABLE_PIVOT.into());
    put(Category::Table, "cross-tab", TABLE_CROSS_TAB.into());
    put(Category::Table, "nested", TABLE_NESTED.into());
    put(Category::Table, OTHER, TABLE_STANDARD.into());

    put(Category::Chart, "bar", CHART_BAR.into());
    put(Category::Chart, "line", CHART_LINE.into());
    put(Category::Chart, "pie", CHART_PIE.into());
    put(Category::Chart, "scatter", CHART_SCATTER.into());
    put(Category::Chart, "histogram", CHART_HISTOGRAM.into());
    put(Category::Chart, "box", CHART_BOX.into());
    put(Category::Chart, "time-series", CHART_TIME_SERIES.into());
    put(Category::Chart, "heat-map", CHART_HEAT_MAP.into());
    put(Category::Chart, "network", CHART_NETWORK.into());
    put(Category::Chart, "venn", CHART_VENN.into());
    put(Category::Chart, "sankey", CHART_SANKEY.into());
    put(Category::Chart, "tree", CHART_TREE.into());
    put(Category::Chart, "radar", CHART_RADAR.into());
    put(Category::Chart, "bubble", CHART_BUBBLE.into());
    put(Category::Chart, "waterfall", CHART_WATERFALL.into());
    put(Category::Chart, "gantt", CHART_GANTT.into());
    put(Category::Chart, OTHER, chart_other());

    put(Category::Formula, OTHER, FORMULA.into());
    put(Category::Text, OTHER, TEXT.into());

    put(Category::Picture, "diagram", PICTURE_DIAGRAM.into());
    put(Category::Picture, "photo", PICTURE_PHOTO.into());
    put(Category::Picture, "drawing", PICTURE_DRAWING.into());
    put(Category::Picture, OTHER, PICTURE_OTHER.into());

    put(Category::Radiograph, "x-ray", radiograph(RADIOGRAPH_XRAY));
    put(Category::Radiograph, "mri", radiograph(RADIOGRAPH_MRI));
    put(Category::Radiograph, "ct", radiograph(RADIOGRAPH_CT));
    put(Category::Radiograph, OTHER, radiograph(RADIOGRAPH_OTHER));

    t
});

/// Spellings the classifier tends to produce for keys of the table.
fn canonical_sub_category(sub: &str) -> &str {
    match sub {
        "crosstab" | "cross-tabulation" => "cross-tab",
        "xray" => "x-ray",
        "heatmap" => "heat-map",
        "timeseries" => "time-series",
        "box-plot" | "boxplot" => "box",
        "photograph" => "photo",
        other => other,
    }
}

/// Instruction template for a classification.
///
/// Resolution: exact `(category, sub)` entry, then `(category, "other")`,
/// then the generic instruction.
pub fn template_for(classification: &Classification) -> &'static str {
    let sub = canonical_sub_category(&classification.sub_category);
    TEMPLATES
        .get(&classification.category)
        .and_then(|subs| subs.get(sub).or_else(|| subs.get(OTHER)))
        .map(String::as_str)
        .unwrap_or(prompts::GENERIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Classification {
        parse_classification(raw).unwrap().unwrap()
    }

    #[test]
    fn parses_plain_json() {
        let c = parse(r#"{"category": "chart", "sub_category": "bar"}"#);
        assert_eq!(c.category, Category::Chart);
        assert_eq!(c.sub_category, "bar");
    }

    #[test]
    fn parses_fenced_json_with_chatter() {
        let c = parse("Sure!\n```json\n{\"category\": \"Radiograph\", \"sub_category\": \"MRI\"}\n```");
        assert_eq!(c.category, Category::Radiograph);
        assert_eq!(c.sub_category, "mri");
        assert_eq!(template_for(&c), prompts::radiograph(prompts::RADIOGRAPH_MRI));
    }

    #[test]
    fn empty_reply_is_no_description() {
        assert!(parse_classification("   \n").unwrap().is_none());
    }

    #[test]
    fn missing_category_is_no_description() {
        assert!(parse_classification(r#"{"sub_category": "bar"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_sub_category_defaults_to_other() {
        let c = parse(r#"{"category": "picture"}"#);
        assert_eq!(c.sub_category, OTHER);
        assert_eq!(template_for(&c), prompts::PICTURE_OTHER);
    }

    #[test]
    fn garbage_is_unparsable() {
        let err = parse_classification("I think this is a chart.").unwrap_err();
        assert!(matches!(err, DescribeError::UnparsableClassification { .. }));

        let err = parse_classification("{category: chart}").unwrap_err();
        assert!(matches!(err, DescribeError::UnparsableClassification { .. }));
    }

    #[test]
    fn unknown_sub_category_uses_category_other() {
        let c = parse(r#"{"category": "table", "sub_category": "hologram"}"#);
        assert_eq!(template_for(&c), prompts::TABLE_STANDARD);

        let c = parse(r#"{"category": "chart", "sub_category": "spiral"}"#);
        assert_eq!(template_for(&c), prompts::chart_other());
    }

    #[test]
    fn unknown_category_uses_generic() {
        let c = parse(r#"{"category": "logo", "sub_category": "bar"}"#);
        assert_eq!(c.category, Category::Other);
        assert_eq!(template_for(&c), prompts::GENERIC);
    }

    #[test]
    fn sub_category_spellings_normalise() {
        assert_eq!(normalize_sub_category("Time Series"), "time-series");
        assert_eq!(normalize_sub_category("heat_map"), "heat-map");
        assert_eq!(normalize_sub_category(" X-Ray "), "x-ray");

        let c = parse(r#"{"category": "table", "sub_category": "Cross Tab"}"#);
        assert_eq!(template_for(&c), prompts::TABLE_CROSS_TAB);
        let c = parse(r#"{"category": "chart", "sub_category": "heatmap"}"#);
        assert_eq!(template_for(&c), prompts::CHART_HEAT_MAP);
    }

    #[test]
    fn every_category_has_an_other_entry() {
        for cat in [
            Category::Table,
            Category::Chart,
            Category::Formula,
            Category::Text,
            Category::Picture,
            Category::Radiograph,
        ] {
            assert!(
                TEMPLATES.get(&cat).is_some_and(|s| s.contains_key(OTHER)),
                "{cat} lacks other"
            );
        }
    }
}
