//! Layout analysis result: the read-only input of the reconciliation pipeline.
//!
//! These types mirror what the layout analysis service reports (text plus
//! positional metadata) as plain serialisable structs. Every collection
//! defaults to empty and every optional field to `None`, so older or partial
//! cache files still load.
//!
//! All [`Span`] offsets are **byte** offsets into [`AnalysisResult::text`].

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// Version written into new cache files.
pub const ANALYSIS_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    ANALYSIS_SCHEMA_VERSION
}

/// A byte range into the analysed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Where an element sits visually: a page plus a quadrilateral.
///
/// `polygon` holds the four corners as `x0,y0,x1,y1,x2,y2,x3,y3` in analysis
/// page units, clockwise from the top-left corner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingRegion {
    /// 1-indexed page number.
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub polygon: Vec<f64>,
}

/// One analysed page and its extent in analysis units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisPage {
    /// 1-indexed page number.
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    /// Unit of `width`/`height` and of polygons on this page ("inch", "pixel").
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub angle: Option<f64>,
}

/// A detected figure: where it occurs in the text and where it is drawn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Figure {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// A paragraph with an optional semantic role ("title", "sectionHeading", …).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
}

/// A detected table. Carried through for consumers; the pipeline only reads figures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub column_count: usize,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Everything the layout analysis service reports for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Markdown text of the whole document.
    #[serde(default, alias = "markdown")]
    pub text: String,
    #[serde(default)]
    pub pages: Vec<AnalysisPage>,
    #[serde(default)]
    pub figures: Vec<Figure>,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            schema_version: ANALYSIS_SCHEMA_VERSION,
            text: String::new(),
            pages: Vec::new(),
            figures: Vec::new(),
            paragraphs: Vec::new(),
            tables: Vec::new(),
        }
    }
}

impl AnalysisResult {
    /// Number of (figure, bounding region) pairs, i.e. region tasks.
    pub fn region_count(&self) -> usize {
        self.figures.iter().map(|f| f.bounding_regions.len()).sum()
    }

    /// Content of the first paragraph whose role is `title`.
    pub fn title_paragraph(&self) -> Option<&str> {
        self.paragraphs
            .iter()
            .find(|p| p.role.as_deref() == Some("title"))
            .map(|p| p.content.trim())
            .filter(|t| !t.is_empty())
    }

    /// Load a cached analysis. Missing, empty or corrupt files are a miss.
    pub async fn load_cached(path: &Path) -> Option<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read cached analysis '{}': {}", path.display(), e);
                }
                return None;
            }
        };
        if raw.trim().is_empty() {
            debug!("Cached analysis '{}' is empty", path.display());
            return None;
        }
        match serde_json::from_str::<Self>(&raw) {
            Ok(analysis) => {
                if analysis.schema_version > ANALYSIS_SCHEMA_VERSION {
                    warn!(
                        "Cached analysis '{}' has schema version {} (newer than {}); re-analysing",
                        path.display(),
                        analysis.schema_version,
                        ANALYSIS_SCHEMA_VERSION
                    );
                    return None;
                }
                Some(analysis)
            }
            Err(e) => {
                warn!(
                    "Cached analysis '{}' is corrupt, re-analysing: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persist the analysis as pretty JSON. Failure only costs a future re-analysis.
    pub async fn save_cache(&self, path: &Path) {
        let json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cannot serialise analysis for '{}': {}", path.display(), e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, json).await {
            warn!("Cannot write analysis cache '{}': {}", path.display(), e);
        }
    }
}
