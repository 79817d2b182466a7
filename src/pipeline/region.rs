//! Region geometry: analysis-space polygons → render-space crop rectangles.
//!
//! The analysis service reports page extents and polygons in its own unit
//! (inches for PDFs, pixels for images). The renderer works in its own unit
//! (PDF points). A [`ResultPage`] pairs the two and carries the ratios that
//! map one onto the other:
//!
//! ```text
//! x_ratio = rendered width  / analysis width
//! y_ratio = rendered height / analysis height
//! ```
//!
//! The crop rectangle is the axis-aligned bounding box of all four corners,
//! clamped to the page. Polygons that are visibly rotated are logged since
//! a bounding box of a rotated figure includes some of its surroundings.

use crate::analysis::{AnalysisPage, BoundingRegion};
use crate::error::{FigDescError, RegionError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Relative deviation (of the page extent) tolerated before a polygon
/// counts as rotated.
pub const ROTATION_TOLERANCE: f64 = 0.02;

/// Size of one page as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageExtent {
    pub width: f64,
    pub height: f64,
}

/// An analysis page paired with its rendered counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    /// 1-indexed.
    pub page_number: u32,
    pub x_ratio: f64,
    pub y_ratio: f64,
    pub extent: PageExtent,
    analysis_width: f64,
    analysis_height: f64,
}

impl ResultPage {
    pub fn new(page: &AnalysisPage, extent: PageExtent) -> Result<Self, RegionError> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !usable(page.width) || !usable(page.height) {
            return Err(RegionError::BadPageExtent {
                page: page.page_number,
                width: page.width,
                height: page.height,
            });
        }
        if !usable(extent.width) || !usable(extent.height) {
            return Err(RegionError::BadPageExtent {
                page: page.page_number,
                width: extent.width,
                height: extent.height,
            });
        }
        Ok(Self {
            page_number: page.page_number,
            x_ratio: extent.width / page.width,
            y_ratio: extent.height / page.height,
            extent,
            analysis_width: page.width,
            analysis_height: page.height,
        })
    }
}

/// Crop rectangle in render units, `x0 < x1` and `y0 < y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl RenderRect {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Crop rectangle of `region` on `page`.
pub fn region_rect(region: &BoundingRegion, page: &ResultPage) -> Result<RenderRect, RegionError> {
    let invalid = |detail: String| RegionError::InvalidPolygon {
        page: region.page_number,
        detail,
    };

    let p = &region.polygon;
    if p.len() != 8 {
        return Err(invalid(format!("expected 8 coordinates, got {}", p.len())));
    }
    if let Some(bad) = p.iter().find(|v| !v.is_finite()) {
        return Err(invalid(format!("non-finite coordinate {bad}")));
    }

    // Corners clockwise from top-left: (0,1) (2,3) (4,5) (6,7).
    let xs = [p[0], p[2], p[4], p[6]];
    let ys = [p[1], p[3], p[5], p[7]];

    let tol_x = page.analysis_width * ROTATION_TOLERANCE;
    let tol_y = page.analysis_height * ROTATION_TOLERANCE;
    let rotated = (p[0] - p[6]).abs() > tol_x
        || (p[2] - p[4]).abs() > tol_x
        || (p[1] - p[3]).abs() > tol_y
        || (p[5] - p[7]).abs() > tol_y;
    if rotated {
        warn!(
            "Page {}: polygon {:?} is not axis-aligned; cropping its bounding box",
            region.page_number, p
        );
    }

    let min = |v: &[f64; 4]| v.iter().copied().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64; 4]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let rect = RenderRect {
        x0: (min(&xs) * page.x_ratio).clamp(0.0, page.extent.width),
        y0: (min(&ys) * page.y_ratio).clamp(0.0, page.extent.height),
        x1: (max(&xs) * page.x_ratio).clamp(0.0, page.extent.width),
        y1: (max(&ys) * page.y_ratio).clamp(0.0, page.extent.height),
    };

    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return Err(invalid(format!(
            "empty crop rectangle {:.1},{:.1} → {:.1},{:.1}",
            rect.x0, rect.y0, rect.x1, rect.y1
        )));
    }
    Ok(rect)
}

/// Stable identity of one (figure, bounding region) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    /// 1-indexed page of the region.
    pub page_number: u32,
    pub figure_index: usize,
    pub region_index: usize,
}

impl RegionKey {
    /// `<stem>_<page>_<figure>_<region>`, spaces in the stem replaced by `_`.
    pub fn file_stem(&self, doc_stem: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            doc_stem.replace(' ', "_"),
            self.page_number,
            self.figure_index,
            self.region_index
        )
    }

    /// File name of the extracted image.
    pub fn image_name(&self, doc_stem: &str) -> String {
        format!("{}.png", self.file_stem(doc_stem))
    }
}

/// Rasterises regions of a document's pages.
///
/// Methods are blocking; the pipeline calls them from `spawn_blocking`.
pub trait PageRenderer: Send + Sync {
    /// Extent of every page, in page order.
    ///
    /// Failure here means the document cannot be opened at all.
    fn page_extents(&self) -> Result<Vec<PageExtent>, FigDescError>;

    /// PNG bytes of `rect` on the page at 0-based `page_index`, magnified `scale` times.
    fn render_region(
        &self,
        page_index: usize,
        rect: &RenderRect,
        scale: u32,
    ) -> Result<Vec<u8>, RegionError>;
}
