//! Result types returned by the `parse*` entry points.

use crate::pipeline::coordinator::{RegionOutcome, RegionStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A reconciled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutput {
    /// The analysed Markdown with every figure span replaced by its block.
    pub markdown: String,
    pub title: String,
    /// Extracted region images, in figure/region order.
    pub images: Vec<PathBuf>,
    /// One record per attempted region, in figure/region order.
    pub regions: Vec<RegionOutcome>,
    pub stats: ParseStats,
}

/// Counters and timings of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Figures in the analysis.
    pub figures: usize,
    /// Figure spans replaced in the text.
    pub replacements: usize,
    /// Region tasks dispatched.
    pub regions: usize,
    /// Regions with a description, freshly generated or cached.
    pub described: usize,
    /// Of `described`, those served from the cache.
    pub cached: usize,
    /// Regions whose description failed.
    pub failed: usize,
    /// Regions that could not be extracted.
    pub skipped: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Whether the layout analysis came from the cache file.
    pub analysis_cached: bool,
    pub analysis_duration_ms: u64,
    pub regions_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ParseStats {
    /// Fill the region counters from task outcomes.
    pub fn count_outcomes(&mut self, outcomes: &[RegionOutcome]) {
        self.regions = outcomes.len();
        for o in outcomes {
            match &o.status {
                RegionStatus::Described { cached, .. } => {
                    self.described += 1;
                    if *cached {
                        self.cached += 1;
                    }
                }
                RegionStatus::NoDescription => {}
                RegionStatus::Failed { .. } => self.failed += 1,
                RegionStatus::Skipped { .. } => self.skipped += 1,
            }
        }
    }
}

/// Result of one file in batch mode.
#[derive(Debug)]
pub struct BatchItem {
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: Result<ParseStats, crate::error::FigDescError>,
}
