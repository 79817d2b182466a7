//! Concurrency coordinator: one task per (figure, bounding region).
//!
//! ```text
//! RegionTask ──▶ rect ──▶ render (spawn_blocking) ──▶ save PNG
//!                                  └──▶ cache? ──hit──▶ Described{cached}
//!                                        └─miss─▶ describe ──▶ cache write
//! ```
//!
//! Tasks share nothing mutable. Each returns an immutable [`RegionOutcome`];
//! once every task has finished, [`merge_outcomes`] folds them into the
//! pending replacements on a single thread.

use crate::analysis::BoundingRegion;
use crate::error::RegionError;
use crate::pipeline::cache::{CacheEntry, DescriptionCache};
use crate::pipeline::context::ContextHints;
use crate::pipeline::describe::DescriptionEngine;
use crate::pipeline::encode::encode_png;
use crate::pipeline::region::{region_rect, PageRenderer, RegionKey, ResultPage};
use crate::pipeline::replacements::{PendingReplacement, ANALYSIS_ERROR, NO_DESCRIPTION};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Work item for one bounding region.
#[derive(Debug, Clone)]
pub struct RegionTask {
    pub key: RegionKey,
    pub region: BoundingRegion,
    pub hints: ContextHints,
}

/// Everything a region task reads. Shared read-only by all tasks.
pub struct TaskContext {
    pub renderer: Arc<dyn PageRenderer>,
    /// Pages by 1-indexed page number; `Err` when the page has no usable extent.
    pub pages: HashMap<u32, Result<ResultPage, RegionError>>,
    /// Number of pages the renderer reported.
    pub page_count: usize,
    /// `None` leaves every region without a description.
    pub engine: Option<DescriptionEngine>,
    pub cache: Option<DescriptionCache>,
    pub image_dir: PathBuf,
    pub save_images: bool,
    pub doc_stem: String,
    pub render_scale: u32,
    pub progress: Option<ProgressCallback>,
    pub total_regions: usize,
}

/// How a region task ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionStatus {
    /// The model (or the cache) produced a description.
    Described { description: String, cached: bool },
    /// The image was extracted but nothing describes it.
    NoDescription,
    /// The image was extracted but describing it failed.
    Failed { error: String },
    /// The image could not be extracted; the region contributes nothing.
    Skipped { error: RegionError },
}

/// Immutable result record of one region task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionOutcome {
    pub key: RegionKey,
    /// Set when the image was extracted.
    pub image_name: Option<String>,
    /// Where the image lives (or would live, when saving is off).
    pub image_path: Option<PathBuf>,
    pub status: RegionStatus,
}

impl RegionOutcome {
    pub fn is_extracted(&self) -> bool {
        !matches!(self.status, RegionStatus::Skipped { .. })
    }
}

/// Run every task on a pool of `workers` concurrent futures and wait for all.
pub async fn run_regions(
    ctx: Arc<TaskContext>,
    tasks: Vec<RegionTask>,
    workers: usize,
) -> Vec<RegionOutcome> {
    debug!("Dispatching {} region tasks on {} workers", tasks.len(), workers);
    stream::iter(
        tasks
            .into_iter()
            .map(|task| run_region(Arc::clone(&ctx), task)),
    )
    .buffer_unordered(workers.max(1))
    .collect()
    .await
}

async fn extract(ctx: &TaskContext, task: &RegionTask) -> Result<Vec<u8>, RegionError> {
    let page_number = task.key.page_number;
    let page = match ctx.pages.get(&page_number) {
        Some(Ok(page)) => page,
        Some(Err(e)) => return Err(e.clone()),
        None => {
            return Err(RegionError::PageNotFound {
                page: page_number,
                total: ctx.page_count,
            })
        }
    };
    let rect = region_rect(&task.region, page)?;
    let renderer = Arc::clone(&ctx.renderer);
    let scale = ctx.render_scale;
    let page_index = page_number.saturating_sub(1) as usize;

    tokio::task::spawn_blocking(move || renderer.render_region(page_index, &rect, scale))
        .await
        .map_err(|e| RegionError::TaskAborted {
            page: page_number,
            detail: e.to_string(),
        })?
}

async fn run_region(ctx: Arc<TaskContext>, task: RegionTask) -> RegionOutcome {
    let key = task.key;
    let total = ctx.total_regions;
    if let Some(ref cb) = ctx.progress {
        cb.on_region_start(key.page_number, total);
    }

    // ── Step 1: Extract ──────────────────────────────────────────────────
    let png = match extract(&ctx, &task).await {
        Ok(png) => png,
        Err(e) => {
            warn!(
                "Figure {} region {}: skipped — {}",
                key.figure_index, key.region_index, e
            );
            if let Some(ref cb) = ctx.progress {
                cb.on_region_error(key.page_number, total, &e.to_string());
            }
            return RegionOutcome {
                key,
                image_name: None,
                image_path: None,
                status: RegionStatus::Skipped { error: e },
            };
        }
    };

    let stem = key.file_stem(&ctx.doc_stem);
    let image_name = key.image_name(&ctx.doc_stem);
    let image_path = ctx.image_dir.join(&image_name);

    // ── Step 2: Persist the image ────────────────────────────────────────
    if ctx.save_images {
        match tokio::fs::write(&image_path, &png).await {
            Ok(()) => debug!("Saved {}", image_path.display()),
            Err(e) => warn!("Cannot save image '{}': {}", image_path.display(), e),
        }
    }

    // ── Step 3: Cache, then describe ─────────────────────────────────────
    let status = match ctx.engine {
        None => RegionStatus::NoDescription,
        Some(ref engine) => {
            let cached = match ctx.cache {
                Some(ref cache) => cache.load(&stem).await,
                None => None,
            };
            match cached {
                Some(description) => RegionStatus::Described {
                    description,
                    cached: true,
                },
                None => {
                    let image = encode_png(&png);
                    match engine.describe(&image, &task.hints, &image_name).await {
                        Ok(Some(description)) => {
                            if let Some(ref cache) = ctx.cache {
                                cache
                                    .store(&stem, &CacheEntry::new(&description, &task.hints))
                                    .await;
                            }
                            RegionStatus::Described {
                                description,
                                cached: false,
                            }
                        }
                        Ok(None) => RegionStatus::NoDescription,
                        Err(e) => {
                            warn!("{}: description failed — {}", image_name, e);
                            RegionStatus::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
            }
        }
    };

    if let Some(ref cb) = ctx.progress {
        match &status {
            RegionStatus::Failed { error } => cb.on_region_error(key.page_number, total, error),
            other => cb.on_region_complete(
                &image_name,
                total,
                matches!(other, RegionStatus::Described { .. }),
            ),
        }
    }

    RegionOutcome {
        key,
        image_name: Some(image_name),
        image_path: Some(image_path),
        status,
    }
}

/// Fold outcomes into the replacements. Runs after the barrier.
///
/// Outcomes are grouped by figure and ordered by region index. Each group is
/// attached to its figure's lowest-offset replacement:
///
/// * `image_names`: every extracted region, in region order
/// * `description`: the regions' texts joined by blank lines, where a failed
///   region contributes [`ANALYSIS_ERROR`]; [`NO_DESCRIPTION`] when none
///   contributes anything
///
/// Other spans of the same figure keep the placeholder.
pub fn merge_outcomes(replacements: &mut [PendingReplacement], outcomes: &[RegionOutcome]) {
    let mut by_figure: BTreeMap<usize, Vec<&RegionOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        by_figure
            .entry(outcome.key.figure_index)
            .or_default()
            .push(outcome);
    }

    for (figure_index, mut group) in by_figure {
        group.sort_by_key(|o| o.key.region_index);

        let target = replacements
            .iter_mut()
            .filter(|r| r.figure_index == figure_index)
            .min_by_key(|r| r.start);
        let Some(target) = target else {
            debug!(
                "Figure {} has no text span; its {} region(s) only yield images",
                figure_index,
                group.len()
            );
            continue;
        };

        target.image_names = group
            .iter()
            .filter_map(|o| o.image_name.clone())
            .collect();

        let parts: Vec<&str> = group
            .iter()
            .filter_map(|o| match &o.status {
                RegionStatus::Described { description, .. } => Some(description.as_str()),
                RegionStatus::Failed { .. } => Some(ANALYSIS_ERROR),
                RegionStatus::NoDescription | RegionStatus::Skipped { .. } => None,
            })
            .collect();

        target.description = if parts.is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            parts.join("\n\n")
        };
    }
}
