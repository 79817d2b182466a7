//! Per-region description cache.
//!
//! One JSON file per region, `<image_dir>/<region stem>.analysis.json`,
//! holding the description and the context it was produced with. The cache
//! is advisory: a missing, empty or corrupt file is a miss and a failed
//! write only costs a future model call.

use crate::pipeline::context::ContextHints;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// What is persisted for one described region.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub section_name: Option<String>,
    #[serde(default)]
    pub prior_context: Option<String>,
    #[serde(default)]
    pub post_context: Option<String>,
}

impl CacheEntry {
    pub fn new(description: &str, hints: &ContextHints) -> Self {
        Self {
            description: Some(description.to_string()),
            section_name: hints.section_name.clone(),
            prior_context: hints.prior_context.clone(),
            post_context: hints.post_context.clone(),
        }
    }
}

/// Cache files of one image directory.
#[derive(Debug, Clone)]
pub struct DescriptionCache {
    dir: PathBuf,
}

impl DescriptionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cache file for a region stem.
    pub fn path_for(&self, region_stem: &str) -> PathBuf {
        self.dir.join(format!("{region_stem}.analysis.json"))
    }

    /// Cached description of a region, if any.
    ///
    /// An entry without a description counts as a miss.
    pub async fn load(&self, region_stem: &str) -> Option<String> {
        let path = self.path_for(region_stem);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read cache '{}': {}", path.display(), e);
                }
                return None;
            }
        };
        if raw.trim().is_empty() {
            debug!("Cache '{}' is empty", path.display());
            return None;
        }
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => {
                let hit = entry.description.filter(|d| !d.trim().is_empty());
                if hit.is_some() {
                    debug!("Cache hit: {}", path.display());
                }
                hit
            }
            Err(e) => {
                warn!(
                    "Cache '{}' is corrupt, describing the image again: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persist a description. Errors are logged, never returned.
    pub async fn store(&self, region_stem: &str, entry: &CacheEntry) {
        let path = self.path_for(region_stem);
        let json = match serde_json::to_string_pretty(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cannot serialise cache entry '{}': {}", path.display(), e);
                return;
            }
        };
        match tokio::fs::write(&path, json).await {
            Ok(()) => debug!("Cached description: {}", path.display()),
            Err(e) => warn!("Cannot write cache '{}': {}", path.display(), e),
        }
    }
}
