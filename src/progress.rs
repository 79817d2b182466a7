//! Progress-callback trait for per-region events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParseConfigBuilder::progress_callback`] to receive events
//! as the pipeline extracts and describes each figure region.
//!
//! # Example
//!
//! ```rust
//! use edgequake_figdesc::{ParseConfig, ParseProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for CountingCallback {
//!     fn on_region_complete(&self, image_name: &str, total_regions: usize, described: bool) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}/{total_regions} {image_name} described={described}");
//!     }
//! }
//!
//! let config = ParseConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each figure region.
///
/// Regions are processed concurrently, so the region methods may be called
/// from several tasks at once. All methods default to no-ops.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once the layout analysis is available, before any region starts.
    fn on_parse_start(&self, total_regions: usize) {
        let _ = total_regions;
    }

    /// Called when a region task starts extracting its image.
    ///
    /// `page_number` is 1-indexed.
    fn on_region_start(&self, page_number: u32, total_regions: usize) {
        let _ = (page_number, total_regions);
    }

    /// Called when a region has an image, with or without a description.
    fn on_region_complete(&self, image_name: &str, total_regions: usize, described: bool) {
        let _ = (image_name, total_regions, described);
    }

    /// Called when a region could not be extracted or described.
    fn on_region_error(&self, page_number: u32, total_regions: usize, error: &str) {
        let _ = (page_number, total_regions, error);
    }

    /// Called once after every region has been attempted.
    fn on_parse_complete(&self, total_regions: usize, described: usize) {
        let _ = (total_regions, described);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParseConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicUsize,
        starts: AtomicUsize,
        described: AtomicUsize,
        errors: AtomicUsize,
        final_described: AtomicUsize,
    }

    impl ParseProgressCallback for TrackingCallback {
        fn on_parse_start(&self, total_regions: usize) {
            self.total.store(total_regions, Ordering::SeqCst);
        }

        fn on_region_start(&self, _page_number: u32, _total_regions: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_region_complete(&self, _image_name: &str, _total_regions: usize, described: bool) {
            if described {
                self.described.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_region_error(&self, _page_number: u32, _total_regions: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_parse_complete(&self, _total_regions: usize, described: usize) {
            self.final_described.store(described, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_parse_start(3);
        cb.on_region_start(1, 3);
        cb.on_region_complete("doc_1_0_0.png", 3, true);
        cb.on_region_error(2, 3, "page not found");
        cb.on_parse_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_parse_start(3);
        cb.on_region_start(1, 3);
        cb.on_region_complete("a_1_0_0.png", 3, true);
        cb.on_region_start(1, 3);
        cb.on_region_complete("a_1_1_0.png", 3, false);
        cb.on_region_start(9, 3);
        cb.on_region_error(9, 3, "Page 9 not found");
        cb.on_parse_complete(3, 1);

        assert_eq!(tracker.total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.described.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.final_described.load(Ordering::SeqCst), 1);
    }
}
