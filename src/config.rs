//! Configuration types for figure description and reconciliation.
//!
//! All pipeline behaviour is controlled through [`ParseConfig`], built via its
//! [`ParseConfigBuilder`]. One struct holding every knob is easy to share
//! across worker tasks and to print when two runs disagree.

use crate::error::FigDescError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default API version of the layout analysis service.
pub const DEFAULT_DOCINTEL_API_VERSION: &str = "2024-11-30";

/// Configuration for parsing a document and describing its figures.
///
/// Built via [`ParseConfig::builder()`] or using [`ParseConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_figdesc::{DescriptionMode, ParseConfig};
///
/// let config = ParseConfig::builder()
///     .mode(DescriptionMode::Direct)
///     .concurrency(8)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, Some(8));
/// ```
#[derive(Clone)]
pub struct ParseConfig {
    /// How each image is described. Default: [`DescriptionMode::Iterative`].
    pub mode: DescriptionMode,

    /// Number of region tasks in flight at once. Default: `None`.
    ///
    /// `None` sizes the pool from the machine (see [`ParseConfig::worker_count`]).
    /// Every task is dominated by model latency, so this mostly bounds how
    /// many requests hit the provider concurrently.
    pub concurrency: Option<usize>,

    /// Total attempts per model call, first try included. Default: 3.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,

    /// Linear increase of the delay per further retry in milliseconds. Default: 500.
    ///
    /// With the defaults the waits are 0.5 s then 1.0 s.
    pub retry_step_ms: u64,

    /// Magnification applied when rasterising a figure region. Default: 2.
    pub render_scale: u32,

    /// Call the vision model at all. Default: true.
    ///
    /// When false, regions are still extracted (and saved) but every figure
    /// carries the "no description" marker.
    pub describe_images: bool,

    /// Write every extracted region as a PNG next to the document. Default: true.
    pub save_images: bool,

    /// Reuse and persist per-region descriptions and the document analysis. Default: true.
    pub use_cache: bool,

    /// Directory for extracted images and region caches.
    /// Default: `<document dir>/images`.
    pub image_dir: Option<PathBuf>,

    /// LLM model identifier, e.g. "gpt-4.1", "claude-sonnet-4-20250514".
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "azure", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Cached descriptions are reused verbatim, so a near-deterministic
    /// temperature keeps reruns consistent with the cache.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Layout analysis endpoint. Falls back to `DOCINTEL_ENDPOINT`.
    pub docintel_endpoint: Option<String>,

    /// Layout analysis key. Falls back to `DOCINTEL_KEY`.
    pub docintel_key: Option<String>,

    /// Layout analysis API version. Falls back to `DOCINTEL_API_VERSION`.
    pub docintel_api_version: Option<String>,

    /// Upper bound on waiting for one layout analysis. Default: 600.
    pub analysis_timeout_secs: u64,

    /// Receives per-region progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            mode: DescriptionMode::default(),
            concurrency: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            retry_step_ms: 500,
            render_scale: 2,
            describe_images: true,
            save_images: true,
            use_cache: true,
            image_dir: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            password: None,
            docintel_endpoint: None,
            docintel_key: None,
            docintel_api_version: None,
            analysis_timeout_secs: 600,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseConfig")
            .field("mode", &self.mode)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("retry_step_ms", &self.retry_step_ms)
            .field("render_scale", &self.render_scale)
            .field("describe_images", &self.describe_images)
            .field("save_images", &self.save_images)
            .field("use_cache", &self.use_cache)
            .field("image_dir", &self.image_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("docintel_endpoint", &self.docintel_endpoint)
            .field("docintel_key", &self.docintel_key.as_ref().map(|_| "<redacted>"))
            .field("docintel_api_version", &self.docintel_api_version)
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .finish()
    }
}

impl ParseConfig {
    /// Create a new builder for `ParseConfig`.
    pub fn builder() -> ParseConfigBuilder {
        ParseConfigBuilder {
            config: Self::default(),
        }
    }

    /// Size of the region worker pool.
    ///
    /// An explicit `concurrency` wins; otherwise available parallelism + 4,
    /// capped at 32.
    pub fn worker_count(&self) -> usize {
        match self.concurrency {
            Some(n) => n.max(1),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                (cpus + 4).min(32)
            }
        }
    }

    /// Retry policy shared by every model call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            step: Duration::from_millis(self.retry_step_ms),
        }
    }
}

/// Builder for [`ParseConfig`].
pub struct ParseConfigBuilder {
    config: ParseConfig,
}

impl fmt::Debug for ParseConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParseConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl ParseConfigBuilder {
    pub fn mode(mut self, mode: DescriptionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn retry_step_ms(mut self, ms: u64) -> Self {
        self.config.retry_step_ms = ms;
        self
    }

    pub fn render_scale(mut self, scale: u32) -> Self {
        self.config.render_scale = scale.clamp(1, 8);
        self
    }

    pub fn describe_images(mut self, v: bool) -> Self {
        self.config.describe_images = v;
        self
    }

    pub fn save_images(mut self, v: bool) -> Self {
        self.config.save_images = v;
        self
    }

    pub fn use_cache(mut self, v: bool) -> Self {
        self.config.use_cache = v;
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = Some(dir.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn docintel_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.docintel_endpoint = Some(endpoint.into());
        self
    }

    pub fn docintel_key(mut self, key: impl Into<String>) -> Self {
        self.config.docintel_key = Some(key.into());
        self
    }

    pub fn docintel_api_version(mut self, version: impl Into<String>) -> Self {
        self.config.docintel_api_version = Some(version.into());
        self
    }

    pub fn analysis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.analysis_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParseConfig, FigDescError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(FigDescError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.render_scale == 0 {
            return Err(FigDescError::InvalidConfig(
                "render_scale must be ≥ 1".into(),
            ));
        }
        if c.analysis_timeout_secs == 0 {
            return Err(FigDescError::InvalidConfig(
                "analysis_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the description engine talks to the model.
///
/// | Mode | Calls per image | Prompt |
/// |------|-----------------|--------|
/// | `Direct` | 1 | one instruction that branches table / chart / formula / text / other |
/// | `Iterative` | 2 | classify first, then a category-specific instruction (default) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DescriptionMode {
    /// Single call with the all-in-one instruction.
    Direct,
    /// Classify, then describe with the matching specialised instruction.
    #[default]
    Iterative,
}

/// Bounded retry with linear backoff for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Always ≥ 1.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Added to the wait for every further retry.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed attempt with zero-based index `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }
}
