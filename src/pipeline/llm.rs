//! Model interaction: the [`VisionModel`] seam, its `edgequake_llm` adapter
//! and the retry wrapper shared by every call.
//!
//! Prompt wording lives in [`crate::prompts`]; this module only moves one
//! instruction plus one image to the provider and back.
//!
//! ## Retry Strategy
//!
//! Transient 429 / 503 errors are common under concurrent load. Every call is
//! retried up to `max_attempts` times in total with a linear backoff of
//! `base + step × attempt`; with the defaults the waits are 0.5 s then 1.0 s.
//! The error of the last attempt is returned unchanged.

use crate::config::{ParseConfig, RetryPolicy};
use crate::error::{FigDescError, ModelError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default model when a provider is picked without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Which step of the description protocol a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    /// Single call of direct mode.
    Direct,
    /// First call of iterative mode.
    Classify,
    /// Second call of iterative mode.
    Specialize,
}

/// One model turn: an instruction and exactly one image.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub stage: RequestStage,
    pub instruction: String,
    pub image: ImageData,
}

/// A vision-capable model: instruction + image in, text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ModelError>;

    /// `(input, output)` tokens used so far, when the model reports them.
    fn token_usage(&self) -> (u64, u64) {
        (0, 0)
    }
}

/// [`VisionModel`] over any `edgequake_llm` provider.
///
/// Message layout: a system message carrying the instruction, then a user
/// message with empty text and the image attached. The image carries all the
/// content, the empty text only satisfies APIs that need a user turn.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, options: CompletionOptions) -> Self {
        Self {
            provider,
            options,
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ParseConfig) -> Self {
        Self::new(provider, build_options(config))
    }
}

#[async_trait]
impl VisionModel for ProviderModel {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage::system(request.instruction.as_str()),
            ChatMessage::user_with_images("", vec![request.image.clone()]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::new(e.to_string()))?;

        self.input_tokens
            .fetch_add(response.prompt_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(response.completion_tokens as u64, Ordering::Relaxed);
        debug!(
            "{:?}: {} input tokens, {} output tokens",
            request.stage, response.prompt_tokens, response.completion_tokens
        );

        Ok(response.content)
    }

    fn token_usage(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` calls have failed.
///
/// Sleeps `policy.delay_after(i)` after failed attempt `i` when another
/// attempt remains. The last error is returned as is.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= attempts => {
                warn!("{}: attempt {}/{} failed — giving up: {}", label, attempt + 1, attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{}: attempt {}/{} failed — {}; retrying in {}ms",
                    label,
                    attempt + 1,
                    attempts,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Build `CompletionOptions` from the parse config.
pub fn build_options(config: &ParseConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FigDescError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FigDescError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), built by
///    [`ProviderFactory::create_llm_provider`] which reads the matching API key.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`OPENAI_API_KEY`** present → OpenAI with the configured model.
/// 5. **Auto-detect** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &ParseConfig) -> Result<Arc<dyn LLMProvider>, FigDescError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FigDescError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
