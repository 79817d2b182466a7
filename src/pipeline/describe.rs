//! Description engine: one image in, one description out.
//!
//! ```text
//! Direct:     [direct prompt] ──▶ description
//! Iterative:  [classifier] ──▶ {category, sub_category}
//!                 └──▶ template lookup ──▶ [specialised prompt] ──▶ description
//! ```
//!
//! Every model call goes through [`with_retry`]. Both modes carry the same
//! context hints and send the image as the only content of the user turn.

use crate::config::{DescriptionMode, RetryPolicy};
use crate::error::DescribeError;
use crate::pipeline::classify::{parse_classification, template_for};
use crate::pipeline::context::ContextHints;
use crate::pipeline::llm::{with_retry, RequestStage, VisionModel, VisionRequest};
use crate::prompts;
use edgequake_llm::ImageData;
use std::sync::Arc;
use tracing::debug;

/// Describes images with a [`VisionModel`].
#[derive(Clone)]
pub struct DescriptionEngine {
    model: Arc<dyn VisionModel>,
    mode: DescriptionMode,
    policy: RetryPolicy,
}

impl DescriptionEngine {
    pub fn new(model: Arc<dyn VisionModel>, mode: DescriptionMode, policy: RetryPolicy) -> Self {
        Self {
            model,
            mode,
            policy,
        }
    }

    /// Describe `image`.
    ///
    /// `Ok(None)` when the model gave nothing usable (empty reply, or a
    /// classification without a category). `label` names the image in logs.
    pub async fn describe(
        &self,
        image: &ImageData,
        hints: &ContextHints,
        label: &str,
    ) -> Result<Option<String>, DescribeError> {
        let section = hints.section_name.as_deref();
        let prior = hints.prior_context.as_deref();
        let post = hints.post_context.as_deref();

        let reply = match self.mode {
            DescriptionMode::Direct => {
                let request = VisionRequest {
                    stage: RequestStage::Direct,
                    instruction: prompts::direct_prompt(section, prior, post),
                    image: image.clone(),
                };
                self.call(&request, label).await?
            }
            DescriptionMode::Iterative => {
                let classify = VisionRequest {
                    stage: RequestStage::Classify,
                    instruction: prompts::classifier_prompt(section, prior, post),
                    image: image.clone(),
                };
                let raw = self.call(&classify, label).await?;
                let Some(classification) = parse_classification(&raw)? else {
                    debug!("{}: classifier gave no category", label);
                    return Ok(None);
                };
                debug!(
                    "{}: classified as {}/{}",
                    label, classification.category, classification.sub_category
                );

                let specialize = VisionRequest {
                    stage: RequestStage::Specialize,
                    instruction: prompts::specialized_prompt(
                        template_for(&classification),
                        section,
                        prior,
                        post,
                    ),
                    image: image.clone(),
                };
                self.call(&specialize, label).await?
            }
        };

        let trimmed = reply.trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    async fn call(&self, request: &VisionRequest, label: &str) -> Result<String, DescribeError> {
        let label = format!("{label} ({:?})", request.stage);
        let text = with_retry(&self.policy, &label, || self.model.generate(request)).await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::encode::encode_png;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, recording every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        seen: Mutex<Vec<VisionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(ModelError::new))
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn stages(&self) -> Vec<RequestStage> {
            self.seen.lock().unwrap().iter().map(|r| r.stage).collect()
        }
    }

    #[async_trait]
    impl VisionModel for Scripted {
        async fn generate(&self, request: &VisionRequest) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::new("script exhausted")))
        }
    }

    fn engine(model: Arc<Scripted>, mode: DescriptionMode) -> DescriptionEngine {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::ZERO,
            step: std::time::Duration::ZERO,
        };
        DescriptionEngine::new(model, mode, policy)
    }

    fn image() -> ImageData {
        encode_png(b"\x89PNG fake")
    }

    fn hints() -> ContextHints {
        ContextHints {
            section_name: Some("Sales".into()),
            prior_context: Some("Quarterly numbers follow.".into()),
            post_context: None,
        }
    }

    #[tokio::test]
    async fn direct_mode_makes_one_call() {
        let model = Scripted::new(vec![Ok("  A bar chart of Q1 sales. \n")]);
        let out = engine(model.clone(), DescriptionMode::Direct)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some("A bar chart of Q1 sales."));
        assert_eq!(model.stages(), vec![RequestStage::Direct]);
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].instruction.contains("Sales"));
        assert!(seen[0].instruction.contains("Quarterly numbers follow."));
    }

    #[tokio::test]
    async fn iterative_mode_classifies_then_specializes() {
        let model = Scripted::new(vec![
            Ok(r#"{"category": "chart", "sub_category": "pie"}"#),
            Ok("Pie: 60% A, 40% B"),
        ]);
        let out = engine(model.clone(), DescriptionMode::Iterative)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some("Pie: 60% A, 40% B"));
        assert_eq!(
            model.stages(),
            vec![RequestStage::Classify, RequestStage::Specialize]
        );
        let seen = model.seen.lock().unwrap();
        assert!(seen[1].instruction.starts_with(prompts::CHART_PIE));
        assert!(seen[1].instruction.contains("Quarterly numbers follow."));
    }

    #[tokio::test]
    async fn unknown_sub_category_selects_category_other() {
        let model = Scripted::new(vec![
            Ok(r#"{"category": "picture", "sub_category": "hologram"}"#),
            Ok("A picture."),
        ]);
        engine(model.clone(), DescriptionMode::Iterative)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap();
        let seen = model.seen.lock().unwrap();
        assert!(seen[1].instruction.starts_with(prompts::PICTURE_OTHER));
    }

    #[tokio::test]
    async fn classification_without_category_is_no_description() {
        let model = Scripted::new(vec![Ok(r#"{"sub_category": "bar"}"#)]);
        let out = engine(model.clone(), DescriptionMode::Iterative)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(model.stages(), vec![RequestStage::Classify]);
    }

    #[tokio::test]
    async fn unparsable_classification_is_an_error() {
        let model = Scripted::new(vec![Ok("it is a chart, I think")]);
        let err = engine(model, DescriptionMode::Iterative)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap_err();
        assert!(matches!(err, DescribeError::UnparsableClassification { .. }));
    }

    #[tokio::test]
    async fn model_failure_after_retries_is_returned() {
        let model = Scripted::new(vec![Err("503"), Err("429 slow down")]);
        let err = engine(model.clone(), DescriptionMode::Direct)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "429 slow down");
        assert_eq!(model.stages().len(), 2);
    }

    #[tokio::test]
    async fn classify_retry_then_success() {
        let model = Scripted::new(vec![
            Err("timeout"),
            Ok(r#"{"category": "formula"}"#),
            Ok("$$E = mc^2$$"),
        ]);
        let out = engine(model.clone(), DescriptionMode::Iterative)
            .describe(&image(), &hints(), "img")
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some("$$E = mc^2$$"));
        assert_eq!(
            model.stages(),
            vec![
                RequestStage::Classify,
                RequestStage::Classify,
                RequestStage::Specialize
            ]
        );
    }
}
