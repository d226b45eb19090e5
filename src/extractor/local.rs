//! Local optical extraction: rasterise the chunk and transcribe each page
//! with a locally hosted vision model.
//!
//! No content filter sits in front of a local model, so this extractor never
//! returns `Refused`. Provider errors are transient more often than not
//! (model still loading, server busy), so each page gets a few retries with
//! exponential backoff before the chunk is reported as failed.
//!
//! Pages are transcribed one at a time with the full instruction, so a bypass
//! shape applies to every page on its own. Each page is decoded before the
//! pages are joined, and the driver receives plain text.

use crate::config::{BypassPolicy, ExtractionConfig};
use crate::error::ExtractionError;
use crate::extractor::{ExtractionRequest, ExtractionResult, TextExtractor};
use crate::pipeline::bypass;
use crate::pipeline::render::{encode_png, render_subset};
use crate::prompts::LOCAL_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// One chat completion over a page's messages (system prompt, then the
/// instruction with the page image).
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String>;
}

/// [`VisionModel`] over an `edgequake-llm` chat provider.
pub struct ChatVisionModel {
    provider: Arc<dyn LLMProvider>,
}

impl ChatVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VisionModel for ChatVisionModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let options = CompletionOptions {
            temperature: Some(0.0),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(messages, Some(&options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// [`TextExtractor`] that never leaves the machine.
pub struct LocalOpticalExtractor {
    model: Arc<dyn VisionModel>,
    bypass: BypassPolicy,
    max_pixels: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LocalOpticalExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self::with_model(Arc::new(ChatVisionModel::new(provider)), config)
    }

    pub fn with_model(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            bypass: config.bypass,
            max_pixels: config.max_rendered_pixels,
            max_retries: config.local_max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    async fn transcribe_page(
        &self,
        page_num: usize,
        image: ImageData,
        instruction: &str,
    ) -> Result<String, ExtractionError> {
        let messages = vec![
            ChatMessage::system(LOCAL_SYSTEM_PROMPT),
            ChatMessage::user_with_images(instruction, vec![image]),
        ];

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!(
                    "Page {}: retry {}/{} after {:?}",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match self.model.complete(&messages).await {
                Ok(text) => return Ok(text),
                Err(err_msg) => {
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ExtractionError::Provider {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// Transcribe already rendered pages, decode each one, drop blank pages
    /// and join the rest in page order.
    pub async fn transcribe_images(
        &self,
        first_page: usize,
        images: Vec<ImageData>,
        instruction: &str,
    ) -> ExtractionResult {
        let mut pages = Vec::with_capacity(images.len());
        for (offset, image) in images.into_iter().enumerate() {
            let page_num = first_page + offset;
            match self.transcribe_page(page_num, image, instruction).await {
                Ok(raw) => {
                    let text = bypass::decode(&raw, self.bypass);
                    let text = text.trim();
                    if !text.is_empty() {
                        pages.push(text.to_string());
                    }
                }
                Err(e) => return ExtractionResult::Failed(e),
            }
        }
        ExtractionResult::Success(pages.join("\n\n"))
    }
}

#[async_trait]
impl TextExtractor for LocalOpticalExtractor {
    fn name(&self) -> &str {
        "local"
    }

    fn returns_decoded_text(&self) -> bool {
        true
    }

    async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
        let rendered = match render_subset(request.subset.bytes.clone(), self.max_pixels).await {
            Ok(images) => images,
            Err(e) => return ExtractionResult::Failed(e),
        };
        let images = match rendered.iter().map(encode_png).collect::<Result<Vec<_>, _>>() {
            Ok(images) => images,
            Err(e) => return ExtractionResult::Failed(e),
        };
        drop(rendered);

        self.transcribe_images(request.subset.pages.start + 1, images, &request.instruction())
            .await
    }
}
