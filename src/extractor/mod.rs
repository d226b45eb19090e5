//! Text extraction capability.
//!
//! The driver only knows [`TextExtractor`]: hand it a request holding one
//! standalone chunk, get back an [`ExtractionResult`]. Implementations
//! classify their own outcome, so a content-policy refusal arrives as
//! [`ExtractionResult::Refused`] instead of an error message the caller has
//! to pattern-match.
//!
//! | Implementation | Where the work happens |
//! |----------------|------------------------|
//! | [`RemoteMultimodalExtractor`] | upload → generate → delete on a [`FileService`] (Gemini) |
//! | [`LocalOpticalExtractor`] | pdfium rasterisation + a locally hosted vision model |
//!
//! The implementation is chosen once per run by [`resolve_extractor`].

pub mod gemini;
pub mod local;
pub mod remote;

pub use gemini::GeminiFileService;
pub use local::LocalOpticalExtractor;
pub use remote::{FileService, GenerateReply, RemoteFile, RemoteMultimodalExtractor, ServiceError};

use crate::config::{ExtractionConfig, ExtractorVariant};
use crate::error::{ChunkscribeError, ContentPolicyRefusal, ExtractionError};
use crate::pipeline::subset::DocumentSubset;
use async_trait::async_trait;
use edgequake_llm::ProviderFactory;
use std::sync::Arc;

/// Environment variable read when no API key is configured.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// One chunk's request. Built fresh per chunk and dropped right after the
/// call, which releases the subset bytes.
#[derive(Debug)]
pub struct ExtractionRequest {
    pub subset: DocumentSubset,
    /// Ordered directives; see [`crate::prompts::directives`].
    pub directives: Vec<String>,
}

impl ExtractionRequest {
    pub fn new(subset: DocumentSubset, directives: Vec<String>) -> Self {
        Self { subset, directives }
    }

    /// The natural-language instruction sent with the subset.
    pub fn instruction(&self) -> String {
        self.directives.join(" ")
    }
}

/// Outcome of one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    Success(String),
    Refused(ContentPolicyRefusal),
    Failed(ExtractionError),
}

/// Turns a standalone chunk into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// True when the extractor already reverses the bypass shape itself, so
    /// the driver must not decode its text again.
    fn returns_decoded_text(&self) -> bool {
        false
    }

    /// Extract the chunk. Never panics on service errors; every failure is an
    /// [`ExtractionResult`] variant.
    async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult;
}

/// Pick the extractor for a run.
///
/// 1. A pre-built extractor on the config wins.
/// 2. `Remote` needs an API key (config, then `GEMINI_API_KEY`); a missing key
///    is fatal before any chunk runs.
/// 3. `Local` uses the injected provider or builds one by name.
pub fn resolve_extractor(
    config: &ExtractionConfig,
) -> Result<Arc<dyn TextExtractor>, ChunkscribeError> {
    if let Some(ref extractor) = config.text_extractor {
        return Ok(Arc::clone(extractor));
    }

    match config.extractor {
        ExtractorVariant::Remote => {
            let service = GeminiFileService::new(resolve_api_key(config)?, config)?;
            Ok(Arc::new(RemoteMultimodalExtractor::new(service)))
        }
        ExtractorVariant::Local => {
            let provider = match config.local_provider {
                Some(ref p) => Arc::clone(p),
                None => ProviderFactory::create_llm_provider(
                    &config.local_provider_name,
                    &config.local_model,
                )
                .map_err(|e| ChunkscribeError::ProviderNotConfigured {
                    provider: config.local_provider_name.clone(),
                    hint: format!("{e}"),
                })?,
            };
            Ok(Arc::new(LocalOpticalExtractor::new(provider, config)))
        }
    }
}

/// API key from the config, else from [`API_KEY_ENV`].
pub fn resolve_api_key(config: &ExtractionConfig) -> Result<String, ChunkscribeError> {
    if let Some(ref key) = config.api_key {
        if !key.trim().is_empty() {
            return Ok(key.clone());
        }
    }
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ChunkscribeError::ProviderNotConfigured {
            provider: "gemini".to_string(),
            hint: format!("Set {API_KEY_ENV} or pass --api-key."),
        }),
    }
}
