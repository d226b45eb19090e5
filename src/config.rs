//! Configuration types for a chunked extraction run.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config with the CLI, log it, and compare two runs.
//!
//! The builder's setters clamp numeric values into range; [`ExtractionConfigBuilder::build`]
//! then rejects combinations that cannot work (an empty page range, a
//! translation target that is only whitespace).

use crate::error::ChunkscribeError;
use crate::extractor::TextExtractor;
use crate::pipeline::slicer::PageRange;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Smallest and largest accepted chunk sizes, in pages.
pub const MIN_CHUNK_SIZE: usize = 1;
pub const MAX_CHUNK_SIZE: usize = 20;

/// Upper bound for per-page retries of the local model.
pub const MAX_LOCAL_RETRIES: u32 = 10;

/// Default Gemini endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default remote model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Configuration for a chunked extraction run.
///
/// # Example
/// ```rust
/// use chunkscribe::{BypassPolicy, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .chunk_size(10)
///     .bypass(BypassPolicy::WrapperMarker)
///     .translation("English")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 10);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Pages per chunk. Range: 1–20. Default: 15.
    ///
    /// Larger chunks mean fewer requests but a bigger blast radius when the
    /// service refuses or fails a chunk: the whole range becomes a placeholder.
    pub chunk_size: usize,

    /// Which extractor implementation runs the chunks. Default: remote.
    pub extractor: ExtractorVariant,

    /// Output shaping used to reduce content-policy refusals. Default: none.
    pub bypass: BypassPolicy,

    /// Ask the extractor to keep the author's spelling and punctuation. Default: true.
    pub preserve_grammar: bool,

    /// Ask for tables as Markdown tables. Default: true.
    pub table_markup: bool,

    /// Ask for reflowed paragraphs and logical headings. Default: false.
    pub structural_cleanup: bool,

    /// Target language for translation, e.g. "English". Default: none.
    pub translation: Option<String>,

    /// Pages to extract, 0-based half-open. Default: the whole document.
    pub page_range: Option<PageRange>,

    /// Remote model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// API key for the remote service. Falls back to `GEMINI_API_KEY`.
    pub api_key: Option<String>,

    /// Base URL of the remote service. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// Delay policy between chunks. Default: fixed 4 s.
    pub pacing: RatePolicy,

    /// Apply deterministic text cleanup to each chunk's text. Default: true.
    pub postprocess: bool,

    /// Separator placed between chunk segments. Default: horizontal rule.
    pub chunk_separator: ChunkSeparator,

    /// Provider for the local extractor (e.g. "ollama", "lmstudio"). Default: "ollama".
    pub local_provider_name: String,

    /// Vision model for the local extractor. Default: "llama3.2-vision".
    pub local_model: String,

    /// Pre-constructed provider for the local extractor. Takes precedence over
    /// `local_provider_name`.
    pub local_provider: Option<Arc<dyn LLMProvider>>,

    /// Longest rendered edge, in pixels, for local rasterisation. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Retries per page for the local model, at most [`MAX_LOCAL_RETRIES`].
    /// Default: 2.
    pub local_max_retries: u32,

    /// Initial retry delay for the local model in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Pre-constructed extractor. Takes precedence over `extractor`.
    pub text_extractor: Option<Arc<dyn TextExtractor>>,

    /// Receives run and chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 15,
            extractor: ExtractorVariant::default(),
            bypass: BypassPolicy::default(),
            preserve_grammar: true,
            table_markup: true,
            structural_cleanup: false,
            translation: None,
            page_range: None,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            pacing: RatePolicy::default(),
            postprocess: true,
            chunk_separator: ChunkSeparator::default(),
            local_provider_name: "ollama".to_string(),
            local_model: "llama3.2-vision".to_string(),
            local_provider: None,
            max_rendered_pixels: 2000,
            local_max_retries: 2,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            text_extractor: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("chunk_size", &self.chunk_size)
            .field("extractor", &self.extractor)
            .field("bypass", &self.bypass)
            .field("preserve_grammar", &self.preserve_grammar)
            .field("table_markup", &self.table_markup)
            .field("structural_cleanup", &self.structural_cleanup)
            .field("translation", &self.translation)
            .field("page_range", &self.page_range)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("pacing", &self.pacing)
            .field("postprocess", &self.postprocess)
            .field("chunk_separator", &self.chunk_separator)
            .field("local_provider_name", &self.local_provider_name)
            .field("local_model", &self.local_model)
            .field(
                "text_extractor",
                &self.text_extractor.as_ref().map(|_| "<dyn TextExtractor>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn extractor(mut self, variant: ExtractorVariant) -> Self {
        self.config.extractor = variant;
        self
    }

    pub fn bypass(mut self, policy: BypassPolicy) -> Self {
        self.config.bypass = policy;
        self
    }

    pub fn preserve_grammar(mut self, v: bool) -> Self {
        self.config.preserve_grammar = v;
        self
    }

    pub fn table_markup(mut self, v: bool) -> Self {
        self.config.table_markup = v;
        self
    }

    pub fn structural_cleanup(mut self, v: bool) -> Self {
        self.config.structural_cleanup = v;
        self
    }

    pub fn translation(mut self, language: impl Into<String>) -> Self {
        self.config.translation = Some(language.into());
        self
    }

    pub fn page_range(mut self, range: PageRange) -> Self {
        self.config.page_range = Some(range);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn pacing(mut self, policy: RatePolicy) -> Self {
        self.config.pacing = policy;
        self
    }

    pub fn postprocess(mut self, v: bool) -> Self {
        self.config.postprocess = v;
        self
    }

    pub fn chunk_separator(mut self, sep: ChunkSeparator) -> Self {
        self.config.chunk_separator = sep;
        self
    }

    pub fn local_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.local_provider_name = name.into();
        self
    }

    pub fn local_model(mut self, model: impl Into<String>) -> Self {
        self.config.local_model = model.into();
        self
    }

    pub fn local_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.local_provider = Some(provider);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn local_max_retries(mut self, n: u32) -> Self {
        self.config.local_max_retries = n.min(MAX_LOCAL_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.config.text_extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ChunkscribeError> {
        let c = &self.config;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&c.chunk_size) {
            return Err(ChunkscribeError::InvalidConfig(format!(
                "Chunk size must be {MIN_CHUNK_SIZE}–{MAX_CHUNK_SIZE}, got {}",
                c.chunk_size
            )));
        }
        if let Some(range) = c.page_range {
            if range.start >= range.end {
                return Err(ChunkscribeError::InvalidConfig(format!(
                    "Page range must not be empty, got [{}, {})",
                    range.start, range.end
                )));
            }
        }
        if c.translation.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ChunkscribeError::InvalidConfig(
                "Translation target must name a language".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(ChunkscribeError::InvalidConfig("Model must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which [`TextExtractor`] implementation handles the chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractorVariant {
    /// Upload each chunk to the remote multimodal service. (default)
    #[default]
    Remote,
    /// Rasterise locally and transcribe with a locally hosted vision model.
    Local,
}

/// Output shaping requested from the extractor to reduce refusals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BypassPolicy {
    /// Plain output. (default)
    #[default]
    None,
    /// A marker character after every word.
    WordMarker,
    /// Paragraphs wrapped in neutral markers.
    WrapperMarker,
    /// A JSON object keyed by paragraph number.
    StructuredJson,
}

/// Delay applied between consecutive chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatePolicy {
    /// Always wait the same interval.
    Fixed(Duration),
    /// Start at `base`, double after each refused or failed chunk up to `max`,
    /// return to `base` after a success.
    Backoff { base: Duration, max: Duration },
    /// Never wait.
    Unpaced,
}

impl Default for RatePolicy {
    fn default() -> Self {
        RatePolicy::Fixed(Duration::from_secs(4))
    }
}

/// How to separate chunk segments in the assembled text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum ChunkSeparator {
    /// Horizontal rule: "\n\n---\n\n". (default)
    #[default]
    HorizontalRule,
    /// Blank line only: "\n\n".
    None,
    /// HTML comment naming the next chunk's pages.
    Comment,
    /// Custom string inserted between chunks.
    Custom(String),
}

impl ChunkSeparator {
    /// Render the separator placed before the chunk covering `next`.
    pub fn render(&self, next: PageRange) -> String {
        match self {
            ChunkSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            ChunkSeparator::None => "\n\n".to_string(),
            ChunkSeparator::Comment => format!("\n\n<!-- {} -->\n\n", next),
            ChunkSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
