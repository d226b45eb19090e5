//! # chunkscribe
//!
//! Extract text from large scanned or image-heavy PDFs with a multimodal
//! model, a bounded chunk of pages at a time.
//!
//! ## Why chunks?
//!
//! Multimodal services cap how many pages one request may carry and refuse
//! some content outright. Sending the document in fixed-size page subsets
//! keeps every request under the cap, and a refusal or transport error only
//! costs the pages of that chunk: the run continues and the gap is marked in
//! the output with a visible placeholder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    read a local file or download from URL
//!  ├─ 2. Slice    split the page range into chunks of ≤ chunk_size pages
//!  ├─ 3. Subset   write each chunk as a standalone PDF (lopdf)
//!  ├─ 4. Extract  remote (Gemini upload → generate → delete) or local
//!  │              (pdfium raster → vision model), one chunk at a time
//!  ├─ 5. Decode   undo the bypass marker scheme, clean up the text
//!  ├─ 6. Pace     wait between chunks (fixed 4 s by default)
//!  └─ 7. Export   plain text, DOCX or PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkscribe::{extract_document, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key from GEMINI_API_KEY
//!     let config = ExtractionConfig::builder().chunk_size(10).build()?;
//!     let output = extract_document("scan.pdf", &config).await?;
//!     println!("{}", output.text);
//!     eprintln!(
//!         "{}/{} chunks extracted",
//!         output.stats.extracted_chunks, output.stats.chunk_count
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chunkscribe` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chunkscribe = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod extractor;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BypassPolicy, ChunkSeparator, ExtractionConfig, ExtractionConfigBuilder, ExtractorVariant,
    RatePolicy,
};
pub use error::{ChunkError, ChunkscribeError, ContentPolicyRefusal, ExtractionError};
pub use export::{export_to_file, exporter_for, DocumentExporter, ExportFormat};
pub use extract::{
    extract_document, extract_document_with_stop, extract_from_bytes,
    extract_from_bytes_with_stop, extract_sync, extract_to_files, inspect, list_models,
};
pub use extractor::{ExtractionRequest, ExtractionResult, TextExtractor};
pub use output::{ChunkReport, ChunkStatus, DocumentMetadata, ExtractionOutput, RunStats};
pub use pipeline::driver::{ChunkPipelineDriver, RunPhase, RunProgress, RunState, StopHandle};
pub use pipeline::slicer::PageRange;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
