//! Error types for the chunkscribe library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ChunkscribeError`]: **Fatal**: the run cannot start at all (bad input
//!   file, no API key, invalid configuration). Returned as
//!   `Err(ChunkscribeError)` from the top-level `extract*` functions.
//!
//! * [`ChunkError`]: **Non-fatal**: a single chunk could not be turned into
//!   text (corrupt page, content-policy refusal, transport error). Stored in
//!   the result buffer as a placeholder so the output still covers every page.

use crate::pipeline::slicer::PageRange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the chunkscribe library.
///
/// Chunk-level failures use [`ChunkError`] and never abort a run.
#[derive(Debug, Error)]
pub enum ChunkscribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { source_name: String, detail: String },

    /// Encrypted PDFs are not supported.
    #[error("PDF '{source_name}' is encrypted.\nDecrypt it first, e.g. qpdf --decrypt input.pdf output.pdf")]
    EncryptedPdf { source_name: String },

    /// The requested page range does not fit the document.
    #[error("Page range {start}-{end} is out of range (document has {total} pages)")]
    PageOutOfRange { start: usize, end: usize, total: usize },

    // ── Extractor errors ──────────────────────────────────────────────────
    /// The selected extractor cannot be constructed (missing API key etc.).
    #[error("Extractor '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The remote service rejected a request made outside a chunk (model listing).
    #[error("Extraction service error: {message}")]
    ServiceError { message: String },

    /// Some chunks were extracted but at least one was refused or failed.
    ///
    /// Returned by [`crate::output::ExtractionOutput::into_strict`] when the
    /// caller wants to treat any placeholder as an error.
    #[error("{incomplete}/{total} chunks were not extracted")]
    PartialFailure {
        extracted: usize,
        incomplete: usize,
        total: usize,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// An exporter could not encode the final text.
    #[error("Export to {format} failed: {detail}")]
    ExportFailed { format: String, detail: String },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The remote service declined to return content for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPolicyRefusal {
    /// Block or finish reason reported by the service.
    pub reason: String,
}

impl ContentPolicyRefusal {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ContentPolicyRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "content refused by the extraction service ({})", self.reason)
    }
}

/// Failure reported by a [`crate::extractor::TextExtractor`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The subset could not be uploaded to the remote service.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The generation call failed (network, authentication, quota, ...).
    #[error("generation failed: {0}")]
    Generate(String),

    /// Local rasterisation of the subset failed.
    #[error("rendering failed: {0}")]
    Render(String),

    /// The local vision model failed after its retries.
    #[error("local model failed after {retries} retries: {detail}")]
    Provider { retries: u32, detail: String },
}

/// A non-fatal error for a single chunk.
///
/// Converted into a visible placeholder in the result buffer; the run
/// continues with the next chunk.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ChunkError {
    /// A page in the chunk could not be read from the source document.
    #[error("{pages}: unreadable source page: {detail}")]
    MalformedSource { pages: PageRange, detail: String },

    /// The service refused to return content for the chunk.
    #[error("{pages}: {refusal}")]
    Refused {
        pages: PageRange,
        refusal: ContentPolicyRefusal,
    },

    /// The extractor failed for the chunk.
    #[error("{pages}: {source}")]
    Extraction {
        pages: PageRange,
        #[source]
        source: ExtractionError,
    },
}

impl ChunkError {
    /// Page range the error belongs to.
    pub fn pages(&self) -> PageRange {
        match self {
            ChunkError::MalformedSource { pages, .. }
            | ChunkError::Refused { pages, .. }
            | ChunkError::Extraction { pages, .. } => *pages,
        }
    }

    /// Short description without the page label, used in placeholders.
    pub fn summary(&self) -> String {
        match self {
            ChunkError::MalformedSource { detail, .. } => format!("unreadable source page: {detail}"),
            ChunkError::Refused { refusal, .. } => refusal.to_string(),
            ChunkError::Extraction { source, .. } => source.to_string(),
        }
    }
}
