//! Result types handed back to the caller after a run.

use crate::error::ChunkscribeError;
use crate::pipeline::driver::RunPhase;
use crate::pipeline::slicer::PageRange;
use serde::{Deserialize, Serialize};

/// What happened to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Extracted,
    Refused,
    Failed,
}

/// Per-chunk record kept alongside the assembled text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    /// 0-based position of the chunk in the run.
    pub index: usize,
    pub pages: PageRange,
    pub status: ChunkStatus,
    /// Characters of clean text (0 for placeholders).
    pub chars: usize,
    pub duration_ms: u64,
    /// Refusal reason or error summary.
    pub error: Option<String>,
}

/// Totals for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages covered by the requested range.
    pub requested_pages: usize,
    pub chunk_count: usize,
    pub extracted_chunks: usize,
    pub refused_chunks: usize,
    pub failed_chunks: usize,
    /// Chunks never attempted because the run was stopped.
    pub skipped_chunks: usize,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The assembled text, placeholders included.
    pub text: String,
    pub chunks: Vec<ChunkReport>,
    pub metadata: DocumentMetadata,
    pub stats: RunStats,
    /// `Completed`, or `Aborted` when the caller stopped the run.
    pub phase: RunPhase,
}

impl ExtractionOutput {
    /// True when every chunk was attempted.
    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    /// Turn any refused or failed chunk into an error.
    pub fn into_strict(self) -> Result<Self, ChunkscribeError> {
        let incomplete = self.stats.refused_chunks + self.stats.failed_chunks;
        if incomplete > 0 {
            return Err(ChunkscribeError::PartialFailure {
                extracted: self.stats.extracted_chunks,
                incomplete,
                total: self.stats.chunk_count,
            });
        }
        Ok(self)
    }
}

/// Document-level metadata read without any extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
    pub is_encrypted: bool,
}
