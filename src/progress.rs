//! Progress-callback trait for run and chunk events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to follow a
//! run as the driver works through its chunks.
//!
//! # Example
//!
//! ```rust
//! use chunkscribe::{ExtractionConfig, RunProgress, RunProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl RunProgressCallback for Printer {
//!     fn on_chunk_complete(&self, progress: &RunProgress, _status: chunkscribe::ChunkStatus) {
//!         eprintln!("{}/{} {}", progress.chunks_completed, progress.chunks_total, progress.current_label);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ChunkStatus;
use crate::pipeline::driver::{RunPhase, RunProgress};
use crate::pipeline::slicer::PageRange;
use std::sync::Arc;

/// Called by the driver as the run advances.
///
/// Chunks are processed one at a time, so calls never overlap; the trait is
/// still `Send + Sync` because the callback is shared with the caller's own
/// threads. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after slicing, before the first chunk.
    fn on_run_start(&self, chunks_total: usize, pages_total: usize) {
        let _ = (chunks_total, pages_total);
    }

    /// Called before a chunk's subset is materialised.
    fn on_chunk_start(&self, progress: &RunProgress) {
        let _ = progress;
    }

    /// Called exactly once per finished chunk, whatever its outcome.
    fn on_chunk_complete(&self, progress: &RunProgress, status: ChunkStatus) {
        let _ = (progress, status);
    }

    /// Human-readable notice for a refused or failed chunk.
    fn on_chunk_notice(&self, pages: PageRange, notice: &str) {
        let _ = (pages, notice);
    }

    /// Called once when the run ends, completed or aborted.
    fn on_run_complete(&self, progress: &RunProgress, phase: &RunPhase) {
        let _ = (progress, phase);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        let progress = RunProgress::new(2);
        cb.on_run_start(2, 30);
        cb.on_chunk_start(&progress);
        cb.on_chunk_complete(&progress, ChunkStatus::Extracted);
        cb.on_chunk_notice(PageRange::new(0, 15), "refused");
        cb.on_run_complete(&progress, &RunPhase::Completed);
    }
}
