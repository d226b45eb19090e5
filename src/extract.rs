//! Run-level entry points.
//!
//! These functions wire the pieces together: resolve the input, pick the
//! extractor, validate the page range, hand the chunks to a
//! [`ChunkPipelineDriver`] and turn its final [`RunState`] into an
//! [`ExtractionOutput`].
//!
//! A run only fails as a whole for fatal problems (unreadable input, missing
//! credentials, bad range). Refused or failed chunks become placeholders in
//! the text; use [`ExtractionOutput::into_strict`] to treat them as errors.

use crate::config::ExtractionConfig;
use crate::error::ChunkscribeError;
use crate::export::{export_to_file, ExportFormat};
use crate::extractor::gemini::GeminiFileService;
use crate::extractor::{resolve_api_key, resolve_extractor};
use crate::output::{ChunkStatus, DocumentMetadata, ExtractionOutput, RunStats};
use crate::pipeline::driver::{ChunkPipelineDriver, RunState, StopHandle};
use crate::pipeline::input;
use crate::pipeline::slicer::PageRange;
use crate::pipeline::subset::SourceDocument;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Extract text from a PDF file or URL.
///
/// # Errors
/// Returns `Err(ChunkscribeError)` only for fatal errors:
/// - File not found / permission denied / download failure
/// - Not a PDF, corrupt or encrypted PDF
/// - Page range outside the document
/// - Missing API key or unavailable local provider
pub async fn extract_document(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ChunkscribeError> {
    extract_document_with_stop(input_str, config, StopHandle::new()).await
}

/// [`extract_document`] with a handle the caller can use to stop the run at
/// the next chunk boundary.
pub async fn extract_document_with_stop(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
    stop: StopHandle,
) -> Result<ExtractionOutput, ChunkscribeError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    extract_from_bytes_with_stop(resolved.name, &resolved.bytes, config, stop).await
}

/// Extract text from PDF bytes already in memory.
pub async fn extract_from_bytes(
    name: impl Into<String>,
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ChunkscribeError> {
    extract_from_bytes_with_stop(name, bytes, config, StopHandle::new()).await
}

/// [`extract_from_bytes`] with a stop handle.
pub async fn extract_from_bytes_with_stop(
    name: impl Into<String>,
    bytes: &[u8],
    config: &ExtractionConfig,
    stop: StopHandle,
) -> Result<ExtractionOutput, ChunkscribeError> {
    let run_start = Instant::now();

    // ── Step 1: Pick the extractor (a missing credential stops us here) ───
    let extractor = resolve_extractor(config)?;

    // ── Step 2: Parse the source ─────────────────────────────────────────
    let source = SourceDocument::load(name, bytes)?;
    let total_pages = source.page_count();
    info!("{} has {} pages", source.name(), total_pages);

    // ── Step 3: Validate the range ───────────────────────────────────────
    let range = resolve_range(config.page_range, total_pages)?;

    // ── Step 4: Drive the chunks ─────────────────────────────────────────
    let mut driver =
        ChunkPipelineDriver::new(&source, extractor.as_ref(), config).with_stop_handle(stop);
    let state = driver.run(range).await;

    // ── Step 5: Assemble ─────────────────────────────────────────────────
    let stats = compute_stats(&state, total_pages, range, run_start);
    info!(
        "Extraction {:?}: {}/{} chunks extracted, {} refused, {} failed, {}ms",
        state.phase,
        stats.extracted_chunks,
        stats.chunk_count,
        stats.refused_chunks,
        stats.failed_chunks,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        text: state.buffer.render(&config.chunk_separator),
        chunks: state.reports,
        metadata: source.metadata(),
        stats,
        phase: state.phase,
    })
}

/// Extract and write one file per format.
///
/// Returns the output alongside the paths written.
pub async fn extract_to_files(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    formats: &[ExportFormat],
    config: &ExtractionConfig,
) -> Result<(ExtractionOutput, Vec<std::path::PathBuf>), ChunkscribeError> {
    let output = extract_document(input_str, config).await?;
    let base = output_path.as_ref();

    let mut written = Vec::with_capacity(formats.len());
    for &format in formats {
        let path = if formats.len() == 1 {
            base.to_path_buf()
        } else {
            base.with_extension(format.extension())
        };
        export_to_file(&output.text, format, &path)?;
        written.push(path);
    }
    Ok((output, written))
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ChunkscribeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ChunkscribeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_document(input_str, config))
}

/// Read document metadata without any extraction call.
///
/// Works on encrypted documents too; `is_encrypted` reports it.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, ChunkscribeError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    let source = SourceDocument::parse(resolved.name, &resolved.bytes)?;
    Ok(source.metadata())
}

/// Models the remote service offers for extraction.
pub async fn list_models(config: &ExtractionConfig) -> Result<Vec<String>, ChunkscribeError> {
    let service = GeminiFileService::new(resolve_api_key(config)?, config)?;
    service
        .list_models()
        .await
        .map_err(|e| ChunkscribeError::ServiceError {
            message: e.to_string(),
        })
}

/// The requested range, or the whole document when none was given.
fn resolve_range(
    requested: Option<PageRange>,
    total_pages: usize,
) -> Result<PageRange, ChunkscribeError> {
    match requested {
        None => Ok(PageRange::full(total_pages)),
        Some(range) if range.is_empty() || range.end > total_pages => {
            Err(ChunkscribeError::PageOutOfRange {
                start: range.start + 1,
                end: range.end,
                total: total_pages,
            })
        }
        Some(range) => Ok(range),
    }
}

fn compute_stats(
    state: &RunState,
    total_pages: usize,
    range: PageRange,
    run_start: Instant,
) -> RunStats {
    let count = |status: ChunkStatus| state.reports.iter().filter(|r| r.status == status).count();
    RunStats {
        total_pages,
        requested_pages: range.len(),
        chunk_count: state.chunks.len(),
        extracted_chunks: count(ChunkStatus::Extracted),
        refused_chunks: count(ChunkStatus::Refused),
        failed_chunks: count(ChunkStatus::Failed),
        skipped_chunks: state.chunks.len().saturating_sub(state.reports.len()),
        total_duration_ms: run_start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_document_when_no_range() {
        assert_eq!(resolve_range(None, 12).unwrap(), PageRange::new(0, 12));
    }

    #[test]
    fn range_past_the_end_is_fatal() {
        let err = resolve_range(Some(PageRange::from_one_based(5, 20)), 12).unwrap_err();
        match err {
            ChunkscribeError::PageOutOfRange { start, end, total } => {
                assert_eq!((start, end, total), (5, 20, 12));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn valid_range_is_kept() {
        let range = PageRange::from_one_based(2, 4);
        assert_eq!(resolve_range(Some(range), 4).unwrap(), range);
    }
}
