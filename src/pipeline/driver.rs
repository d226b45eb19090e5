//! Chunk pipeline driver: the run's state machine.
//!
//! ```text
//! Idle ──start──▶ Running(0 of N) ──step──▶ Running(1 of N) ── … ──▶ Completed
//!                      │                          │
//!                      └──── stop requested ──────┴──────────────▶ Aborted
//! ```
//!
//! Each [`ChunkPipelineDriver::step`] takes the [`RunState`] by value, runs
//! exactly one chunk and hands the state back. The caller owns the state
//! between steps, so a run can be inspected (or abandoned) at any chunk
//! boundary without shared mutable globals.
//!
//! ## Per-chunk sequence
//!
//! 1. materialise the subset
//! 2. build the request (directives + bypass directive)
//! 3. extract; the request and its subset are dropped before anything else
//! 4. decode + clean the text, or build a placeholder for refusal/failure
//! 5. append to the buffer, advance progress, notify the callback
//! 6. wait for the pacer (skipped after the last chunk, cut short by a stop)
//!
//! Chunks never overlap: chunk k+1 is not requested until chunk k's segment
//! is in the buffer and its subset has been released.

use crate::config::{ChunkSeparator, ExtractionConfig};
use crate::error::ChunkError;
use crate::extractor::{ExtractionRequest, ExtractionResult, TextExtractor};
use crate::output::{ChunkReport, ChunkStatus};
use crate::pipeline::bypass;
use crate::pipeline::pacing::{pacer_for, Pacer};
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::slicer::{slice, PageRange};
use crate::pipeline::subset::SourceDocument;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

// ── Run state ────────────────────────────────────────────────────────────

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    /// `chunk` is the 0-based index of the next chunk to process.
    Running { chunk: usize, total: usize },
    Completed,
    Aborted,
}

/// Progress as shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub chunks_completed: usize,
    pub chunks_total: usize,
    /// Label of the chunk in flight or last finished, e.g. "Pages 16-30".
    pub current_label: String,
}

impl RunProgress {
    pub fn new(chunks_total: usize) -> Self {
        Self {
            chunks_completed: 0,
            chunks_total,
            current_label: String::new(),
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.chunks_total == 0 {
            1.0
        } else {
            self.chunks_completed as f64 / self.chunks_total as f64
        }
    }
}

/// What one chunk contributed to the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentContent {
    Text(String),
    Refused { reason: String },
    Failed { summary: String },
}

/// One entry of the result buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSegment {
    pub pages: PageRange,
    pub content: SegmentContent,
}

impl ChunkSegment {
    pub fn status(&self) -> ChunkStatus {
        match self.content {
            SegmentContent::Text(_) => ChunkStatus::Extracted,
            SegmentContent::Refused { .. } => ChunkStatus::Refused,
            SegmentContent::Failed { .. } => ChunkStatus::Failed,
        }
    }

    /// Text as it appears in the assembled output. Placeholders are bracketed
    /// and name the affected pages.
    pub fn render(&self) -> String {
        match &self.content {
            SegmentContent::Text(text) => text.clone(),
            SegmentContent::Refused { reason } => {
                format!("[{} skipped: {}]", self.pages.label(), reason)
            }
            SegmentContent::Failed { summary } => {
                format!("[{} failed: {}]", self.pages.label(), summary)
            }
        }
    }
}

/// Ordered, append-only chunk results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultBuffer {
    segments: Vec<ChunkSegment>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: ChunkSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[ChunkSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Assemble the buffer into one text.
    pub fn render(&self, separator: &ChunkSeparator) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push_str(&separator.render(segment.pages));
            }
            out.push_str(&segment.render());
        }
        out
    }
}

/// Everything the driver mutates during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub chunks: Vec<PageRange>,
    pub buffer: ResultBuffer,
    pub progress: RunProgress,
    pub reports: Vec<ChunkReport>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// A fresh, idle state.
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            chunks: Vec::new(),
            buffer: ResultBuffer::new(),
            progress: RunProgress::new(0),
            reports: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, RunPhase::Running { .. })
    }
}

// ── Stop handle ──────────────────────────────────────────────────────────

/// Lets a caller stop a run at the next chunk boundary.
///
/// An in-flight extraction is never interrupted; a pacing wait is.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        if self.is_stop_requested() {
            return;
        }
        notified.await;
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Runs the chunks of one source document through one extractor.
pub struct ChunkPipelineDriver<'a> {
    source: &'a SourceDocument,
    extractor: &'a dyn TextExtractor,
    config: &'a ExtractionConfig,
    pacer: Box<dyn Pacer>,
    stop: StopHandle,
}

impl<'a> ChunkPipelineDriver<'a> {
    pub fn new(
        source: &'a SourceDocument,
        extractor: &'a dyn TextExtractor,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            source,
            extractor,
            config,
            pacer: pacer_for(&config.pacing),
            stop: StopHandle::new(),
        }
    }

    /// Replace the pacer built from `config.pacing`.
    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Slice `range` and reset `state` for a new run.
    pub fn start(&self, mut state: RunState, range: PageRange) -> RunState {
        let chunks = slice(self.source.page_count(), range, self.config.chunk_size);
        let total = chunks.len();
        info!(
            "Extracting {} in {} chunk(s) of up to {} pages with the {} extractor",
            range,
            total,
            self.config.chunk_size,
            self.extractor.name()
        );

        state.phase = if total == 0 {
            RunPhase::Completed
        } else {
            RunPhase::Running { chunk: 0, total }
        };
        state.chunks = chunks;
        state.buffer = ResultBuffer::new();
        state.progress = RunProgress::new(total);
        state.reports = Vec::with_capacity(total);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(total, range.len());
            if total == 0 {
                cb.on_run_complete(&state.progress, &state.phase);
            }
        }
        state
    }

    /// Process the next chunk and return the updated state.
    ///
    /// States other than `Running` are returned unchanged.
    pub async fn step(&mut self, mut state: RunState) -> RunState {
        let (index, total) = match state.phase {
            RunPhase::Running { chunk, total } => (chunk, total),
            _ => return state,
        };

        if self.stop.is_stop_requested() {
            info!("Stop requested; aborting before chunk {}/{}", index + 1, total);
            return self.finish(state, RunPhase::Aborted);
        }

        let pages = state.chunks[index];
        state.progress.current_label = pages.label();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chunk_start(&state.progress);
        }
        debug!("Chunk {}/{}: {}", index + 1, total, pages);

        let started = Instant::now();
        let segment = match self.process_chunk(pages).await {
            Ok(text) => ChunkSegment {
                pages,
                content: SegmentContent::Text(text),
            },
            Err(err) => {
                warn!("Chunk {}/{}: {}", index + 1, total, err);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_chunk_notice(pages, &err.to_string());
                }
                let content = match err {
                    ChunkError::Refused { refusal, .. } => SegmentContent::Refused {
                        reason: refusal.to_string(),
                    },
                    other => SegmentContent::Failed {
                        summary: other.summary(),
                    },
                };
                ChunkSegment { pages, content }
            }
        };

        let status = segment.status();
        state.reports.push(ChunkReport {
            index,
            pages,
            status,
            chars: match segment.content {
                SegmentContent::Text(ref t) => t.chars().count(),
                _ => 0,
            },
            duration_ms: started.elapsed().as_millis() as u64,
            error: match segment.content {
                SegmentContent::Text(_) => None,
                SegmentContent::Refused { ref reason } => Some(reason.clone()),
                SegmentContent::Failed { ref summary } => Some(summary.clone()),
            },
        });
        state.buffer.push(segment);
        state.progress.chunks_completed = index + 1;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_chunk_complete(&state.progress, status);
        }

        if index + 1 == total {
            return self.finish(state, RunPhase::Completed);
        }

        let delay = self.pacer.delay_after(status);
        if !delay.is_zero() {
            debug!("Pacing {:?} before chunk {}/{}", delay, index + 2, total);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.stopped() => debug!("Pacing cut short by stop request"),
            }
        }

        state.phase = RunPhase::Running {
            chunk: index + 1,
            total,
        };
        state
    }

    /// Run every chunk of `range` from a fresh state.
    pub async fn run(&mut self, range: PageRange) -> RunState {
        let mut state = self.start(RunState::new(), range);
        while state.is_running() {
            state = self.step(state).await;
        }
        state
    }

    async fn process_chunk(&self, pages: PageRange) -> Result<String, ChunkError> {
        let subset = self.source.extract_subset(pages)?;
        let request = ExtractionRequest::new(subset, prompts::directives(self.config));
        let result = self.extractor.extract(&request).await;
        drop(request);

        match result {
            ExtractionResult::Success(raw) => {
                let text = if self.extractor.returns_decoded_text() {
                    raw
                } else {
                    bypass::decode(&raw, self.config.bypass)
                };
                Ok(if self.config.postprocess {
                    clean_text(&text)
                } else {
                    text
                })
            }
            ExtractionResult::Refused(refusal) => Err(ChunkError::Refused { pages, refusal }),
            ExtractionResult::Failed(source) => Err(ChunkError::Extraction { pages, source }),
        }
    }

    fn finish(&self, mut state: RunState, phase: RunPhase) -> RunState {
        state.phase = phase;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(&state.progress, &state.phase);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BypassPolicy, RatePolicy};
    use crate::error::{ContentPolicyRefusal, ExtractionError};
    use crate::export::pdf::build_document;
    use crate::progress::RunProgressCallback;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns scripted results keyed by a chunk's first page, and
    /// "text for <pages>" otherwise.
    #[derive(Default)]
    struct ScriptedExtractor {
        script: HashMap<usize, ExtractionResult>,
        seen: Mutex<Vec<(PageRange, String)>>,
        decoded: bool,
    }

    impl ScriptedExtractor {
        fn with(mut self, first_page: usize, result: ExtractionResult) -> Self {
            self.script.insert(first_page, result);
            self
        }
    }

    #[async_trait]
    impl TextExtractor for ScriptedExtractor {
        fn name(&self) -> &str {
            "scripted"
        }

        fn returns_decoded_text(&self) -> bool {
            self.decoded
        }

        async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
            let pages = request.subset.pages;
            self.seen
                .lock()
                .unwrap()
                .push((pages, request.instruction()));
            self.script
                .get(&pages.start)
                .cloned()
                .unwrap_or_else(|| ExtractionResult::Success(format!("text for {pages}")))
        }
    }

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<(usize, ChunkStatus)>>,
        notices: Mutex<Vec<String>>,
        stop_after_first: Option<StopHandle>,
    }

    impl RunProgressCallback for Recorder {
        fn on_chunk_complete(&self, progress: &RunProgress, status: ChunkStatus) {
            self.completed
                .lock()
                .unwrap()
                .push((progress.chunks_completed, status));
            if let Some(ref stop) = self.stop_after_first {
                stop.request_stop();
            }
        }

        fn on_chunk_notice(&self, _pages: PageRange, notice: &str) {
            self.notices.lock().unwrap().push(notice.to_string());
        }
    }

    fn source(pages: usize) -> SourceDocument {
        let pages: Vec<Vec<String>> = (1..=pages).map(|n| vec![format!("Page {n}")]).collect();
        SourceDocument::load("test.pdf", &build_document(&pages).unwrap()).unwrap()
    }

    fn config(chunk_size: usize) -> ExtractionConfig {
        ExtractionConfig::builder()
            .chunk_size(chunk_size)
            .pacing(RatePolicy::Unpaced)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn failed_middle_chunk_keeps_order() {
        let doc = source(9);
        let config = config(3);
        let extractor = ScriptedExtractor::default().with(
            3,
            ExtractionResult::Failed(ExtractionError::Generate("HTTP 503: overloaded".into())),
        );
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        let state = driver.run(PageRange::full(9)).await;

        assert_eq!(state.phase, RunPhase::Completed);
        let rendered: Vec<String> = state.buffer.segments().iter().map(|s| s.render()).collect();
        assert_eq!(
            rendered,
            vec![
                "text for pages 1-3".to_string(),
                "[Pages 4-6 failed: generation failed: HTTP 503: overloaded]".to_string(),
                "text for pages 7-9".to_string(),
            ]
        );
        assert_eq!(state.reports[1].status, ChunkStatus::Failed);
    }

    #[tokio::test]
    async fn refusal_does_not_halt_run() {
        let doc = source(10);
        let config = config(3);
        let extractor = ScriptedExtractor::default().with(
            3,
            ExtractionResult::Refused(ContentPolicyRefusal::new("SAFETY")),
        );
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        let state = driver.run(PageRange::full(10)).await;

        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.buffer.len(), 4);
        assert_eq!(state.buffer.segments()[1].status(), ChunkStatus::Refused);
        assert_eq!(
            state.buffer.segments()[1].render(),
            "[Pages 4-6 skipped: content refused by the extraction service (SAFETY)]"
        );
        assert_eq!(extractor.seen.lock().unwrap().len(), 4);
        assert_eq!(state.progress.chunks_completed, 4);
    }

    #[tokio::test]
    async fn chunks_are_requested_in_order_with_directives() {
        let doc = source(5);
        let config = ExtractionConfig::builder()
            .chunk_size(2)
            .pacing(RatePolicy::Unpaced)
            .translation("German")
            .build()
            .unwrap();
        let extractor = ScriptedExtractor::default();
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        driver.run(PageRange::new(1, 5)).await;

        let seen = extractor.seen.lock().unwrap();
        let ranges: Vec<PageRange> = seen.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            ranges,
            vec![PageRange::new(1, 3), PageRange::new(3, 5)]
        );
        assert!(seen[0].1.starts_with(prompts::BASE_INSTRUCTION));
        assert!(seen[0].1.ends_with("into German."));
    }

    #[tokio::test]
    async fn bypass_output_is_decoded() {
        let doc = source(2);
        let config = ExtractionConfig::builder()
            .chunk_size(2)
            .pacing(RatePolicy::Unpaced)
            .bypass(BypassPolicy::StructuredJson)
            .build()
            .unwrap();
        let extractor = ScriptedExtractor::default().with(
            0,
            ExtractionResult::Success(r#"{"1":"Hello.","2":"World."}"#.into()),
        );
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        let state = driver.run(PageRange::full(2)).await;
        assert_eq!(
            state.buffer.render(&ChunkSeparator::HorizontalRule),
            "Hello.\n\nWorld."
        );
    }

    #[tokio::test]
    async fn already_decoded_text_is_not_decoded_again() {
        let doc = source(2);
        let config = ExtractionConfig::builder()
            .chunk_size(2)
            .pacing(RatePolicy::Unpaced)
            .bypass(BypassPolicy::WordMarker)
            .build()
            .unwrap();
        let mut extractor = ScriptedExtractor::default().with(
            0,
            ExtractionResult::Success("x^2 stays.\n\nSecond page.".into()),
        );
        extractor.decoded = true;
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        let state = driver.run(PageRange::full(2)).await;
        assert_eq!(
            state.buffer.render(&ChunkSeparator::HorizontalRule),
            "x^2 stays.\n\nSecond page."
        );
    }

    #[tokio::test]
    async fn step_returns_explicit_states() {
        let doc = source(4);
        let config = config(2);
        let extractor = ScriptedExtractor::default();
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);

        let state = driver.start(RunState::new(), PageRange::full(4));
        assert_eq!(state.phase, RunPhase::Running { chunk: 0, total: 2 });
        let state = driver.step(state).await;
        assert_eq!(state.phase, RunPhase::Running { chunk: 1, total: 2 });
        assert_eq!(state.buffer.len(), 1);
        let state = driver.step(state).await;
        assert_eq!(state.phase, RunPhase::Completed);
        let state = driver.step(state).await;
        assert_eq!(state.buffer.len(), 2, "completed state is left untouched");
    }

    #[tokio::test]
    async fn stop_is_honoured_at_chunk_boundary() {
        let doc = source(6);
        let stop = StopHandle::new();
        let recorder = Arc::new(Recorder {
            stop_after_first: Some(stop.clone()),
            ..Default::default()
        });
        let config = ExtractionConfig::builder()
            .chunk_size(2)
            .pacing(RatePolicy::Fixed(Duration::from_secs(60)))
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let extractor = ScriptedExtractor::default();
        let mut driver =
            ChunkPipelineDriver::new(&doc, &extractor, &config).with_stop_handle(stop);

        let state = tokio::time::timeout(Duration::from_secs(5), driver.run(PageRange::full(6)))
            .await
            .expect("stop must cut the pacing wait short");

        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.buffer.len(), 1);
        assert_eq!(extractor.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progress_reported_once_per_chunk_with_notices() {
        let doc = source(6);
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .chunk_size(2)
            .pacing(RatePolicy::Unpaced)
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let extractor = ScriptedExtractor::default()
            .with(2, ExtractionResult::Refused(ContentPolicyRefusal::new("OTHER")));
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        driver.run(PageRange::full(6)).await;

        assert_eq!(
            *recorder.completed.lock().unwrap(),
            vec![
                (1, ChunkStatus::Extracted),
                (2, ChunkStatus::Refused),
                (3, ChunkStatus::Extracted),
            ]
        );
        let notices = recorder.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("pages 3-4"));
    }

    #[tokio::test]
    async fn empty_range_completes_immediately() {
        let doc = source(3);
        let config = config(2);
        let extractor = ScriptedExtractor::default();
        let mut driver = ChunkPipelineDriver::new(&doc, &extractor, &config);
        let state = driver.run(PageRange::new(2, 2)).await;
        assert_eq!(state.phase, RunPhase::Completed);
        assert!(state.buffer.is_empty());
    }

    #[test]
    fn buffer_renders_with_separator() {
        let mut buffer = ResultBuffer::new();
        buffer.push(ChunkSegment {
            pages: PageRange::new(0, 2),
            content: SegmentContent::Text("one".into()),
        });
        buffer.push(ChunkSegment {
            pages: PageRange::new(2, 4),
            content: SegmentContent::Failed {
                summary: "upload failed: timeout".into(),
            },
        });
        assert_eq!(
            buffer.render(&ChunkSeparator::HorizontalRule),
            "one\n\n---\n\n[Pages 3-4 failed: upload failed: timeout]"
        );
    }
}
