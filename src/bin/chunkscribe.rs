//! CLI binary for chunkscribe.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, wires Ctrl-C to a stop handle and writes the results.

use anyhow::{Context, Result};
use chunkscribe::config::{DEFAULT_API_BASE_URL, DEFAULT_MODEL};
use chunkscribe::extractor::gemini::FALLBACK_MODELS;
use chunkscribe::pipeline::input::default_output_path;
use chunkscribe::{
    export_to_file, extract_document_with_stop, inspect, list_models, BypassPolicy,
    ChunkSeparator, ChunkStatus, ExportFormat, ExtractionConfig, ExtractorVariant, PageRange,
    ProgressCallback, RatePolicy, RunPhase, RunProgress, RunProgressCallback, StopHandle,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    chunk_started: Mutex<Option<Instant>>,
    problems: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_started: Mutex::new(None),
            problems: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.chunk_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, chunks_total: usize, pages_total: usize) {
        self.activate_bar(chunks_total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Extracting {pages_total} pages in {chunks_total} chunks…"
            ))
        ));
    }

    fn on_chunk_start(&self, progress: &RunProgress) {
        if let Ok(mut started) = self.chunk_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(progress.current_label.clone());
    }

    fn on_chunk_complete(&self, progress: &RunProgress, status: ChunkStatus) {
        let mark = match status {
            ChunkStatus::Extracted => green("✓"),
            ChunkStatus::Refused => yellow("⊘"),
            ChunkStatus::Failed => red("✗"),
        };
        if status != ChunkStatus::Extracted {
            self.problems.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<14}  {}",
            mark,
            progress.chunks_completed,
            progress.chunks_total,
            progress.current_label,
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_notice(&self, _pages: PageRange, notice: &str) {
        let msg = if notice.chars().count() > 100 {
            format!("{}\u{2026}", notice.chars().take(99).collect::<String>())
        } else {
            notice.to_string()
        };
        self.bar.println(format!("      {}", yellow(&msg)));
    }

    fn on_run_complete(&self, progress: &RunProgress, phase: &RunPhase) {
        self.bar.finish_and_clear();
        let problems = self.problems.load(Ordering::SeqCst);
        let extracted = progress.chunks_completed.saturating_sub(problems);

        match phase {
            RunPhase::Aborted => eprintln!(
                "{} stopped after {}/{} chunks",
                yellow("■"),
                progress.chunks_completed,
                progress.chunks_total
            ),
            _ if problems == 0 => eprintln!(
                "{} {} chunks extracted",
                green("✔"),
                bold(&extracted.to_string())
            ),
            _ => eprintln!(
                "{} {}/{} chunks extracted  ({} marked with placeholders)",
                cyan("⚠"),
                bold(&extracted.to_string()),
                progress.chunks_total,
                red(&problems.to_string()),
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to stdout
  chunkscribe scan.pdf

  # Pages 1-30 in chunks of 10, written as DOCX and PDF
  chunkscribe --pages 1-30 --chunk-size 10 --format docx,pdf scan.pdf -o out.docx

  # Ask for JSON-keyed paragraphs to reduce refusals
  chunkscribe --bypass structured scan.pdf -o scan.txt

  # Translate while extracting
  chunkscribe --translate German scan.pdf

  # Transcribe locally with Ollama (no API key needed)
  chunkscribe --extractor local --local-model llama3.2-vision scan.pdf

  # List models, inspect metadata
  chunkscribe --list-models
  chunkscribe --inspect-only scan.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          API key for the remote extractor
  CHUNKSCRIBE_MODEL       Override model ID
  CHUNKSCRIBE_CHUNK_SIZE  Pages per chunk (1-20)
  RUST_LOG                Log filter (overrides -v / -q)

Ctrl-C stops the run after the chunk in flight; the text gathered so far is
still written.
"#;

/// Extract text from large PDFs with a multimodal model, chunk by chunk.
#[derive(Parser, Debug)]
#[command(
    name = "chunkscribe",
    version,
    about = "Extract text from large PDFs with a multimodal model, chunk by chunk",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "list_models")]
    input: Option<String>,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "CHUNKSCRIBE_OUTPUT")]
    output: Option<PathBuf>,

    /// Output formats (comma separated): txt, docx, pdf.
    #[arg(long = "format", value_enum, value_delimiter = ',')]
    formats: Vec<FormatArg>,

    /// Page range, 1-indexed inclusive: 5 or 3-15. Default: whole document.
    #[arg(long, env = "CHUNKSCRIBE_PAGES")]
    pages: Option<String>,

    /// Pages per request (1-20).
    #[arg(long, env = "CHUNKSCRIBE_CHUNK_SIZE", default_value_t = 15,
          value_parser = clap::value_parser!(u32).range(1..=20))]
    chunk_size: u32,

    /// Which extractor transcribes the chunks.
    #[arg(long, value_enum, default_value = "remote")]
    extractor: ExtractorArg,

    /// Output shaping requested from the model to reduce refusals.
    #[arg(long, value_enum, default_value = "none")]
    bypass: BypassArg,

    /// Do not ask the model to keep the original grammar and spelling.
    #[arg(long)]
    no_preserve_grammar: bool,

    /// Do not ask the model to mark up tables.
    #[arg(long)]
    no_tables: bool,

    /// Ask the model to reflow paragraphs, remove hyphenation and line breaks
    /// inside sentences, and use logical headings.
    #[arg(long)]
    structural_cleanup: bool,

    /// Translate the extracted text into this language.
    #[arg(long, value_name = "LANG")]
    translate: Option<String>,

    /// Remote model ID.
    #[arg(long, env = "CHUNKSCRIBE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API key for the remote service.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the remote service.
    #[arg(long, env = "CHUNKSCRIBE_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// Provider for the local extractor (ollama, lmstudio, …).
    #[arg(long, default_value = "ollama")]
    local_provider: String,

    /// Vision model for the local extractor.
    #[arg(long, default_value = "llama3.2-vision")]
    local_model: String,

    /// Delay between chunks in milliseconds (0 disables pacing).
    #[arg(long, env = "CHUNKSCRIBE_PACING_MS", default_value_t = 4000)]
    pacing_ms: u64,

    /// Double the delay after a refused or failed chunk (up to 60 s).
    #[arg(long)]
    backoff: bool,

    /// Chunk separator: hr, none, comment, or custom string.
    #[arg(long, default_value = "hr")]
    separator: String,

    /// Keep the model output exactly as returned.
    #[arg(long)]
    no_postprocess: bool,

    /// Exit with an error if any chunk was refused or failed.
    #[arg(long)]
    strict: bool,

    /// Output structured JSON (ExtractionOutput) instead of text.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CHUNKSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// List the remote models available for extraction.
    #[arg(long)]
    list_models: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Txt,
    Docx,
    Pdf,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Txt => ExportFormat::PlainText,
            FormatArg::Docx => ExportFormat::Docx,
            FormatArg::Pdf => ExportFormat::Pdf,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ExtractorArg {
    Remote,
    Local,
}

impl From<ExtractorArg> for ExtractorVariant {
    fn from(v: ExtractorArg) -> Self {
        match v {
            ExtractorArg::Remote => ExtractorVariant::Remote,
            ExtractorArg::Local => ExtractorVariant::Local,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BypassArg {
    None,
    WordMarker,
    Wrapper,
    Structured,
}

impl From<BypassArg> for BypassPolicy {
    fn from(v: BypassArg) -> Self {
        match v {
            BypassArg::None => BypassPolicy::None,
            BypassArg::WordMarker => BypassPolicy::WordMarker,
            BypassArg::Wrapper => BypassPolicy::WrapperMarker,
            BypassArg::Structured => BypassPolicy::StructuredJson,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are noise while the progress bar is up.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Model listing ────────────────────────────────────────────────────
    if cli.list_models {
        let config = build_config(&cli, None)?;
        let models = match list_models(&config).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => fallback_models(),
            Err(e) => {
                if !cli.quiet {
                    eprintln!("{} {e}\n  showing the built-in list instead", yellow("⚠"));
                }
                fallback_models()
            }
        };
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&models).context("Failed to serialise models")?
            );
        } else {
            for model in models {
                println!("{model}");
            }
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input PDF path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&input).await.context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            println!("Encrypted:    {}", meta.is_encrypted);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Ctrl-C → stop at the next chunk boundary, twice → exit ───────────
    let stop = StopHandle::new();
    {
        let stop = stop.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, &stop, quiet).await {
                std::process::exit(130);
            }
        });
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_document_with_stop(&input, &config, stop)
        .await
        .context("Extraction failed")?;

    // ── Write results ────────────────────────────────────────────────────
    let formats = resolve_formats(&cli);
    let to_files = cli.output.is_some() || formats.iter().any(|f| *f != ExportFormat::PlainText);

    if to_files {
        for &format in &formats {
            let path = match cli.output {
                Some(ref base) if formats.len() == 1 => base.clone(),
                Some(ref base) => base.with_extension(format.extension()),
                None => default_output_path(&input, format.extension()),
            };
            export_to_file(&output.text, format, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !to_files {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !show_progress && !cli.json {
        let s = &output.stats;
        eprintln!(
            "Extracted {}/{} chunks ({} refused, {} failed, {} skipped) in {}ms",
            s.extracted_chunks,
            s.chunk_count,
            s.refused_chunks,
            s.failed_chunks,
            s.skipped_chunks,
            s.total_duration_ms
        );
    }

    if cli.strict {
        output
            .into_strict()
            .context("Some chunks were not extracted")?;
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
/// Request a stop on the first signal. Returns true once a second signal
/// arrives, false if the signal source fails.
async fn watch_interrupts<F, Fut>(mut next_signal: F, stop: &StopHandle, quiet: bool) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    if !quiet {
        eprintln!(
            "\n{} stopping after the current chunk… (Ctrl-C again to quit now)",
            yellow("■")
        );
    }
    stop.request_stop();

    if next_signal().await.is_err() {
        return false;
    }
    if !quiet {
        eprintln!("\n{} interrupted", red("✗"));
    }
    true
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pacing = match (cli.pacing_ms, cli.backoff) {
        (0, _) => RatePolicy::Unpaced,
        (ms, false) => RatePolicy::Fixed(Duration::from_millis(ms)),
        (ms, true) => RatePolicy::Backoff {
            base: Duration::from_millis(ms),
            max: Duration::from_secs(60),
        },
    };

    let mut builder = ExtractionConfig::builder()
        .chunk_size(cli.chunk_size as usize)
        .extractor(cli.extractor.into())
        .bypass(cli.bypass.into())
        .preserve_grammar(!cli.no_preserve_grammar)
        .table_markup(!cli.no_tables)
        .structural_cleanup(cli.structural_cleanup)
        .model(cli.model.clone())
        .api_base_url(cli.api_base_url.clone())
        .pacing(pacing)
        .postprocess(!cli.no_postprocess)
        .chunk_separator(parse_separator(&cli.separator))
        .local_provider_name(cli.local_provider.clone())
        .local_model(cli.local_model.clone())
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref pages) = cli.pages {
        builder = builder.page_range(parse_pages(pages)?);
    }
    if let Some(ref lang) = cli.translate {
        builder = builder.translation(lang.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Formats from `--format`, else from the output extension, else plain text.
fn resolve_formats(cli: &Cli) -> Vec<ExportFormat> {
    let mut formats: Vec<ExportFormat> = Vec::new();
    for f in &cli.formats {
        let f = ExportFormat::from(*f);
        if !formats.contains(&f) {
            formats.push(f);
        }
    }
    if formats.is_empty() {
        let inferred = cli
            .output
            .as_ref()
            .and_then(|p| p.extension())
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse::<ExportFormat>().ok())
            .unwrap_or(ExportFormat::PlainText);
        formats.push(inferred);
    }
    formats
}

fn fallback_models() -> Vec<String> {
    FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}

/// Parse `--pages` (`5` or `3-15`, 1-indexed inclusive) into a `PageRange`.
fn parse_pages(s: &str) -> Result<PageRange> {
    let s = s.trim();

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageRange::from_one_based(start, end));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageRange::from_one_based(page, page))
}

/// Parse `--separator` into a `ChunkSeparator`.
fn parse_separator(s: &str) -> ChunkSeparator {
    match s.to_lowercase().as_str() {
        "none" => ChunkSeparator::None,
        "hr" | "---" => ChunkSeparator::HorizontalRule,
        "comment" => ChunkSeparator::Comment,
        _ => ChunkSeparator::Custom(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[tokio::test]
    async fn second_interrupt_quits() {
        let stop = StopHandle::new();
        let mut fired = 0;
        let quit = watch_interrupts(
            || {
                fired += 1;
                std::future::ready(Ok(()))
            },
            &stop,
            true,
        )
        .await;
        assert!(quit);
        assert!(stop.is_stop_requested());
        assert_eq!(fired, 2);
    }

    #[tokio::test]
    async fn failing_signal_source_neither_stops_nor_quits() {
        let stop = StopHandle::new();
        let quit = watch_interrupts(
            || std::future::ready(Err(io::Error::other("no signal handler"))),
            &stop,
            true,
        )
        .await;
        assert!(!quit);
        assert!(!stop.is_stop_requested());
    }

    #[test]
    fn structural_cleanup_help_matches_directive() {
        let command = Cli::command();
        let help = command
            .get_arguments()
            .find(|arg| arg.get_id() == "structural_cleanup")
            .and_then(|arg| arg.get_help())
            .map(|help| help.to_string())
            .unwrap_or_default();
        assert!(help.contains("hyphenation"));
        assert!(help.contains("headings"));
        assert!(!help.contains("footers"));
    }
}
