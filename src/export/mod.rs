//! Exporters: serialise the assembled text into an output document.
//!
//! Every exporter shares one paragraph convention: the text is split on blank
//! lines, each paragraph is trimmed, and empty paragraphs are dropped. Line
//! breaks inside a paragraph are kept.
//!
//! ```rust
//! use chunkscribe::export::{exporter_for, ExportFormat};
//!
//! let bytes = exporter_for(ExportFormat::PlainText)
//!     .export("First paragraph.\n\nSecond paragraph.")
//!     .unwrap();
//! assert!(bytes.starts_with(b"First"));
//! ```

pub mod docx;
pub mod pdf;
pub mod plain;

use crate::error::ChunkscribeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub use docx::DocxExporter;
pub use pdf::PdfExporter;
pub use plain::PlainTextExporter;

/// Output document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    PlainText,
    Docx,
    Pdf,
}

impl ExportFormat {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::PlainText => "txt",
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ChunkscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" | "plain" => Ok(ExportFormat::PlainText),
            "docx" | "word" => Ok(ExportFormat::Docx),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(ChunkscribeError::InvalidConfig(format!(
                "unknown export format '{other}' (expected txt, docx or pdf)"
            ))),
        }
    }
}

/// Serialises the final text into one document format.
pub trait DocumentExporter: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn export(&self, text: &str) -> Result<Vec<u8>, ChunkscribeError>;
}

/// The exporter for `format`.
pub fn exporter_for(format: ExportFormat) -> Box<dyn DocumentExporter> {
    match format {
        ExportFormat::PlainText => Box::new(PlainTextExporter),
        ExportFormat::Docx => Box::new(DocxExporter),
        ExportFormat::Pdf => Box::new(PdfExporter::default()),
    }
}

/// Split text into paragraphs on blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalised.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut paragraphs);
    paragraphs
}

fn flush(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    let paragraph = lines.join("\n");
    let paragraph = paragraph.trim();
    if !paragraph.is_empty() {
        out.push(paragraph.to_string());
    }
    lines.clear();
}

/// Export `text` and write it to `path` atomically.
///
/// The bytes go to a temporary file in the destination directory, which is
/// then renamed over `path`; a failed export leaves no partial file behind.
pub fn export_to_file(
    text: &str,
    format: ExportFormat,
    path: &Path,
) -> Result<(), ChunkscribeError> {
    let bytes = exporter_for(format).export(text)?;
    write_atomic(path, &bytes)?;
    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ChunkscribeError> {
    let write_err = |source: std::io::Error| ChunkscribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
