//! DOCX export: one Word paragraph per text paragraph.

use super::{split_paragraphs, DocumentExporter, ExportFormat};
use crate::error::ChunkscribeError;
use docx_rs::{BreakType, Docx, Paragraph, Run};
use std::io::Cursor;

pub struct DocxExporter;

impl DocumentExporter for DocxExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Docx
    }

    fn export(&self, text: &str) -> Result<Vec<u8>, ChunkscribeError> {
        let mut docx = Docx::new();
        for paragraph in split_paragraphs(text) {
            docx = docx.add_paragraph(build_paragraph(&paragraph));
        }

        let mut buf = Vec::new();
        docx.build()
            .pack(Cursor::new(&mut buf))
            .map_err(|e| ChunkscribeError::ExportFailed {
                format: ExportFormat::Docx.to_string(),
                detail: e.to_string(),
            })?;
        Ok(buf)
    }
}

/// A paragraph whose inner line breaks become Word line breaks.
fn build_paragraph(paragraph: &str) -> Paragraph {
    let mut run = Run::new();
    for (i, line) in paragraph.lines().enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(line);
    }
    Paragraph::new().add_run(run)
}
