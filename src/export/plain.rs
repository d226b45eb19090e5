//! Plain text export: the assembled text, byte for byte.

use super::{DocumentExporter, ExportFormat};
use crate::error::ChunkscribeError;

pub struct PlainTextExporter;

impl DocumentExporter for PlainTextExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::PlainText
    }

    fn export(&self, text: &str) -> Result<Vec<u8>, ChunkscribeError> {
        Ok(text.as_bytes().to_vec())
    }
}
