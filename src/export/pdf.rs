//! PDF export: wrapped Helvetica text on A4 pages.
//!
//! The standard Type 1 fonts need no embedding, which keeps the writer
//! small, but they only cover WinAnsi. Characters outside it are written as
//! `?`; scripts such as CJK or Arabic need the DOCX or plain-text exports.

use super::{split_paragraphs, DocumentExporter, ExportFormat};
use crate::error::ChunkscribeError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FONT_SIZE: i64 = 11;
const LEADING: i64 = 14;

/// Layout knobs for [`PdfExporter`].
#[derive(Debug, Clone)]
pub struct PdfExporter {
    /// Wrap column, in characters.
    pub line_width: usize,
    pub lines_per_page: usize,
}

impl Default for PdfExporter {
    fn default() -> Self {
        Self {
            line_width: 85,
            lines_per_page: 52,
        }
    }
}

impl PdfExporter {
    /// Lay the text out as pages of wrapped lines, with a blank line between
    /// paragraphs.
    pub fn paginate(&self, text: &str) -> Vec<Vec<String>> {
        let mut lines = Vec::new();
        for (i, paragraph) in split_paragraphs(text).iter().enumerate() {
            if i > 0 {
                lines.push(String::new());
            }
            for line in paragraph.lines() {
                lines.extend(wrap_line(line, self.line_width));
            }
        }

        let per_page = self.lines_per_page.max(1);
        let mut pages: Vec<Vec<String>> = lines
            .chunks(per_page)
            .map(|chunk| chunk.to_vec())
            .collect();
        if pages.is_empty() {
            pages.push(Vec::new());
        }
        pages
    }
}

impl DocumentExporter for PdfExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn export(&self, text: &str) -> Result<Vec<u8>, ChunkscribeError> {
        build_document(&self.paginate(text))
    }
}

/// Write one PDF page per entry of `pages`, each holding the given lines.
pub fn build_document(pages: &[Vec<String>]) -> Result<Vec<u8>, ChunkscribeError> {
    let export_err = |detail: String| ChunkscribeError::ExportFailed {
        format: ExportFormat::Pdf.to_string(),
        detail,
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for lines in pages {
        let content = page_content(lines);
        let encoded = content.encode().map_err(|e| export_err(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(|e| export_err(e.to_string()))?;
    Ok(buf)
}

fn page_content(lines: &[String]) -> Content {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
        Operation::new("TL", vec![LEADING.into()]),
        Operation::new(
            "Td",
            vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN - FONT_SIZE).into()],
        ),
    ];
    for line in lines {
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
        ));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    Content { operations }
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            out.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 || out.is_empty() {
        out.push(current);
    }
    out
}

/// Map text to WinAnsi bytes, substituting `?` for anything unmapped.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\t' => b' ',
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            _ => b'?',
        })
        .collect()
}
