//! Document subsetting: cut a standalone PDF out of a page range.
//!
//! The source is parsed once per run with lopdf. Each chunk starts from an
//! empty document and copies in only the chunk's pages and the objects they
//! reach (content streams, fonts, images), so the work per chunk follows the
//! chunk's size, not the source's. Attributes a page inherits from the page
//! tree are written onto the copied page. Only one subset is alive at a time:
//! the driver drops it before the next chunk starts.

use crate::error::{ChunkError, ChunkscribeError};
use crate::output::DocumentMetadata;
use crate::pipeline::slicer::PageRange;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Page attributes that may sit on an ancestor `Pages` node.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against `Parent` cycles in broken page trees.
const MAX_TREE_DEPTH: usize = 64;

/// A parsed source PDF, immutable for the duration of a run.
pub struct SourceDocument {
    name: String,
    document: Document,
    page_ids: Vec<ObjectId>,
}

impl SourceDocument {
    /// Parse PDF bytes and refuse encrypted documents.
    pub fn load(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ChunkscribeError> {
        let source = Self::parse(name, bytes)?;
        if source.document.is_encrypted() {
            return Err(ChunkscribeError::EncryptedPdf {
                source_name: source.name,
            });
        }
        Ok(source)
    }

    /// Parse PDF bytes without the encryption check (used by `inspect`).
    pub fn parse(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ChunkscribeError> {
        let name = name.into();
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            let n = bytes.len().min(4);
            magic[..n].copy_from_slice(&bytes[..n]);
            return Err(ChunkscribeError::NotAPdf {
                source_name: name,
                magic,
            });
        }

        let document = Document::load_mem(bytes).map_err(|e| ChunkscribeError::CorruptPdf {
            source_name: name.clone(),
            detail: e.to_string(),
        })?;
        let page_ids = document.get_pages().into_values().collect();

        Ok(Self {
            name,
            document,
            page_ids,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Metadata from the trailer's Info dictionary.
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.info_string(b"Title"),
            author: self.info_string(b"Author"),
            subject: self.info_string(b"Subject"),
            creator: self.info_string(b"Creator"),
            producer: self.info_string(b"Producer"),
            page_count: self.page_count(),
            pdf_version: self.document.version.clone(),
            is_encrypted: self.document.is_encrypted(),
        }
    }

    /// Materialise pages `[range.start, range.end)` as a standalone PDF.
    ///
    /// Fails with [`ChunkError::MalformedSource`] when a page in the range
    /// cannot be read; pages outside the range are never inspected.
    pub fn extract_subset(&self, range: PageRange) -> Result<DocumentSubset, ChunkError> {
        if range.is_empty() || range.end > self.page_ids.len() {
            return Err(ChunkError::MalformedSource {
                pages: range,
                detail: format!("range outside document of {} pages", self.page_ids.len()),
            });
        }

        for index in range.start..range.end {
            self.check_page(index).map_err(|detail| ChunkError::MalformedSource {
                pages: range,
                detail,
            })?;
        }

        let mut subset = self.copy_pages(range);
        subset.compress();

        let mut bytes = Vec::new();
        subset
            .save_to(&mut bytes)
            .map_err(|e| ChunkError::MalformedSource {
                pages: range,
                detail: format!("could not serialise subset: {e}"),
            })?;

        debug!("Subset {} → {} bytes", range, bytes.len());
        Ok(DocumentSubset { pages: range, bytes })
    }

    /// New document holding only the pages of `range`, in order.
    fn copy_pages(&self, range: PageRange) -> Document {
        let mut copier = ObjectCopier::new(&self.document, self.page_ids.iter().copied());
        let pages_id = copier.target.new_object_id();

        let mut page_refs = Vec::with_capacity(range.len());
        for index in range.start..range.end {
            let source_id = self.page_ids[index];
            let mut page = match self.document.get_dictionary(source_id) {
                Ok(dict) => dict.clone(),
                Err(_) => continue,
            };
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = self.inherited(source_id, key) {
                        page.set(key, value.clone());
                    }
                }
            }
            page.remove(b"Parent");

            let page_id = copier.target.new_object_id();
            copier.ids.insert(source_id, page_id);
            let mut page = copier.copy_dict(&page);
            page.set("Parent", pages_id);
            copier.target.objects.insert(page_id, Object::Dictionary(page));
            page_refs.push(Object::Reference(page_id));
        }
        copier.drain();

        let mut target = copier.target;
        let count = page_refs.len() as i64;
        target.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_refs,
                "Count" => count,
            }),
        );
        let catalog_id = target.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        target.trailer.set("Root", catalog_id);
        target
    }

    /// Value of `key` on the page or its nearest ancestor.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut node = self.document.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(value) = node.get(key) {
                return Some(value);
            }
            let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
            node = self.document.get_dictionary(parent).ok()?;
        }
        None
    }

    fn check_page(&self, index: usize) -> Result<(), String> {
        let page_id = self.page_ids[index];
        self.document
            .get_dictionary(page_id)
            .map_err(|e| format!("page {} object {:?}: {e}", index + 1, page_id))?;

        for content_id in self.document.get_page_contents(page_id) {
            self.document
                .get_object(content_id)
                .and_then(Object::as_stream)
                .map_err(|e| format!("page {} content {:?}: {e}", index + 1, content_id))?;
        }
        Ok(())
    }

    fn info_string(&self, key: &[u8]) -> Option<String> {
        let info = match self.document.trailer.get(b"Info").ok()? {
            Object::Reference(id) => self.document.get_dictionary(*id).ok()?,
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        let raw = info.get(key).ok()?.as_str().ok()?;
        let text = decode_text_string(raw);
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Copies objects from a source document into a fresh one, following
/// references and giving every copied object a new id.
///
/// References to other pages and to page-tree nodes become `null`, so links
/// and annotations never drag the rest of the document along.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: Document,
    ids: HashMap<ObjectId, ObjectId>,
    pending: Vec<ObjectId>,
    pages: HashSet<ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, pages: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            source,
            target: Document::with_version(source.version.clone()),
            ids: HashMap::new(),
            pending: Vec::new(),
            pages: pages.into_iter().collect(),
        }
    }

    fn copy_object(&mut self, object: &Object) -> Object {
        match object {
            Object::Reference(id) => self.copy_reference(*id),
            Object::Array(items) => Object::Array(items.iter().map(|o| self.copy_object(o)).collect()),
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dict(dict)),
            Object::Stream(stream) => {
                let mut copy = stream.clone();
                copy.dict = self.copy_dict(&stream.dict);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn copy_dict(&mut self, dict: &Dictionary) -> Dictionary {
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            copy.set(key.clone(), self.copy_object(value));
        }
        copy
    }

    fn copy_reference(&mut self, id: ObjectId) -> Object {
        if let Some(new_id) = self.ids.get(&id) {
            return Object::Reference(*new_id);
        }
        if self.pages.contains(&id) || self.is_page_tree_node(id) {
            return Object::Null;
        }
        if self.source.get_object(id).is_err() {
            return Object::Null;
        }
        let new_id = self.target.new_object_id();
        self.ids.insert(id, new_id);
        self.pending.push(id);
        Object::Reference(new_id)
    }

    fn is_page_tree_node(&self, id: ObjectId) -> bool {
        self.source
            .get_dictionary(id)
            .and_then(|dict| dict.get(b"Type"))
            .and_then(Object::as_name)
            .map(|name| name == b"Pages")
            .unwrap_or(false)
    }

    /// Copy every object reached so far, and whatever those reach.
    fn drain(&mut self) {
        let source = self.source;
        while let Some(old_id) = self.pending.pop() {
            let Ok(object) = source.get_object(old_id) else {
                continue;
            };
            let copy = self.copy_object(object);
            if let Some(new_id) = self.ids.get(&old_id) {
                self.target.objects.insert(*new_id, copy);
            }
        }
    }
}

/// A standalone PDF holding one chunk's pages.
#[derive(Debug, Clone)]
pub struct DocumentSubset {
    pub pages: PageRange,
    pub bytes: Vec<u8>,
}

impl DocumentSubset {
    /// File name used when the subset leaves the process (uploads, logs).
    pub fn display_name(&self) -> String {
        format!("pages-{}-{}.pdf", self.pages.start + 1, self.pages.end)
    }
}

/// PDF text strings are either UTF-16BE with a BOM or PDFDocEncoding, which
/// agrees with Latin-1 for printable characters.
fn decode_text_string(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::pdf::build_document;

    fn fixture(pages: usize) -> Vec<u8> {
        let pages: Vec<Vec<String>> = (1..=pages)
            .map(|n| vec![format!("Source page {n}"), format!("Line two of page {n}")])
            .collect();
        build_document(&pages).expect("fixture PDF")
    }

    fn page_contents(bytes: &[u8]) -> Vec<Vec<u8>> {
        let doc = Document::load_mem(bytes).expect("parse");
        doc.get_pages()
            .values()
            .map(|id| doc.get_page_content(*id).expect("content"))
            .collect()
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = SourceDocument::load("notes.txt", b"hello world").err();
        assert!(matches!(err, Some(ChunkscribeError::NotAPdf { .. })));
    }

    #[test]
    fn counts_pages() {
        let source = SourceDocument::load("doc.pdf", &fixture(7)).expect("load");
        assert_eq!(source.page_count(), 7);
        assert_eq!(source.metadata().page_count, 7);
    }

    #[test]
    fn subset_preserves_page_content_and_order() {
        let bytes = fixture(10);
        let original = page_contents(&bytes);
        let source = SourceDocument::load("doc.pdf", &bytes).expect("load");

        for (start, end) in [(0, 3), (3, 6), (9, 10), (0, 10), (4, 5)] {
            let subset = source
                .extract_subset(PageRange::new(start, end))
                .expect("subset");
            assert_eq!(subset.pages, PageRange::new(start, end));
            let contents = page_contents(&subset.bytes);
            assert_eq!(contents.len(), end - start);
            assert_eq!(contents.as_slice(), &original[start..end]);
        }
    }

    #[test]
    fn subset_is_a_loadable_source() {
        let source = SourceDocument::load("doc.pdf", &fixture(6)).expect("load");
        let subset = source.extract_subset(PageRange::new(2, 5)).expect("subset");
        let reloaded = SourceDocument::load(subset.display_name(), &subset.bytes).expect("reload");
        assert_eq!(reloaded.page_count(), 3);
        assert_eq!(subset.display_name(), "pages-3-5.pdf");
    }

    #[test]
    fn dangling_content_is_malformed_only_for_its_chunk() {
        let mut doc = Document::load_mem(&fixture(4)).expect("parse");
        let page_two = doc.get_pages()[&2];
        doc.get_object_mut(page_two)
            .and_then(Object::as_dict_mut)
            .expect("page dict")
            .set("Contents", Object::Reference((9999, 0)));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");

        let source = SourceDocument::load("broken.pdf", &bytes).expect("load");
        let err = source.extract_subset(PageRange::new(0, 2)).err();
        assert!(matches!(err, Some(ChunkError::MalformedSource { .. })));
        assert!(source.extract_subset(PageRange::new(2, 4)).is_ok());
    }

    #[test]
    fn subset_pages_carry_inherited_attributes() {
        let source = SourceDocument::load("doc.pdf", &fixture(4)).expect("load");
        let subset = source.extract_subset(PageRange::new(1, 3)).expect("subset");
        let doc = Document::load_mem(&subset.bytes).expect("parse");
        for page_id in doc.get_pages().values() {
            let page = doc.get_dictionary(*page_id).expect("page");
            assert!(page.has(b"MediaBox"));
            assert!(page.has(b"Resources"));
        }
    }

    #[test]
    fn subset_size_does_not_grow_with_the_source() {
        let small = SourceDocument::load("small.pdf", &fixture(3)).expect("load");
        let large = SourceDocument::load("large.pdf", &fixture(60)).expect("load");
        let from_small = small.extract_subset(PageRange::new(1, 2)).expect("subset");
        let from_large = large.extract_subset(PageRange::new(40, 41)).expect("subset");

        let objects = |bytes: &[u8]| Document::load_mem(bytes).expect("parse").objects.len();
        assert_eq!(objects(&from_small.bytes), objects(&from_large.bytes));
        assert_eq!(page_contents(&from_large.bytes), vec![page_contents(&fixture(60))[40].clone()]);
    }

    #[test]
    fn range_past_end_is_malformed() {
        let source = SourceDocument::load("doc.pdf", &fixture(2)).expect("load");
        assert!(source.extract_subset(PageRange::new(1, 3)).is_err());
    }

    #[test]
    fn decodes_utf16_info_strings() {
        let raw = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_text_string(&raw), "Hi");
        assert_eq!(decode_text_string(b"Plain"), "Plain");
    }
}
