//! Low-level PDF access via lopdf
//!
//! Only what the adapters need: outline (bookmark) walking, per-page text,
//! and pulling an embedded JPEG off the first page.

use std::collections::{HashMap, HashSet};

use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId, Stream};

use super::ProviderError;

/// Outline nesting deeper than this is ignored
const MAX_OUTLINE_DEPTH: u32 = 16;
/// Safety limit on outline items (cyclic or hostile outlines)
const MAX_OUTLINE_ITEMS: usize = 10_000;
/// Safety limit when following /Parent chains
const MAX_TREE_DEPTH: usize = 64;

/// One bookmark from the document outline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineItem {
    pub title: String,
    pub level: u32,
    pub page: Option<u32>,
}

/// Parse PDF bytes
pub fn load(bytes: &[u8]) -> Result<PdfDocument, ProviderError> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|e| ProviderError::InvalidInput(format!("Could not parse PDF: {}", e)))?;

    if doc.is_encrypted() {
        return Err(ProviderError::InvalidInput(
            "Encrypted PDFs are not supported".to_string(),
        ));
    }

    Ok(doc)
}

fn resolve<'a>(doc: &'a PdfDocument, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a PdfDocument, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

fn catalog(doc: &PdfDocument) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    resolve_dict(doc, root)
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, else PDFDocEncoding)
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    // PDFDocEncoding agrees with Latin-1 for printable text
    bytes.iter().map(|&b| b as char).collect()
}

/// Walk the document outline in reading order
pub fn outline(doc: &PdfDocument) -> Vec<OutlineItem> {
    let pages: HashMap<ObjectId, u32> = doc
        .get_pages()
        .into_iter()
        .map(|(number, id)| (id, number))
        .collect();

    let root = match catalog(doc)
        .and_then(|c| c.get(b"Outlines").ok())
        .and_then(|o| resolve_dict(doc, o))
    {
        Some(root) => root,
        None => return Vec::new(),
    };

    let mut items = Vec::new();
    let mut visited = HashSet::new();
    if let Ok(first) = root.get(b"First") {
        walk_outline(doc, first, 1, &pages, &mut visited, &mut items);
    }
    items
}

fn walk_outline(
    doc: &PdfDocument,
    first: &Object,
    level: u32,
    pages: &HashMap<ObjectId, u32>,
    visited: &mut HashSet<ObjectId>,
    items: &mut Vec<OutlineItem>,
) {
    if level > MAX_OUTLINE_DEPTH {
        return;
    }

    let mut current = first.as_reference().ok();
    while let Some(id) = current {
        if !visited.insert(id) || items.len() >= MAX_OUTLINE_ITEMS {
            break;
        }
        let item = match doc.get_dictionary(id) {
            Ok(item) => item,
            Err(_) => break,
        };

        let title = item
            .get(b"Title")
            .ok()
            .and_then(|t| resolve(doc, t))
            .and_then(|t| t.as_str().ok())
            .map(decode_text_string)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        items.push(OutlineItem {
            title,
            level,
            page: destination_page(doc, item, pages),
        });

        if let Ok(child) = item.get(b"First") {
            walk_outline(doc, child, level + 1, pages, visited, items);
        }

        current = item.get(b"Next").ok().and_then(|n| n.as_reference().ok());
    }
}

/// Page number of an outline item's explicit destination. Named
/// destinations are not resolved.
fn destination_page(
    doc: &PdfDocument,
    item: &Dictionary,
    pages: &HashMap<ObjectId, u32>,
) -> Option<u32> {
    let dest = match item.get(b"Dest") {
        Ok(dest) => resolve(doc, dest)?,
        Err(_) => {
            let action = resolve_dict(doc, item.get(b"A").ok()?)?;
            resolve(doc, action.get(b"D").ok()?)?
        }
    };

    let dest = match dest.as_dict() {
        Ok(dict) => resolve(doc, dict.get(b"D").ok()?)?,
        Err(_) => dest,
    };

    let page_ref = dest.as_array().ok()?.first()?.as_reference().ok()?;
    pages.get(&page_ref).copied()
}

/// Text of the first `max_pages` pages, paired with their page number
pub fn page_texts(doc: &PdfDocument, max_pages: usize) -> Vec<(u32, String)> {
    doc.get_pages()
        .keys()
        .take(max_pages)
        .map(|&number| {
            let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
                tracing::debug!(page = number, "Text extraction failed: {}", e);
                String::new()
            });
            (number, text)
        })
        .collect()
}

/// Look up a page attribute, following /Parent for inherited values
fn inherited<'a>(doc: &'a PdfDocument, mut node: ObjectId, key: &[u8]) -> Option<&'a Object> {
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(node).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        node = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn is_dct_image(stream: &Stream) -> bool {
    let is_image = stream
        .dict
        .get(b"Subtype")
        .and_then(|s| s.as_name())
        .map(|name| name == b"Image")
        .unwrap_or(false);

    let is_dct = match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1
                && filters[0]
                    .as_name()
                    .map(|name| name == b"DCTDecode")
                    .unwrap_or(false)
        }
        _ => false,
    };

    is_image && is_dct
}

/// Largest JPEG image drawn on the first page, as raw JPEG bytes
pub fn first_page_jpeg(doc: &PdfDocument) -> Option<Vec<u8>> {
    let (_, page_id) = doc.get_pages().into_iter().next()?;
    let resources = resolve_dict(doc, inherited(doc, page_id, b"Resources")?)?;
    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok()?)?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| resolve(doc, obj).and_then(|o| o.as_stream().ok()))
        .filter(|stream| is_dct_image(stream))
        .max_by_key(|stream| stream.content.len())
        .map(|stream| stream.content.clone())
}
