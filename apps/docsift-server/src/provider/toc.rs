//! Table of contents builder
//!
//! Runs locally: the PDF outline when the document has one, otherwise a
//! scan of the first pages for a printed contents page.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{pdf, ExtractionProvider, ProviderError, ProviderOptions, RawProviderResponse};
use crate::document::{Document, ExtractionKind, MediaType};

pub const PROVIDER_NAME: &str = "pdf-toc";

/// A printed contents page needs at least this many non-empty lines...
const MIN_TOC_LINES: usize = 5;
/// ...of which at least this many end in a page number
const MIN_NUMBERED_LINES: usize = 3;

static CONTENTS_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(table\s+of\s+)?contents\s*$").expect("valid regex")
});

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\.{2,}\s*\d+$|\s{2,}\d+$)").expect("valid regex"));

static TOC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.*?)(?:\.{2,}\s*|\s{2,})(\d{1,4})\s*$").expect("valid regex")
});

/// Reads headings out of PDFs
#[derive(Debug, Clone, Copy)]
pub struct PdfTocProvider {
    max_scan_pages: usize,
    min_toc_pages: usize,
}

impl PdfTocProvider {
    pub fn new(max_scan_pages: usize, min_toc_pages: usize) -> Self {
        Self {
            max_scan_pages: max_scan_pages.max(1),
            min_toc_pages: min_toc_pages.max(1),
        }
    }

    fn build(&self, bytes: &[u8]) -> Result<serde_json::Value, ProviderError> {
        let doc = pdf::load(bytes)?;

        let outline = pdf::outline(&doc);
        if !outline.is_empty() {
            tracing::debug!(items = outline.len(), "Using PDF outline");
            let entries: Vec<_> = outline
                .into_iter()
                .map(|item| json!({ "title": item.title, "level": item.level, "page": item.page }))
                .collect();
            return Ok(json!({ "source": "outline", "entries": entries }));
        }

        let pages = pdf::page_texts(&doc, self.max_scan_pages);
        let texts: Vec<&str> = pages.iter().map(|(_, text)| text.as_str()).collect();

        let Some(range) = find_toc_page_range(&texts, self.min_toc_pages) else {
            tracing::debug!(scanned = pages.len(), "No contents page found");
            return Ok(json!({ "source": "none", "entries": [] }));
        };

        let entries: Vec<_> = texts[range.clone()]
            .iter()
            .flat_map(|text| text.lines())
            .filter_map(parse_toc_line)
            .map(|(title, page)| json!({ "title": title, "page": page }))
            .collect();

        tracing::debug!(
            first_page = pages[*range.start()].0,
            last_page = pages[*range.end()].0,
            entries = entries.len(),
            "Parsed printed contents"
        );

        Ok(json!({ "source": "contents", "entries": entries }))
    }
}

#[async_trait]
impl ExtractionProvider for PdfTocProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ExtractionKind {
        ExtractionKind::Toc
    }

    async fn extract(
        &self,
        document: &Document,
        _options: &ProviderOptions,
    ) -> Result<RawProviderResponse, ProviderError> {
        if document.media_type() != MediaType::Pdf {
            return Err(ProviderError::InvalidInput(
                "Table of contents extraction needs a PDF".to_string(),
            ));
        }

        let bytes = document.bytes().clone();
        let builder = *self;
        let body = tokio::task::spawn_blocking(move || builder.build(&bytes))
            .await
            .map_err(|e| ProviderError::Unavailable(format!("TOC task failed: {}", e)))??;

        Ok(RawProviderResponse::new(PROVIDER_NAME, ExtractionKind::Toc, body))
    }
}

/// Whether a page's text looks like a printed contents listing
pub fn is_toc_like_page(text: &str) -> bool {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.len() < MIN_TOC_LINES {
        return false;
    }

    lines.iter().filter(|line| NUMBERED_LINE.is_match(line)).count() >= MIN_NUMBERED_LINES
}

fn has_contents_heading(text: &str) -> bool {
    text.lines().any(|line| CONTENTS_HEADING.is_match(line))
}

/// Index range of the first run of contents pages, if it spans at least
/// `min_pages` pages
pub fn find_toc_page_range(pages: &[&str], min_pages: usize) -> Option<RangeInclusive<usize>> {
    let start = pages
        .iter()
        .position(|text| has_contents_heading(text) || is_toc_like_page(text))?;

    let mut end = start;
    while end + 1 < pages.len() && is_toc_like_page(pages[end + 1]) {
        end += 1;
    }

    if end - start + 1 < min_pages.max(1) {
        return None;
    }
    Some(start..=end)
}

/// Split a `Title ....... 12` line into title and page number
pub fn parse_toc_line(line: &str) -> Option<(String, u32)> {
    let captures = TOC_LINE.captures(line.trim_end())?;
    let title = captures
        .get(1)?
        .as_str()
        .trim()
        .trim_end_matches(['.', ' '])
        .trim()
        .to_string();
    if title.is_empty() {
        return None;
    }
    let page = captures.get(2)?.as_str().parse().ok()?;
    Some((title, page))
}
