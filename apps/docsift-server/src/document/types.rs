//! Core document types
//!
//! An uploaded document, its detected media type and the closed set of
//! extraction kinds that can be requested for it.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use axum::body::Bytes;
use serde::{Deserialize, Serialize};

use super::fingerprint::{compute_hash, Fingerprint};

/// Extraction kind requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionKind {
    /// Table of contents from a PDF
    Toc,
    /// Chart analysis from an image or PDF page
    Chart,
    /// Table recognition into sheets
    Spreadsheet,
}

impl ExtractionKind {
    pub const ALL: [ExtractionKind; 3] = [Self::Toc, Self::Chart, Self::Spreadsheet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::Chart => "chart",
            Self::Spreadsheet => "spreadsheet",
        }
    }

    /// Whether documents of `media_type` can be processed for this kind
    pub fn accepts(&self, media_type: MediaType) -> bool {
        match self {
            Self::Toc => media_type == MediaType::Pdf,
            Self::Chart => media_type == MediaType::Pdf || media_type.is_image(),
            Self::Spreadsheet => {
                media_type == MediaType::Pdf
                    || media_type.is_image()
                    || media_type.is_spreadsheet()
            }
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "toc" => Ok(Self::Toc),
            "chart" | "graph" => Ok(Self::Chart),
            "spreadsheet" | "sheet" => Ok(Self::Spreadsheet),
            other => Err(format!("unknown extraction kind: {}", other)),
        }
    }
}

/// Media type detected from the uploaded bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
    Gif,
    Webp,
    Tiff,
    Bmp,
    Xlsx,
    Csv,
    Unknown,
}

impl MediaType {
    /// Detect the media type from magic bytes, falling back to the filename
    /// for text formats that carry no signature.
    pub fn detect(bytes: &[u8], filename: Option<&str>) -> Self {
        if bytes.starts_with(b"%PDF") {
            return Self::Pdf;
        }

        if let Ok(format) = image::guess_format(bytes) {
            match format {
                image::ImageFormat::Png => return Self::Png,
                image::ImageFormat::Jpeg => return Self::Jpeg,
                image::ImageFormat::Gif => return Self::Gif,
                image::ImageFormat::WebP => return Self::Webp,
                image::ImageFormat::Tiff => return Self::Tiff,
                image::ImageFormat::Bmp => return Self::Bmp,
                _ => {}
            }
        }

        // Not every ZIP is a workbook (.docx, .epub, .jar)
        if bytes.starts_with(b"PK") && is_xlsx_archive(bytes) {
            return Self::Xlsx;
        }

        if let Some(name) = filename {
            let is_csv = mime_guess::from_path(name)
                .first()
                .map(|mime| mime.essence_str() == "text/csv")
                .unwrap_or(false);
            if is_csv && !bytes.is_empty() && std::str::from_utf8(bytes).is_ok() {
                return Self::Csv;
            }
        }

        Self::Unknown
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Self::Png | Self::Jpeg | Self::Gif | Self::Webp | Self::Tiff | Self::Bmp
        )
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, Self::Xlsx | Self::Csv)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv",
            Self::Unknown => "application/octet-stream",
        }
    }
}

fn is_xlsx_archive(bytes: &[u8]) -> bool {
    match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(mut archive) => {
            let found = archive.by_name("xl/workbook.xml").is_ok();
            found
        }
        Err(_) => false,
    }
}

/// An ingested document. Immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Bytes,
    media_type: MediaType,
    filename: Option<String>,
    content_hash: String,
}

impl Document {
    /// Ingest raw bytes, detecting the media type
    pub fn new(bytes: impl Into<Bytes>, filename: Option<String>) -> Self {
        let bytes = bytes.into();
        let media_type = MediaType::detect(&bytes, filename.as_deref());
        Self::with_media_type(bytes, media_type, filename)
    }

    /// Ingest raw bytes with an already known media type
    pub fn with_media_type(
        bytes: impl Into<Bytes>,
        media_type: MediaType,
        filename: Option<String>,
    ) -> Self {
        let bytes = bytes.into();
        let content_hash = compute_hash(&bytes);
        Self {
            bytes,
            media_type,
            filename,
            content_hash,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// SHA-256 of the raw bytes (hex)
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Cache key for extracting `kind` from this document
    pub fn fingerprint(&self, kind: ExtractionKind) -> Fingerprint {
        Fingerprint::from_content_hash(kind, &self.content_hash)
    }
}
