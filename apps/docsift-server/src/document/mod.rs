//! Document ingestion
//!
//! Uploaded bytes become an immutable [`Document`] with a detected
//! [`MediaType`] and a content hash. A [`Fingerprint`] combines that hash with
//! the requested [`ExtractionKind`] and keys the extraction cache.
//!
//! # Usage
//!
//! ```rust,ignore
//! use docsift_server::document::{Document, ExtractionKind};
//!
//! let doc = Document::new(bytes, Some("report.pdf".to_string()));
//! let fingerprint = doc.fingerprint(ExtractionKind::Toc);
//! ```

mod fingerprint;
mod types;

pub use fingerprint::{compute_hash, Fingerprint, InvalidFingerprint};
pub use types::{Document, ExtractionKind, MediaType};
