//! docsift server library
//!
//! Document extraction gateway: uploaded PDFs, images and spreadsheets are
//! fingerprinted, routed to an extraction provider, normalized into one of
//! three result schemas and cached by fingerprint.
//!
//! # Modules
//!
//! - `document`: Uploaded documents, media type detection, fingerprints
//! - `provider`: Extraction adapters (local TOC builder, Azure vision, Azure layout)
//! - `normalize`: Raw provider responses to canonical results
//! - `store`: Fingerprint store backends (SQLite, in-memory LRU)
//! - `extraction`: Result types, error taxonomy and the orchestrator
//! - `routes`: HTTP surface

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod extraction;
pub mod normalize;
pub mod provider;
pub mod routes;
pub mod state;
pub mod store;
