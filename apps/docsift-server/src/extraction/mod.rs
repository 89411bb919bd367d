//! Extraction pipeline
//!
//! Result types, the caller-facing error taxonomy and the orchestrating
//! [`ExtractionService`].

mod error;
mod retry;
mod service;
mod types;

pub use error::{ErrorKind, ExtractError};
pub use retry::{call_with_retry, RetryPolicy};
pub use service::{ExtractionRequest, ExtractionService, ExtractionSettings};
pub use types::*;
