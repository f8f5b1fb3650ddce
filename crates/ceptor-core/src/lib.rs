//! Ceptor Core - HTTP traffic capture pipeline.
//!
//! Bytes handed over by a transport hook flow through:
//!
//! ```text
//! raw bytes → truncate → binary detection → redaction (text only) → store
//! ```
//!
//! Decoding stored bodies for display lives in `ceptor-parser`; SQLite
//! persistence lives in `ceptor-storage`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ceptor_core::{
//!     CaptureConfig, CaptureEngine, Headers, InMemoryStore, RedactionConfig, ResponseCapture,
//! };
//!
//! let config = CaptureConfig {
//!     redaction: RedactionConfig::new().redact_header("Authorization"),
//!     ..Default::default()
//! };
//! let engine = CaptureEngine::new(config, Arc::new(InMemoryStore::new()));
//!
//! let headers = Headers::new().with("Authorization", "Bearer secret");
//! let id = engine
//!     .start_transaction("https://api.example.com/", "GET", &headers, None, None)
//!     .unwrap();
//! engine.complete_transaction(id, ResponseCapture::new(200, "OK"));
//! ```

pub mod binary;
pub mod capture;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod redaction;
pub mod store;
pub mod truncate;

pub use binary::{is_binary, is_binary_by_magic_bytes, is_binary_content_type, mime_type};
pub use capture::{CaptureEngine, ResponseCapture};
pub use config::{CaptureConfig, RetentionPeriod};
pub use error::{CoreError, Result};
pub use models::{
    CapturedBody, CapturedTransaction, Headers, NewTransaction, RequestRecord, ResponseRecord,
    TransactionId, TransactionStatus, TransactionSummary,
};
pub use query::{ExportDocument, ExportedBody, ExportedTransaction, QueryEngine};
pub use redaction::{RedactionConfig, RedactionEngine, DEFAULT_REPLACEMENT};
pub use store::{InMemoryStore, TransactionFilter, TransactionStore};
pub use truncate::{truncate, ByteBudget, DEFAULT_MAX_CONTENT_LENGTH};
