//! Ceptor Storage - SQLite persistence layer.
//!
//! [`Database`] implements [`ceptor_core::TransactionStore`], so it can be
//! handed straight to the capture and query engines:
//!
//! ```no_run
//! use std::sync::Arc;
//! use ceptor_core::{CaptureConfig, CaptureEngine, Headers};
//! use ceptor_storage::Database;
//!
//! let db = Database::new().unwrap();
//! let engine = CaptureEngine::new(CaptureConfig::default(), Arc::new(db));
//! engine.start_transaction("https://example.com/", "GET", &Headers::new(), None, None);
//! ```
//!
//! Bodies are stored as blobs exactly as captured (already truncated and
//! redacted); headers are stored as JSON text.

mod connection;
mod database;
pub mod error;
pub mod repository;
mod schema;

pub use connection::{LockedConnection, SharedConnection};
pub use database::Database;
pub use error::{Result, StorageError};
pub use repository::{ConfigRepo, TransactionRepo};
pub use schema::SCHEMA_VERSION;
