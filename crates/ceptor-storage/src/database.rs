//! High-level database interface.

use std::path::PathBuf;

use ceptor_core::{
    CaptureConfig, CapturedTransaction, NewTransaction, ResponseRecord, TransactionFilter,
    TransactionId, TransactionStore, TransactionSummary,
};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::connection::SharedConnection;
use crate::repository::{ConfigRepo, TransactionRepo};

/// Settings key holding the persisted [`CaptureConfig`].
const CAPTURE_CONFIG_KEY: &str = "capture";

/// SQLite-backed transaction store.
#[derive(Clone)]
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Opens the database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Opens a database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let conn = SharedConnection::open(&path)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = SharedConnection::in_memory()?;
        Ok(Self { conn })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "ceptor", "ceptor")
            .ok_or_else(|| StorageError::Unavailable("no app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("ceptor.db"))
    }

    // === Transactions ===

    /// Store a new transaction.
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<TransactionId> {
        let conn = self.conn.lock()?;
        TransactionRepo::insert(&conn, tx)
    }

    /// Record a response. `Ok(false)` when the transaction is already
    /// terminal.
    pub fn complete_transaction(
        &self,
        id: TransactionId,
        response: &ResponseRecord,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock()?;
        if TransactionRepo::complete(&conn, id, response, completed_at)? {
            return Ok(true);
        }
        if !TransactionRepo::exists(&conn, id)? {
            return Err(StorageError::TransactionNotFound(id));
        }
        debug!("Transaction {} already terminal", id);
        Ok(false)
    }

    /// Get a transaction by ID.
    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<CapturedTransaction>> {
        let conn = self.conn.lock()?;
        TransactionRepo::get_by_id(&conn, id)
    }

    /// List summaries, newest first.
    pub fn list_transactions(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionSummary>> {
        let conn = self.conn.lock()?;
        TransactionRepo::list(&conn, filter, limit, offset)
    }

    /// Count transactions matching a filter.
    pub fn count_transactions(&self, filter: &TransactionFilter) -> Result<u64> {
        let conn = self.conn.lock()?;
        TransactionRepo::count(&conn, filter)
    }

    /// Delete transactions started before `threshold`.
    pub fn delete_transactions_before(&self, threshold: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock()?;
        TransactionRepo::delete_older_than(&conn, threshold)
    }

    /// Delete every transaction.
    pub fn clear_transactions(&self) -> Result<usize> {
        let conn = self.conn.lock()?;
        TransactionRepo::clear(&conn)
    }

    /// Reclaims space freed by deletions.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    // === Config ===

    /// Get the persisted capture configuration, if any.
    pub fn load_capture_config(&self) -> Result<Option<CaptureConfig>> {
        let conn = self.conn.lock()?;
        ConfigRepo::get_typed(&conn, CAPTURE_CONFIG_KEY)
    }

    /// Persist the capture configuration.
    pub fn save_capture_config(&self, config: &CaptureConfig) -> Result<()> {
        let conn = self.conn.lock()?;
        ConfigRepo::set(&conn, CAPTURE_CONFIG_KEY, config)
    }
}

impl TransactionStore for Database {
    fn insert(&self, tx: NewTransaction) -> ceptor_core::Result<TransactionId> {
        Ok(self.insert_transaction(&tx)?)
    }

    fn complete(
        &self,
        id: TransactionId,
        response: ResponseRecord,
        completed_at: DateTime<Utc>,
    ) -> ceptor_core::Result<bool> {
        Ok(self.complete_transaction(id, &response, completed_at)?)
    }

    fn get(&self, id: TransactionId) -> ceptor_core::Result<Option<CapturedTransaction>> {
        Ok(self.get_transaction(id)?)
    }

    fn list(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> ceptor_core::Result<Vec<TransactionSummary>> {
        Ok(self.list_transactions(filter, limit, offset)?)
    }

    fn count(&self, filter: &TransactionFilter) -> ceptor_core::Result<u64> {
        Ok(self.count_transactions(filter)?)
    }

    fn delete_older_than(&self, threshold: DateTime<Utc>) -> ceptor_core::Result<usize> {
        Ok(self.delete_transactions_before(threshold)?)
    }

    fn clear(&self) -> ceptor_core::Result<usize> {
        Ok(self.clear_transactions()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ceptor_core::{
        CaptureEngine, CoreError, Headers, QueryEngine, RedactionConfig, ResponseCapture,
        RetentionPeriod, TransactionStatus,
    };
    use chrono::Duration;

    fn engine(db: &Database, config: CaptureConfig) -> CaptureEngine {
        CaptureEngine::new(config, Arc::new(db.clone()))
    }

    #[test]
    fn test_capture_round_trip_through_sqlite() {
        let db = Database::in_memory().unwrap();
        let config = CaptureConfig {
            redaction: RedactionConfig::new()
                .redact_header("Authorization")
                .redact_json_key("password"),
            ..Default::default()
        };
        let engine = engine(&db, config);

        let headers = Headers::new()
            .with("Authorization", "Bearer abc")
            .with("Content-Type", "application/json");
        let body = br#"{"user":"a","password":"hunter2"}"#;
        let id = engine
            .start_transaction("https://api.example.com/login", "POST", &headers, Some(&body[..]), None)
            .unwrap();
        engine.complete_transaction(id, ResponseCapture::new(200, "OK").with_body("{}"));

        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Complete);
        assert_eq!(tx.request.headers.get("authorization"), Some("********"));
        let stored = tx.request.body.unwrap();
        assert_eq!(stored.as_text(), Some(r#"{"user":"a","password":"********"}"#));
        assert_eq!(tx.response.body.unwrap().bytes, b"{}");
    }

    #[test]
    fn test_complete_unknown_id() {
        let db = Database::in_memory().unwrap();
        let result = TransactionStore::complete(&db, 99, ResponseRecord::default(), Utc::now());
        assert!(matches!(result, Err(CoreError::NotFound(99))));
    }

    #[test]
    fn test_second_completion_ignored() {
        let db = Database::in_memory().unwrap();
        let engine = engine(&db, CaptureConfig::default());
        let id = engine
            .start_transaction("https://example.com/", "GET", &Headers::new(), None, None)
            .unwrap();

        engine.complete_transaction(id, ResponseCapture::failed("reset"));
        engine.complete_transaction(id, ResponseCapture::new(200, "OK"));

        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Failed);
        assert_eq!(tx.response.error.as_deref(), Some("reset"));
    }

    #[test]
    fn test_query_engine_over_sqlite() {
        let db = Database::in_memory().unwrap();
        let store: Arc<dyn TransactionStore> = Arc::new(db.clone());
        let engine = CaptureEngine::new(CaptureConfig::default(), Arc::clone(&store));
        for path in ["a", "b", "c"] {
            engine.start_transaction(
                &format!("https://example.com/{}", path),
                "GET",
                &Headers::new(),
                None,
                None,
            );
        }

        let query = QueryEngine::new(store, RetentionPeriod::OneHour);
        assert_eq!(query.count(&TransactionFilter::all()).unwrap(), 3);
        assert_eq!(query.list(&TransactionFilter::all(), 1, 0).unwrap()[0].url, "https://example.com/c");

        let removed = query.apply_retention(Utc::now() + Duration::hours(2)).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(db.count_transactions(&TransactionFilter::all()).unwrap(), 0);
    }

    #[test]
    fn test_capture_config_persisted() {
        let db = Database::in_memory().unwrap();
        assert!(db.load_capture_config().unwrap().is_none());

        let config = CaptureConfig {
            enabled: false,
            retention: RetentionPeriod::OneWeek,
            ..Default::default()
        };
        db.save_capture_config(&config).unwrap();
        assert_eq!(db.load_capture_config().unwrap(), Some(config));
    }

    #[test]
    fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ceptor.db");

        let id = {
            let db = Database::with_path(&path).unwrap();
            let engine = engine(&db, CaptureConfig::default());
            engine
                .start_transaction("https://example.com/", "GET", &Headers::new(), None, None)
                .unwrap()
        };

        let db = Database::with_path(&path).unwrap();
        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.request.url, "https://example.com/");
        db.vacuum().unwrap();
    }
}
