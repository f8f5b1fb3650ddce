//! Read-only access for display and export.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RetentionPeriod;
use crate::error::{CoreError, Result};
use crate::models::{
    CapturedBody, CapturedTransaction, Headers, TransactionId, TransactionStatus,
    TransactionSummary,
};
use crate::store::{TransactionFilter, TransactionStore};

/// Body as it appears in an export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedBody {
    /// Text content; absent for binary bodies.
    pub text: Option<String>,
    pub size: u64,
    pub captured_size: usize,
    pub is_truncated: bool,
    pub is_binary: bool,
}

impl From<&CapturedBody> for ExportedBody {
    fn from(body: &CapturedBody) -> Self {
        let text = if body.is_binary {
            None
        } else {
            Some(String::from_utf8_lossy(&body.bytes).into_owned())
        };
        Self {
            text,
            size: body.declared_size,
            captured_size: body.bytes.len(),
            is_truncated: body.is_truncated,
            is_binary: body.is_binary,
        }
    }
}

/// One transaction in an export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedTransaction {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub method: String,
    pub url: String,
    pub request_headers: Headers,
    pub request_body: Option<ExportedBody>,
    pub code: Option<u16>,
    pub message: Option<String>,
    pub response_headers: Headers,
    pub response_body: Option<ExportedBody>,
    pub protocol: Option<String>,
    pub tls_version: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl From<&CapturedTransaction> for ExportedTransaction {
    fn from(tx: &CapturedTransaction) -> Self {
        Self {
            id: tx.id,
            status: tx.status(),
            method: tx.request.method.clone(),
            url: tx.request.url.clone(),
            request_headers: tx.request.headers.clone(),
            request_body: tx.request.body.as_ref().map(ExportedBody::from),
            code: tx.response.code,
            message: tx.response.message.clone(),
            response_headers: tx.response.headers.clone(),
            response_body: tx.response.body.as_ref().map(ExportedBody::from),
            protocol: tx.response.protocol.clone(),
            tls_version: tx.response.tls_version.clone(),
            error: tx.response.error.clone(),
            started_at: tx.started_at,
            completed_at: tx.completed_at,
            duration_ms: tx.duration_ms(),
        }
    }
}

/// Export document: the fixed contract handed to external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub transactions: Vec<ExportedTransaction>,
}

/// Thin read layer over a [`TransactionStore`].
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn TransactionStore>,
    retention: RetentionPeriod,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn TransactionStore>, retention: RetentionPeriod) -> Self {
        Self { store, retention }
    }

    /// Fetches one transaction.
    pub fn get(&self, id: TransactionId) -> Result<CapturedTransaction> {
        self.store.get(id)?.ok_or(CoreError::NotFound(id))
    }

    /// One page of summaries, newest first.
    pub fn list(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionSummary>> {
        self.store.list(filter, limit, offset)
    }

    pub fn count(&self, filter: &TransactionFilter) -> Result<u64> {
        self.store.count(filter)
    }

    /// Builds an export document for every matching transaction.
    pub fn export(&self, filter: &TransactionFilter) -> Result<ExportDocument> {
        let total = usize::try_from(self.store.count(filter)?).unwrap_or(usize::MAX);
        let mut transactions = Vec::with_capacity(total);
        for summary in self.store.list(filter, total, 0)? {
            if let Some(tx) = self.store.get(summary.id)? {
                transactions.push(ExportedTransaction::from(&tx));
            }
        }
        Ok(ExportDocument {
            exported_at: Utc::now(),
            transactions,
        })
    }

    /// Export document as pretty JSON.
    pub fn export_json(&self, filter: &TransactionFilter) -> Result<String> {
        let document = self.export(filter)?;
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Deletes transactions outside the retention window.
    pub fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = self.retention.cutoff(now) else {
            return Ok(0);
        };
        let deleted = self.store.delete_older_than(cutoff)?;
        if deleted > 0 {
            info!(
                "Retention ({}) removed {} transactions",
                self.retention.as_str(),
                deleted
            );
        }
        Ok(deleted)
    }

    /// Deletes everything.
    pub fn clear(&self) -> Result<usize> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureEngine, ResponseCapture};
    use crate::config::CaptureConfig;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn setup() -> (CaptureEngine, QueryEngine) {
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::new());
        let capture = CaptureEngine::new(CaptureConfig::default(), Arc::clone(&store));
        let query = QueryEngine::new(store, RetentionPeriod::OneHour);
        (capture, query)
    }

    // ==================== Query Tests ====================

    #[test]
    fn get_missing_is_not_found() {
        let (_, query) = setup();
        assert!(matches!(query.get(5), Err(CoreError::NotFound(5))));
    }

    #[test]
    fn list_and_count() {
        let (capture, query) = setup();
        let id = capture
            .start_transaction("https://a.test/x", "GET", &Headers::new(), None, None)
            .unwrap();
        capture.start_transaction("https://b.test/y", "POST", &Headers::new(), None, None);
        capture.complete_transaction(id, ResponseCapture::new(204, "No Content"));

        assert_eq!(query.count(&TransactionFilter::all()).unwrap(), 2);
        let complete = query
            .list(
                &TransactionFilter::all().with_status(TransactionStatus::Complete),
                10,
                0,
            )
            .unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].code, Some(204));
    }

    // ==================== Export Tests ====================

    #[test]
    fn export_json_contract() {
        let (capture, query) = setup();
        let id = capture
            .start_transaction(
                "https://a.test/upload",
                "POST",
                &Headers::new(),
                Some(b"\x89PNG\r\n\x1a\n"),
                None,
            )
            .unwrap();
        capture.complete_transaction(
            id,
            ResponseCapture::new(200, "OK").with_body(b"done".to_vec()),
        );

        let json = query.export_json(&TransactionFilter::all()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let tx = &value["transactions"][0];
        assert_eq!(tx["status"], "complete");
        assert_eq!(tx["method"], "POST");
        assert_eq!(tx["request_body"]["is_binary"], true);
        assert!(tx["request_body"]["text"].is_null());
        assert_eq!(tx["response_body"]["text"], "done");
    }

    // ==================== Retention Tests ====================

    #[test]
    fn retention_uses_configured_period() {
        let (capture, query) = setup();
        capture.start_transaction("https://a.test/", "GET", &Headers::new(), None, None);

        assert_eq!(query.apply_retention(Utc::now()).unwrap(), 0);
        assert_eq!(
            query.apply_retention(Utc::now() + Duration::hours(2)).unwrap(),
            1
        );
        assert_eq!(query.count(&TransactionFilter::all()).unwrap(), 0);
    }
}
