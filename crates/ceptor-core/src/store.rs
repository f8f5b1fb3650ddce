//! Persistence seam for captured transactions.
//!
//! The capture engine writes through [`TransactionStore`]; readers go
//! through the query engine. [`InMemoryStore`] backs tests and short-lived
//! sessions, the SQLite database lives in `ceptor-storage`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::{
    CapturedTransaction, NewTransaction, ResponseRecord, TransactionId, TransactionStatus,
    TransactionSummary,
};

/// Filter for listing transactions. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionFilter {
    /// Request method, compared case-insensitively.
    pub method: Option<String>,
    /// Derived status.
    pub status: Option<TransactionStatus>,
    /// Case-insensitive substring of the request URL.
    pub search: Option<String>,
}

impl TransactionFilter {
    /// Filter matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Checks a transaction against every set field.
    pub fn matches(&self, tx: &CapturedTransaction) -> bool {
        if let Some(method) = &self.method {
            if !tx.request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if tx.status() != status {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !tx
                .request
                .url
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Storage operations the capture pipeline depends on.
///
/// Implementations must be safe to share across threads: capture hooks for
/// different transactions may call in concurrently.
pub trait TransactionStore: Send + Sync {
    /// Stores a new transaction in the `Requested` state and returns its id.
    fn insert(&self, tx: NewTransaction) -> Result<TransactionId>;

    /// Records the response if the transaction is still `Requested`.
    ///
    /// Returns `false` when the transaction was already terminal. The check
    /// and the write must be atomic.
    fn complete(
        &self,
        id: TransactionId,
        response: ResponseRecord,
        completed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Fetches one transaction.
    fn get(&self, id: TransactionId) -> Result<Option<CapturedTransaction>>;

    /// Lists summaries, newest first.
    fn list(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionSummary>>;

    /// Counts transactions matching a filter.
    fn count(&self, filter: &TransactionFilter) -> Result<u64>;

    /// Deletes every transaction started before `threshold`.
    fn delete_older_than(&self, threshold: DateTime<Utc>) -> Result<usize>;

    /// Deletes everything.
    fn clear(&self) -> Result<usize>;
}

/// Thread-safe in-memory store.
#[derive(Debug)]
pub struct InMemoryStore {
    transactions: RwLock<BTreeMap<TransactionId, CapturedTransaction>>,
    next_id: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}

impl TransactionStore for InMemoryStore {
    fn insert(&self, tx: NewTransaction) -> Result<TransactionId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = CapturedTransaction {
            id,
            request: tx.request,
            response: ResponseRecord::default(),
            started_at: tx.started_at,
            completed_at: None,
        };
        self.transactions.write().insert(id, record);
        Ok(id)
    }

    fn complete(
        &self,
        id: TransactionId,
        response: ResponseRecord,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut transactions = self.transactions.write();
        let tx = transactions.get_mut(&id).ok_or(CoreError::NotFound(id))?;
        if tx.status().is_terminal() {
            return Ok(false);
        }
        tx.response = response;
        tx.completed_at = Some(completed_at);
        Ok(true)
    }

    fn get(&self, id: TransactionId) -> Result<Option<CapturedTransaction>> {
        Ok(self.transactions.read().get(&id).cloned())
    }

    fn list(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionSummary>> {
        Ok(self
            .transactions
            .read()
            .values()
            .rev()
            .filter(|tx| filter.matches(tx))
            .skip(offset)
            .take(limit)
            .map(TransactionSummary::from)
            .collect())
    }

    fn count(&self, filter: &TransactionFilter) -> Result<u64> {
        Ok(self
            .transactions
            .read()
            .values()
            .filter(|tx| filter.matches(tx))
            .count() as u64)
    }

    fn delete_older_than(&self, threshold: DateTime<Utc>) -> Result<usize> {
        let mut transactions = self.transactions.write();
        let before = transactions.len();
        transactions.retain(|_, tx| tx.started_at >= threshold);
        Ok(before - transactions.len())
    }

    fn clear(&self) -> Result<usize> {
        let mut transactions = self.transactions.write();
        let removed = transactions.len();
        transactions.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Headers, RequestRecord};
    use chrono::Duration;

    fn new_tx(method: &str, url: &str, started_at: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            request: RequestRecord {
                method: method.to_string(),
                url: url.to_string(),
                headers: Headers::new(),
                body: None,
            },
            started_at,
        }
    }

    fn ok_response(code: u16) -> ResponseRecord {
        ResponseRecord {
            code: Some(code),
            message: Some("OK".to_string()),
            ..Default::default()
        }
    }

    // ==================== Insert/Get Tests ====================

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let a = store.insert(new_tx("GET", "https://a.test/", Utc::now())).unwrap();
        let b = store.insert(new_tx("GET", "https://b.test/", Utc::now())).unwrap();
        assert!(b > a);
        assert_eq!(store.len(), 2);

        let tx = store.get(a).unwrap().unwrap();
        assert_eq!(tx.request.url, "https://a.test/");
        assert_eq!(tx.status(), TransactionStatus::Requested);
    }

    #[test]
    fn get_missing_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get(42).unwrap().is_none());
    }

    // ==================== Complete Tests ====================

    #[test]
    fn complete_only_once() {
        let store = InMemoryStore::new();
        let id = store.insert(new_tx("GET", "https://a.test/", Utc::now())).unwrap();

        assert!(store.complete(id, ok_response(200), Utc::now()).unwrap());
        assert!(!store.complete(id, ok_response(500), Utc::now()).unwrap());

        let tx = store.get(id).unwrap().unwrap();
        assert_eq!(tx.response.code, Some(200));
        assert_eq!(tx.status(), TransactionStatus::Complete);
    }

    #[test]
    fn failed_is_terminal() {
        let store = InMemoryStore::new();
        let id = store.insert(new_tx("GET", "https://a.test/", Utc::now())).unwrap();
        let failed = ResponseRecord {
            error: Some("connection reset".to_string()),
            ..Default::default()
        };

        assert!(store.complete(id, failed, Utc::now()).unwrap());
        assert!(!store.complete(id, ok_response(200), Utc::now()).unwrap());
        assert_eq!(
            store.get(id).unwrap().unwrap().status(),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn complete_missing_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.complete(7, ok_response(200), Utc::now());
        assert!(matches!(result, Err(CoreError::NotFound(7))));
    }

    // ==================== List/Filter Tests ====================

    #[test]
    fn list_newest_first_with_paging() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .insert(new_tx("GET", &format!("https://a.test/{i}"), Utc::now()))
                .unwrap();
        }

        let page = store.list(&TransactionFilter::all(), 2, 1).unwrap();
        let urls: Vec<&str> = page.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/3", "https://a.test/2"]);
    }

    #[test]
    fn filter_by_method_status_and_search() {
        let store = InMemoryStore::new();
        let get = store.insert(new_tx("GET", "https://API.test/users", Utc::now())).unwrap();
        store.insert(new_tx("POST", "https://api.test/users", Utc::now())).unwrap();
        store.insert(new_tx("get", "https://other.test/", Utc::now())).unwrap();
        store.complete(get, ok_response(200), Utc::now()).unwrap();

        let gets = TransactionFilter::all().with_method("GET");
        assert_eq!(store.count(&gets).unwrap(), 2);

        let complete = TransactionFilter::all().with_status(TransactionStatus::Complete);
        assert_eq!(store.count(&complete).unwrap(), 1);

        let api = TransactionFilter::all().with_search("api.test");
        assert_eq!(store.count(&api).unwrap(), 2);

        let combined = gets.with_search("users");
        let found = store.list(&combined, 10, 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, get);
    }

    // ==================== Cleanup Tests ====================

    #[test]
    fn delete_older_than_keeps_newer() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert(new_tx("GET", "https://old.test/", now - Duration::hours(3))).unwrap();
        store.insert(new_tx("GET", "https://old.test/", now - Duration::hours(2))).unwrap();
        let fresh = store.insert(new_tx("GET", "https://new.test/", now)).unwrap();

        let deleted = store.delete_older_than(now - Duration::hours(1)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(fresh).unwrap().is_some());
    }

    #[test]
    fn clear_removes_everything() {
        let store = InMemoryStore::new();
        store.insert(new_tx("GET", "https://a.test/", Utc::now())).unwrap();
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.is_empty());
    }
}
