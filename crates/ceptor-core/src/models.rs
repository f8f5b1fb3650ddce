//! Captured transaction data model.
//!
//! These structs are also the serializable contract handed to external
//! consumers (exporters, inspectors); nothing downstream reaches into the
//! capture engine by any other route.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque transaction identifier. Identifiers increase with creation order.
pub type TransactionId = i64;

/// Ordered multimap of header name to values.
///
/// Names keep their original spelling and first-seen position; lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, grouping it under an existing entry of the same
    /// (exact) name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Builder-style [`Headers::append`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// All values of the first entry matching `name` case-insensitively.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The `Content-Type` header value, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Mutable access to each entry's values, in order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<String>)> {
        self.entries
            .iter_mut()
            .map(|(n, v)| (n.as_str(), v))
    }

    /// Number of distinct header entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Request captured, no response yet.
    Requested,
    /// Response captured.
    Complete,
    /// Transport reported an error.
    Failed,
}

impl TransactionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Requested => "requested",
            TransactionStatus::Complete => "complete",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(TransactionStatus::Requested),
            "complete" => Some(TransactionStatus::Complete),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Whether no further mutation is allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Requested)
    }
}

/// A captured body after truncation and redaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedBody {
    /// Stored bytes (a prefix of the original, redacted if text).
    pub bytes: Vec<u8>,
    /// Body size declared by the transport (may exceed `bytes.len()`).
    pub declared_size: u64,
    /// Whether bytes were dropped by the byte budget.
    pub is_truncated: bool,
    /// Whether the body was classified as binary.
    pub is_binary: bool,
}

impl CapturedBody {
    /// Stored bytes as text, if they are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Checks if no bytes were stored.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Request half of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<CapturedBody>,
}

/// Response half of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub headers: Headers,
    pub body: Option<CapturedBody>,
    pub protocol: Option<String>,
    pub tls_version: Option<String>,
    pub error: Option<String>,
}

/// A persisted HTTP transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedTransaction {
    pub id: TransactionId,
    pub request: RequestRecord,
    pub response: ResponseRecord,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CapturedTransaction {
    /// Derived status: `Failed` if an error is set, `Requested` if there is
    /// no response code yet, `Complete` otherwise.
    pub fn status(&self) -> TransactionStatus {
        if self.response.error.is_some() {
            TransactionStatus::Failed
        } else if self.response.code.is_none() {
            TransactionStatus::Requested
        } else {
            TransactionStatus::Complete
        }
    }

    /// Request duration in milliseconds, once completed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }

    /// Host part of the request URL.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.request.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Path (and query) part of the request URL.
    pub fn path(&self) -> String {
        match url::Url::parse(&self.request.url) {
            Ok(u) => match u.query() {
                Some(q) => format!("{}?{}", u.path(), q),
                None => u.path().to_string(),
            },
            Err(_) => self.request.url.clone(),
        }
    }
}

/// Parameters for inserting a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub request: RequestRecord,
    pub started_at: DateTime<Utc>,
}

/// Summary row for list views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub method: String,
    pub url: String,
    pub code: Option<u16>,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub response_size: Option<u64>,
}

impl From<&CapturedTransaction> for TransactionSummary {
    fn from(tx: &CapturedTransaction) -> Self {
        Self {
            id: tx.id,
            method: tx.request.method.clone(),
            url: tx.request.url.clone(),
            code: tx.response.code,
            status: tx.status(),
            started_at: tx.started_at,
            duration_ms: tx.duration_ms(),
            response_size: tx.response.body.as_ref().map(|b| b.declared_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(url: &str) -> CapturedTransaction {
        CapturedTransaction {
            id: 1,
            request: RequestRecord {
                method: "GET".to_string(),
                url: url.to_string(),
                headers: Headers::new(),
                body: None,
            },
            response: ResponseRecord::default(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    // ==================== Headers Tests ====================

    #[test]
    fn headers_group_values_and_keep_order() {
        let headers = Headers::new()
            .with("Accept", "text/html")
            .with("Set-Cookie", "a=1")
            .with("Set-Cookie", "b=2");

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Accept", "Set-Cookie"]);
        assert_eq!(headers.get_all("set-cookie").unwrap(), ["a=1", "b=2"]);
    }

    #[test]
    fn headers_lookup_is_case_insensitive() {
        let headers: Headers = vec![("Content-Type", "application/json")]
            .into_iter()
            .collect();
        assert_eq!(headers.content_type(), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.get("accept").is_none());
    }

    #[test]
    fn headers_serialize_as_list() {
        let headers = Headers::new().with("X-A", "1");
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"[["X-A",["1"]]]"#);
    }

    // ==================== Status Tests ====================

    #[test]
    fn status_is_derived_from_response() {
        let mut tx = transaction("https://example.com/");
        assert_eq!(tx.status(), TransactionStatus::Requested);

        tx.response.code = Some(200);
        assert_eq!(tx.status(), TransactionStatus::Complete);

        tx.response.error = Some("timeout".to_string());
        assert_eq!(tx.status(), TransactionStatus::Failed);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TransactionStatus::Requested,
            TransactionStatus::Complete,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Requested.is_terminal());
    }

    // ==================== URL Tests ====================

    #[test]
    fn host_and_path_from_url() {
        let tx = transaction("https://api.example.com/v1/users?page=2");
        assert_eq!(tx.host().as_deref(), Some("api.example.com"));
        assert_eq!(tx.path(), "/v1/users?page=2");
    }

    #[test]
    fn path_of_unparseable_url_is_raw() {
        let tx = transaction("not a url");
        assert!(tx.host().is_none());
        assert_eq!(tx.path(), "not a url");
    }
}
