//! Per-transaction capture lifecycle.
//!
//! `Requested -> Complete | Failed`. Every public entry point here is called
//! from inside a transport hook, so nothing is allowed to escape: failures
//! are logged and the hook carries on.

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::binary;
use crate::config::CaptureConfig;
use crate::models::{
    CapturedBody, Headers, NewTransaction, RequestRecord, ResponseRecord, TransactionId,
};
use crate::redaction::RedactionEngine;
use crate::store::TransactionStore;
use crate::truncate::{truncate, ByteBudget};

/// Response data handed over by the transport when a call finishes.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Size reported by the transport; defaults to the body length.
    pub body_size: Option<u64>,
    pub protocol: Option<String>,
    pub tls_version: Option<String>,
    /// Transport failure. When set, everything except the message is dropped.
    pub error: Option<String>,
}

impl ResponseCapture {
    /// A successful response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// A transport failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_body_size(mut self, size: u64) -> Self {
        self.body_size = Some(size);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_tls_version(mut self, tls_version: impl Into<String>) -> Self {
        self.tls_version = Some(tls_version.into());
        self
    }
}

/// Orchestrates truncation, redaction, and persistence of transactions.
///
/// Construct one per session and pass it to whatever installs the transport
/// hook. Calls for different transactions may run concurrently; the store
/// is the only shared state.
pub struct CaptureEngine {
    config: CaptureConfig,
    redactor: RedactionEngine,
    store: Arc<dyn TransactionStore>,
}

impl CaptureEngine {
    /// Creates an engine. Redaction patterns are compiled here.
    pub fn new(config: CaptureConfig, store: Arc<dyn TransactionStore>) -> Self {
        let redactor = RedactionEngine::new(&config.redaction);
        Self {
            config,
            redactor,
            store,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn TransactionStore> {
        Arc::clone(&self.store)
    }

    /// Records the request half of a transaction.
    ///
    /// Returns `None` when capture is disabled or the store fails; the
    /// caller's request proceeds either way.
    pub fn start_transaction(
        &self,
        url: &str,
        method: &str,
        headers: &Headers,
        body: Option<&[u8]>,
        body_size: Option<u64>,
    ) -> Option<TransactionId> {
        if !self.config.enabled {
            return None;
        }

        let body = body.map(|bytes| {
            self.capture_body(
                headers.content_type(),
                bytes,
                body_size,
                self.config.max_request_body_bytes,
            )
        });

        let tx = NewTransaction {
            request: RequestRecord {
                method: method.to_string(),
                url: url.to_string(),
                headers: self.redactor.redact_headers(headers),
                body,
            },
            started_at: Utc::now(),
        };

        match self.store.insert(tx) {
            Ok(id) => {
                debug!("Captured request {} {} as transaction {}", method, url, id);
                Some(id)
            }
            Err(e) => {
                warn!("Failed to record request {} {}: {}", method, url, e);
                None
            }
        }
    }

    /// Like [`CaptureEngine::start_transaction`], draining the body from a
    /// reader. Only the configured prefix is kept; the full length is
    /// recorded as the declared size.
    pub fn start_transaction_streaming<R: Read>(
        &self,
        url: &str,
        method: &str,
        headers: &Headers,
        reader: &mut R,
    ) -> Option<TransactionId> {
        if !self.config.enabled {
            return None;
        }
        let (bytes, total) = drain(reader, self.config.max_request_body_bytes);
        self.start_transaction(url, method, headers, Some(&bytes), Some(total))
    }

    /// Records the response half. A transaction that is already `Complete`
    /// or `Failed` is left untouched.
    ///
    /// A response with neither a status code nor an error is rejected so the
    /// transaction stays `Requested` with no completion time.
    pub fn complete_transaction(&self, id: TransactionId, response: ResponseCapture) {
        if !self.config.enabled {
            return;
        }
        if response.code.is_none() && response.error.is_none() {
            warn!("Ignoring completion of transaction {} without status code or error", id);
            return;
        }

        let record = match response.error {
            Some(error) => ResponseRecord {
                error: Some(error),
                ..Default::default()
            },
            None => {
                let body = response.body.as_deref().map(|bytes| {
                    self.capture_body(
                        response.headers.content_type(),
                        bytes,
                        response.body_size,
                        self.config.max_response_body_bytes,
                    )
                });
                ResponseRecord {
                    code: response.code,
                    message: response.message,
                    headers: self.redactor.redact_headers(&response.headers),
                    body,
                    protocol: response.protocol,
                    tls_version: response.tls_version,
                    error: None,
                }
            }
        };

        match self.store.complete(id, record, Utc::now()) {
            Ok(true) => debug!("Completed transaction {}", id),
            Ok(false) => debug!("Transaction {} already terminal, ignoring completion", id),
            Err(e) => warn!("Failed to complete transaction {}: {}", id, e),
        }
    }

    /// Like [`CaptureEngine::complete_transaction`], draining the response
    /// body from a reader. Any body already set on `response` is replaced.
    pub fn complete_transaction_streaming<R: Read>(
        &self,
        id: TransactionId,
        mut response: ResponseCapture,
        reader: &mut R,
    ) {
        if !self.config.enabled {
            return;
        }
        if response.error.is_none() {
            let (bytes, total) = drain(reader, self.config.max_response_body_bytes);
            response.body = Some(bytes);
            response.body_size = Some(total);
        }
        self.complete_transaction(id, response);
    }

    /// Deletes transactions started before `threshold`. Returns how many
    /// were removed (0 on failure).
    pub fn cleanup(&self, threshold: DateTime<Utc>) -> usize {
        match self.store.delete_older_than(threshold) {
            Ok(deleted) => {
                debug!("Cleanup removed {} transactions older than {}", deleted, threshold);
                deleted
            }
            Err(e) => {
                warn!("Cleanup failed: {}", e);
                0
            }
        }
    }

    /// Applies the configured retention period relative to `now`.
    pub fn apply_retention(&self, now: DateTime<Utc>) -> usize {
        match self.config.retention.cutoff(now) {
            Some(threshold) => self.cleanup(threshold),
            None => 0,
        }
    }

    /// Truncates, classifies, and (for text) redacts a body.
    fn capture_body(
        &self,
        content_type: Option<&str>,
        bytes: &[u8],
        declared_size: Option<u64>,
        max_length: i64,
    ) -> CapturedBody {
        let kept = truncate(bytes, max_length);
        let declared_size = declared_size.unwrap_or(bytes.len() as u64);
        let is_truncated = declared_size > kept.len() as u64 || bytes.len() > kept.len();

        let text = if binary::is_binary(content_type, kept) {
            None
        } else {
            utf8_text(kept)
        };

        match text {
            Some(text) => CapturedBody {
                bytes: self.redactor.redact_body(text).into_bytes(),
                declared_size,
                is_truncated,
                is_binary: false,
            },
            None => CapturedBody {
                bytes: kept.to_vec(),
                declared_size,
                is_truncated,
                is_binary: true,
            },
        }
    }
}

/// The bytes as UTF-8, tolerating one incomplete character at the end
/// (left behind by truncation), which is dropped.
fn utf8_text(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

fn drain<R: Read>(reader: &mut R, max_length: i64) -> (Vec<u8>, u64) {
    let mut budget = ByteBudget::with_max_size(usize::try_from(max_length.max(0)).unwrap_or(0));
    if let Err(e) = budget.read_from(reader) {
        warn!("Body stream failed after {} bytes: {}", budget.total_seen(), e);
    }
    let total = budget.total_seen();
    (budget.into_content(), total)
}
