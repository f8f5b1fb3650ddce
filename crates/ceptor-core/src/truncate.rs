//! Byte budgets for captured bodies.
//!
//! Every body passes through here before anything else touches it. The
//! captured bytes are always a prefix of the original; nothing is re-encoded.

use std::io::{self, Read};

/// Default cap for a captured request or response body.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 250_000;

/// Returns at most `max_length` leading bytes of `bytes`.
///
/// A non-positive limit yields an empty slice.
pub fn truncate(bytes: &[u8], max_length: i64) -> &[u8] {
    if max_length <= 0 {
        return &[];
    }
    let limit = usize::try_from(max_length).unwrap_or(usize::MAX);
    if bytes.len() > limit {
        &bytes[..limit]
    } else {
        bytes
    }
}

/// Accumulator that keeps the first `max_size` bytes of a stream while
/// counting everything it was offered.
#[derive(Debug, Clone)]
pub struct ByteBudget {
    buffer: Vec<u8>,
    max_size: usize,
    total_seen: u64,
}

impl Default for ByteBudget {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBudget {
    /// Creates a budget with the default cap.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_CONTENT_LENGTH)
    }

    /// Creates a budget with a custom cap.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
            total_seen: 0,
        }
    }

    /// Appends a chunk. Returns `false` once the budget is exhausted and
    /// part of the chunk had to be dropped.
    pub fn append(&mut self, chunk: &[u8]) -> bool {
        self.total_seen += chunk.len() as u64;
        let remaining = self.max_size.saturating_sub(self.buffer.len());
        if chunk.len() > remaining {
            self.buffer.extend_from_slice(&chunk[..remaining]);
            false
        } else {
            self.buffer.extend_from_slice(chunk);
            true
        }
    }

    /// Drains a reader to the end, keeping only what fits in the budget.
    ///
    /// Returns the total number of bytes read.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<u64> {
        let mut chunk = [0u8; 8192];
        let start = self.total_seen;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.append(&chunk[..n]);
        }
        Ok(self.total_seen - start)
    }

    /// Returns the captured prefix.
    pub fn content(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the budget, returning the captured prefix.
    pub fn into_content(self) -> Vec<u8> {
        self.buffer
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Checks if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes offered, captured or not.
    pub fn total_seen(&self) -> u64 {
        self.total_seen
    }

    /// Whether any bytes were dropped.
    pub fn is_truncated(&self) -> bool {
        self.total_seen > self.buffer.len() as u64
    }
}
