//! Parser output.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Format tag attached to every parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Json,
    Xml,
    Html,
    FormData,
    Multipart,
    Protobuf,
    Pdf,
    Text,
    Binary,
    Unknown,
}

impl ContentKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Json => "json",
            ContentKind::Xml => "xml",
            ContentKind::Html => "html",
            ContentKind::FormData => "form_data",
            ContentKind::Multipart => "multipart",
            ContentKind::Protobuf => "protobuf",
            ContentKind::Pdf => "pdf",
            ContentKind::Text => "text",
            ContentKind::Binary => "binary",
            ContentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A body decoded for display.
///
/// Always recomputed from the stored bytes, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedBody {
    /// Human-readable rendering.
    pub formatted: String,
    pub content_kind: ContentKind,
    /// Format-specific facts (field count, boundary, page count, ...).
    pub metadata: BTreeMap<String, String>,
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl ParsedBody {
    /// A successful parse.
    pub fn valid(formatted: impl Into<String>, content_kind: ContentKind) -> Self {
        Self {
            formatted: formatted.into(),
            content_kind,
            metadata: BTreeMap::new(),
            is_valid: true,
            error_message: None,
        }
    }

    /// A failed parse. `raw` is shown to the user in place of a rendering.
    pub fn invalid(
        raw: impl Into<String>,
        content_kind: ContentKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            formatted: raw.into(),
            content_kind,
            metadata: BTreeMap::new(),
            is_valid: false,
            error_message: Some(error.into()),
        }
    }

    /// Adds a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Looks up a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
