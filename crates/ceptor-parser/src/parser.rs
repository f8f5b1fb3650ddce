//! Parser trait, the closed set of built-in parsers, and the dispatcher.

use std::panic::{self, AssertUnwindSafe};

use ceptor_core::binary;
use tracing::{debug, error};

use crate::body::{ContentKind, ParsedBody};
use crate::hexdump::hex_preview;
use crate::parsers::{
    FormBodyParser, HtmlBodyParser, JsonBodyParser, MultipartBodyParser, PdfBodyParser,
    ProtobufBodyParser, XmlBodyParser,
};

/// Bytes shown in the hex preview of an unrecognised binary body.
pub const FALLBACK_PREVIEW_BYTES: usize = 256;

// =============================================================================
// Parser Trait
// =============================================================================

/// A format decoder.
///
/// `can_parse` and `parse` must never panic on any input; the dispatcher
/// contains panics anyway.
pub trait BodyParser: Send + Sync {
    /// Returns the parser name.
    fn name(&self) -> &'static str;

    /// MIME types this parser claims by exact header match.
    fn supported_content_types(&self) -> &'static [&'static str];

    /// MIME type assumed when none was declared.
    fn default_content_type(&self) -> &'static str;

    /// Kind tag of results produced by this parser.
    fn content_kind(&self) -> ContentKind;

    /// Returns the priority (higher wins among equal header matches).
    fn priority(&self) -> i32;

    /// Cheap check whether this parser understands the body.
    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool;

    /// Decodes the body. Failures come back as an invalid [`ParsedBody`].
    fn parse(&self, content_type: Option<&str>, body: &[u8]) -> ParsedBody;

    /// Whether the declared MIME type is one this parser lists.
    fn matches_header(&self, content_type: Option<&str>) -> bool {
        content_type
            .map(binary::mime_type)
            .is_some_and(|mime| self.supported_content_types().contains(&mime.as_str()))
    }
}

// =============================================================================
// Built-in Parser Set
// =============================================================================

/// Every parser the dispatcher knows about.
#[derive(Debug, Clone)]
pub enum FormatParser {
    Json(JsonBodyParser),
    Xml(XmlBodyParser),
    Html(HtmlBodyParser),
    Form(FormBodyParser),
    Multipart(MultipartBodyParser),
    Protobuf(ProtobufBodyParser),
    Pdf(PdfBodyParser),
}

impl FormatParser {
    fn inner(&self) -> &dyn BodyParser {
        match self {
            FormatParser::Json(p) => p,
            FormatParser::Xml(p) => p,
            FormatParser::Html(p) => p,
            FormatParser::Form(p) => p,
            FormatParser::Multipart(p) => p,
            FormatParser::Protobuf(p) => p,
            FormatParser::Pdf(p) => p,
        }
    }
}

impl BodyParser for FormatParser {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        self.inner().supported_content_types()
    }

    fn default_content_type(&self) -> &'static str {
        self.inner().default_content_type()
    }

    fn content_kind(&self) -> ContentKind {
        self.inner().content_kind()
    }

    fn priority(&self) -> i32 {
        self.inner().priority()
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        self.inner().can_parse(content_type, body)
    }

    fn parse(&self, content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        self.inner().parse(content_type, body)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered parser set with a pure selection function.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: Vec<FormatParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ParserRegistry {
    /// Creates an empty registry. Everything falls through to raw display.
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Creates a registry with all built-in parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FormatParser::Json(JsonBodyParser));
        registry.register(FormatParser::Xml(XmlBodyParser));
        registry.register(FormatParser::Html(HtmlBodyParser::default()));
        registry.register(FormatParser::Form(FormBodyParser));
        registry.register(FormatParser::Multipart(MultipartBodyParser));
        // Ahead of protobuf at equal priority: a magic-byte match beats a
        // wire-format guess
        registry.register(FormatParser::Pdf(PdfBodyParser::default()));
        registry.register(FormatParser::Protobuf(ProtobufBodyParser));
        registry
    }

    /// Registers a parser, replacing any parser with the same name.
    pub fn register(&mut self, parser: FormatParser) {
        self.parsers.retain(|p| p.name() != parser.name());
        self.parsers.push(parser);
        // Stable sort: registration order breaks priority ties
        self.parsers
            .sort_by_key(|p| std::cmp::Reverse(p.priority()));
    }

    /// Registered parsers, highest priority first.
    pub fn parsers(&self) -> &[FormatParser] {
        &self.parsers
    }

    /// Picks the parser for a body: an exact header match beats a sniffed
    /// match, then higher priority wins.
    pub fn select(&self, content_type: Option<&str>, body: &[u8]) -> Option<&FormatParser> {
        let candidates: Vec<&FormatParser> = self
            .parsers
            .iter()
            .filter(|p| contained(p.name(), false, || p.can_parse(content_type, body)))
            .collect();

        candidates
            .iter()
            .find(|p| p.matches_header(content_type))
            .or_else(|| candidates.first())
            .copied()
    }

    /// Decodes a body for display. Never fails: unknown formats fall back to
    /// raw text or a binary placeholder.
    pub fn dispatch(&self, content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        if body.is_empty() {
            return ParsedBody::valid("", ContentKind::Unknown).with_meta("size", 0);
        }

        let Some(parser) = self.select(content_type, body) else {
            return fallback(content_type, body);
        };

        debug!("Dispatching {} byte body to {} parser", body.len(), parser.name());
        match panic::catch_unwind(AssertUnwindSafe(|| parser.parse(content_type, body))) {
            Ok(parsed) => parsed,
            Err(_) => {
                error!("{} parser panicked on {} byte body", parser.name(), body.len());
                ParsedBody::invalid(
                    String::from_utf8_lossy(body).into_owned(),
                    parser.content_kind(),
                    format!("{} parser failed unexpectedly", parser.name()),
                )
            }
        }
    }
}

/// Runs a predicate, treating a panic as `default`.
fn contained(name: &str, default: bool, f: impl FnOnce() -> bool) -> bool {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("{} parser panicked in can_parse", name);
        default
    })
}

/// Display for bodies no parser claimed.
pub fn fallback(content_type: Option<&str>, body: &[u8]) -> ParsedBody {
    if body.is_empty() {
        return ParsedBody::valid("", ContentKind::Unknown).with_meta("size", 0);
    }

    if binary::is_binary(content_type, body) {
        let formatted = format!(
            "[Binary content: {} bytes]\n\n{}",
            body.len(),
            hex_preview(body, FALLBACK_PREVIEW_BYTES)
        );
        return ParsedBody::valid(formatted, ContentKind::Binary).with_meta("size", body.len());
    }

    ParsedBody::valid(String::from_utf8_lossy(body), ContentKind::Text)
        .with_meta("size", body.len())
}
