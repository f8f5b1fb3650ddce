//! Ceptor Parser - schema-less decoders for captured bodies.
//!
//! Stored bodies are raw bytes. This crate turns them into something a
//! person can read, choosing a decoder from the declared `Content-Type`
//! and the bytes themselves:
//!
//! ```
//! use ceptor_parser::{ContentKind, ParserRegistry};
//!
//! let registry = ParserRegistry::with_defaults();
//! let parsed = registry.dispatch(Some("application/json"), br#"{"id":1}"#);
//! assert_eq!(parsed.content_kind, ContentKind::Json);
//! assert_eq!(parsed.formatted, "{\n  \"id\": 1\n}");
//! ```
//!
//! Decoding never fails outright: a body that does not match its format is
//! returned raw with `is_valid == false`.

pub mod body;
pub mod error;
pub mod hexdump;
pub mod parser;
pub mod parsers;

pub use body::{ContentKind, ParsedBody};
pub use error::{ParseError, Result};
pub use hexdump::{hex_bytes, hex_dump, hex_preview};
pub use parser::{fallback, BodyParser, FormatParser, ParserRegistry, FALLBACK_PREVIEW_BYTES};
pub use parsers::{
    FormBodyParser, HtmlBodyParser, JsonBodyParser, MultipartBodyParser, PdfBodyParser,
    PdfRenderer, ProtobufBodyParser, RenderError, ScanRenderer, XmlBodyParser,
};
