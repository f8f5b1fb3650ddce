//! Format-specific body parsers.

mod form;
mod html;
mod json;
mod multipart;
mod pdf;
mod protobuf;
mod xml;

pub use form::{parse_parameters, FormBodyParser, FormParameter};
pub use html::HtmlBodyParser;
pub use json::JsonBodyParser;
pub use multipart::{extract_boundary, split_parts, MultipartBodyParser, MultipartPart};
pub use pdf::{PdfBodyParser, PdfRenderer, RenderError, ScanRenderer};
pub use protobuf::{decode_fields, looks_like_protobuf, ProtobufBodyParser, ProtobufField};
pub use xml::XmlBodyParser;

use ceptor_core::binary;

/// Bytes inspected when sniffing text formats.
const SNIFF_BYTES: usize = 512;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Strips a UTF-8 byte order mark.
pub(crate) fn strip_bom(body: &[u8]) -> &[u8] {
    body.strip_prefix(UTF8_BOM).unwrap_or(body)
}

/// Lowercased MIME type of a declared content type.
pub(crate) fn declared_mime(content_type: Option<&str>) -> Option<String> {
    content_type
        .map(binary::mime_type)
        .filter(|mime| !mime.is_empty())
}

/// Start of the body for sniffing: BOM and leading whitespace skipped,
/// lowercased, lossily decoded.
pub(crate) fn leading_text(body: &[u8]) -> String {
    let body = strip_bom(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let end = body.len().min(start + SNIFF_BYTES);
    String::from_utf8_lossy(&body[start..end]).to_lowercase()
}

/// Body as UTF-8 text, BOM stripped.
pub(crate) fn body_text(body: &[u8]) -> crate::error::Result<&str> {
    Ok(std::str::from_utf8(strip_bom(body))?)
}

/// Raw rendering used when a parse fails.
pub(crate) fn raw_text(body: &[u8]) -> String {
    String::from_utf8_lossy(strip_bom(body)).into_owned()
}

/// First `max` characters, with a `... (N chars)` suffix when cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}... ({} chars)", head, total)
}
