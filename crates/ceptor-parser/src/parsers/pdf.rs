//! PDF summary: version, page count, encryption and the document info
//! dictionary. Page content is never rendered.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use thiserror::Error;

use crate::body::{ContentKind, ParsedBody};
use crate::hexdump::hex_preview;
use crate::parser::BodyParser;

use super::declared_mime;

/// How far into the body the `%PDF-` header may appear.
const HEADER_SEARCH_BYTES: usize = 1024;
const PREVIEW_BYTES: usize = 256;
const MAX_STRING_BYTES: usize = 4096;

static VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)%PDF-(\d+\.\d+)").expect("Invalid regex pattern"));

static PAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)/Type\s*/Page\b").expect("Invalid regex pattern"));

static ENCRYPT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)/Encrypt\b").expect("Invalid regex pattern"));

static INFO_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)/(Title|Author|Subject|Keywords|Creator|Producer|CreationDate|ModDate)\s*([(<])")
        .expect("Invalid regex pattern")
});

/// Info dictionary keys, in display order.
const INFO_KEYS: [&str; 8] = [
    "Title",
    "Author",
    "Subject",
    "Keywords",
    "Creator",
    "Producer",
    "CreationDate",
    "ModDate",
];

// =============================================================================
// Renderer Seam
// =============================================================================

/// Errors from a [`PdfRenderer`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Document is encrypted")]
    Encrypted,

    #[error("Malformed PDF: {0}")]
    Malformed(String),
}

/// Page counting backend. The built-in [`ScanRenderer`] only scans for page
/// objects; a full PDF library can be plugged in here.
pub trait PdfRenderer: Send + Sync {
    fn page_count(&self, data: &[u8]) -> Result<usize, RenderError>;
}

/// Counts `/Type /Page` objects without building the page tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanRenderer;

impl PdfRenderer for ScanRenderer {
    fn page_count(&self, data: &[u8]) -> Result<usize, RenderError> {
        if ENCRYPT_REGEX.is_match(data) {
            return Err(RenderError::Encrypted);
        }
        match PAGE_REGEX.find_iter(data).count() {
            0 => Err(RenderError::Malformed("no page objects found".to_string())),
            n => Ok(n),
        }
    }
}

// =============================================================================
// String Decoding
// =============================================================================

/// Reads a literal string starting at the opening parenthesis.
fn literal_string(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < data.len().min(MAX_STRING_BYTES) {
        let byte = data[i];
        match byte {
            b'(' => {
                if depth > 0 {
                    out.push(byte);
                }
                depth += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(out);
                }
                out.push(byte);
            }
            b'\\' => {
                i += 1;
                let escaped = *data.get(i)?;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'0'..=b'7' => {
                        let digits = data[i..]
                            .iter()
                            .take(3)
                            .take_while(|&&b| (b'0'..=b'7').contains(&b))
                            .count();
                        let octal = std::str::from_utf8(&data[i..i + digits]).ok()?;
                        out.push(u16::from_str_radix(octal, 8).ok()? as u8);
                        i += digits - 1;
                    }
                    // Line continuation
                    b'\n' => {}
                    b'\r' => {
                        if data.get(i + 1) == Some(&b'\n') {
                            i += 1;
                        }
                    }
                    other => out.push(other),
                }
            }
            _ => out.push(byte),
        }
        i += 1;
    }
    None
}

/// Reads a hex string starting at `<`.
fn hex_string(data: &[u8]) -> Option<Vec<u8>> {
    let end = data.iter().take(MAX_STRING_BYTES).position(|&b| b == b'>')?;
    let mut digits: Vec<u8> = data[1..end]
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|&b| (b as char).to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()?;
    if digits.len() % 2 == 1 {
        digits.push(0);
    }
    Some(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

/// Text string: UTF-16 with a byte order mark, otherwise UTF-8 or Latin-1.
fn text_string(bytes: &[u8]) -> String {
    let utf16 = |bytes: &[u8], big_endian: bool| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| {
                if big_endian {
                    u16::from_be_bytes([pair[0], pair[1]])
                } else {
                    u16::from_le_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16_lossy(&units)
    };

    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return utf16(rest, true);
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return utf16(rest, false);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// `D:YYYYMMDDHHmmSS+HH'mm'` to `YYYY-MM-DDTHH:mm:SS+HH:mm`.
fn pdf_date(raw: &str) -> String {
    let value = raw.strip_prefix("D:").unwrap_or(raw);
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 14 {
        return value.to_string();
    }
    let zone = value[14..].replace('\'', ":");
    format!(
        "{}-{}-{}T{}:{}:{}{}",
        &value[0..4],
        &value[4..6],
        &value[6..8],
        &value[8..10],
        &value[10..12],
        &value[12..14],
        zone.trim_end_matches(':')
    )
}

/// Info dictionary entries; later definitions replace earlier ones.
fn info_fields(data: &[u8]) -> Vec<(&'static str, String)> {
    let mut found: Vec<Option<String>> = vec![None; INFO_KEYS.len()];

    for caps in INFO_REGEX.captures_iter(data) {
        let (Some(key), Some(open)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let rest = &data[open.start()..];
        let raw = if open.as_bytes() == b"(" {
            literal_string(rest)
        } else if rest.get(1) == Some(&b'<') {
            // Dictionary, not a hex string
            None
        } else {
            hex_string(rest)
        };
        let Some(raw) = raw else {
            continue;
        };
        if let Some(slot) = INFO_KEYS.iter().position(|k| k.as_bytes() == key.as_bytes()) {
            let text = text_string(&raw);
            let text = text.trim();
            if !text.is_empty() {
                found[slot] = Some(text.to_string());
            }
        }
    }

    INFO_KEYS
        .iter()
        .zip(found)
        .filter_map(|(key, value)| {
            let value = value?;
            let value = if key.ends_with("Date") {
                pdf_date(&value)
            } else {
                value
            };
            Some((*key, value))
        })
        .collect()
}

/// Finds `%PDF-` anywhere in the first 1 KiB, looser than `can_parse`,
/// so bodies with leading junk still decode once a PDF type is declared.
fn header_offset(body: &[u8]) -> Option<usize> {
    let window = &body[..body.len().min(HEADER_SEARCH_BYTES)];
    window.windows(5).position(|w| w == b"%PDF-")
}

// =============================================================================
// Parser
// =============================================================================

/// PDF body parser.
#[derive(Clone)]
pub struct PdfBodyParser {
    renderer: Arc<dyn PdfRenderer>,
}

impl Default for PdfBodyParser {
    fn default() -> Self {
        Self::with_renderer(Arc::new(ScanRenderer))
    }
}

impl fmt::Debug for PdfBodyParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfBodyParser").finish_non_exhaustive()
    }
}

impl PdfBodyParser {
    /// Uses a different page counting backend.
    pub fn with_renderer(renderer: Arc<dyn PdfRenderer>) -> Self {
        Self { renderer }
    }
}

impl BodyParser for PdfBodyParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &["application/pdf", "application/x-pdf"]
    }

    fn default_content_type(&self) -> &'static str {
        "application/pdf"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Pdf
    }

    fn priority(&self) -> i32 {
        150
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        body.starts_with(b"%PDF-") || declared_mime(content_type).is_some_and(|m| m.contains("pdf"))
    }

    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        let Some(offset) = header_offset(body) else {
            return ParsedBody::invalid(
                hex_preview(body, PREVIEW_BYTES),
                ContentKind::Pdf,
                "Missing %PDF- header",
            );
        };
        let data = &body[offset..];

        let version = VERSION_REGEX
            .captures(data)
            .and_then(|caps| caps.get(1))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());

        let mut lines = vec!["PDF Document".to_string()];
        let mut parsed = ParsedBody::valid("", ContentKind::Pdf).with_meta("size", body.len());

        if let Some(version) = &version {
            lines.push(format!("Version: {}", version));
            parsed = parsed.with_meta("pdf_version", version);
        }

        let encrypted = match self.renderer.page_count(data) {
            Ok(pages) => {
                lines.push(format!("Pages: {}", pages));
                parsed = parsed.with_meta("page_count", pages);
                false
            }
            Err(RenderError::Encrypted) => {
                lines.push("Encrypted: yes (content and info not readable)".to_string());
                true
            }
            Err(e) => {
                lines.push(format!("Pages: unknown ({})", e));
                parsed = parsed.with_meta("render_error", e);
                false
            }
        };
        parsed = parsed.with_meta("is_encrypted", encrypted);

        if !encrypted {
            for (key, value) in info_fields(data) {
                lines.push(format!("{}: {}", key, value));
                parsed = parsed.with_meta(key.to_lowercase(), value);
            }
        }
        lines.push(format!("Size: {} bytes", body.len()));

        parsed.formatted = lines.join("\n");
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
4 0 obj << /Type/Page /Parent 2 0 R >> endobj\n\
5 0 obj << /Title (Quarterly \\(Q1\\) Report) /Author <FEFF0041006E006E> /CreationDate (D:20240115093000+05'00') >> endobj\n\
trailer << /Root 1 0 R /Info 5 0 R >>\n%%EOF\n";

    // ==================== Scan Tests ====================

    #[test]
    fn counts_page_objects() {
        assert_eq!(ScanRenderer.page_count(SAMPLE).unwrap(), 2);
        assert!(matches!(
            ScanRenderer.page_count(b"%PDF-1.4\n%%EOF"),
            Err(RenderError::Malformed(_))
        ));
        assert!(matches!(
            ScanRenderer.page_count(b"%PDF-1.4\ntrailer << /Encrypt 9 0 R >>"),
            Err(RenderError::Encrypted)
        ));
    }

    #[test]
    fn string_decoding() {
        assert_eq!(literal_string(b"(a (nested) b)").unwrap(), b"a (nested) b");
        assert_eq!(literal_string(b"(x\\101\\n)").unwrap(), b"xA\n");
        assert!(literal_string(b"(unterminated").is_none());
        assert_eq!(hex_string(b"<48 65 6C6C6F>").unwrap(), b"Hello");
        assert_eq!(hex_string(b"<7>").unwrap(), vec![0x70]);
        assert_eq!(text_string(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]), "Hi");
        assert_eq!(text_string(&[0xE9]), "é");
    }

    #[test]
    fn date_formatting() {
        assert_eq!(pdf_date("D:20240115093000+05'00'"), "2024-01-15T09:30:00+05:00");
        assert_eq!(pdf_date("D:20240115093000Z"), "2024-01-15T09:30:00Z");
        assert_eq!(pdf_date("D:2024"), "2024");
    }

    // ==================== Parse Tests ====================

    #[test]
    fn parse_summary() {
        let parsed = PdfBodyParser::default().parse(Some("application/pdf"), SAMPLE);
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("pdf_version"), Some("1.4"));
        assert_eq!(parsed.meta("page_count"), Some("2"));
        assert_eq!(parsed.meta("is_encrypted"), Some("false"));
        assert_eq!(parsed.meta("title"), Some("Quarterly (Q1) Report"));
        assert_eq!(parsed.meta("author"), Some("Ann"));
        assert_eq!(parsed.meta("creationdate"), Some("2024-01-15T09:30:00+05:00"));
        assert!(parsed.formatted.starts_with("PDF Document\nVersion: 1.4\nPages: 2\nTitle: Quarterly (Q1) Report\nAuthor: Ann"));
    }

    #[test]
    fn later_info_wins() {
        let data = b"%PDF-1.5\n<< /Type /Page >>\n<< /Title (Old) >>\n<< /Title (New) >>";
        let parsed = PdfBodyParser::default().parse(None, data);
        assert_eq!(parsed.meta("title"), Some("New"));
    }

    #[test]
    fn encrypted_document_still_valid() {
        let data = b"%PDF-1.7\n<< /Type /Page >>\ntrailer << /Encrypt 9 0 R /Title (x) >>";
        let parsed = PdfBodyParser::default().parse(Some("application/pdf"), data);
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("is_encrypted"), Some("true"));
        assert!(parsed.meta("title").is_none());
        assert!(parsed.meta("page_count").is_none());
    }

    #[test]
    fn missing_header_is_invalid() {
        let parsed = PdfBodyParser::default().parse(Some("application/pdf"), b"not a pdf");
        assert!(!parsed.is_valid);
        assert!(parsed.formatted.starts_with("00000000  6e 6f 74"));
    }

    #[test]
    fn custom_renderer() {
        struct Fixed(usize);
        impl PdfRenderer for Fixed {
            fn page_count(&self, _data: &[u8]) -> Result<usize, RenderError> {
                Ok(self.0)
            }
        }

        let parser = PdfBodyParser::with_renderer(Arc::new(Fixed(7)));
        let parsed = parser.parse(None, b"%PDF-2.0\n");
        assert_eq!(parsed.meta("page_count"), Some("7"));
        assert_eq!(parsed.meta("pdf_version"), Some("2.0"));
    }

    #[test]
    fn detection() {
        let parser = PdfBodyParser::default();
        assert!(parser.can_parse(None, b"%PDF-1.4\n"));
        assert!(parser.can_parse(Some("application/x-pdf"), b""));
        assert!(!parser.can_parse(Some("text/plain"), b"hello"));
    }

    #[test]
    fn altered_first_byte_not_detected() {
        let parser = PdfBodyParser::default();
        assert!(parser.can_parse(None, SAMPLE));

        let mut bytes = SAMPLE.to_vec();
        bytes[0] = b'X';
        assert!(!parser.can_parse(None, &bytes));
        assert!(!parser.can_parse(Some("application/octet-stream"), &bytes));
    }

    #[test]
    fn leading_junk_parsed_when_declared() {
        let mut bytes = b"\r\n".to_vec();
        bytes.extend_from_slice(SAMPLE);

        let parser = PdfBodyParser::default();
        assert!(!parser.can_parse(None, &bytes));
        let parsed = parser.parse(Some("application/pdf"), &bytes);
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("page_count"), Some("2"));
    }
}
