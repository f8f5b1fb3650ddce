//! `multipart/*` bodies.
//!
//! Works on raw bytes so binary file parts survive intact.

use once_cell::sync::Lazy;
use regex::Regex;

use ceptor_core::binary::{self, NON_PRINTABLE_THRESHOLD};

use crate::body::{ContentKind, ParsedBody};
use crate::error::{ParseError, Result};
use crate::parser::BodyParser;

use super::{declared_mime, raw_text, truncate_chars};

const MAX_PREVIEW_CHARS: usize = 500;

static BOUNDARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)boundary\s*=\s*["']?([^"';\s]+)"#).expect("Invalid regex pattern")
});

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[;\s])name\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("Invalid regex pattern")
});

static FILENAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[;\s])filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("Invalid regex pattern")
});

/// One section of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// All section headers in order, including the ones above.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MultipartPart {
    /// Binary by declared type or by byte content.
    pub fn is_binary(&self) -> bool {
        let declared = self.content_type.as_deref().map(binary::mime_type);
        let binary_type = declared.is_some_and(|mime| {
            ["image/", "audio/", "video/"]
                .iter()
                .any(|prefix| mime.starts_with(prefix))
                || mime == "application/octet-stream"
                || mime == "application/pdf"
        });
        binary_type || binary::non_printable_ratio(&self.body) > NON_PRINTABLE_THRESHOLD
    }
}

/// Boundary parameter of a content-type header.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    BOUNDARY_REGEX
        .captures(content_type)
        .map(|caps| caps[1].to_string())
}

/// Finds a boundary in the body itself: the first `--token` line.
fn sniff_boundary(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(&body[..body.len().min(1024)]);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("--") && line.len() > 2)?;
    let token = &line[2..];
    if token.chars().any(char::is_whitespace) {
        return None;
    }
    // Must recur at least once more (next part or closing delimiter)
    let delimiter = format!("--{}", token);
    if find(body, delimiter.as_bytes(), delimiter.len()).is_some() {
        Some(token.to_string())
    } else {
        None
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn strip_line_break_prefix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_prefix(b"\r\n")
        .or_else(|| bytes.strip_prefix(b"\n"))
        .unwrap_or(bytes)
}

fn strip_line_break_suffix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

/// Splits a body into parts. Preamble and epilogue are dropped.
pub fn split_parts(body: &[u8], boundary: &str) -> Vec<MultipartPart> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let Some(mut start) = find(body, delimiter, 0) else {
        return Vec::new();
    };

    let mut parts = Vec::new();
    loop {
        let section_start = start + delimiter.len();
        if body[section_start..].starts_with(b"--") {
            break;
        }
        let end = find(body, delimiter, section_start);
        let section = &body[section_start..end.unwrap_or(body.len())];
        parts.push(parse_part(strip_line_break_suffix(strip_line_break_prefix(section))));

        match end {
            Some(next) => start = next,
            None => break,
        }
    }
    parts
}

fn parse_part(section: &[u8]) -> MultipartPart {
    let (head, body) = match find(section, b"\r\n\r\n", 0) {
        Some(pos) => (&section[..pos], &section[pos + 4..]),
        None => match find(section, b"\n\n", 0) {
            Some(pos) => (&section[..pos], &section[pos + 2..]),
            None => (section, &[][..]),
        },
    };

    let headers: Vec<(String, String)> = String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    };

    let disposition = header("content-disposition").unwrap_or("");
    MultipartPart {
        name: disposition_param(&NAME_REGEX, disposition),
        filename: disposition_param(&FILENAME_REGEX, disposition),
        content_type: header("content-type").map(str::to_string),
        headers: headers.clone(),
        body: body.to_vec(),
    }
}

fn disposition_param(regex: &Regex, disposition: &str) -> Option<String> {
    let caps = regex.captures(disposition)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn render_part(index: usize, part: &MultipartPart) -> String {
    let mut lines = vec![format!("--- Part {} ---", index + 1)];
    if let Some(name) = &part.name {
        lines.push(format!("Name: {}", name));
    }
    if let Some(filename) = &part.filename {
        lines.push(format!("Filename: {}", filename));
    }
    if let Some(content_type) = &part.content_type {
        lines.push(format!("Content-Type: {}", content_type));
    }
    for (name, value) in &part.headers {
        if name.eq_ignore_ascii_case("content-disposition")
            || name.eq_ignore_ascii_case("content-type")
        {
            continue;
        }
        lines.push(format!("{}: {}", name, value));
    }
    lines.push(String::new());

    if part.is_binary() {
        lines.push(format!("[Binary content: {} bytes]", part.body.len()));
    } else {
        let text = String::from_utf8_lossy(&part.body);
        lines.push(truncate_chars(&text, MAX_PREVIEW_CHARS));
    }
    lines.join("\n")
}

/// Multipart body parser. Requires a declared boundary to claim a body.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultipartBodyParser;

impl MultipartBodyParser {
    fn format(content_type: Option<&str>, body: &[u8]) -> Result<ParsedBody> {
        let boundary = content_type
            .and_then(extract_boundary)
            .or_else(|| sniff_boundary(body))
            .ok_or(ParseError::MissingBoundary)?;

        let parts = split_parts(body, &boundary);
        if parts.is_empty() {
            return Err(ParseError::malformed(
                "multipart",
                format!("no parts delimited by '--{}'", boundary),
            ));
        }

        let formatted = parts
            .iter()
            .enumerate()
            .map(|(i, part)| render_part(i, part))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ParsedBody::valid(formatted, ContentKind::Multipart)
            .with_meta("boundary", &boundary)
            .with_meta("part_count", parts.len())
            .with_meta(
                "file_count",
                parts.iter().filter(|p| p.filename.is_some()).count(),
            ))
    }
}

impl BodyParser for MultipartBodyParser {
    fn name(&self) -> &'static str {
        "multipart"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &[
            "multipart/form-data",
            "multipart/mixed",
            "multipart/related",
            "multipart/alternative",
        ]
    }

    fn default_content_type(&self) -> &'static str {
        "multipart/form-data"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Multipart
    }

    fn priority(&self) -> i32 {
        210
    }

    fn can_parse(&self, content_type: Option<&str>, _body: &[u8]) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        declared_mime(Some(content_type)).is_some_and(|mime| mime.starts_with("multipart/"))
            && extract_boundary(content_type).is_some()
    }

    fn parse(&self, content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        Self::format(content_type, body).unwrap_or_else(|e| {
            ParsedBody::invalid(raw_text(body), ContentKind::Multipart, e.to_string())
        })
    }
}
