//! Schema-less protobuf decoder.
//!
//! Without a `.proto` file only the wire format is known, so every value is
//! shown with the interpretations its wire type allows. Length-delimited
//! fields are tried as text, then as an embedded message, then shown as hex.

use crate::body::{ContentKind, ParsedBody};
use crate::error::{ParseError, Result};
use crate::hexdump::{hex_bytes, hex_dump, hex_preview};
use crate::parser::BodyParser;

use super::{declared_mime, truncate_chars};

/// Largest legal field number.
pub const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;

const MAX_VARINT_BYTES: usize = 10;
const MAX_NESTING: usize = 8;
const STRING_PREVIEW_CHARS: usize = 100;
const BYTES_PREVIEW: usize = 32;
const SNIFF_TAGS: usize = 5;
const GRPC_HEADER_LEN: usize = 5;
const GRPC_PREVIEW_BYTES: usize = 256;

/// One decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtobufField {
    pub field_number: u64,
    pub wire_type: u8,
    pub wire_type_name: &'static str,
    /// Display text for the value.
    pub value: String,
    /// Fields of an embedded message, when the value decoded as one.
    pub nested: Vec<ProtobufField>,
}

fn wire_type_name(wire_type: u8) -> &'static str {
    match wire_type {
        0 => "varint",
        1 => "fixed64",
        2 => "length-delimited",
        3 => "start-group",
        4 => "end-group",
        5 => "fixed32",
        _ => "invalid",
    }
}

// =============================================================================
// Wire Reader
// =============================================================================

struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(ParseError::Truncated(self.pos))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ParseError::VarintOverflow(start))
    }

    /// Reads a field key, returning `(field_number, wire_type)`.
    fn read_tag(&mut self) -> Result<(u64, u8)> {
        let offset = self.pos;
        let key = self.read_varint()?;
        let wire_type = (key & 0x07) as u8;
        let number = key >> 3;

        if wire_type > 5 {
            return Err(ParseError::InvalidWireType { wire_type, offset });
        }
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(ParseError::InvalidFieldNumber { number, offset });
        }
        Ok((number, wire_type))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ParseError::Truncated(self.data.len()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_length_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| ParseError::Truncated(self.data.len()))?;
        self.take(len)
    }
}

/// Cheap structural check: the first few keys and values are well formed.
pub fn looks_like_protobuf(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    let mut reader = WireReader::new(data);
    let mut groups = 0usize;

    for _ in 0..SNIFF_TAGS {
        if reader.is_empty() {
            break;
        }
        let Ok((_, wire_type)) = reader.read_tag() else {
            return false;
        };
        let skipped = match wire_type {
            0 => reader.read_varint().map(drop),
            1 => reader.take(8).map(drop),
            2 => reader.take_length_delimited().map(drop),
            5 => reader.take(4).map(drop),
            3 => {
                groups += 1;
                Ok(())
            }
            _ => {
                if groups == 0 {
                    return false;
                }
                groups -= 1;
                Ok(())
            }
        };
        if skipped.is_err() {
            return false;
        }
    }
    true
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes every field of a message.
pub fn decode_fields(data: &[u8]) -> Result<Vec<ProtobufField>> {
    decode_message(data, 0)
}

fn decode_message(data: &[u8], depth: usize) -> Result<Vec<ProtobufField>> {
    let mut reader = WireReader::new(data);
    let mut fields = Vec::new();
    let mut open_groups: Vec<u64> = Vec::new();

    while !reader.is_empty() {
        let offset = reader.pos;
        let (field_number, wire_type) = reader.read_tag()?;
        let mut nested = Vec::new();

        let value = match wire_type {
            0 => describe_varint(reader.read_varint()?),
            1 => {
                let bytes = reader.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                describe_fixed64(u64::from_le_bytes(raw))
            }
            5 => {
                let bytes = reader.take(4)?;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                describe_fixed32(u32::from_le_bytes(raw))
            }
            2 => {
                let bytes = reader.take_length_delimited()?;
                let (value, fields) = describe_length_delimited(bytes, depth);
                nested = fields;
                value
            }
            3 => {
                open_groups.push(field_number);
                "group start".to_string()
            }
            _ => {
                if open_groups.pop() != Some(field_number) {
                    return Err(ParseError::malformed(
                        "protobuf",
                        format!("unbalanced end-group for field {} at offset {}", field_number, offset),
                    ));
                }
                "group end".to_string()
            }
        };

        fields.push(ProtobufField {
            field_number,
            wire_type,
            wire_type_name: wire_type_name(wire_type),
            value,
            nested,
        });
    }

    if let Some(field) = open_groups.last() {
        return Err(ParseError::malformed(
            "protobuf",
            format!("group for field {} is never closed", field),
        ));
    }
    Ok(fields)
}

fn describe_varint(value: u64) -> String {
    let mut out = value.to_string();
    let zigzag = ((value >> 1) as i64) ^ -((value & 1) as i64);
    if zigzag != 0 && zigzag as u64 != value {
        out.push_str(&format!(" (sint: {})", zigzag));
    }
    let signed = value as i64;
    if signed < 0 {
        out.push_str(&format!(" (int64: {})", signed));
    }
    out
}

fn describe_fixed64(value: u64) -> String {
    let mut out = format!("0x{:016x} (int: {}", value, value as i64);
    let double = f64::from_bits(value);
    if double.is_finite() {
        out.push_str(&format!(", double: {}", double));
    }
    out.push(')');
    out
}

fn describe_fixed32(value: u32) -> String {
    let mut out = format!("0x{:08x} (int: {}", value, value as i32);
    let float = f32::from_bits(value);
    if float.is_finite() {
        out.push_str(&format!(", float: {}", float));
    }
    out.push(')');
    out
}

fn printable_text(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes)
        .ok()
        .filter(|s| s.chars().all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t')))
}

fn describe_length_delimited(bytes: &[u8], depth: usize) -> (String, Vec<ProtobufField>) {
    if let Some(text) = printable_text(bytes) {
        return (format!("\"{}\"", truncate_chars(text, STRING_PREVIEW_CHARS)), Vec::new());
    }

    if depth < MAX_NESTING {
        if let Ok(fields) = decode_message(bytes, depth + 1) {
            return (format!("message ({} bytes)", bytes.len()), fields);
        }
    }

    let shown = &bytes[..bytes.len().min(BYTES_PREVIEW)];
    let mut value = format!("bytes[{}]: {}", bytes.len(), hex_bytes(shown));
    if bytes.len() > BYTES_PREVIEW {
        value.push_str(" ...");
    }
    (value, Vec::new())
}

fn render_fields(fields: &[ProtobufField], depth: usize, out: &mut Vec<String>) {
    for field in fields {
        out.push(format!(
            "{}{} [{}]: {}",
            "  ".repeat(depth),
            field.field_number,
            field.wire_type_name,
            field.value
        ));
        render_fields(&field.nested, depth + 1, out);
    }
}

fn render(fields: &[ProtobufField]) -> String {
    if fields.is_empty() {
        return "(empty message)".to_string();
    }
    let mut lines = Vec::new();
    render_fields(fields, 0, &mut lines);
    lines.join("\n")
}

// =============================================================================
// gRPC Framing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GrpcFrame<'a> {
    flags: u8,
    payload: &'a [u8],
}

impl GrpcFrame<'_> {
    fn is_compressed(&self) -> bool {
        self.flags & 0x01 != 0
    }

    fn is_trailer(&self) -> bool {
        self.flags & 0x80 != 0
    }
}

/// Splits a body into length-prefixed gRPC frames. `None` when the body is
/// not cleanly framed.
fn grpc_frames(body: &[u8]) -> Option<Vec<GrpcFrame<'_>>> {
    let mut frames = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < GRPC_HEADER_LEN || rest[0] & !0x81 != 0 {
            return None;
        }
        let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
        let payload = rest.get(GRPC_HEADER_LEN..GRPC_HEADER_LEN.checked_add(len)?)?;
        frames.push(GrpcFrame {
            flags: rest[0],
            payload,
        });
        rest = &rest[GRPC_HEADER_LEN + len..];
    }
    (!frames.is_empty()).then_some(frames)
}

fn is_grpc(content_type: Option<&str>) -> bool {
    declared_mime(content_type).is_some_and(|mime| mime.starts_with("application/grpc"))
}

/// Protobuf and gRPC body parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufBodyParser;

impl ProtobufBodyParser {
    fn parse_message(body: &[u8]) -> ParsedBody {
        match decode_fields(body) {
            Ok(fields) => ParsedBody::valid(render(&fields), ContentKind::Protobuf)
                .with_meta("field_count", fields.len()),
            Err(e) => ParsedBody::invalid(hex_dump(body), ContentKind::Protobuf, e.to_string()),
        }
    }

    fn parse_grpc(frames: &[GrpcFrame<'_>]) -> ParsedBody {
        let mut sections = Vec::with_capacity(frames.len());
        let mut errors = Vec::new();
        let mut compressed = 0usize;

        for (i, frame) in frames.iter().enumerate() {
            let mut header = format!("--- gRPC frame {} ({} bytes", i + 1, frame.payload.len());
            let content = if frame.is_trailer() {
                header.push_str(", trailers");
                String::from_utf8_lossy(frame.payload).trim_end().to_string()
            } else if frame.is_compressed() {
                compressed += 1;
                header.push_str(", compressed");
                hex_preview(frame.payload, GRPC_PREVIEW_BYTES).trim_end().to_string()
            } else {
                match decode_fields(frame.payload) {
                    Ok(fields) => render(&fields),
                    Err(e) => {
                        errors.push(format!("frame {}: {}", i + 1, e));
                        hex_dump(frame.payload).trim_end().to_string()
                    }
                }
            };
            header.push_str(") ---");
            sections.push(format!("{}\n{}", header, content));
        }

        let formatted = sections.join("\n\n");
        let parsed = if errors.is_empty() {
            ParsedBody::valid(formatted, ContentKind::Protobuf)
        } else {
            ParsedBody::invalid(formatted, ContentKind::Protobuf, errors.join("; "))
        };
        parsed
            .with_meta("grpc_frames", frames.len())
            .with_meta("grpc_compressed_frames", compressed)
    }
}

impl BodyParser for ProtobufBodyParser {
    fn name(&self) -> &'static str {
        "protobuf"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &[
            "application/x-protobuf",
            "application/protobuf",
            "application/vnd.google.protobuf",
            "application/x-google-protobuf",
            "application/grpc",
            "application/grpc+proto",
        ]
    }

    fn default_content_type(&self) -> &'static str {
        "application/x-protobuf"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Protobuf
    }

    fn priority(&self) -> i32 {
        150
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(mime) = declared_mime(content_type) {
            if mime.starts_with("application/grpc") || mime.contains("protobuf") {
                return true;
            }
        }
        looks_like_protobuf(body) && printable_text(body).is_none()
    }

    fn parse(&self, content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        if is_grpc(content_type) {
            if let Some(frames) = grpc_frames(body) {
                return Self::parse_grpc(&frames);
            }
        }
        Self::parse_message(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Varint Tests ====================

    #[test]
    fn decodes_simple_varint() {
        let fields = decode_fields(&[0x08, 0x96, 0x01]).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_number, 1);
        assert_eq!(fields[0].wire_type, 0);
        assert_eq!(fields[0].wire_type_name, "varint");
        assert!(fields[0].value.starts_with("150"));
    }

    #[test]
    fn varint_interpretations() {
        assert_eq!(describe_varint(0), "0");
        assert_eq!(describe_varint(3), "3 (sint: -2)");
        assert_eq!(describe_varint(u64::MAX), format!("{} (sint: {}) (int64: -1)", u64::MAX, i64::MIN));
    }

    #[test]
    fn negative_int64_on_the_wire() {
        let mut data = vec![0x08];
        data.extend([0xff; 9]);
        data.push(0x01);
        let fields = decode_fields(&data).unwrap();
        assert!(fields[0].value.contains("(int64: -1)"));
    }

    #[test]
    fn overlong_varint_rejected() {
        let mut data = vec![0x08];
        data.extend([0xff; 10]);
        data.push(0x01);
        assert!(matches!(decode_fields(&data), Err(ParseError::VarintOverflow(1))));
    }

    // ==================== Wire Type Tests ====================

    #[test]
    fn decodes_string_and_fixed() {
        let mut data = vec![0x12, 0x05];
        data.extend_from_slice(b"hello");
        data.extend([0x1d, 0x00, 0x00, 0x80, 0x3f]);
        let fields = decode_fields(&data).unwrap();
        assert_eq!(fields[0].value, "\"hello\"");
        assert_eq!(fields[1].field_number, 3);
        assert_eq!(fields[1].wire_type_name, "fixed32");
        assert_eq!(fields[1].value, "0x3f800000 (int: 1065353216, float: 1)");
    }

    #[test]
    fn decodes_nested_message() {
        let fields = decode_fields(&[0x1a, 0x03, 0x08, 0x96, 0x01]).unwrap();
        assert_eq!(fields[0].value, "message (3 bytes)");
        assert_eq!(fields[0].nested.len(), 1);
        assert_eq!(fields[0].nested[0].field_number, 1);

        let rendered = render(&fields);
        assert_eq!(rendered, "3 [length-delimited]: message (3 bytes)\n  1 [varint]: 150 (sint: 75)");
    }

    #[test]
    fn long_printable_payload_stays_text() {
        // "(A" is also a valid message (field 5 varint 65), but text wins
        let text = "(A".repeat(60);
        let mut data = vec![0x12, 120];
        data.extend_from_slice(text.as_bytes());

        let fields = decode_fields(&data).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields[0].nested.is_empty());
        assert_eq!(
            fields[0].value,
            format!("\"{}... (120 chars)\"", "(A".repeat(50))
        );
    }

    #[test]
    fn opaque_bytes_shown_as_hex() {
        let fields = decode_fields(&[0x0a, 0x02, 0xff, 0xfe]).unwrap();
        assert_eq!(fields[0].value, "bytes[2]: ff fe");
    }

    #[test]
    fn groups_balanced() {
        let fields = decode_fields(&[0x0b, 0x10, 0x01, 0x0c]).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].value, "group start");
        assert_eq!(fields[2].value, "group end");
        assert!(decode_fields(&[0x0c]).is_err());
        assert!(decode_fields(&[0x0b]).is_err());
    }

    #[test]
    fn structural_errors() {
        assert!(matches!(
            decode_fields(&[0x0f]),
            Err(ParseError::InvalidWireType { wire_type: 7, offset: 0 })
        ));
        assert!(matches!(
            decode_fields(&[0x00]),
            Err(ParseError::InvalidFieldNumber { number: 0, .. })
        ));
        assert!(matches!(decode_fields(&[0x08]), Err(ParseError::Truncated(_))));
        assert!(matches!(decode_fields(&[0x0a, 0x05, 0x01]), Err(ParseError::Truncated(_))));
    }

    // ==================== Detection Tests ====================

    #[test]
    fn sniffing() {
        assert!(looks_like_protobuf(&[0x08, 0x96, 0x01]));
        assert!(!looks_like_protobuf(b""));
        assert!(!looks_like_protobuf(b"hello world"));
        assert!(!ProtobufBodyParser.can_parse(None, b"hello world"));
        assert!(!ProtobufBodyParser.can_parse(None, b""));
        assert!(ProtobufBodyParser.can_parse(None, &[0x08, 0x96, 0x01]));
        assert!(ProtobufBodyParser.can_parse(Some("application/grpc-web+proto"), b""));
        assert!(ProtobufBodyParser.can_parse(Some("application/vnd.example.protobuf"), b""));
    }

    // ==================== Parse Tests ====================

    #[test]
    fn parse_failure_shows_hex_dump() {
        let parsed = ProtobufBodyParser.parse(Some("application/x-protobuf"), &[0x08]);
        assert!(!parsed.is_valid);
        assert!(parsed.formatted.starts_with("00000000  08"));
        assert!(parsed.error_message.is_some());
    }

    #[test]
    fn parse_grpc_frame() {
        let body = [0x00, 0x00, 0x00, 0x00, 0x03, 0x08, 0x96, 0x01];
        let parsed = ProtobufBodyParser.parse(Some("application/grpc"), &body);
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("grpc_frames"), Some("1"));
        assert_eq!(parsed.formatted, "--- gRPC frame 1 (3 bytes) ---\n1 [varint]: 150 (sint: 75)");
    }

    #[test]
    fn parse_grpc_compressed_frame() {
        let body = [0x01, 0x00, 0x00, 0x00, 0x02, 0xab, 0xcd];
        let parsed = ProtobufBodyParser.parse(Some("application/grpc+proto"), &body);
        assert!(parsed.formatted.contains("compressed"));
        assert!(parsed.formatted.contains("ab cd"));
        assert_eq!(parsed.meta("grpc_compressed_frames"), Some("1"));
    }

    #[test]
    fn unframed_grpc_decodes_as_message() {
        let parsed = ProtobufBodyParser.parse(Some("application/grpc"), &[0x08, 0x96, 0x01]);
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("field_count"), Some("1"));
    }
}
