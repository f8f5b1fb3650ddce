//! Binary vs. text classification.
//!
//! Two independent signals are combined: the declared content type and the
//! leading bytes of the payload. Either one saying "binary" wins, so a
//! `text/plain` header in front of a PNG is still treated as binary.

/// Number of leading bytes inspected by the printable-ratio heuristic.
pub const SNIFF_WINDOW: usize = 512;

/// Non-printable ratio above which a buffer is considered binary.
pub const NON_PRINTABLE_THRESHOLD: f64 = 0.10;

/// MIME type prefixes that are always binary.
const BINARY_TYPE_PREFIXES: &[&str] = &["image/", "audio/", "video/", "font/"];

/// Exact MIME types that are binary.
const BINARY_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
    "application/x-gzip",
    "application/x-tar",
    "application/x-bzip2",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/java-archive",
    "application/wasm",
    "application/x-protobuf",
    "application/protobuf",
    "application/vnd.google.protobuf",
    "application/grpc",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/x-shockwave-flash",
    "application/x-font-ttf",
    "application/font-woff",
];

/// Leading-byte signatures of common binary formats.
const MAGIC_SIGNATURES: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xFF\xD8\xFF",
    b"GIF87a",
    b"GIF89a",
    b"%PDF-",
    b"PK\x03\x04",
    b"PK\x05\x06",
    b"PK\x07\x08",
    b"\x1F\x8B",
    b"\xFD7zXZ\x00",
    b"7z\xBC\xAF\x27\x1C",
    b"Rar!\x1A\x07",
    b"\x28\xB5\x2F\xFD",
    b"\x00asm",
    b"\x7FELF",
    b"OggS",
    b"ID3\x03",
    b"ID3\x04",
    b"fLaC",
    b"wOFF",
    b"wOF2",
    b"\x00\x00\x01\x00",
    b"II*\x00",
    b"MM\x00*",
];

/// Returns the MIME type of a content-type header value, lowercased and
/// stripped of parameters.
pub fn mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Checks a declared content type against the known-binary set.
///
/// `image/svg+xml` is text and is excluded from the `image/*` rule.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let mime = mime_type(content_type);
    if mime.is_empty() || mime == "image/svg+xml" {
        return false;
    }

    BINARY_TYPE_PREFIXES.iter().any(|p| mime.starts_with(p))
        || BINARY_TYPES.contains(&mime.as_str())
        || mime.starts_with("application/grpc")
        || mime.starts_with("application/vnd.openxmlformats-officedocument")
}

/// Checks the payload against known signatures, falling back to the
/// non-printable ratio of the first [`SNIFF_WINDOW`] bytes.
pub fn is_binary_by_magic_bytes(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }

    if MAGIC_SIGNATURES.iter().any(|sig| bytes.starts_with(sig)) {
        return true;
    }

    // RIFF containers (WebP, WAV, AVI) and ISO media (MP4, MOV, HEIC)
    if bytes.len() >= 12 && (&bytes[..4] == b"RIFF" || &bytes[4..8] == b"ftyp") {
        return true;
    }

    non_printable_ratio(bytes) > NON_PRINTABLE_THRESHOLD
}

/// Final classification: header signal OR byte signal.
pub fn is_binary(content_type: Option<&str>, bytes: &[u8]) -> bool {
    content_type.is_some_and(is_binary_content_type) || is_binary_by_magic_bytes(bytes)
}

/// Fraction of non-printable bytes in the first [`SNIFF_WINDOW`] bytes.
///
/// Tab, LF and CR are printable. Bytes >= 0x80 count as printable when the
/// window decodes as UTF-8 (a multi-byte sequence cut at the window edge is
/// tolerated), otherwise they count as non-printable.
pub fn non_printable_ratio(bytes: &[u8]) -> f64 {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if window.is_empty() {
        return 0.0;
    }

    let high_bytes_are_text = is_utf8_prefix(window);
    let non_printable = window
        .iter()
        .filter(|&&b| match b {
            b'\t' | b'\n' | b'\r' => false,
            0x00..=0x1F | 0x7F => true,
            0x80..=0xFF => !high_bytes_are_text,
            _ => false,
        })
        .count();

    non_printable as f64 / window.len() as f64
}

/// Valid UTF-8, or valid up to an incomplete trailing sequence.
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
