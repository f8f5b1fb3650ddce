//! `application/x-www-form-urlencoded` bodies.
//!
//! Keys follow the PHP/Rails bracket convention:
//!
//! | key               | base    | array index | nested path          |
//! |-------------------|---------|-------------|----------------------|
//! | `name`            | `name`  | none        | `[]`                 |
//! | `items[]`         | `items` | `-1`        | `[]`                 |
//! | `items[2]`        | `items` | `2`         | `[]`                 |
//! | `user[addr][city]`| `user`  | none        | `["addr", "city"]`   |
//! | `rows[0][1]`      | `rows`  | `0`         | `["1"]`              |
//!
//! Only the first bracket group can make a key an array.

use crate::body::{ContentKind, ParsedBody};
use crate::error::{ParseError, Result};
use crate::parser::BodyParser;

use super::{body_text, declared_mime, raw_text, truncate_chars};

const MAX_VALUE_CHARS: usize = 100;

/// Sentinel array index for `name[]`.
pub const ARRAY_PUSH: i64 = -1;

/// One decoded `key=value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormParameter {
    /// Decoded key as written.
    pub raw_key: String,
    pub base_key: String,
    /// `Some(-1)` for `[]`, `Some(n)` for `[n]`.
    pub array_index: Option<i64>,
    pub nested_path: Vec<String>,
    pub value: String,
    pub decoding_failed: bool,
}

impl FormParameter {
    /// Key in canonical bracket form.
    pub fn display_key(&self) -> String {
        let mut key = self.base_key.clone();
        match self.array_index {
            Some(ARRAY_PUSH) => key.push_str("[]"),
            Some(index) => key.push_str(&format!("[{}]", index)),
            None => {}
        }
        for segment in &self.nested_path {
            key.push('[');
            key.push_str(segment);
            key.push(']');
        }
        key
    }
}

/// Splits a form body into parameters. Empty pairs are skipped.
pub fn parse_parameters(text: &str) -> Vec<FormParameter> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = percent_decode(raw_key);
            let value = percent_decode(raw_value);
            let decoding_failed = key.is_err() || value.is_err();
            let key = key.unwrap_or_else(|_| raw_key.to_string());
            let value = value.unwrap_or_else(|_| raw_value.to_string());

            let (base_key, array_index, nested_path) = split_key(&key);
            FormParameter {
                raw_key: key,
                base_key,
                array_index,
                nested_path,
                value,
                decoding_failed,
            }
        })
        .collect()
}

/// Splits `base[a][b]` into its base name, array index, and nested path.
/// Keys whose brackets do not close are kept whole.
fn split_key(key: &str) -> (String, Option<i64>, Vec<String>) {
    let Some(open) = key.find('[') else {
        return (key.to_string(), None, Vec::new());
    };
    if open == 0 {
        return (key.to_string(), None, Vec::new());
    }

    let base = &key[..open];
    let mut groups = Vec::new();
    let mut rest = &key[open..];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return (key.to_string(), None, Vec::new());
        };
        groups.push(inner[..close].to_string());
        rest = &inner[close + 1..];
    }
    if !rest.is_empty() {
        return (key.to_string(), None, Vec::new());
    }

    let mut groups = groups.into_iter();
    let mut nested = Vec::new();
    let array_index = match groups.next() {
        Some(first) if first.is_empty() => Some(ARRAY_PUSH),
        Some(first) => match first.parse::<i64>() {
            Ok(index) if index >= 0 && first.bytes().all(|b| b.is_ascii_digit()) => Some(index),
            _ => {
                nested.push(first);
                None
            }
        },
        None => None,
    };
    nested.extend(groups);
    (base.to_string(), array_index, nested)
}

/// Decodes `+` and `%XX` escapes as UTF-8.
fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let byte = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| ParseError::malformed("form", format!("bad escape at {}", i)))?;
                out.push(byte);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|e| ParseError::InvalidUtf8(e.utf8_error().valid_up_to()))
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']')
}

/// Body sniffing: `k=v&k=v` with at least one well-formed key.
fn looks_like_form(body: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    let text = text.trim();
    if !text.contains('=') || text.starts_with(|c| matches!(c, '{' | '[' | '<')) {
        return false;
    }
    if text.chars().any(|c| c.is_control()) {
        return false;
    }

    text.split('&').any(|pair| {
        let key = pair.split_once('=').map_or(pair, |(k, _)| k);
        !key.is_empty()
            && percent_decode(key).is_ok_and(|decoded| decoded.chars().all(is_key_char))
    })
}

/// Form body parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormBodyParser;

impl FormBodyParser {
    /// One `key = value` line per parameter. Keys are left-aligned and
    /// padded with trailing spaces to the widest key, so the `=` signs line up.
    fn format(body: &[u8]) -> Result<ParsedBody> {
        let params = parse_parameters(body_text(body)?.trim());
        let keys: Vec<String> = params.iter().map(FormParameter::display_key).collect();
        let width = keys.iter().map(|k| k.chars().count()).max().unwrap_or(0);

        let lines: Vec<String> = params
            .iter()
            .zip(&keys)
            .map(|(param, key)| {
                let mut line = format!(
                    "{:<width$} = {}",
                    key,
                    truncate_chars(&param.value, MAX_VALUE_CHARS),
                    width = width
                );
                if param.decoding_failed {
                    line.push_str(" [decode failed]");
                }
                line
            })
            .collect();

        let mut unique: Vec<&str> = params.iter().map(|p| p.base_key.as_str()).collect();
        unique.sort_unstable();
        unique.dedup();

        Ok(ParsedBody::valid(lines.join("\n"), ContentKind::FormData)
            .with_meta("parameter_count", params.len())
            .with_meta("unique_keys", unique.len())
            .with_meta("has_arrays", params.iter().any(|p| p.array_index.is_some()))
            .with_meta("has_nested", params.iter().any(|p| !p.nested_path.is_empty()))
            .with_meta(
                "decode_failures",
                params.iter().filter(|p| p.decoding_failed).count(),
            ))
    }
}

impl BodyParser for FormBodyParser {
    fn name(&self) -> &'static str {
        "form"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &["application/x-www-form-urlencoded"]
    }

    fn default_content_type(&self) -> &'static str {
        "application/x-www-form-urlencoded"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::FormData
    }

    fn priority(&self) -> i32 {
        220
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(mime) = declared_mime(content_type) {
            if self.supported_content_types().contains(&mime.as_str()) {
                return true;
            }
        }
        looks_like_form(body)
    }

    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        Self::format(body).unwrap_or_else(|e| {
            ParsedBody::invalid(raw_text(body), ContentKind::FormData, e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(text: &str) -> FormParameter {
        parse_parameters(text).remove(0)
    }

    // ==================== Decoding Tests ====================

    #[test]
    fn two_pairs_two_lines() {
        let parsed = FormBodyParser.parse(None, b"a=1&b=2");
        assert!(parsed.is_valid);
        assert_eq!(parsed.formatted.lines().count(), 2);
        assert_eq!(parsed.formatted, "a = 1\nb = 2");
        assert_eq!(parsed.meta("parameter_count"), Some("2"));
    }

    #[test]
    fn decodes_plus_and_percent() {
        assert_eq!(param("name=John%20Doe").value, "John Doe");
        assert_eq!(param("q=a+b%2Bc").value, "a b+c");
        assert_eq!(param("city=K%C3%B6ln").value, "Köln");
    }

    #[test]
    fn malformed_escape_keeps_raw() {
        let p = param("bad=100%zz");
        assert!(p.decoding_failed);
        assert_eq!(p.value, "100%zz");

        let parsed = FormBodyParser.parse(None, b"bad=100%zz");
        assert!(parsed.formatted.ends_with(" [decode failed]"));
        assert_eq!(parsed.meta("decode_failures"), Some("1"));
    }

    #[test]
    fn invalid_utf8_escape_fails_decode() {
        assert!(param("x=%FF").decoding_failed);
    }

    #[test]
    fn pair_without_equals_has_empty_value() {
        let params = parse_parameters("flag&a=1&&");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].base_key, "flag");
        assert_eq!(params[0].value, "");
    }

    // ==================== Key Grammar Tests ====================

    #[test]
    fn nested_key_path() {
        let p = param("user[address][city]=NYC");
        assert_eq!(p.base_key, "user");
        assert_eq!(p.nested_path, vec!["address", "city"]);
        assert_eq!(p.array_index, None);
        assert_eq!(p.value, "NYC");
    }

    #[test]
    fn array_push_keys() {
        let params = parse_parameters("items[]=1&items[]=2");
        assert_eq!(params.len(), 2);
        for p in &params {
            assert_eq!(p.base_key, "items");
            assert_eq!(p.array_index, Some(-1));
            assert!(p.nested_path.is_empty());
        }
    }

    #[test]
    fn explicit_index_then_nested_numeric() {
        let p = param("rows[0][1]=x");
        assert_eq!(p.array_index, Some(0));
        assert_eq!(p.nested_path, vec!["1"]);
    }

    #[test]
    fn only_first_group_decides_array() {
        let p = param("user[name][]=x");
        assert_eq!(p.array_index, None);
        assert_eq!(p.nested_path, vec!["name", ""]);
    }

    #[test]
    fn encoded_brackets_are_decoded_first() {
        let p = param("tags%5B%5D=a");
        assert_eq!(p.base_key, "tags");
        assert_eq!(p.array_index, Some(-1));
    }

    #[test]
    fn unclosed_bracket_is_plain_key() {
        let p = param("weird[key=1");
        assert_eq!(p.base_key, "weird[key");
        assert_eq!(p.array_index, None);
    }

    // ==================== Formatting Tests ====================

    #[test]
    fn keys_left_aligned_to_widest() {
        let parsed = FormBodyParser.parse(None, b"a=1&items[]=2&user[name]=bob");
        let lines: Vec<&str> = parsed.formatted.lines().collect();
        assert_eq!(lines[0], "a          = 1");
        assert_eq!(lines[1], "items[]    = 2");
        assert_eq!(lines[2], "user[name] = bob");
        assert_eq!(parsed.meta("has_arrays"), Some("true"));
        assert_eq!(parsed.meta("has_nested"), Some("true"));
    }

    #[test]
    fn long_values_truncated() {
        let body = format!("long={}", "x".repeat(150));
        let parsed = FormBodyParser.parse(None, body.as_bytes());
        let expected = format!("long = {}... (150 chars)", "x".repeat(100));
        assert_eq!(parsed.formatted, expected);
    }

    // ==================== Detection Tests ====================

    #[test]
    fn can_parse_header_or_sniff() {
        assert!(FormBodyParser.can_parse(Some("application/x-www-form-urlencoded"), b""));
        assert!(FormBodyParser.can_parse(None, b"a=1&b=2"));
        assert!(FormBodyParser.can_parse(Some("text/plain"), b"user%5Bid%5D=3"));
        assert!(!FormBodyParser.can_parse(None, br#"{"a":"b=c"}"#));
        assert!(!FormBodyParser.can_parse(None, b"<a href=x>"));
        assert!(!FormBodyParser.can_parse(None, b"no pairs here"));
        assert!(!FormBodyParser.can_parse(None, b"some text = other text"));
        assert!(!FormBodyParser.can_parse(None, &[0x08, b'=', 0xff]));
    }
}
