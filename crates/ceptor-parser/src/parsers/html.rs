//! HTML re-indenter.
//!
//! A single forward scan, not a parse tree. Tags are indented by nesting
//! depth; void elements never nest; the content of preformatted elements is
//! copied through untouched. Nothing is validated.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::body::{ContentKind, ParsedBody};
use crate::parser::BodyParser;

use super::{declared_mime, leading_text, raw_text};

/// Default indent width in spaces.
pub const DEFAULT_INDENT: usize = 2;

/// Short text up to this length stays on the same line as its tags.
const INLINE_TEXT_MAX: usize = 80;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

const PREFORMATTED_ELEMENTS: &[&str] = &["pre", "code", "script", "style", "textarea"];

static TITLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("Invalid regex pattern")
});

static META_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b([^>]*)>").expect("Invalid regex pattern"));

static ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("Invalid regex pattern")
});

/// HTML body parser.
#[derive(Debug, Clone, Copy)]
pub struct HtmlBodyParser {
    indent: usize,
}

impl Default for HtmlBodyParser {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT,
        }
    }
}

impl HtmlBodyParser {
    /// Uses a custom indent width.
    pub fn with_indent(indent: usize) -> Self {
        Self { indent }
    }

    /// Re-indents a document.
    pub fn format(&self, html: &str) -> String {
        let mut out = Formatter {
            lines: Vec::new(),
            indent: self.indent,
        };
        let mut depth = 0usize;
        let mut pos = 0usize;

        while pos < html.len() {
            let rest = &html[pos..];

            if rest.starts_with("<!--") {
                let end = rest.find("-->").map_or(rest.len(), |i| i + 3);
                out.push(depth, &rest[..end]);
                pos += end;
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                let end = rest.find('>').map_or(rest.len(), |i| i + 1);
                out.push(depth, &rest[..end]);
                pos += end;
            } else if rest.starts_with("</") {
                let end = tag_end(rest).unwrap_or(rest.len());
                if !VOID_ELEMENTS.contains(&tag_name(rest).as_str()) {
                    depth = depth.saturating_sub(1);
                }
                out.push(depth, &rest[..end]);
                pos += end;
            } else if is_start_tag(rest) {
                let end = tag_end(rest).unwrap_or(rest.len());
                let tag = &rest[..end];
                let name = tag_name(tag);
                pos += end;
                let after = &html[pos..];

                if VOID_ELEMENTS.contains(&name.as_str()) || tag.ends_with("/>") {
                    out.push(depth, tag);
                } else if PREFORMATTED_ELEMENTS.contains(&name.as_str()) {
                    let end = match find_closing_tag(after, &name) {
                        Some(close) => {
                            close + tag_end(&after[close..]).unwrap_or(after.len() - close)
                        }
                        None => after.len(),
                    };
                    out.push(depth, &format!("{}{}", tag, &after[..end]));
                    pos += end;
                } else if let Some((text, closing)) = inline_element(after, &name) {
                    out.push(depth, &format!("{}{}{}", tag, text.trim(), closing));
                    pos += text.len() + closing.len();
                } else {
                    out.push(depth, tag);
                    depth += 1;
                }
            } else {
                let end = rest
                    .char_indices()
                    .skip(1)
                    .find(|&(_, c)| c == '<')
                    .map_or(rest.len(), |(i, _)| i);
                let text = collapse_whitespace(&rest[..end]);
                if !text.is_empty() {
                    out.push(depth, &text);
                }
                pos += end;
            }
        }

        out.lines.join("\n")
    }
}

struct Formatter {
    lines: Vec<String>,
    indent: usize,
}

impl Formatter {
    fn push(&mut self, depth: usize, content: &str) {
        self.lines
            .push(format!("{}{}", " ".repeat(depth * self.indent), content));
    }
}

fn is_start_tag(s: &str) -> bool {
    s.starts_with('<') && s[1..].starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Index just past the `>` closing the tag at the start of `s`, skipping
/// quoted attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in s.as_bytes().iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None => {}
        }
    }
    None
}

/// Lowercased element name of `<name ...>` or `</name>`.
fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Offset of `</name` in `s`, matched case-insensitively.
fn find_closing_tag(s: &str, name: &str) -> Option<usize> {
    let lower = s.to_ascii_lowercase();
    let needle = format!("</{}", name);
    let mut from = 0;
    while let Some(found) = lower[from..].find(&needle) {
        let at = from + found;
        let next = lower[at + needle.len()..].chars().next();
        if matches!(next, None | Some('>')) || next.is_some_and(char::is_whitespace) {
            return Some(at);
        }
        from = at + needle.len();
    }
    None
}

/// Text and closing tag of an element holding only short single-line
/// text.
fn inline_element<'a>(after: &'a str, name: &str) -> Option<(&'a str, &'a str)> {
    let lt = after.find('<')?;
    let (text, closing) = after.split_at(lt);
    if !closing.starts_with("</") || tag_name(closing) != name {
        return None;
    }
    if text.contains('\n') || text.trim().chars().count() > INLINE_TEXT_MAX {
        return None;
    }
    let end = tag_end(closing).unwrap_or(closing.len());
    Some((text, &closing[..end]))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attributes of a tag's attribute text, names lowercased.
fn attributes(attrs: &str) -> Vec<(String, String)> {
    ATTR_REGEX
        .captures_iter(attrs)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            (caps[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn with_document_metadata(mut parsed: ParsedBody, html: &str) -> ParsedBody {
    if let Some(caps) = TITLE_REGEX.captures(html) {
        let title = collapse_whitespace(&caps[1]);
        if !title.is_empty() {
            parsed = parsed.with_meta("title", title);
        }
    }

    for caps in META_REGEX.captures_iter(html) {
        let attrs = attributes(&caps[1]);
        if let Some(charset) = attribute(&attrs, "charset") {
            parsed = parsed.with_meta("charset", charset);
        }
        let content = attribute(&attrs, "content");
        match (attribute(&attrs, "name").map(str::to_ascii_lowercase), content) {
            (Some(name), Some(content)) if name == "description" || name == "viewport" => {
                parsed = parsed.with_meta(name, content);
            }
            _ => {}
        }
        // <meta http-equiv="Content-Type" content="text/html; charset=...">
        if parsed.meta("charset").is_none() {
            let charset = content.and_then(|c| {
                let lower = c.to_ascii_lowercase();
                lower.split("charset=").nth(1).map(str::to_string)
            });
            if let Some(charset) = charset {
                parsed = parsed.with_meta("charset", charset.trim());
            }
        }
    }

    let lower = leading_text(html.as_bytes());
    parsed.with_meta("has_doctype", lower.starts_with("<!doctype"))
}

fn looks_like_html(body: &[u8]) -> bool {
    let lower = leading_text(body);
    lower.starts_with("<!doctype html")
        || lower.starts_with("<html")
        || (lower.starts_with('<')
            && (lower.contains("<html") || lower.contains("<head") || lower.contains("<body")))
}

impl BodyParser for HtmlBodyParser {
    fn name(&self) -> &'static str {
        "html"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &["text/html", "application/xhtml+xml"]
    }

    fn default_content_type(&self) -> &'static str {
        "text/html"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Html
    }

    fn priority(&self) -> i32 {
        230
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(mime) = declared_mime(content_type) {
            if self.supported_content_types().contains(&mime.as_str()) {
                return true;
            }
        }
        looks_like_html(body)
    }

    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        let html = raw_text(body);
        let formatted = self.format(&html);
        let element_count = html
            .match_indices('<')
            .filter(|(i, _)| is_start_tag(&html[*i..]))
            .count();
        with_document_metadata(ParsedBody::valid(formatted, ContentKind::Html), &html)
            .with_meta("element_count", element_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(html: &str) -> String {
        HtmlBodyParser::default().format(html)
    }

    fn indent_of(formatted: &str, needle: &str) -> usize {
        let line = formatted
            .lines()
            .find(|l| l.trim_start().starts_with(needle))
            .unwrap();
        line.len() - line.trim_start().len()
    }

    // ==================== Indentation Tests ====================

    #[test]
    fn nested_elements_indent_by_two() {
        let formatted = format("<html><body><p>Hi</p></body></html>");
        assert_eq!(
            formatted,
            "<html>\n  <body>\n    <p>Hi</p>\n  </body>\n</html>"
        );
        assert_eq!(indent_of(&formatted, "<p>"), indent_of(&formatted, "<html>") + 4);
    }

    #[test]
    fn custom_indent() {
        let formatted = HtmlBodyParser::with_indent(4).format("<div><span>x</span></div>");
        assert_eq!(formatted, "<div>\n    <span>x</span>\n</div>");
    }

    #[test]
    fn void_elements_do_not_nest() {
        let formatted = format("<div><br><img src=\"a.png\"><input/><p>x</p></div>");
        assert_eq!(
            formatted,
            "<div>\n  <br>\n  <img src=\"a.png\">\n  <input/>\n  <p>x</p>\n</div>"
        );
    }

    #[test]
    fn doctype_and_comments() {
        let formatted = format("<!DOCTYPE html><html><!-- note --><head></head></html>");
        assert_eq!(
            formatted,
            "<!DOCTYPE html>\n<html>\n  <!-- note -->\n  <head></head>\n</html>"
        );
    }

    #[test]
    fn long_text_goes_on_own_line() {
        let text = "word ".repeat(30);
        let formatted = format(&format!("<p>{}</p>", text));
        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], format!("  {}", text.trim()));
    }

    #[test]
    fn preformatted_content_is_verbatim() {
        let html = "<body><pre>  a\n    b <b>x</b>\n</pre><script>if (a < b) {\n  go();\n}</script></body>";
        let formatted = format(html);
        assert!(formatted.contains("  <pre>  a\n    b <b>x</b>\n</pre>"));
        assert!(formatted.contains("  <script>if (a < b) {\n  go();\n}</script>"));
        assert!(formatted.ends_with("</body>"));
    }

    #[test]
    fn quoted_angle_bracket_in_attribute() {
        let formatted = format("<div title=\"a > b\"><p>x</p></div>");
        assert!(formatted.starts_with("<div title=\"a > b\">\n"));
    }

    #[test]
    fn unterminated_markup_does_not_panic() {
        let formatted = format("<div><p class=\"x");
        assert!(formatted.contains("<p class=\"x"));
        format("<!-- never closed");
        format("é < ü <");
    }

    // ==================== Metadata Tests ====================

    #[test]
    fn extracts_head_metadata() {
        let html = r#"<!doctype html><html><head>
            <meta charset="utf-8">
            <meta content="width=device-width" name="viewport">
            <meta name="Description" content="A test page">
            <title>  My
              Page </title></head><body></body></html>"#;
        let parsed = HtmlBodyParser::default().parse(Some("text/html"), html.as_bytes());
        assert!(parsed.is_valid);
        assert_eq!(parsed.meta("title"), Some("My Page"));
        assert_eq!(parsed.meta("charset"), Some("utf-8"));
        assert_eq!(parsed.meta("viewport"), Some("width=device-width"));
        assert_eq!(parsed.meta("description"), Some("A test page"));
        assert_eq!(parsed.meta("has_doctype"), Some("true"));
    }

    #[test]
    fn http_equiv_charset() {
        let html = r#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=ISO-8859-1"></head></html>"#;
        let parsed = HtmlBodyParser::default().parse(None, html.as_bytes());
        assert_eq!(parsed.meta("charset"), Some("iso-8859-1"));
    }

    // ==================== Detection Tests ====================

    #[test]
    fn can_parse_detection() {
        let parser = HtmlBodyParser::default();
        assert!(parser.can_parse(Some("text/html; charset=utf-8"), b"anything"));
        assert!(parser.can_parse(None, b"  <!DOCTYPE HTML><html>"));
        assert!(parser.can_parse(None, b"<div><body></body></div>"));
        assert!(!parser.can_parse(None, b"<?xml version=\"1.0\"?><feed/>"));
        assert!(!parser.can_parse(Some("text/plain"), b"plain"));
    }
}
