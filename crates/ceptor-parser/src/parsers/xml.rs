//! XML re-indenter.
//!
//! A small pull reader turns the document into events; the events are
//! checked for well-formedness before anything is emitted, so a broken
//! document is shown raw instead of half-formatted.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::body::{ContentKind, ParsedBody};
use crate::error::{ParseError, Result};
use crate::parser::BodyParser;

use super::{body_text, declared_mime, leading_text, raw_text, strip_bom};

const INDENT: &str = "  ";

static PSEUDO_ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid regex pattern")
});

static DOCTYPE_PUBLIC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bPUBLIC\s+(?:"([^"]*)"|'([^']*)')(?:\s+(?:"([^"]*)"|'([^']*)'))?"#)
        .expect("Invalid regex pattern")
});

static DOCTYPE_SYSTEM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bSYSTEM\s+(?:"([^"]*)"|'([^']*)')"#).expect("Invalid regex pattern")
});

// =============================================================================
// Pull Reader
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute<'a> {
    name: &'a str,
    value: &'a str,
    quote: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum XmlEvent<'a> {
    Declaration(&'a str),
    ProcessingInstruction(&'a str),
    Doctype(&'a str),
    Comment(&'a str),
    CData(&'a str),
    Start {
        name: &'a str,
        attributes: Vec<Attribute<'a>>,
        empty: bool,
    },
    End(&'a str),
    Text(&'a str),
}

struct XmlReader<'a> {
    input: &'a str,
    pos: usize,
    failed: bool,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-' || c == '.'
}

fn malformed(message: impl Into<String>) -> ParseError {
    ParseError::malformed("XML", message)
}

impl<'a> XmlReader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            failed: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn read_name(&mut self) -> Result<&'a str> {
        let rest = self.rest();
        if !rest.starts_with(is_name_start) {
            return Err(malformed(format!("expected a name at byte {}", self.pos)));
        }
        let len = rest
            .char_indices()
            .find(|&(_, c)| !is_name_char(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Consumes through `terminator`, returning the raw markup.
    fn read_until(&mut self, terminator: &str, what: &str) -> Result<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(terminator)
            .ok_or_else(|| malformed(format!("unterminated {} at byte {}", what, self.pos)))?;
        let raw = &rest[..end + terminator.len()];
        self.pos += raw.len();
        Ok(raw)
    }

    fn read_doctype(&mut self) -> Result<&'a str> {
        let rest = self.rest();
        let mut quote = None;
        let mut subset = 0usize;
        for (i, c) in rest.char_indices() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"') | (None, '\'') => quote = Some(c),
                (None, '[') => subset += 1,
                (None, ']') => subset = subset.saturating_sub(1),
                (None, '>') if subset == 0 => {
                    self.pos += i + 1;
                    return Ok(&rest[..=i]);
                }
                _ => {}
            }
        }
        Err(malformed("unterminated DOCTYPE"))
    }

    fn read_end_tag(&mut self) -> Result<XmlEvent<'a>> {
        self.pos += 2;
        let name = self.read_name()?;
        self.skip_whitespace();
        if !self.rest().starts_with('>') {
            return Err(malformed(format!("expected '>' after </{}", name)));
        }
        self.pos += 1;
        Ok(XmlEvent::End(name))
    }

    fn read_start_tag(&mut self) -> Result<XmlEvent<'a>> {
        self.pos += 1;
        let name = self.read_name()?;
        let mut attributes: Vec<Attribute<'a>> = Vec::new();

        loop {
            let before = self.pos;
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(XmlEvent::Start {
                    name,
                    attributes,
                    empty: true,
                });
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok(XmlEvent::Start {
                    name,
                    attributes,
                    empty: false,
                });
            }
            if rest.is_empty() {
                return Err(malformed(format!("unterminated tag <{}", name)));
            }
            if self.pos == before {
                return Err(malformed(format!(
                    "expected whitespace before attribute in <{}",
                    name
                )));
            }

            let attr_name = self.read_name()?;
            self.skip_whitespace();
            if !self.rest().starts_with('=') {
                return Err(malformed(format!("attribute '{}' has no value", attr_name)));
            }
            self.pos += 1;
            self.skip_whitespace();

            let rest = self.rest();
            let quote = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(malformed(format!(
                        "attribute '{}' value is not quoted",
                        attr_name
                    )))
                }
            };
            let close = rest[1..]
                .find(quote)
                .ok_or_else(|| malformed(format!("unterminated value of '{}'", attr_name)))?;
            let value = &rest[1..1 + close];
            if value.contains('<') {
                return Err(malformed(format!("'<' in value of '{}'", attr_name)));
            }
            self.pos += close + 2;

            if attributes.iter().any(|a| a.name == attr_name) {
                return Err(malformed(format!("duplicate attribute '{}'", attr_name)));
            }
            attributes.push(Attribute {
                name: attr_name,
                value,
                quote,
            });
        }
    }

    fn read_event(&mut self) -> Result<XmlEvent<'a>> {
        let rest = self.rest();

        if !rest.starts_with('<') {
            let len = rest.find('<').unwrap_or(rest.len());
            self.pos += len;
            return Ok(XmlEvent::Text(&rest[..len]));
        }

        if rest.starts_with("<?") {
            let raw = self.read_until("?>", "processing instruction")?;
            let target: String = raw[2..].chars().take_while(|&c| is_name_char(c)).collect();
            return Ok(if target.eq_ignore_ascii_case("xml") {
                XmlEvent::Declaration(raw)
            } else {
                XmlEvent::ProcessingInstruction(raw)
            });
        }
        if rest.starts_with("<!--") {
            return self.read_until("-->", "comment").map(XmlEvent::Comment);
        }
        if rest.starts_with("<![CDATA[") {
            return self.read_until("]]>", "CDATA section").map(XmlEvent::CData);
        }
        if rest.get(..9).is_some_and(|head| head.eq_ignore_ascii_case("<!DOCTYPE")) {
            return self.read_doctype().map(XmlEvent::Doctype);
        }
        if rest.starts_with("</") {
            return self.read_end_tag();
        }
        if rest[1..].starts_with(is_name_start) {
            return self.read_start_tag();
        }
        Err(malformed(format!("invalid markup at byte {}", self.pos)))
    }
}

impl<'a> Iterator for XmlReader<'a> {
    type Item = Result<XmlEvent<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.input.len() {
            return None;
        }
        let event = self.read_event();
        self.failed = event.is_err();
        Some(event)
    }
}

// =============================================================================
// Well-formedness and Formatting
// =============================================================================

#[derive(Debug, Default)]
struct DocumentInfo {
    version: Option<String>,
    encoding: Option<String>,
    standalone: Option<String>,
    root: Option<String>,
    root_namespace: Option<String>,
    doctype: Option<String>,
    element_count: usize,
}

fn check_well_formed<'a>(events: &[XmlEvent<'a>]) -> Result<DocumentInfo> {
    let mut info = DocumentInfo::default();
    let mut stack: Vec<&str> = Vec::new();

    for (i, event) in events.iter().enumerate() {
        match event {
            XmlEvent::Declaration(raw) => {
                if i != 0 {
                    return Err(malformed("XML declaration must come first"));
                }
                for caps in PSEUDO_ATTR_REGEX.captures_iter(raw) {
                    let value = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .map(|m| m.as_str().to_string());
                    match &caps[1] {
                        "version" => info.version = value,
                        "encoding" => info.encoding = value,
                        "standalone" => info.standalone = value,
                        _ => {}
                    }
                }
            }
            XmlEvent::Doctype(raw) => info.doctype = Some(raw.to_string()),
            XmlEvent::Start {
                name,
                attributes,
                empty,
            } => {
                if stack.is_empty() {
                    if info.root.is_some() {
                        return Err(malformed(format!("second root element <{}>", name)));
                    }
                    info.root = Some(name.to_string());
                    let xmlns = match name.split_once(':') {
                        Some((prefix, _)) => format!("xmlns:{}", prefix),
                        None => "xmlns".to_string(),
                    };
                    info.root_namespace = attributes
                        .iter()
                        .find(|a| a.name == xmlns)
                        .map(|a| a.value.to_string());
                }
                info.element_count += 1;
                if !empty {
                    stack.push(*name);
                }
            }
            XmlEvent::End(name) => match stack.pop() {
                Some(open) if open == *name => {}
                Some(open) => {
                    return Err(malformed(format!(
                        "</{}> does not close <{}>",
                        name, open
                    )))
                }
                None => return Err(malformed(format!("unexpected </{}>", name))),
            },
            XmlEvent::Text(text) => {
                if stack.is_empty() && !text.trim().is_empty() {
                    return Err(malformed("text outside the root element"));
                }
            }
            XmlEvent::CData(_) => {
                if stack.is_empty() {
                    return Err(malformed("CDATA outside the root element"));
                }
            }
            XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction(_) => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!("<{}> is never closed", open)));
    }
    if info.root.is_none() {
        return Err(malformed("no root element"));
    }
    Ok(info)
}

fn render_start(name: &str, attributes: &[Attribute<'_>], empty: bool) -> String {
    let mut tag = format!("<{}", name);
    for attr in attributes {
        tag.push_str(&format!(" {}={}{}{}", attr.name, attr.quote, attr.value, attr.quote));
    }
    tag.push_str(if empty { "/>" } else { ">" });
    tag
}

fn format_events(events: &[XmlEvent<'_>]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    let mut push = |depth: usize, content: &str| {
        lines.push(format!("{}{}", INDENT.repeat(depth), content));
    };

    while i < events.len() {
        match &events[i] {
            XmlEvent::Start {
                name,
                attributes,
                empty,
            } => {
                let tag = render_start(name, attributes, *empty);
                if *empty {
                    push(depth, &tag);
                } else {
                    match (events.get(i + 1), events.get(i + 2)) {
                        (Some(XmlEvent::End(_)), _) => {
                            push(depth, &format!("{}</{}>", tag, name));
                            i += 1;
                        }
                        (Some(XmlEvent::Text(text)), Some(XmlEvent::End(_)))
                            if !text.trim().contains('\n') =>
                        {
                            push(depth, &format!("{}{}</{}>", tag, text.trim(), name));
                            i += 2;
                        }
                        _ => {
                            push(depth, &tag);
                            depth += 1;
                        }
                    }
                }
            }
            XmlEvent::End(name) => {
                depth = depth.saturating_sub(1);
                push(depth, &format!("</{}>", name));
            }
            XmlEvent::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    push(depth, text);
                }
            }
            XmlEvent::Declaration(raw)
            | XmlEvent::ProcessingInstruction(raw)
            | XmlEvent::Doctype(raw)
            | XmlEvent::Comment(raw)
            | XmlEvent::CData(raw) => push(depth, raw),
        }
        i += 1;
    }

    lines.join("\n")
}

fn either(caps: &regex::Captures<'_>, a: usize, b: usize) -> Option<String> {
    caps.get(a)
        .or_else(|| caps.get(b))
        .map(|m| m.as_str().to_string())
}

fn doctype_ids(doctype: &str) -> (Option<String>, Option<String>) {
    if let Some(caps) = DOCTYPE_PUBLIC_REGEX.captures(doctype) {
        return (either(&caps, 1, 2), either(&caps, 3, 4));
    }
    if let Some(caps) = DOCTYPE_SYSTEM_REGEX.captures(doctype) {
        return (None, either(&caps, 1, 2));
    }
    (None, None)
}

fn looks_like_xml(body: &[u8]) -> bool {
    let lower = leading_text(body);
    if lower.contains("<!doctype html") || lower.contains("<html") {
        return false;
    }
    if lower.starts_with("<?xml") {
        return true;
    }

    let text = String::from_utf8_lossy(strip_bom(body));
    let text = text.trim();
    let Some(after) = text.strip_prefix('<') else {
        return false;
    };
    if !after.starts_with(is_name_start) || !text.ends_with('>') {
        return false;
    }
    let name: String = after.chars().take_while(|&c| is_name_char(c)).collect();
    text.contains(&format!("</{}", name)) || (text.ends_with("/>") && text.matches('<').count() == 1)
}

/// XML body parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlBodyParser;

impl XmlBodyParser {
    fn format(body: &[u8]) -> Result<ParsedBody> {
        let text = body_text(body)?;
        let events = XmlReader::new(text).collect::<Result<Vec<_>>>()?;
        let info = check_well_formed(&events)?;

        let mut parsed = ParsedBody::valid(format_events(&events), ContentKind::Xml)
            .with_meta("element_count", info.element_count);
        let fields = [
            ("xml_version", info.version),
            ("xml_encoding", info.encoding),
            ("xml_standalone", info.standalone),
            ("root_element", info.root),
            ("root_namespace", info.root_namespace),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                parsed = parsed.with_meta(key, value);
            }
        }
        if let Some(doctype) = info.doctype {
            let (public_id, system_id) = doctype_ids(&doctype);
            if let Some(id) = public_id {
                parsed = parsed.with_meta("doctype_public_id", id);
            }
            if let Some(id) = system_id {
                parsed = parsed.with_meta("doctype_system_id", id);
            }
        }
        Ok(parsed)
    }
}

impl BodyParser for XmlBodyParser {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &["application/xml", "text/xml"]
    }

    fn default_content_type(&self) -> &'static str {
        "application/xml"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Xml
    }

    fn priority(&self) -> i32 {
        240
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(mime) = declared_mime(content_type) {
            if self.supported_content_types().contains(&mime.as_str()) || mime.ends_with("+xml") {
                return true;
            }
        }
        looks_like_xml(body)
    }

    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        Self::format(body).unwrap_or_else(|e| {
            ParsedBody::invalid(raw_text(body), ContentKind::Xml, e.to_string())
        })
    }
}
