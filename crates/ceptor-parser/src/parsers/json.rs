//! JSON pretty-printer.

use serde_json::Value;

use crate::body::{ContentKind, ParsedBody};
use crate::error::Result;
use crate::parser::BodyParser;

use super::{body_text, declared_mime, leading_text, raw_text};

/// Re-indents JSON, keeping key order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBodyParser;

impl JsonBodyParser {
    fn format(body: &[u8]) -> Result<ParsedBody> {
        let text = body_text(body)?;
        let value: Value = serde_json::from_str(text)?;
        let formatted = serde_json::to_string_pretty(&value)?;

        let mut parsed = ParsedBody::valid(formatted, ContentKind::Json)
            .with_meta("root_type", type_name(&value))
            .with_meta("max_depth", depth(&value));
        match &value {
            Value::Object(map) => parsed = parsed.with_meta("keys", map.len()),
            Value::Array(items) => parsed = parsed.with_meta("items", items.len()),
            _ => {}
        }
        Ok(parsed)
    }
}

impl BodyParser for JsonBodyParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supported_content_types(&self) -> &'static [&'static str] {
        &["application/json", "text/json", "application/x-json"]
    }

    fn default_content_type(&self) -> &'static str {
        "application/json"
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Json
    }

    fn priority(&self) -> i32 {
        250
    }

    fn can_parse(&self, content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(mime) = declared_mime(content_type) {
            if self.supported_content_types().contains(&mime.as_str()) || mime.ends_with("+json") {
                return true;
            }
        }
        matches!(leading_text(body).chars().next(), Some('{') | Some('['))
    }

    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> ParsedBody {
        Self::format(body).unwrap_or_else(|e| {
            ParsedBody::invalid(raw_text(body), ContentKind::Json, e.to_string())
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}
