//! Redaction of sensitive headers and body content.
//!
//! Redaction runs once, before a transaction is persisted, as four passes in
//! a fixed order:
//!
//! 1. header values (case-insensitive names)
//! 2. raw regex patterns over the body text
//! 3. JSON values of configured keys
//! 4. text content of configured XML elements
//!
//! A pass that cannot run (bad pattern, input not in the right shape) leaves
//! its input untouched; later passes still run. This is display-time
//! obfuscation, not encryption.

use regex::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;
use crate::models::Headers;

/// Default replacement token.
pub const DEFAULT_REPLACEMENT: &str = "********";

/// What to redact and what to replace it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Header names whose values are replaced (case-insensitive).
    pub headers: Vec<String>,
    /// Regex patterns matched against the raw body text.
    pub body_patterns: Vec<String>,
    /// JSON keys whose values are replaced.
    pub json_keys: Vec<String>,
    /// XML element names whose text content is replaced.
    pub xml_tags: Vec<String>,
    /// Token substituted for every redacted value.
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            body_patterns: Vec::new(),
            json_keys: Vec::new(),
            xml_tags: Vec::new(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

impl RedactionConfig {
    /// Creates an empty configuration with the default token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header name.
    pub fn redact_header(mut self, name: impl Into<String>) -> Self {
        self.headers.push(name.into());
        self
    }

    /// Adds a body regex pattern.
    pub fn redact_body_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.body_patterns.push(pattern.into());
        self
    }

    /// Adds a JSON key.
    pub fn redact_json_key(mut self, key: impl Into<String>) -> Self {
        self.json_keys.push(key.into());
        self
    }

    /// Adds an XML tag name.
    pub fn redact_xml_tag(mut self, tag: impl Into<String>) -> Self {
        self.xml_tags.push(tag.into());
        self
    }

    /// Sets the replacement token.
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }

    /// Checks if nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.body_patterns.is_empty()
            && self.json_keys.is_empty()
            && self.xml_tags.is_empty()
    }
}

/// Compiled redaction rules.
///
/// Patterns are compiled once at construction. A pattern that fails to
/// compile is logged and skipped; the rest of the configuration still
/// applies.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    headers: Vec<String>,
    body_patterns: Vec<Regex>,
    json_patterns: Vec<Regex>,
    xml_patterns: Vec<Regex>,
    replacement: String,
}

impl Default for RedactionEngine {
    fn default() -> Self {
        Self::new(&RedactionConfig::default())
    }
}

impl RedactionEngine {
    /// Builds an engine from a configuration.
    pub fn new(config: &RedactionConfig) -> Self {
        let body_patterns = config
            .body_patterns
            .iter()
            .filter_map(|p| compile_or_warn(p))
            .collect();

        let json_patterns = config
            .json_keys
            .iter()
            .filter_map(|key| compile_or_warn(&json_value_pattern(key)))
            .collect();

        let xml_patterns = config
            .xml_tags
            .iter()
            .filter_map(|tag| compile_or_warn(&xml_element_pattern(tag)))
            .collect();

        Self {
            headers: config.headers.clone(),
            body_patterns,
            json_patterns,
            xml_patterns,
            replacement: config.replacement.clone(),
        }
    }

    /// Builds an engine, failing on the first pattern that does not compile.
    pub fn try_new(config: &RedactionConfig) -> crate::error::Result<Self> {
        for pattern in &config.body_patterns {
            compile(pattern)?;
        }
        Ok(Self::new(config))
    }

    /// The replacement token.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Replaces every value of the configured headers. Order and all other
    /// headers are preserved.
    pub fn redact_headers(&self, headers: &Headers) -> Headers {
        let mut redacted = headers.clone();
        if self.headers.is_empty() {
            return redacted;
        }

        for (name, values) in redacted.iter_mut() {
            if self.headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                for value in values.iter_mut() {
                    *value = self.replacement.clone();
                }
            }
        }
        redacted
    }

    /// Runs the three body passes in order.
    pub fn redact_body(&self, body: &str) -> String {
        let body = self.redact_patterns(body);
        let body = self.redact_json(&body);
        self.redact_xml(&body)
    }

    /// Replaces every match of every configured pattern.
    pub fn redact_patterns(&self, body: &str) -> String {
        let mut text = body.to_string();
        for regex in &self.body_patterns {
            text = regex
                .replace_all(&text, NoExpand(&self.replacement))
                .into_owned();
        }
        text
    }

    /// Replaces the values of configured JSON keys, keeping the document
    /// valid. Input that does not look like JSON is returned unchanged.
    pub fn redact_json(&self, body: &str) -> String {
        if self.json_patterns.is_empty() || !looks_like_json(body) {
            return body.to_string();
        }

        let quoted = format!("\"{}\"", escape_json_string(&self.replacement));
        let mut text = body.to_string();
        for regex in &self.json_patterns {
            text = regex
                .replace_all(&text, |caps: &Captures| format!("{}{}", &caps[1], quoted))
                .into_owned();
        }
        text
    }

    /// Replaces the text content of configured XML elements, keeping the
    /// tags. Input without markup is returned unchanged.
    pub fn redact_xml(&self, body: &str) -> String {
        if self.xml_patterns.is_empty() || !body.contains('<') {
            return body.to_string();
        }

        let mut text = body.to_string();
        for regex in &self.xml_patterns {
            text = regex
                .replace_all(&text, |caps: &Captures| {
                    format!("{}{}{}", &caps[1], self.replacement, &caps[3])
                })
                .into_owned();
        }
        text
    }
}

/// `"key"` followed by `:` and a string, number, boolean, or null value.
/// Group 1 is everything up to the value.
fn json_value_pattern(key: &str) -> String {
    format!(
        r#"("{}"\s*:\s*)(?:"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|true|false|null)"#,
        regex::escape(key)
    )
}

/// `<tag ...>text</tag>`, with an optional namespace prefix on either tag.
/// Self-closing `<tag ... />` never opens a match.
/// Groups: 1 open tag, 2 content, 3 close tag.
fn xml_element_pattern(tag: &str) -> String {
    let tag = regex::escape(tag);
    format!(
        r"(?s)(<(?:[A-Za-z_][\w.\-]*:)?{tag}(?:\s(?:[^>]*[^/>])?)?>)(.*?)(</(?:[A-Za-z_][\w.\-]*:)?{tag}\s*>)"
    )
}

fn looks_like_json(body: &str) -> bool {
    matches!(body.trim_start().chars().next(), Some('{') | Some('['))
}

fn escape_json_string(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn compile(pattern: &str) -> crate::error::Result<Regex> {
    Regex::new(pattern).map_err(|source| CoreError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_or_warn(pattern: &str) -> Option<Regex> {
    match compile(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Skipping redaction pattern: {}", e);
            None
        }
    }
}
