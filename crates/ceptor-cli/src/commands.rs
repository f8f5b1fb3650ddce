//! Subcommand implementations. Each writes to `out` so tests can capture
//! the output.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ceptor_core::{
    binary, CaptureConfig, CapturedBody, Headers, QueryEngine, RedactionConfig, RedactionEngine,
    RetentionPeriod, TransactionFilter, TransactionId,
};
use ceptor_parser::{hex_dump, BodyParser, ParsedBody, ParserRegistry};
use ceptor_storage::Database;
use chrono::Utc;
use tracing::{debug, info};

/// Reads a file, or stdin for `-`.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut bytes = Vec::new();
        io::stdin()
            .read_to_end(&mut bytes)
            .context("Failed to read stdin")?;
        return Ok(bytes);
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_parsed(out: &mut impl Write, parsed: &ParsedBody, show_meta: bool) -> Result<()> {
    if let Some(error) = &parsed.error_message {
        writeln!(out, "[{} parse failed: {}]", parsed.content_kind, error)?;
    }
    writeln!(out, "{}", parsed.formatted.trim_end())?;

    if show_meta && !parsed.metadata.is_empty() {
        writeln!(out)?;
        writeln!(out, "--- {} metadata ---", parsed.content_kind)?;
        for (key, value) in &parsed.metadata {
            writeln!(out, "{}: {}", key, value)?;
        }
    }
    Ok(())
}

// =============================================================================
// Body Commands
// =============================================================================

/// Decodes a body and prints it.
pub fn inspect(
    out: &mut impl Write,
    body: &[u8],
    content_type: Option<&str>,
    show_meta: bool,
    as_json: bool,
) -> Result<()> {
    let parsed = ParserRegistry::with_defaults().dispatch(content_type, body);
    if as_json {
        writeln!(out, "{}", serde_json::to_string_pretty(&parsed)?)?;
        return Ok(());
    }
    write_parsed(out, &parsed, show_meta)
}

/// Extra redaction rules given on the command line.
#[derive(Debug, Default)]
pub struct RedactRules {
    pub json_keys: Vec<String>,
    pub xml_tags: Vec<String>,
    pub patterns: Vec<String>,
    pub replacement: Option<String>,
}

impl RedactRules {
    /// Adds these rules to a base configuration.
    pub fn apply(&self, base: RedactionConfig) -> RedactionConfig {
        let mut config = base;
        for key in &self.json_keys {
            config = config.redact_json_key(key);
        }
        for tag in &self.xml_tags {
            config = config.redact_xml_tag(tag);
        }
        for pattern in &self.patterns {
            config = config.redact_body_pattern(pattern);
        }
        if let Some(replacement) = &self.replacement {
            config = config.with_replacement(replacement);
        }
        config
    }
}

/// Redacts a text body.
pub fn redact(out: &mut impl Write, body: &[u8], config: &RedactionConfig) -> Result<()> {
    let engine = RedactionEngine::try_new(config).context("Invalid redaction rules")?;
    let text = std::str::from_utf8(body).context("Body is not UTF-8 text")?;
    write!(out, "{}", engine.redact_body(text))?;
    Ok(())
}

/// Reports how a body would be classified and which parser would take it.
pub fn classify(out: &mut impl Write, body: &[u8], content_type: Option<&str>) -> Result<()> {
    let registry = ParserRegistry::with_defaults();

    writeln!(out, "size: {} bytes", body.len())?;
    if let Some(content_type) = content_type {
        writeln!(out, "mime: {}", binary::mime_type(content_type))?;
        writeln!(
            out,
            "binary content type: {}",
            binary::is_binary_content_type(content_type)
        )?;
    }
    writeln!(
        out,
        "binary bytes: {}",
        binary::is_binary_by_magic_bytes(body)
    )?;
    writeln!(
        out,
        "non-printable ratio: {:.3}",
        binary::non_printable_ratio(body)
    )?;
    writeln!(out, "binary: {}", binary::is_binary(content_type, body))?;
    writeln!(
        out,
        "parser: {}",
        registry
            .select(content_type, body)
            .map_or("none", |parser| parser.name())
    )?;
    Ok(())
}

// =============================================================================
// Store Commands
// =============================================================================

fn or_dash(value: Option<impl ToString>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Prints one page of transaction summaries.
pub fn list(
    out: &mut impl Write,
    query: &QueryEngine,
    filter: &TransactionFilter,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let total = query.count(filter)?;
    let summaries = query.list(filter, limit, offset)?;

    for s in &summaries {
        writeln!(
            out,
            "{:>6}  {:<7} {:>3}  {:<9} {:>8}  {}",
            s.id,
            s.method,
            or_dash(s.code),
            s.status.as_str(),
            or_dash(s.duration_ms.map(|ms| format!("{}ms", ms))),
            s.url
        )?;
    }
    writeln!(out, "{} of {} transactions", summaries.len(), total)?;
    Ok(())
}

fn write_headers(out: &mut impl Write, headers: &Headers) -> Result<()> {
    for (name, values) in headers.iter() {
        for value in values {
            writeln!(out, "{}: {}", name, value)?;
        }
    }
    Ok(())
}

fn write_body(
    out: &mut impl Write,
    registry: &ParserRegistry,
    content_type: Option<&str>,
    body: Option<&CapturedBody>,
    raw: bool,
) -> Result<()> {
    let Some(body) = body else {
        return Ok(());
    };
    writeln!(out)?;
    if body.is_truncated {
        writeln!(
            out,
            "[showing {} of {} bytes]",
            body.bytes.len(),
            body.declared_size
        )?;
    }

    if raw {
        if body.is_binary {
            write!(out, "{}", hex_dump(&body.bytes))?;
        } else {
            writeln!(out, "{}", String::from_utf8_lossy(&body.bytes))?;
        }
        return Ok(());
    }
    write_parsed(out, &registry.dispatch(content_type, &body.bytes), false)
}

/// Prints one transaction with decoded bodies.
pub fn show(out: &mut impl Write, query: &QueryEngine, id: TransactionId, raw: bool) -> Result<()> {
    let tx = query
        .get(id)
        .with_context(|| format!("Failed to load transaction {}", id))?;
    let registry = ParserRegistry::with_defaults();

    writeln!(out, "#{} {} {}", tx.id, tx.request.method, tx.request.url)?;
    writeln!(out, "Status: {}", tx.status().as_str())?;
    writeln!(out, "Started: {}", tx.started_at.to_rfc3339())?;
    if let Some(ms) = tx.duration_ms() {
        writeln!(out, "Duration: {}ms", ms)?;
    }

    writeln!(out)?;
    writeln!(out, "--- Request ---")?;
    write_headers(out, &tx.request.headers)?;
    write_body(
        out,
        &registry,
        tx.request.headers.content_type(),
        tx.request.body.as_ref(),
        raw,
    )?;

    writeln!(out)?;
    writeln!(out, "--- Response ---")?;
    let response = &tx.response;
    if let Some(error) = &response.error {
        writeln!(out, "Error: {}", error)?;
        return Ok(());
    }
    let Some(code) = response.code else {
        writeln!(out, "(pending)")?;
        return Ok(());
    };

    let mut status_line = format!("{} {}", or_dash(response.protocol.as_deref()), code);
    if let Some(message) = &response.message {
        status_line.push(' ');
        status_line.push_str(message);
    }
    writeln!(out, "{}", status_line)?;
    if let Some(tls) = &response.tls_version {
        writeln!(out, "TLS: {}", tls)?;
    }
    write_headers(out, &response.headers)?;
    write_body(
        out,
        &registry,
        response.headers.content_type(),
        response.body.as_ref(),
        raw,
    )
}

/// Writes matching transactions as a JSON export document.
pub fn export(out: &mut impl Write, query: &QueryEngine, filter: &TransactionFilter) -> Result<()> {
    writeln!(out, "{}", query.export_json(filter)?)?;
    Ok(())
}

/// Applies retention (or clears everything) and compacts the database.
pub fn cleanup(
    out: &mut impl Write,
    db: &Database,
    retention: Option<RetentionPeriod>,
    all: bool,
) -> Result<()> {
    let retention = match retention {
        Some(retention) => retention,
        None => stored_config(db)?.retention,
    };
    let query = QueryEngine::new(Arc::new(db.clone()), retention);

    let removed = if all {
        query.clear()?
    } else {
        query.apply_retention(Utc::now())?
    };
    if removed > 0 {
        db.vacuum().context("Failed to compact database")?;
    }

    info!("Cleanup removed {} transactions", removed);
    if all {
        writeln!(out, "Removed {} transactions", removed)?;
    } else {
        writeln!(
            out,
            "Removed {} transactions (retention: {})",
            removed,
            retention.as_str()
        )?;
    }
    Ok(())
}

/// Persisted capture config, or the defaults.
pub fn stored_config(db: &Database) -> Result<CaptureConfig> {
    let config = db
        .load_capture_config()
        .context("Failed to read stored configuration")?;
    if config.is_none() {
        debug!("No stored capture configuration, using defaults");
    }
    Ok(config.unwrap_or_default())
}

/// Prints the stored capture config, optionally replacing it from a file
/// first.
pub fn config(out: &mut impl Write, db: &Database, import: Option<&Path>) -> Result<()> {
    if let Some(path) = import {
        let config = CaptureConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        RedactionEngine::try_new(&config.redaction).context("Invalid redaction rules")?;
        db.save_capture_config(&config)
            .context("Failed to save configuration")?;
        info!("Imported capture configuration from {:?}", path);
    }
    writeln!(out, "{}", stored_config(db)?.to_json_string()?)?;
    Ok(())
}
