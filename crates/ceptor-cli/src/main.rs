//! Ceptor - inspect, redact and query captured HTTP traffic.
//!
//! Body commands work on files (or stdin); store commands work on the
//! capture database.

mod commands;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ceptor_core::{
    CaptureConfig, QueryEngine, RedactionConfig, RetentionPeriod, TransactionFilter,
    TransactionId, TransactionStatus,
};
use ceptor_storage::Database;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::RedactRules;

/// Ceptor - inspect, redact and query captured HTTP traffic
#[derive(Parser, Debug)]
#[command(name = "ceptor", version, about)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Capture database (defaults to the app data directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a body for display
    Inspect {
        /// Body file, or - for stdin
        file: PathBuf,

        /// Declared Content-Type
        #[arg(short = 't', long)]
        content_type: Option<String>,

        /// Print parser metadata
        #[arg(long)]
        meta: bool,

        /// Print the parse result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Redact a text body
    Redact {
        /// Body file, or - for stdin
        file: PathBuf,

        /// Capture config whose redaction rules apply
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// JSON key to redact (repeatable)
        #[arg(long = "json-key")]
        json_keys: Vec<String>,

        /// XML tag to redact (repeatable)
        #[arg(long = "xml-tag")]
        xml_tags: Vec<String>,

        /// Regex to redact (repeatable)
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Replacement token
        #[arg(long)]
        replacement: Option<String>,
    },

    /// Show binary detection and parser selection for a body
    Classify {
        /// Body file, or - for stdin
        file: PathBuf,

        /// Declared Content-Type
        #[arg(short = 't', long)]
        content_type: Option<String>,
    },

    /// List captured transactions, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one transaction with decoded bodies
    Show {
        id: TransactionId,

        /// Print bodies undecoded
        #[arg(long)]
        raw: bool,
    },

    /// Export transactions as JSON
    Export {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Delete transactions outside the retention window
    Cleanup {
        /// one_hour, one_day, one_week, one_month or forever
        #[arg(long, value_parser = parse_retention)]
        retention: Option<RetentionPeriod>,

        /// Delete every transaction
        #[arg(long, conflicts_with = "retention")]
        all: bool,
    },

    /// Show or import the stored capture configuration
    Config {
        /// JSON capture config to validate and store
        #[arg(long, value_name = "PATH")]
        import: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct FilterArgs {
    /// HTTP method
    #[arg(long)]
    method: Option<String>,

    /// requested, complete or failed
    #[arg(long, value_parser = parse_status)]
    status: Option<TransactionStatus>,

    /// Case-insensitive URL substring
    #[arg(long)]
    search: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> TransactionFilter {
        let mut filter = TransactionFilter::all();
        if let Some(method) = &self.method {
            filter = filter.with_method(method);
        }
        if let Some(status) = self.status {
            filter = filter.with_status(status);
        }
        if let Some(search) = &self.search {
            filter = filter.with_search(search);
        }
        filter
    }
}

fn parse_retention(s: &str) -> std::result::Result<RetentionPeriod, String> {
    RetentionPeriod::parse(s).ok_or_else(|| format!("unknown retention period '{}'", s))
}

fn parse_status(s: &str) -> std::result::Result<TransactionStatus, String> {
    TransactionStatus::parse(s).ok_or_else(|| format!("unknown status '{}'", s))
}

/// Initialize logging to stderr so command output stays clean.
fn init_logging(args: &Args) {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ceptor={},warn", log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

fn open_db(args: &Args) -> Result<Database> {
    let db = match &args.db {
        Some(path) => Database::with_path(path),
        None => Database::new(),
    };
    db.context("Failed to open database")
}

fn query_engine(db: &Database) -> Result<QueryEngine> {
    let retention = commands::stored_config(db)?.retention;
    Ok(QueryEngine::new(Arc::new(db.clone()), retention))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    debug!("Running {:?}", args.command);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &args.command {
        Command::Inspect {
            file,
            content_type,
            meta,
            json,
        } => {
            let body = commands::read_input(file)?;
            commands::inspect(&mut out, &body, content_type.as_deref(), *meta, *json)?;
        }
        Command::Redact {
            file,
            config,
            json_keys,
            xml_tags,
            patterns,
            replacement,
        } => {
            let base = match config {
                Some(path) => {
                    CaptureConfig::load(path)
                        .with_context(|| format!("Failed to load {}", path.display()))?
                        .redaction
                }
                None => RedactionConfig::new(),
            };
            let rules = RedactRules {
                json_keys: json_keys.clone(),
                xml_tags: xml_tags.clone(),
                patterns: patterns.clone(),
                replacement: replacement.clone(),
            };
            let body = commands::read_input(file)?;
            commands::redact(&mut out, &body, &rules.apply(base))?;
        }
        Command::Classify { file, content_type } => {
            let body = commands::read_input(file)?;
            commands::classify(&mut out, &body, content_type.as_deref())?;
        }
        Command::List {
            filter,
            limit,
            offset,
        } => {
            let db = open_db(&args)?;
            let query = query_engine(&db)?;
            commands::list(&mut out, &query, &filter.to_filter(), *limit, *offset)?;
        }
        Command::Show { id, raw } => {
            let db = open_db(&args)?;
            let query = query_engine(&db)?;
            commands::show(&mut out, &query, *id, *raw)?;
        }
        Command::Export { filter } => {
            let db = open_db(&args)?;
            let query = query_engine(&db)?;
            commands::export(&mut out, &query, &filter.to_filter())?;
        }
        Command::Cleanup { retention, all } => {
            let db = open_db(&args)?;
            commands::cleanup(&mut out, &db, *retention, *all)?;
        }
        Command::Config { import } => {
            let db = open_db(&args)?;
            commands::config(&mut out, &db, import.as_deref())?;
        }
    }

    out.flush()?;
    Ok(())
}
