//! Capture configuration.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::redaction::RedactionConfig;
use crate::truncate::DEFAULT_MAX_CONTENT_LENGTH;

/// How long captured transactions are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPeriod {
    OneHour,
    #[default]
    OneDay,
    OneWeek,
    OneMonth,
    /// Never clean up.
    Forever,
}

impl RetentionPeriod {
    /// Retention window in milliseconds; 0 means no cleanup.
    pub fn as_millis(&self) -> i64 {
        const HOUR: i64 = 60 * 60 * 1000;
        match self {
            RetentionPeriod::OneHour => HOUR,
            RetentionPeriod::OneDay => 24 * HOUR,
            RetentionPeriod::OneWeek => 7 * 24 * HOUR,
            RetentionPeriod::OneMonth => 30 * 24 * HOUR,
            RetentionPeriod::Forever => 0,
        }
    }

    /// Oldest start time still retained at `now`, or `None` for `Forever`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.as_millis() {
            0 => None,
            millis => Some(now - Duration::milliseconds(millis)),
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPeriod::OneHour => "one_hour",
            RetentionPeriod::OneDay => "one_day",
            RetentionPeriod::OneWeek => "one_week",
            RetentionPeriod::OneMonth => "one_month",
            RetentionPeriod::Forever => "forever",
        }
    }

    /// Parse from string. Accepts the snake_case names and the short forms
    /// `1h`, `1d`, `1w`, `1m`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one_hour" | "1h" => Some(RetentionPeriod::OneHour),
            "one_day" | "1d" => Some(RetentionPeriod::OneDay),
            "one_week" | "1w" => Some(RetentionPeriod::OneWeek),
            "one_month" | "1m" => Some(RetentionPeriod::OneMonth),
            "forever" => Some(RetentionPeriod::Forever),
            _ => None,
        }
    }
}

/// Configuration consumed by the capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Master switch; when off, nothing is recorded.
    pub enabled: bool,
    /// Byte cap for request bodies.
    pub max_request_body_bytes: i64,
    /// Byte cap for response bodies.
    pub max_response_body_bytes: i64,
    /// Retention window used by cleanup.
    pub retention: RetentionPeriod,
    /// Redaction rules applied before persistence.
    pub redaction: RedactionConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_request_body_bytes: DEFAULT_MAX_CONTENT_LENGTH as i64,
            max_response_body_bytes: DEFAULT_MAX_CONTENT_LENGTH as i64,
            retention: RetentionPeriod::default(),
            redaction: RedactionConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serializes to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
