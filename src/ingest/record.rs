//! Raw record schema
//!
//! A raw record is whatever an import collaborator hands the engine: a
//! timestamp in one of several representations, a value, a device id and a
//! declared unit. Nothing here is validated yet.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Unit;

/// Timestamp as supplied by the importer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Seconds since the Unix epoch
    Epoch(f64),
    /// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC
    Text(String),
}

/// Value as supplied by the importer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

/// One unvalidated reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: RawTimestamp,
    pub value: RawValue,
    pub device_id: String,
    pub unit: Unit,
}

impl RawRecord {
    /// Record stamped in epoch seconds
    pub fn epoch(secs: f64, value: f64, device_id: &str, unit: Unit) -> Self {
        Self {
            timestamp: RawTimestamp::Epoch(secs),
            value: RawValue::Number(value),
            device_id: device_id.to_string(),
            unit,
        }
    }

    /// Record stamped with a textual timestamp
    pub fn text(timestamp: &str, value: f64, device_id: &str, unit: Unit) -> Self {
        Self {
            timestamp: RawTimestamp::Text(timestamp.to_string()),
            value: RawValue::Number(value),
            device_id: device_id.to_string(),
            unit,
        }
    }

    /// Compact JSON rendering used in error reports
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// One input line: either a decoded record or the text that failed to decode
#[derive(Debug, Clone, PartialEq)]
pub enum RawLine {
    Record(RawRecord),
    Invalid { text: String, reason: String },
}

/// Parse a JSON array of records
pub fn parse_array(json: &str) -> Result<Vec<RawRecord>, EngineError> {
    let records: Vec<RawRecord> = serde_json::from_str(json)?;
    Ok(records)
}

/// Parse NDJSON (newline-delimited JSON) records
///
/// Blank lines are skipped. A line that does not decode is kept as
/// [`RawLine::Invalid`] so the ingestor can report it with its position
/// instead of aborting the whole batch.
pub fn parse_ndjson(ndjson: &str) -> Vec<RawLine> {
    ndjson
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => RawLine::Record(record),
            Err(e) => RawLine::Invalid {
                text: line.to_string(),
                reason: format!("invalid JSON record: {e}"),
            },
        })
        .collect()
}
