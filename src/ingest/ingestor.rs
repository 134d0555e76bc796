//! Sample ingestion
//!
//! Validates raw records and groups them into per-device sequences sorted by
//! timestamp. Malformed records are reported, never silently dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::config::IngestConfig;
use crate::error::EngineError;
use crate::ingest::record::{RawLine, RawRecord, RawTimestamp, RawValue};
use crate::types::{Sample, Unit};

/// Epoch seconds beyond this magnitude cannot be represented as an instant
const MAX_EPOCH_SECS: f64 = 8.0e12;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A rejected raw record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedSample {
    /// Position of the record in the input batch
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub reason: String,
    /// The offending record as received
    pub record: String,
}

impl MalformedSample {
    pub fn into_error(self) -> EngineError {
        EngineError::MalformedSample {
            index: self.index,
            device_id: self.device_id,
            reason: self.reason,
            record: self.record,
        }
    }
}

/// Validated samples of one device, ascending by timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStream {
    pub device_id: String,
    pub unit: Unit,
    pub samples: Vec<Sample>,
}

impl DeviceStream {
    pub fn new(device_id: impl Into<String>, unit: Unit) -> Self {
        Self {
            device_id: device_id.into(),
            unit,
            samples: Vec::new(),
        }
    }
}

/// Result of ingesting one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Per-device sequences keyed by device id
    pub streams: BTreeMap<String, DeviceStream>,
    pub rejected: Vec<MalformedSample>,
    pub accepted: usize,
}

impl IngestReport {
    pub fn into_streams(self) -> Vec<DeviceStream> {
        self.streams.into_values().collect()
    }
}

/// Sample ingestor
///
/// Duplicate timestamps from one device are kept in input order: they may be
/// legitimate repeated readings.
#[derive(Debug, Clone, Default)]
pub struct SampleIngestor {
    strict: bool,
}

impl SampleIngestor {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            strict: config.strict,
        }
    }

    /// Fail on the first malformed record
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Ingest decoded records
    pub fn ingest(&self, records: &[RawRecord]) -> Result<IngestReport, EngineError> {
        self.ingest_entries(records.iter().map(Ok))
    }

    /// Ingest NDJSON lines, reporting undecodable lines by position
    pub fn ingest_lines(&self, lines: &[RawLine]) -> Result<IngestReport, EngineError> {
        self.ingest_entries(lines.iter().map(|line| match line {
            RawLine::Record(record) => Ok(record),
            RawLine::Invalid { text, reason } => Err((text.as_str(), reason.as_str())),
        }))
    }

    fn ingest_entries<'a>(
        &self,
        entries: impl Iterator<Item = Result<&'a RawRecord, (&'a str, &'a str)>>,
    ) -> Result<IngestReport, EngineError> {
        let mut report = IngestReport::default();

        for (index, entry) in entries.enumerate() {
            let outcome = match entry {
                Ok(record) => validate_record(index, record, &report.streams),
                Err((text, reason)) => Err(MalformedSample {
                    index,
                    device_id: None,
                    reason: reason.to_string(),
                    record: text.to_string(),
                }),
            };

            match outcome {
                Ok(sample) => {
                    report
                        .streams
                        .entry(sample.device_id.clone())
                        .or_insert_with(|| DeviceStream::new(sample.device_id.clone(), sample.unit.clone()))
                        .samples
                        .push(sample);
                    report.accepted += 1;
                }
                Err(malformed) => {
                    if self.strict {
                        return Err(malformed.into_error());
                    }
                    tracing::warn!(
                        index = malformed.index,
                        device = malformed.device_id.as_deref().unwrap_or("unknown"),
                        reason = %malformed.reason,
                        "rejected malformed record"
                    );
                    report.rejected.push(malformed);
                }
            }
        }

        for stream in report.streams.values_mut() {
            // stable: equal timestamps keep input order
            stream.samples.sort_by_key(|s| s.timestamp);
        }

        tracing::debug!(
            accepted = report.accepted,
            rejected = report.rejected.len(),
            devices = report.streams.len(),
            "ingested records"
        );
        Ok(report)
    }
}

fn validate_record(
    index: usize,
    record: &RawRecord,
    streams: &BTreeMap<String, DeviceStream>,
) -> Result<Sample, MalformedSample> {
    let device_id = record.device_id.trim();
    let reject = |reason: String| MalformedSample {
        index,
        device_id: (!device_id.is_empty()).then(|| device_id.to_string()),
        reason,
        record: record.render(),
    };

    if device_id.is_empty() {
        return Err(reject("device_id is empty".to_string()));
    }
    let timestamp = parse_timestamp(&record.timestamp).map_err(reject)?;
    let value = parse_value(&record.value).map_err(reject)?;

    if let Some(existing) = streams.get(device_id) {
        if existing.unit != record.unit {
            return Err(reject(format!(
                "device declared unit {} but earlier records used {}",
                record.unit, existing.unit
            )));
        }
    }

    Ok(Sample {
        timestamp,
        value,
        device_id: device_id.to_string(),
        unit: record.unit.clone(),
    })
}

/// Resolve a raw timestamp to an absolute instant
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, String> {
    match raw {
        RawTimestamp::Epoch(secs) => {
            if !secs.is_finite() || secs.abs() > MAX_EPOCH_SECS {
                return Err(format!("epoch timestamp {secs} is out of range"));
            }
            let millis = (secs * 1000.0).round() as i64;
            DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| format!("epoch timestamp {secs} is out of range"))
        }
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| format!("timestamp {text:?} is not a recognised instant"))
        }
    }
}

/// Resolve a raw value to a finite number
pub fn parse_value(raw: &RawValue) -> Result<f64, String> {
    let value = match raw {
        RawValue::Number(v) => *v,
        RawValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("value {text:?} is not numeric"))?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("value {value} is not finite"))
    }
}
