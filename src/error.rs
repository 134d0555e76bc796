//! Error types for KinetiCandles

use thiserror::Error;

use crate::types::{Feature, Resolution, TimeRange, Unit};

/// Errors that can occur anywhere in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed sample at record {index} (device {}): {reason}; record: {record}", device_id.as_deref().unwrap_or("unknown"))]
    MalformedSample {
        index: usize,
        device_id: Option<String>,
        reason: String,
        record: String,
    },

    #[error("Unit mismatch: device {device} reports {unit} but {reference_device} reports {reference_unit} and no conversion is configured (samples {range})")]
    UnitMismatch {
        reference_device: String,
        reference_unit: Unit,
        device: String,
        unit: Unit,
        range: TimeRange,
    },

    #[error("Insufficient data for {feature}: need {required}, got {available} ({reason})")]
    InsufficientData {
        feature: Feature,
        required: usize,
        available: usize,
        reason: String,
    },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device {0} supplied more than one stream")]
    DuplicateDevice(String),

    #[error("Canonical stream is empty and no time range was requested")]
    EmptyStream,

    #[error("Range {range} needs {periods} {resolution} candles, more than the limit of {limit}")]
    TooManyPeriods {
        range: TimeRange,
        resolution: Resolution,
        periods: i64,
        limit: usize,
    },

    #[error("Timestamp {0} ms is outside the representable range")]
    TimestampOutOfRange(i64),

    #[error("Unknown pattern template: {0}")]
    UnknownTemplate(String),

    #[error("Pattern template {0} is already registered")]
    DuplicateTemplate(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_unit_mismatch_names_devices_and_range() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
        );
        let err = EngineError::UnitMismatch {
            reference_device: "wrist".to_string(),
            reference_unit: Unit::MilliG,
            device: "hip".to_string(),
            unit: Unit::Counts,
            range,
        };
        let msg = err.to_string();
        assert!(msg.contains("wrist"));
        assert!(msg.contains("hip"));
        assert!(msg.contains("2024-01-15T08:00:00"));
    }

    #[test]
    fn test_malformed_sample_without_device() {
        let err = EngineError::MalformedSample {
            index: 4,
            device_id: None,
            reason: "value is not finite".to_string(),
            record: "{}".to_string(),
        };
        assert!(err.to_string().contains("device unknown"));
    }
}
