//! Data quality assessment
//!
//! Summarises how much of an analysis rests on observed data:
//! - Coverage of the candle grid by non-empty candles
//! - Share of imputed samples and unfilled gaps
//! - Records rejected at ingestion

use serde::{Deserialize, Serialize};

use crate::types::{CandleSeries, CanonicalStream};

/// Coverage below this raises [`QualityFlag::LowCoverage`]
pub const LOW_COVERAGE: f64 = 0.5;

/// Imputed share above this raises [`QualityFlag::HighImputation`]
pub const HIGH_IMPUTATION: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    NoData,
    LowCoverage,
    HighImputation,
    UnfilledGaps,
    RejectedRecords,
    SingleDevice,
}

/// Quality summary of a canonical stream and its candles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Share of candles holding at least one sample
    pub coverage: f64,
    /// Share of canonical samples that were imputed
    pub imputed_fraction: f64,
    pub real_samples: usize,
    pub imputed_samples: usize,
    pub missing_intervals: usize,
    pub rejected_records: usize,
    pub flags: Vec<QualityFlag>,
}

/// Quality assessor
pub struct QualityAssessor;

impl QualityAssessor {
    pub fn assess(stream: &CanonicalStream, candles: &CandleSeries, rejected: usize) -> QualityReport {
        let mut flags = Vec::new();

        let coverage = if candles.is_empty() {
            0.0
        } else {
            (candles.len() - candles.empty_count()) as f64 / candles.len() as f64
        };
        if stream.is_empty() {
            flags.push(QualityFlag::NoData);
        } else if coverage < LOW_COVERAGE {
            flags.push(QualityFlag::LowCoverage);
        }

        let real_samples = stream.real_count();
        let imputed_samples = stream.imputed_count();
        let imputed_fraction = if stream.is_empty() {
            0.0
        } else {
            imputed_samples as f64 / stream.len() as f64
        };
        if imputed_fraction > HIGH_IMPUTATION {
            flags.push(QualityFlag::HighImputation);
        }

        if !stream.missing.is_empty() {
            flags.push(QualityFlag::UnfilledGaps);
        }
        if rejected > 0 {
            flags.push(QualityFlag::RejectedRecords);
        }
        if stream.devices.len() == 1 {
            flags.push(QualityFlag::SingleDevice);
        }

        QualityReport {
            coverage,
            imputed_fraction,
            real_samples,
            imputed_samples,
            missing_intervals: stream.missing.len(),
            rejected_records: rejected,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CandleAggregator;
    use crate::config::CandleConfig;
    use crate::types::{
        CanonicalSample, ImputationMethod, MissingInterval, MissingReason, Origin, Resolution,
        SamplingProfile, TimeRange, Unit,
    };
    use chrono::{TimeZone, Utc};

    fn make_stream(points: &[(i64, Origin)], devices: &[&str]) -> CanonicalStream {
        CanonicalStream {
            unit: Unit::Counts,
            devices: devices.iter().map(|d| d.to_string()).collect(),
            samples: points
                .iter()
                .map(|(t, origin)| CanonicalSample {
                    timestamp: Utc.timestamp_opt(*t, 0).unwrap(),
                    value: 1.0,
                    device_id: devices[0].to_string(),
                    origin: *origin,
                })
                .collect(),
            sampling: SamplingProfile::default(),
            missing: Vec::new(),
        }
    }

    fn minute_candles(stream: &CanonicalStream) -> CandleSeries {
        CandleAggregator::at(Resolution::Minute, &CandleConfig::default())
            .aggregate(stream, None)
            .unwrap()
            .value
    }

    #[test]
    fn test_full_coverage_two_devices() {
        let stream = make_stream(&[(0, Origin::Real), (70, Origin::Real)], &["a", "b"]);
        let report = QualityAssessor::assess(&stream, &minute_candles(&stream), 0);
        assert_eq!(report.coverage, 1.0);
        assert_eq!(report.real_samples, 2);
        assert!(report.flags.is_empty());
    }

    #[test]
    fn test_sparse_imputed_stream_is_flagged() {
        let hold = Origin::Imputed(ImputationMethod::HoldLast);
        let mut stream = make_stream(
            &[(0, Origin::Real), (10, hold), (20, hold), (300, Origin::Real)],
            &["a"],
        );
        stream.missing.push(MissingInterval {
            range: TimeRange::new(Utc.timestamp_opt(20, 0).unwrap(), Utc.timestamp_opt(300, 0).unwrap()),
            reason: MissingReason::ExceedsMaxImputeSpan,
        });
        let report = QualityAssessor::assess(&stream, &minute_candles(&stream), 2);

        // minutes 0 and 5 of six
        assert!((report.coverage - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(report.imputed_fraction, 0.5);
        assert_eq!(
            report.flags,
            vec![
                QualityFlag::LowCoverage,
                QualityFlag::HighImputation,
                QualityFlag::UnfilledGaps,
                QualityFlag::RejectedRecords,
                QualityFlag::SingleDevice,
            ]
        );
    }
}
