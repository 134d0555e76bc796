//! Gap detection and imputation
//!
//! A gap is a spacing between consecutive canonical samples strictly greater
//! than `expected_sampling_interval × gap_factor`. Gaps up to
//! `max_impute_span` are filled on the expected cadence under the configured
//! policy; longer gaps, and every gap under `mark_missing`, are recorded as
//! explicit missing intervals.

use chrono::Duration;

use crate::cancel::CancelToken;
use crate::config::ImputeConfig;
use crate::error::EngineError;
use crate::types::{
    CanonicalSample, CanonicalStream, ImputationMethod, MissingInterval, MissingReason, Origin,
    TimeRange,
};

/// Imputer for filling gaps in a canonical stream
#[derive(Debug, Clone, Default)]
pub struct Imputer {
    config: ImputeConfig,
    cancel: CancelToken,
}

impl Imputer {
    pub fn new(config: &ImputeConfig) -> Self {
        Self {
            config: config.clone(),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Return a new stream with gaps filled or marked
    pub fn impute(&self, stream: &CanonicalStream) -> Result<CanonicalStream, EngineError> {
        let interval_ms = match self
            .config
            .expected_sampling_interval_ms
            .or(stream.sampling.finest_interval_ms)
        {
            Some(ms) if ms > 0 => ms,
            _ => {
                tracing::debug!("no sampling interval known; skipping imputation");
                return Ok(stream.clone());
            }
        };
        let threshold = interval_ms as f64 * self.config.gap_factor;
        let method = self.config.policy.method();

        let mut samples = Vec::with_capacity(stream.samples.len());
        let mut missing = stream.missing.clone();
        let mut filled = 0usize;

        for (i, current) in stream.samples.iter().enumerate() {
            samples.push(current.clone());
            let Some(next) = stream.samples.get(i + 1) else {
                break;
            };
            let gap_ms = (next.timestamp - current.timestamp).num_milliseconds();
            if gap_ms as f64 <= threshold {
                continue;
            }
            self.cancel.check("impute")?;

            let range = TimeRange::new(current.timestamp, next.timestamp);
            let reason = if gap_ms > self.config.max_impute_span_ms {
                Some(MissingReason::ExceedsMaxImputeSpan)
            } else if method.is_none() {
                Some(MissingReason::MarkedMissing)
            } else {
                None
            };

            match (reason, method) {
                (Some(reason), _) => {
                    tracing::warn!(
                        start = %range.start,
                        end = %range.end,
                        gap_ms,
                        ?reason,
                        "leaving gap unfilled"
                    );
                    missing.push(MissingInterval { range, reason });
                }
                (None, Some(method)) => {
                    let before = samples.len();
                    fill_gap(current, next, interval_ms, method, &mut samples);
                    filled += samples.len() - before;
                }
                (None, None) => {}
            }
        }

        missing.sort_by_key(|m| m.range.start);
        tracing::debug!(
            interval_ms,
            filled,
            missing = missing.len(),
            "imputed canonical stream"
        );

        Ok(CanonicalStream {
            unit: stream.unit.clone(),
            devices: stream.devices.clone(),
            samples,
            sampling: stream.sampling.clone(),
            missing,
        })
    }
}

/// Push imputed samples at `t0 + k × interval` for every point strictly before `t1`
fn fill_gap(
    left: &CanonicalSample,
    right: &CanonicalSample,
    interval_ms: i64,
    method: ImputationMethod,
    out: &mut Vec<CanonicalSample>,
) {
    let span_ms = (right.timestamp - left.timestamp).num_milliseconds() as f64;
    let mut offset_ms = interval_ms;
    while let Some(timestamp) = left
        .timestamp
        .checked_add_signed(Duration::milliseconds(offset_ms))
        .filter(|t| *t < right.timestamp)
    {
        let value = match method {
            ImputationMethod::Linear => {
                let frac = offset_ms as f64 / span_ms;
                left.value + (right.value - left.value) * frac
            }
            ImputationMethod::HoldLast => left.value,
            ImputationMethod::HoldNext => right.value,
            ImputationMethod::ZeroFill => 0.0,
        };
        out.push(CanonicalSample {
            timestamp,
            value,
            device_id: left.device_id.clone(),
            origin: Origin::Imputed(method),
        });
        offset_ms += interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImputationPolicy;
    use crate::types::{SamplingProfile, Unit};
    use chrono::{TimeZone, Utc};

    fn make_stream(points: &[(i64, f64)]) -> CanonicalStream {
        CanonicalStream {
            unit: Unit::ActivityLevel,
            devices: vec!["a".to_string()],
            samples: points
                .iter()
                .map(|(t, v)| CanonicalSample {
                    timestamp: Utc.timestamp_opt(*t, 0).unwrap(),
                    value: *v,
                    device_id: "a".to_string(),
                    origin: Origin::Real,
                })
                .collect(),
            sampling: SamplingProfile {
                finest_interval_ms: Some(10_000),
                ..Default::default()
            },
            missing: Vec::new(),
        }
    }

    fn make_imputer(policy: ImputationPolicy) -> Imputer {
        Imputer::new(&ImputeConfig {
            expected_sampling_interval_ms: Some(10_000),
            policy,
            ..Default::default()
        })
    }

    #[test]
    fn test_no_imputation_below_threshold() {
        // 50 s spacing equals the threshold and is not a gap
        let stream = make_stream(&[(0, 1.0), (10, 2.0), (60, 3.0), (70, 4.0)]);
        let out = make_imputer(ImputationPolicy::Linear).impute(&stream).unwrap();
        assert_eq!(out.imputed_count(), 0);
        assert_eq!(out.samples, stream.samples);
    }

    #[test]
    fn test_linear_fill() {
        let stream = make_stream(&[(0, 0.0), (100, 100.0)]);
        let out = make_imputer(ImputationPolicy::Linear).impute(&stream).unwrap();
        assert_eq!(out.len(), 11);
        assert_eq!(out.imputed_count(), 9);
        let fifth = &out.samples[5];
        assert_eq!(fifth.timestamp.timestamp(), 50);
        assert!((fifth.value - 50.0).abs() < 1e-9);
        assert_eq!(fifth.origin, Origin::Imputed(ImputationMethod::Linear));
    }

    #[test]
    fn test_hold_policies_and_zero_fill() {
        let stream = make_stream(&[(0, 4.0), (100, 8.0)]);
        for (policy, expected) in [
            (ImputationPolicy::HoldLast, 4.0),
            (ImputationPolicy::HoldNext, 8.0),
            (ImputationPolicy::ZeroFill, 0.0),
        ] {
            let out = make_imputer(policy).impute(&stream).unwrap();
            assert!(out.samples[1..10].iter().all(|s| s.value == expected), "{policy:?}");
        }
    }

    #[test]
    fn test_long_gap_left_missing_regardless_of_policy() {
        let stream = make_stream(&[(0, 1.0), (7200, 2.0)]);
        let out = make_imputer(ImputationPolicy::HoldLast).impute(&stream).unwrap();
        assert_eq!(out.imputed_count(), 0);
        assert_eq!(out.missing.len(), 1);
        assert_eq!(out.missing[0].reason, MissingReason::ExceedsMaxImputeSpan);
        assert_eq!(out.missing[0].range.end.timestamp(), 7200);
    }

    #[test]
    fn test_mark_missing_leaves_hole() {
        let stream = make_stream(&[(0, 1.0), (500, 2.0)]);
        let out = make_imputer(ImputationPolicy::MarkMissing).impute(&stream).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.missing[0].reason, MissingReason::MarkedMissing);
    }

    #[test]
    fn test_imputed_samples_take_left_device() {
        let mut stream = make_stream(&[(0, 1.0), (500, 2.0)]);
        stream.samples[1].device_id = "b".to_string();
        let out = make_imputer(ImputationPolicy::HoldLast).impute(&stream).unwrap();
        assert!(out.samples[1..out.len() - 1].iter().all(|s| s.device_id == "a"));
    }
}
