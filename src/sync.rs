//! Multi-device synchronization
//!
//! Merges per-device sequences onto one timeline. Clock offsets and unit
//! conversions are applied per device in parallel, then a k-way merge keyed on
//! `(timestamp, device_id, index)` interleaves every sample. Nothing is
//! averaged across devices here.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::ingest::DeviceStream;
use crate::types::{
    CanonicalSample, CanonicalStream, Origin, SamplingProfile, TimeRange, Unit, MS_PER_MINUTE,
};

/// Device sequence after offset and unit correction
struct Prepared<'a> {
    device_id: &'a str,
    points: Vec<(DateTime<Utc>, f64)>,
    median_interval_ms: Option<i64>,
}

/// Synchronizer for merging device streams
#[derive(Debug, Clone, Default)]
pub struct Synchronizer {
    config: SyncConfig,
    cancel: CancelToken,
}

impl Synchronizer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.clone(),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Merge device streams into one canonical stream.
    ///
    /// The result does not depend on the order of `streams`.
    pub fn synchronize(&self, streams: &[DeviceStream]) -> Result<CanonicalStream, EngineError> {
        let mut seen = BTreeSet::new();
        for stream in streams {
            if !seen.insert(stream.device_id.as_str()) {
                return Err(EngineError::DuplicateDevice(stream.device_id.clone()));
            }
        }

        let mut ordered: Vec<&DeviceStream> = streams.iter().collect();
        ordered.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let unit = self
            .config
            .canonical_unit
            .clone()
            .or_else(|| ordered.first().map(|s| s.unit.clone()))
            .unwrap_or(Unit::ActivityLevel);
        let reference = ordered
            .iter()
            .find(|s| s.unit == unit)
            .map(|s| s.device_id.as_str())
            .unwrap_or("configuration");

        let prepared: Vec<Result<Prepared<'_>, EngineError>> = ordered
            .par_iter()
            .map(|stream| self.prepare(stream, &unit, reference))
            .collect();
        // first error in device-id order, independent of scheduling
        let prepared = prepared.into_iter().collect::<Result<Vec<_>, _>>()?;
        self.cancel.check("synchronize")?;

        let samples = merge(&prepared);
        let sampling = sampling_profile(&prepared);

        tracing::debug!(
            devices = prepared.len(),
            samples = samples.len(),
            finest_interval_ms = ?sampling.finest_interval_ms,
            "synchronized device streams"
        );

        Ok(CanonicalStream {
            unit,
            devices: ordered.iter().map(|s| s.device_id.clone()).collect(),
            samples,
            sampling,
            missing: Vec::new(),
        })
    }

    fn prepare<'a>(
        &self,
        stream: &'a DeviceStream,
        unit: &Unit,
        reference: &str,
    ) -> Result<Prepared<'a>, EngineError> {
        self.cancel.check("synchronize")?;

        let conversion = if &stream.unit == unit {
            None
        } else {
            match self.config.conversion(&stream.unit, unit) {
                Some(conv) => {
                    tracing::warn!(
                        device = %stream.device_id,
                        from = %stream.unit,
                        to = %unit,
                        scale = conv.scale,
                        offset = conv.offset,
                        "converting device unit"
                    );
                    Some(conv)
                }
                None => {
                    return Err(EngineError::UnitMismatch {
                        reference_device: reference.to_string(),
                        reference_unit: unit.clone(),
                        device: stream.device_id.clone(),
                        unit: stream.unit.clone(),
                        range: device_range(stream),
                    })
                }
            }
        };

        let offset_ms = self
            .config
            .device_offsets_ms
            .get(&stream.device_id)
            .copied()
            .unwrap_or(0);
        let offset = Duration::try_milliseconds(offset_ms).ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "sync.device_offsets_ms for {} is out of range: {offset_ms}",
                stream.device_id
            ))
        })?;

        let points = stream
            .samples
            .iter()
            .map(|s| {
                let ts = s.timestamp.checked_add_signed(offset).ok_or(
                    EngineError::TimestampOutOfRange(
                        s.timestamp.timestamp_millis().saturating_add(offset_ms),
                    ),
                )?;
                let value = conversion.map_or(s.value, |c| c.apply(s.value));
                Ok((ts, value))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Prepared {
            device_id: &stream.device_id,
            median_interval_ms: median_interval_ms(&points),
            points,
        })
    }
}

/// k-way merge; devices arrive sorted by id so the heap key is total
fn merge(prepared: &[Prepared<'_>]) -> Vec<CanonicalSample> {
    let total = prepared.iter().map(|p| p.points.len()).sum();
    let mut merged = Vec::with_capacity(total);
    let mut heap = BinaryHeap::with_capacity(prepared.len());

    for (device, p) in prepared.iter().enumerate() {
        if let Some((ts, _)) = p.points.first() {
            heap.push(Reverse((ts.timestamp_millis(), device, 0usize)));
        }
    }

    while let Some(Reverse((_, device, index))) = heap.pop() {
        let p = &prepared[device];
        let (timestamp, value) = p.points[index];
        merged.push(CanonicalSample {
            timestamp,
            value,
            device_id: p.device_id.to_string(),
            origin: Origin::Real,
        });
        if let Some((next_ts, _)) = p.points.get(index + 1) {
            heap.push(Reverse((next_ts.timestamp_millis(), device, index + 1)));
        }
    }
    merged
}

fn sampling_profile(prepared: &[Prepared<'_>]) -> SamplingProfile {
    let device_intervals_ms: BTreeMap<String, i64> = prepared
        .iter()
        .filter_map(|p| p.median_interval_ms.map(|i| (p.device_id.to_string(), i)))
        .collect();
    let finest_interval_ms = device_intervals_ms.values().copied().min();
    SamplingProfile {
        has_sub_minute_resolution: finest_interval_ms.is_some_and(|i| i < MS_PER_MINUTE),
        finest_interval_ms,
        device_intervals_ms,
    }
}

/// Median of the strictly positive spacings between consecutive points
pub(crate) fn median_interval_ms(points: &[(DateTime<Utc>, f64)]) -> Option<i64> {
    let mut diffs: Vec<i64> = points
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).num_milliseconds())
        .filter(|d| *d > 0)
        .collect();
    if diffs.is_empty() {
        return None;
    }
    diffs.sort_unstable();
    let mid = diffs.len() / 2;
    if diffs.len() % 2 == 0 {
        Some((diffs[mid - 1] + diffs[mid]) / 2)
    } else {
        Some(diffs[mid])
    }
}

fn device_range(stream: &DeviceStream) -> TimeRange {
    match (stream.samples.first(), stream.samples.last()) {
        (Some(first), Some(last)) => TimeRange::new(
            first.timestamp,
            last.timestamp + Duration::milliseconds(1),
        ),
        _ => TimeRange::new(DateTime::<Utc>::default(), DateTime::<Utc>::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitConversion;
    use crate::types::Sample;
    use chrono::TimeZone;

    fn make_stream(device: &str, unit: Unit, points: &[(i64, f64)]) -> DeviceStream {
        DeviceStream {
            device_id: device.to_string(),
            unit: unit.clone(),
            samples: points
                .iter()
                .map(|(t, v)| Sample {
                    timestamp: Utc.timestamp_opt(*t, 0).unwrap(),
                    value: *v,
                    device_id: device.to_string(),
                    unit: unit.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_merge_interleaves_and_breaks_ties_by_device() {
        let a = make_stream("a", Unit::MilliG, &[(0, 1.0), (20, 2.0), (40, 3.0)]);
        let b = make_stream("b", Unit::MilliG, &[(0, 10.0), (30, 20.0)]);
        let stream = Synchronizer::default().synchronize(&[b, a]).unwrap();

        let order: Vec<(i64, &str)> = stream
            .samples
            .iter()
            .map(|s| (s.timestamp.timestamp(), s.device_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(0, "a"), (0, "b"), (20, "a"), (30, "b"), (40, "a")]
        );
        assert_eq!(stream.devices, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stream.unit, Unit::MilliG);
    }

    #[test]
    fn test_sampling_profile_uses_finest_device() {
        let a = make_stream("a", Unit::MilliG, &[(0, 1.0), (20, 2.0), (40, 3.0)]);
        let b = make_stream("b", Unit::MilliG, &[(0, 1.0), (60, 2.0), (120, 3.0)]);
        let stream = Synchronizer::default().synchronize(&[a, b]).unwrap();
        assert_eq!(stream.sampling.device_intervals_ms["a"], 20_000);
        assert_eq!(stream.sampling.device_intervals_ms["b"], 60_000);
        assert_eq!(stream.sampling.finest_interval_ms, Some(20_000));
        assert!(stream.sampling.has_sub_minute_resolution);
    }

    #[test]
    fn test_unit_mismatch_without_conversion() {
        let a = make_stream("wrist", Unit::MilliG, &[(0, 1.0)]);
        let b = make_stream("hip", Unit::Counts, &[(100, 1.0), (200, 2.0)]);
        let err = Synchronizer::default().synchronize(&[a, b]).unwrap_err();
        match err {
            EngineError::UnitMismatch {
                reference_device,
                device,
                range,
                ..
            } => {
                // "hip" sorts first, so its unit is canonical
                assert_eq!(reference_device, "hip");
                assert_eq!(device, "wrist");
                assert_eq!(range.start.timestamp(), 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_configured_conversion_and_offset() {
        let config = SyncConfig {
            canonical_unit: Some(Unit::MilliG),
            unit_conversions: vec![UnitConversion {
                from: Unit::Gravity,
                to: Unit::MilliG,
                scale: 1000.0,
                offset: 0.0,
            }],
            device_offsets_ms: [("band".to_string(), -5_000)].into_iter().collect(),
        };
        let band = make_stream("band", Unit::Gravity, &[(10, 0.25)]);
        let watch = make_stream("watch", Unit::MilliG, &[(0, 100.0)]);
        let stream = Synchronizer::new(&config).synchronize(&[watch, band]).unwrap();
        assert_eq!(stream.samples[1].device_id, "band");
        assert_eq!(stream.samples[1].timestamp.timestamp(), 5);
        assert_eq!(stream.samples[1].value, 250.0);
    }

    #[test]
    fn test_extreme_offsets_are_errors() {
        let a = make_stream("a", Unit::MilliG, &[(0, 1.0)]);
        let config = SyncConfig {
            device_offsets_ms: [("a".to_string(), i64::MIN)].into_iter().collect(),
            ..Default::default()
        };
        let err = Synchronizer::new(&config).synchronize(&[a.clone()]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(msg) if msg.contains("device_offsets_ms")));

        let config = SyncConfig {
            device_offsets_ms: [("a".to_string(), i64::MAX)].into_iter().collect(),
            ..Default::default()
        };
        let err = Synchronizer::new(&config).synchronize(&[a]).unwrap_err();
        assert!(matches!(err, EngineError::TimestampOutOfRange(_)));
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let a = make_stream("a", Unit::MilliG, &[(0, 1.0)]);
        let err = Synchronizer::default()
            .synchronize(&[a.clone(), a])
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDevice(id) if id == "a"));
    }

    #[test]
    fn test_cancelled_before_merge() {
        let token = CancelToken::new();
        token.cancel();
        let a = make_stream("a", Unit::MilliG, &[(0, 1.0)]);
        let err = Synchronizer::default()
            .with_cancel(token)
            .synchronize(&[a])
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }
}
