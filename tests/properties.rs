//! Property-based tests for candle and timeline invariants
//!
//! - Candle periods tile the aggregated range without gaps or overlaps
//! - Every OHLC value lies within the candle's low/high
//! - Every canonical sample lands in exactly one candle
//! - Coarse candles agree with the finer candles they cover
//! - Merging is independent of device input order
//! - Regularly sampled streams are never imputed
//! - The whole pipeline is deterministic

use chrono::{DateTime, TimeZone, Utc};
use kinetic_candles::aggregate::CandleAggregator;
use kinetic_candles::config::{CandleConfig, EngineConfig, ImputeConfig, SyncConfig};
use kinetic_candles::impute::Imputer;
use kinetic_candles::ingest::{DeviceStream, RawRecord};
use kinetic_candles::sync::Synchronizer;
use kinetic_candles::types::{CanonicalStream, Resolution, Sample, Unit};
use kinetic_candles::KineticsEngine;
use proptest::prelude::*;

fn at_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// Generate (offset ms within two days, value) pairs
fn arb_points() -> impl Strategy<Value = Vec<(i64, f64)>> {
    prop::collection::vec((0i64..172_800_000i64, 0.0f64..200.0f64), 1..200)
}

fn arb_resolution() -> impl Strategy<Value = Resolution> {
    prop_oneof![
        Just(Resolution::Second),
        Just(Resolution::Minute),
        Just(Resolution::Hour),
        Just(Resolution::Day),
        Just(Resolution::Week),
        (1u32..900u32).prop_map(Resolution::Seconds),
    ]
}

fn make_device(device_id: &str, points: &[(i64, f64)]) -> DeviceStream {
    let mut samples: Vec<Sample> = points
        .iter()
        .map(|(ms, value)| Sample {
            timestamp: at_ms(*ms),
            value: *value,
            device_id: device_id.to_string(),
            unit: Unit::ActivityLevel,
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp);
    DeviceStream {
        device_id: device_id.to_string(),
        unit: Unit::ActivityLevel,
        samples,
    }
}

fn make_stream(points: &[(i64, f64)]) -> CanonicalStream {
    Synchronizer::new(&SyncConfig::default())
        .synchronize(&[make_device("a", points)])
        .unwrap()
}

#[cfg(test)]
mod candle_invariants {
    use super::*;

    proptest! {
        #[test]
        fn prop_periods_are_contiguous(points in arb_points(), resolution in arb_resolution()) {
            let stream = make_stream(&points);
            let series = CandleAggregator::at(resolution, &CandleConfig::default())
                .aggregate(&stream, None)
                .unwrap()
                .value;

            prop_assert!(!series.candles.is_empty());
            prop_assert_eq!(series.candles[0].period_start, series.range.start);
            prop_assert_eq!(series.candles.last().unwrap().period_end, series.range.end);
            for pair in series.candles.windows(2) {
                prop_assert_eq!(pair[0].period_end, pair[1].period_start);
            }
            for candle in &series.candles {
                prop_assert_eq!(
                    (candle.period_end - candle.period_start).num_milliseconds(),
                    resolution.width_ms()
                );
            }
        }

        #[test]
        fn prop_ohlc_within_bounds(points in arb_points(), resolution in arb_resolution()) {
            let stream = make_stream(&points);
            let series = CandleAggregator::at(resolution, &CandleConfig::default())
                .aggregate(&stream, None)
                .unwrap()
                .value;

            for candle in series.non_empty() {
                let o = candle.ohlc.unwrap();
                prop_assert!(o.low <= o.open && o.open <= o.high);
                prop_assert!(o.low <= o.close && o.close <= o.high);
                prop_assert!(o.low <= o.mean + 1e-9 && o.mean <= o.high + 1e-9);
                prop_assert!((0.0..=1.0).contains(&candle.imputed_fraction));
            }
        }

        #[test]
        fn prop_every_sample_in_one_candle(points in arb_points(), resolution in arb_resolution()) {
            let stream = make_stream(&points);
            let series = CandleAggregator::at(resolution, &CandleConfig::default())
                .aggregate(&stream, None)
                .unwrap()
                .value;
            let binned: usize = series.candles.iter().map(|c| c.sample_count).sum();
            prop_assert_eq!(binned, stream.len());
        }

        #[test]
        fn prop_hour_candles_cover_minute_candles(points in arb_points()) {
            let stream = make_stream(&points);
            let config = CandleConfig::default();
            let hours = CandleAggregator::at(Resolution::Hour, &config)
                .aggregate(&stream, None)
                .unwrap()
                .value;
            let minutes = CandleAggregator::at(Resolution::Minute, &config)
                .aggregate(&stream, Some(hours.range))
                .unwrap()
                .value;

            for (hour, chunk) in hours.candles.iter().zip(minutes.candles.chunks(60)) {
                let count: usize = chunk.iter().map(|c| c.sample_count).sum();
                prop_assert_eq!(count, hour.sample_count);
                if let Some(o) = hour.ohlc {
                    let high = chunk.iter().filter_map(|c| c.ohlc).map(|m| m.high).fold(f64::NEG_INFINITY, f64::max);
                    let low = chunk.iter().filter_map(|c| c.ohlc).map(|m| m.low).fold(f64::INFINITY, f64::min);
                    prop_assert_eq!(o.high, high);
                    prop_assert_eq!(o.low, low);
                }
            }
        }
    }
}

#[cfg(test)]
mod timeline_invariants {
    use super::*;

    proptest! {
        #[test]
        fn prop_merge_ignores_device_order(a in arb_points(), b in arb_points(), c in arb_points()) {
            let devices = vec![make_device("wrist", &a), make_device("hip", &b), make_device("ankle", &c)];
            let mut reversed = devices.clone();
            reversed.reverse();

            let sync = Synchronizer::new(&SyncConfig::default());
            let forward = sync.synchronize(&devices).unwrap();
            let backward = sync.synchronize(&reversed).unwrap();
            prop_assert_eq!(forward.content_hash(), backward.content_hash());
            prop_assert_eq!(forward.len(), a.len() + b.len() + c.len());
            for pair in forward.samples.windows(2) {
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }

        #[test]
        fn prop_regular_stream_is_never_imputed(
            start in 0i64..1_000_000i64,
            interval in 1_000i64..120_000i64,
            values in prop::collection::vec(0.0f64..100.0, 2..300),
        ) {
            let points: Vec<(i64, f64)> = values
                .iter()
                .enumerate()
                .map(|(k, v)| (start + k as i64 * interval, *v))
                .collect();
            let stream = make_stream(&points);
            let imputed = Imputer::new(&ImputeConfig::default()).impute(&stream).unwrap();
            prop_assert_eq!(imputed.imputed_count(), 0);
            prop_assert_eq!(imputed.len(), points.len());
            prop_assert!(imputed.missing.is_empty());
        }

        #[test]
        fn prop_imputation_keeps_real_samples(points in arb_points()) {
            let stream = make_stream(&points);
            let imputed = Imputer::new(&ImputeConfig::default()).impute(&stream).unwrap();
            let real: Vec<_> = imputed
                .samples
                .iter()
                .filter(|s| !s.origin.is_imputed())
                .map(|s| (s.timestamp, s.value.to_bits()))
                .collect();
            let before: Vec<_> = stream.samples.iter().map(|s| (s.timestamp, s.value.to_bits())).collect();
            prop_assert_eq!(real, before);
        }
    }
}

#[cfg(test)]
mod determinism {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_analysis_is_repeatable(points in arb_points()) {
            let records: Vec<RawRecord> = points
                .iter()
                .map(|(ms, v)| RawRecord::epoch((*ms / 1000) as f64, *v, "wrist", Unit::ActivityLevel))
                .collect();
            let engine = KineticsEngine::new(EngineConfig::default()).unwrap();
            let first = engine.analyze(&records).unwrap();
            let second = engine.analyze(&records).unwrap();

            prop_assert_eq!(&first.candles, &second.candles);
            prop_assert_eq!(&first.features, &second.features);
            prop_assert_eq!(&first.matches, &second.matches);
            prop_assert_eq!(&first.cache_key, &second.cache_key);
        }
    }
}
