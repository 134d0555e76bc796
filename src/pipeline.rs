//! Pipeline orchestration
//!
//! [`KineticsEngine`] wires the stages together:
//! raw records → ingest → synchronize → impute → candles → {K-line, features}
//! → pattern matches, plus per-day classification. Every stage is a pure
//! function of its input and the engine's configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;

use crate::aggregate::{CandleAggregator, DEFAULT_CHUNK_CANDLES};
use crate::cancel::{CancelToken, Completion, Outcome};
use crate::config::{CacheKey, CandleConfig, EngineConfig};
use crate::error::EngineError;
use crate::features::FeatureExtractor;
use crate::impute::Imputer;
use crate::ingest::{DeviceStream, IngestReport, MalformedSample, RawLine, RawRecord, SampleIngestor};
use crate::kline::KLineComputer;
use crate::patterns::{PatternInput, PatternLibrary, PatternMatcher};
use crate::sync::Synchronizer;
use crate::types::{
    instant_from_ms, CandleSeries, CanonicalStream, FeatureVector, KLine, PatternMatch, Resolution,
    TimeRange, MS_PER_DAY,
};

const HOURS_PER_DAY: i64 = 24;

/// Classification of one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayClassification {
    pub date: NaiveDate,
    pub window: TimeRange,
    /// Highest-ranked template, if any matched
    pub top_template: Option<String>,
    pub matches: Vec<PatternMatch>,
}

/// Days sharing the same top template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayGroup {
    /// `None` collects days no template matched
    pub template: Option<String>,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayReport {
    pub days: Vec<DayClassification>,
    pub groups: Vec<DayGroup>,
}

/// Everything derived from one batch of records
#[derive(Debug, Clone)]
pub struct Analysis {
    pub accepted: usize,
    pub rejected: Vec<MalformedSample>,
    pub stream: CanonicalStream,
    pub candles: CandleSeries,
    /// Absent when an earlier stage was cancelled
    pub kline: Option<KLine>,
    pub features: Option<FeatureVector>,
    pub matches: Vec<PatternMatch>,
    pub days: Option<DayReport>,
    pub cache_key: CacheKey,
    pub completion: Completion,
}

/// Engine holding configuration, template library and worker pool
#[derive(Debug, Clone)]
pub struct KineticsEngine {
    config: EngineConfig,
    library: PatternLibrary,
    pool: Option<Arc<rayon::ThreadPool>>,
    cancel: CancelToken,
}

impl KineticsEngine {
    /// Create an engine with the built-in template library
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = match config.workers {
            Some(workers) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| EngineError::InvalidConfig(format!("worker pool: {e}")))?,
            )),
            None => None,
        };
        let library = PatternLibrary::builtin(&config.patterns.thresholds);
        Ok(Self {
            config,
            library,
            pool,
            cancel: CancelToken::default(),
        })
    }

    /// Replace the template library
    pub fn with_library(mut self, library: PatternLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    pub fn ingest(&self, records: &[RawRecord]) -> Result<IngestReport, EngineError> {
        SampleIngestor::new(&self.config.ingest).ingest(records)
    }

    pub fn ingest_lines(&self, lines: &[RawLine]) -> Result<IngestReport, EngineError> {
        SampleIngestor::new(&self.config.ingest).ingest_lines(lines)
    }

    /// Synchronize and impute device streams
    pub fn canonical_stream(&self, streams: &[DeviceStream]) -> Result<CanonicalStream, EngineError> {
        let merged = self.run(|| {
            Synchronizer::new(&self.config.sync)
                .with_cancel(self.cancel.clone())
                .synchronize(streams)
        })?;
        Imputer::new(&self.config.impute)
            .with_cancel(self.cancel.clone())
            .impute(&merged)
    }

    /// Candles at the configured resolution
    pub fn candles(
        &self,
        stream: &CanonicalStream,
        range: Option<TimeRange>,
    ) -> Result<Outcome<CandleSeries>, EngineError> {
        self.candles_at(stream, self.config.candles.resolution, range)
    }

    /// Candles at any resolution, always binned from the canonical stream
    pub fn candles_at(
        &self,
        stream: &CanonicalStream,
        resolution: Resolution,
        range: Option<TimeRange>,
    ) -> Result<Outcome<CandleSeries>, EngineError> {
        let aggregator = CandleAggregator::at(resolution, &self.config.candles).with_cancel(self.cancel.clone());
        self.run(|| aggregator.aggregate_parallel(stream, range, DEFAULT_CHUNK_CANDLES))
    }

    pub fn kline(&self, series: &CandleSeries) -> Result<KLine, EngineError> {
        KLineComputer::from_config(series, &self.config.kline)
    }

    pub fn features(&self, series: &CandleSeries) -> Outcome<FeatureVector> {
        FeatureExtractor::new(&self.config.features)
            .with_cancel(self.cancel.clone())
            .from_candles(series)
    }

    pub fn match_patterns(
        &self,
        features: Option<&FeatureVector>,
        candles: Option<&CandleSeries>,
    ) -> Outcome<Vec<PatternMatch>> {
        let matcher = PatternMatcher::new(&self.config.patterns).with_cancel(self.cancel.clone());
        self.run(|| matcher.match_all(&self.library, &PatternInput::new(features, candles)))
    }

    /// Full analysis of decoded records
    pub fn analyze(&self, records: &[RawRecord]) -> Result<Analysis, EngineError> {
        let report = self.ingest(records)?;
        self.analyze_report(report)
    }

    /// Full analysis of NDJSON lines
    pub fn analyze_lines(&self, lines: &[RawLine]) -> Result<Analysis, EngineError> {
        let report = self.ingest_lines(lines)?;
        self.analyze_report(report)
    }

    fn analyze_report(&self, report: IngestReport) -> Result<Analysis, EngineError> {
        let accepted = report.accepted;
        let rejected = report.rejected.clone();
        let streams = report.into_streams();

        let stream = self.canonical_stream(&streams)?;
        let resolution = self.config.candles.resolution;
        let cache_key = CacheKey::new(stream.content_hash(), resolution, &self.config)?;

        let candles = self.candles(&stream, None)?;
        let mut analysis = Analysis {
            accepted,
            rejected,
            candles: candles.value,
            stream,
            kline: None,
            features: None,
            matches: Vec::new(),
            days: None,
            cache_key,
            completion: candles.completion,
        };
        if analysis.completion != Completion::Complete {
            return Ok(analysis);
        }

        analysis.kline = Some(self.kline(&analysis.candles)?);

        let features = self.features(&analysis.candles);
        analysis.completion = features.completion;
        analysis.features = Some(features.value);
        if analysis.completion != Completion::Complete {
            return Ok(analysis);
        }

        let matches = self.match_patterns(analysis.features.as_ref(), Some(&analysis.candles));
        analysis.completion = matches.completion;
        analysis.matches = matches.value;
        if analysis.completion != Completion::Complete {
            return Ok(analysis);
        }

        let days = self.classify_days(&analysis.stream)?;
        analysis.completion = days.completion;
        analysis.days = Some(days.value);

        tracing::info!(
            devices = analysis.stream.devices.len(),
            samples = analysis.stream.len(),
            candles = analysis.candles.len(),
            matches = analysis.matches.len(),
            rejected = analysis.rejected.len(),
            "analysis finished"
        );
        Ok(analysis)
    }

    /// Classify each UTC calendar day of the stream against the library.
    ///
    /// Each day is re-binned at hourly resolution from the canonical stream;
    /// days are then grouped by their top template in library order, with
    /// unmatched days last.
    pub fn classify_days(&self, stream: &CanonicalStream) -> Result<Outcome<DayReport>, EngineError> {
        let Some(span) = stream.span() else {
            return Ok(Outcome::complete(DayReport {
                days: Vec::new(),
                groups: Vec::new(),
            }));
        };
        let first_day = span.start.timestamp_millis().div_euclid(MS_PER_DAY);
        let last_day = (span.end.timestamp_millis() - 1).div_euclid(MS_PER_DAY);
        let limit = self.config.candles.max_candles;
        let hours = (last_day - first_day + 1).saturating_mul(HOURS_PER_DAY);
        if hours > limit as i64 {
            return Err(EngineError::TooManyPeriods {
                range: span,
                resolution: Resolution::Hour,
                periods: hours,
                limit,
            });
        }
        let day_config = CandleConfig {
            resolution: Resolution::Hour,
            epoch_alignment: None,
            max_candles: limit,
        };

        let classified: Vec<Option<Result<DayClassification, EngineError>>> = self.run(|| {
            (first_day..=last_day)
                .into_par_iter()
                .map(|day| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.classify_day(stream, day, &day_config))
                })
                .collect()
        });

        let complete = classified.iter().all(Option::is_some);
        let days = classified
            .into_iter()
            .flatten()
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_template: BTreeMap<usize, Vec<NaiveDate>> = BTreeMap::new();
        let unmatched_key = self.library.len();
        for day in &days {
            let key = day
                .top_template
                .as_deref()
                .and_then(|name| self.library.names().iter().position(|n| *n == name))
                .unwrap_or(unmatched_key);
            by_template.entry(key).or_default().push(day.date);
        }
        let groups = by_template
            .into_iter()
            .map(|(key, dates)| DayGroup {
                template: self.library.templates().get(key).map(|t| t.name.clone()),
                dates,
            })
            .collect();

        tracing::debug!(days = days.len(), "classified days");
        let report = DayReport { days, groups };
        Ok(if complete {
            Outcome::complete(report)
        } else {
            Outcome::cancelled(report, "classify_days")
        })
    }

    fn classify_day(
        &self,
        stream: &CanonicalStream,
        day: i64,
        day_config: &CandleConfig,
    ) -> Result<DayClassification, EngineError> {
        let start = instant_from_ms(day * MS_PER_DAY)?;
        let window = TimeRange::new(start, start + Duration::days(1));

        let series = CandleAggregator::new(day_config)
            .aggregate(stream, Some(window))?
            .value;
        let features = FeatureExtractor::new(&self.config.features).from_candles(&series).value;
        let matches = PatternMatcher::new(&self.config.patterns)
            .match_all(&self.library, &PatternInput::new(Some(&features), Some(&series)))
            .value;

        Ok(DayClassification {
            date: start.date_naive(),
            window,
            top_template: matches.first().map(|m| m.template_name.clone()),
            matches,
        })
    }
}

/// Candles for a batch of records in one call
pub fn records_to_candles(
    records: &[RawRecord],
    config: &EngineConfig,
) -> Result<Outcome<CandleSeries>, EngineError> {
    let engine = KineticsEngine::new(config.clone())?;
    let report = engine.ingest(records)?;
    let stream = engine.canonical_stream(&report.into_streams())?;
    engine.candles(&stream, None)
}

/// Full analysis for a batch of records in one call
pub fn records_to_analysis(records: &[RawRecord], config: &EngineConfig) -> Result<Analysis, EngineError> {
    KineticsEngine::new(config.clone())?.analyze(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImputationPolicy;
    use crate::types::{Origin, Unit};
    use chrono::{TimeZone, Utc};

    fn hourly_day(day_start: i64, profile: &[f64]) -> Vec<RawRecord> {
        // one reading every 10 minutes
        (0..24 * 6)
            .map(|k| {
                let hour = k / 6;
                RawRecord::epoch(
                    (day_start + k as i64 * 600) as f64,
                    profile[hour],
                    "wrist",
                    Unit::ActivityLevel,
                )
            })
            .collect()
    }

    fn morning_profile() -> Vec<f64> {
        let mut p = vec![5.0; 24];
        for (h, v) in [(6, 60.0), (7, 85.0), (8, 90.0), (9, 70.0), (10, 40.0)] {
            p[h] = v;
        }
        p
    }

    #[test]
    fn test_analyze_morning_person() {
        let monday = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap().timestamp();
        let records = hourly_day(monday, &morning_profile());
        let engine = KineticsEngine::new(EngineConfig::default()).unwrap();
        let analysis = engine.analyze(&records).unwrap();

        assert_eq!(analysis.completion, Completion::Complete);
        assert_eq!(analysis.candles.len(), 24);
        assert_eq!(analysis.kline.as_ref().unwrap().points.len(), 24);
        assert_eq!(analysis.matches[0].template_name, "Morning Peak");
        let days = analysis.days.unwrap();
        assert_eq!(days.days.len(), 1);
        assert_eq!(days.days[0].top_template.as_deref(), Some("Morning Peak"));
        assert_eq!(days.groups[0].template.as_deref(), Some("Morning Peak"));
    }

    #[test]
    fn test_hold_last_gap_yields_fully_imputed_candles() {
        let mut config = EngineConfig::default();
        config.impute.policy = ImputationPolicy::HoldLast;
        config.impute.expected_sampling_interval_ms = Some(10_000);
        config.candles.resolution = Resolution::Minute;

        let mut records: Vec<RawRecord> = (0..=6)
            .map(|k| RawRecord::epoch(k as f64 * 10.0, 42.0, "a", Unit::ActivityLevel))
            .collect();
        records.push(RawRecord::epoch(560.0, 7.0, "a", Unit::ActivityLevel));

        let engine = KineticsEngine::new(config).unwrap();
        let report = engine.ingest(&records).unwrap();
        let stream = engine.canonical_stream(&report.into_streams()).unwrap();
        let imputed: Vec<_> = stream.samples.iter().filter(|s| s.origin.is_imputed()).collect();
        assert_eq!(imputed.len(), 49);
        assert!(imputed.iter().all(|s| s.value == 42.0));
        assert!(imputed.iter().all(|s| matches!(s.origin, Origin::Imputed(_))));

        let series = engine.candles(&stream, None).unwrap().value;
        // minutes 2..8 lie entirely inside the (60 s, 560 s) gap
        for candle in &series.candles[2..9] {
            assert_eq!(candle.imputed_fraction, 1.0, "{:?}", candle.period_start);
        }
    }

    #[test]
    fn test_worker_pool_gives_identical_output() {
        let monday = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap().timestamp();
        let records = hourly_day(monday, &morning_profile());
        let single = KineticsEngine::new(EngineConfig {
            workers: Some(1),
            ..Default::default()
        })
        .unwrap()
        .analyze(&records)
        .unwrap();
        let many = KineticsEngine::new(EngineConfig {
            workers: Some(4),
            ..Default::default()
        })
        .unwrap()
        .analyze(&records)
        .unwrap();
        assert_eq!(single.candles, many.candles);
        assert_eq!(single.matches, many.matches);
        assert_eq!(single.cache_key, many.cache_key);
        assert_eq!(
            single.cache_key.config_hash,
            EngineConfig::default().config_hash().unwrap()
        );
    }

    #[test]
    fn test_seconds_misread_as_milliseconds_is_rejected() {
        let records = vec![
            RawRecord::epoch(1_705_305_600.0, 10.0, "wrist", Unit::ActivityLevel),
            RawRecord::epoch(1_705_305_660_000.0, 12.0, "wrist", Unit::ActivityLevel),
        ];
        let engine = KineticsEngine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.ingest(&records).unwrap().accepted, 2);
        let err = engine.analyze(&records).unwrap_err();
        assert!(matches!(err, EngineError::TooManyPeriods { resolution: Resolution::Hour, .. }));
    }

    #[test]
    fn test_day_classification_respects_candle_limit() {
        let monday = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap().timestamp();
        let mut records = hourly_day(monday, &morning_profile());
        records.extend(hourly_day(monday + 2 * 86_400, &morning_profile()));

        let mut config = EngineConfig::default();
        config.candles.resolution = Resolution::Day;
        config.candles.max_candles = 48;
        let engine = KineticsEngine::new(config).unwrap();
        let report = engine.ingest(&records).unwrap();
        let stream = engine.canonical_stream(&report.into_streams()).unwrap();

        assert_eq!(engine.candles(&stream, None).unwrap().value.len(), 3);
        match engine.classify_days(&stream) {
            Err(EngineError::TooManyPeriods { periods, limit, .. }) => {
                assert_eq!(periods, 72);
                assert_eq!(limit, 48);
            }
            other => panic!("expected TooManyPeriods, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_engine_reports_sync_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let records = vec![RawRecord::epoch(0.0, 1.0, "a", Unit::ActivityLevel)];
        let err = KineticsEngine::new(EngineConfig::default())
            .unwrap()
            .with_cancel(token)
            .analyze(&records)
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }
}
