//! Feature extraction
//!
//! Computes a [`FeatureVector`] over a candle series or a raw window of the
//! canonical stream. Measures are grouped; each group is toggled in
//! [`FeatureConfig`], single measures are dropped through
//! `FeatureConfig::disabled`, and a measure whose preconditions fail is
//! recorded as unavailable without affecting the others.

pub mod complexity;
pub mod profile;
pub mod spectral;
pub mod time_domain;

use crate::cancel::{CancelToken, Outcome};
use crate::config::FeatureConfig;
use crate::error::EngineError;
use crate::sync::median_interval_ms;
use crate::types::{
    CandleSeries, CanonicalStream, Feature, FeatureSource, FeatureVector, InsufficientData,
    TimeRange,
};

/// One computed (or unavailable) feature
pub type Measure = (Feature, Result<f64, InsufficientData>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    TimeDomain,
    CandleShape,
    Spectral,
    SampleEntropy,
    ApproximateEntropy,
    Dfa,
    Poincare,
    Peaks,
    Profile,
}

const GROUPS: [Group; 9] = [
    Group::TimeDomain,
    Group::CandleShape,
    Group::Spectral,
    Group::SampleEntropy,
    Group::ApproximateEntropy,
    Group::Dfa,
    Group::Poincare,
    Group::Peaks,
    Group::Profile,
];

/// Time-stamped values a feature vector is computed over
struct Signal<'a> {
    points: Vec<(i64, f64)>,
    values: Vec<f64>,
    cadence_ms: Option<i64>,
    candles: Option<&'a CandleSeries>,
}

/// Feature extractor
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    cancel: CancelToken,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            config: config.clone(),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Features of the configured source field across the non-empty candles
    pub fn from_candles(&self, series: &CandleSeries) -> Outcome<FeatureVector> {
        let field = self.config.source_field;
        let points: Vec<(i64, f64)> = series
            .candles
            .iter()
            .filter_map(|c| c.field(field).map(|v| (c.period_start.timestamp_millis(), v)))
            .collect();
        let signal = Signal {
            values: points.iter().map(|p| p.1).collect(),
            points,
            cadence_ms: Some(series.resolution.width_ms()),
            candles: Some(series),
        };
        let source = FeatureSource::CandleSeries {
            resolution: series.resolution,
            field,
        };
        self.extract(signal, FeatureVector::new(series.range, source))
    }

    /// Features of the raw samples in `window` (default: the whole stream)
    pub fn from_stream(
        &self,
        stream: &CanonicalStream,
        window: Option<TimeRange>,
    ) -> Result<Outcome<FeatureVector>, EngineError> {
        let window = window
            .or_else(|| stream.span())
            .ok_or(EngineError::EmptyStream)?;
        let points: Vec<(i64, f64)> = stream
            .window(&window)
            .iter()
            .map(|s| (s.timestamp.timestamp_millis(), s.value))
            .collect();
        let cadence_ms = stream.sampling.finest_interval_ms.or_else(|| {
            let timed: Vec<_> = stream.window(&window).iter().map(|s| (s.timestamp, s.value)).collect();
            median_interval_ms(&timed)
        });
        let signal = Signal {
            values: points.iter().map(|p| p.1).collect(),
            points,
            cadence_ms,
            candles: None,
        };
        Ok(self.extract(signal, FeatureVector::new(window, FeatureSource::RawWindow)))
    }

    fn extract(&self, signal: Signal<'_>, mut vector: FeatureVector) -> Outcome<FeatureVector> {
        for group in GROUPS {
            if !self.enabled(group) {
                continue;
            }
            if self.cancel.is_cancelled() {
                tracing::warn!(?group, "feature extraction cancelled");
                return Outcome::cancelled(vector, "features");
            }
            for (feature, result) in self.compute(group, &signal) {
                if self.config.disabled.contains(&feature) {
                    continue;
                }
                match result {
                    Ok(value) if value.is_finite() => {
                        vector.values.insert(feature, value);
                    }
                    Ok(value) => {
                        vector.unavailable.insert(
                            feature,
                            InsufficientData::new(0, signal.values.len(), format!("result {value} is not finite")),
                        );
                    }
                    Err(missing) => {
                        vector.unavailable.insert(feature, missing);
                    }
                }
            }
        }

        tracing::debug!(
            values = vector.values.len(),
            unavailable = vector.unavailable.len(),
            "extracted features"
        );
        Outcome::complete(vector)
    }

    fn enabled(&self, group: Group) -> bool {
        let c = &self.config;
        match group {
            Group::TimeDomain => c.time_domain,
            Group::CandleShape => c.candle_shape,
            Group::Spectral => c.spectral,
            Group::SampleEntropy => c.sample_entropy,
            Group::ApproximateEntropy => c.approximate_entropy,
            Group::Dfa => c.dfa,
            Group::Poincare => c.poincare,
            Group::Peaks => c.peaks,
            Group::Profile => c.profile,
        }
    }

    fn compute(&self, group: Group, signal: &Signal<'_>) -> Vec<Measure> {
        let c = &self.config;
        let values = &signal.values;
        match group {
            Group::TimeDomain => {
                let mut out = time_domain::basic_stats(values);
                out.extend(time_domain::intensity_shares(values, c.intensity_thresholds));
                out
            }
            Group::CandleShape => signal
                .candles
                .map(time_domain::candle_shape)
                .unwrap_or_default(),
            Group::Spectral => {
                let interval = c
                    .resample_interval_ms
                    .or(signal.cadence_ms)
                    .unwrap_or(crate::types::MS_PER_SECOND);
                spectral::dominant_frequency(&signal.points, interval, c.min_spectral_points)
            }
            Group::SampleEntropy => vec![(
                Feature::SampleEntropy,
                complexity::sample_entropy(values, c.entropy_embedding_dim, c.entropy_tolerance),
            )],
            Group::ApproximateEntropy => vec![(
                Feature::ApproximateEntropy,
                complexity::approximate_entropy(values, c.entropy_embedding_dim, c.entropy_tolerance),
            )],
            Group::Dfa => vec![(
                Feature::DfaAlpha,
                complexity::dfa_alpha(values, c.dfa_scale_range),
            )],
            Group::Poincare => complexity::poincare(values),
            Group::Peaks => profile::peak_structure(values, c.peak_prominence),
            Group::Profile => {
                let mut out = profile::day_parts(&signal.points, &c.day_parts);
                out.extend(profile::weekly(&signal.points));
                out
            }
        }
    }
}
