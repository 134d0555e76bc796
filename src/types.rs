//! Core types for the KinetiCandles engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: ingested samples, the canonical stream, candles, K-line points,
//! feature vectors and pattern matches. Every entity here is derived and
//! immutable; stages build new values instead of mutating their inputs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
pub const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;

/// Convert epoch milliseconds back into an instant.
pub(crate) fn instant_from_ms(ms: i64) -> Result<DateTime<Utc>, EngineError> {
    DateTime::from_timestamp_millis(ms).ok_or(EngineError::TimestampOutOfRange(ms))
}

/// Measurement unit declared by a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Dimensionless 0-100 activity level
    ActivityLevel,
    /// Vendor activity counts per epoch
    Counts,
    /// Acceleration in milli-g
    MilliG,
    /// Acceleration in g
    Gravity,
    MetersPerSecondSquared,
    /// For extensibility
    #[serde(untagged)]
    Custom(String),
}

impl Unit {
    pub fn as_str(&self) -> &str {
        match self {
            Unit::ActivityLevel => "activity_level",
            Unit::Counts => "counts",
            Unit::MilliG => "milli_g",
            Unit::Gravity => "gravity",
            Unit::MetersPerSecondSquared => "meters_per_second_squared",
            Unit::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// A validated, ingested reading from one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub device_id: String,
    pub unit: Unit,
}

/// Method used to fabricate an imputed sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationMethod {
    Linear,
    HoldLast,
    HoldNext,
    ZeroFill,
}

impl ImputationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImputationMethod::Linear => "linear",
            ImputationMethod::HoldLast => "hold_last",
            ImputationMethod::HoldNext => "hold_next",
            ImputationMethod::ZeroFill => "zero_fill",
        }
    }
}

/// Provenance of a canonical-stream sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "imputation_method", rename_all = "snake_case")]
pub enum Origin {
    Real,
    Imputed(ImputationMethod),
}

impl Origin {
    pub fn is_imputed(&self) -> bool {
        matches!(self, Origin::Imputed(_))
    }
}

/// One sample on the merged timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Contributing device (for imputed samples: the device of the sample preceding the gap)
    pub device_id: String,
    #[serde(flatten)]
    pub origin: Origin,
}

/// Why an interval of the canonical stream carries no data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// Gap is longer than `max_impute_span` and is never filled
    ExceedsMaxImputeSpan,
    /// Policy is `mark_missing`
    MarkedMissing,
}

/// An explicit hole between two bracketing samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingInterval {
    pub range: TimeRange,
    pub reason: MissingReason,
}

/// Sampling characteristics detected while synchronizing devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingProfile {
    /// Median positive spacing per device (ms)
    pub device_intervals_ms: BTreeMap<String, i64>,
    /// Finest interval across contributing devices (ms)
    pub finest_interval_ms: Option<i64>,
    /// Whether any device samples faster than once per minute
    pub has_sub_minute_resolution: bool,
}

/// Single merged, time-ordered view of all device samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStream {
    pub unit: Unit,
    /// Contributing devices, ascending
    pub devices: Vec<String>,
    /// Samples, non-decreasing by timestamp
    pub samples: Vec<CanonicalSample>,
    pub sampling: SamplingProfile,
    /// Intervals left unfilled by the imputer
    pub missing: Vec<MissingInterval>,
}

impl CanonicalStream {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn real_count(&self) -> usize {
        self.samples.iter().filter(|s| !s.origin.is_imputed()).count()
    }

    pub fn imputed_count(&self) -> usize {
        self.samples.iter().filter(|s| s.origin.is_imputed()).count()
    }

    /// Smallest range covering every sample (end is exclusive, so it sits 1 ms past the last sample)
    pub fn span(&self) -> Option<TimeRange> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        Some(TimeRange::new(
            first.timestamp,
            last.timestamp + chrono::Duration::milliseconds(1),
        ))
    }

    /// Samples with `start <= timestamp < end`
    pub fn window(&self, range: &TimeRange) -> &[CanonicalSample] {
        let lo = self.samples.partition_point(|s| s.timestamp < range.start);
        let hi = self.samples.partition_point(|s| s.timestamp < range.end);
        &self.samples[lo..hi.max(lo)]
    }

    /// SHA-256 over a canonical byte encoding of the stream contents.
    ///
    /// Used as the stream component of derived-entity cache keys.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.unit.as_str().as_bytes());
        hasher.update([0u8]);
        for sample in &self.samples {
            hasher.update(sample.timestamp.timestamp_millis().to_le_bytes());
            hasher.update(sample.value.to_bits().to_le_bytes());
            hasher.update(sample.device_id.as_bytes());
            hasher.update([0u8]);
            match sample.origin {
                Origin::Real => hasher.update([0u8]),
                Origin::Imputed(method) => {
                    hasher.update([1u8]);
                    hasher.update(method.as_str().as_bytes());
                }
            }
        }
        for gap in &self.missing {
            hasher.update(gap.range.start.timestamp_millis().to_le_bytes());
            hasher.update(gap.range.end.timestamp_millis().to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Candle width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    /// Fixed width in seconds (e.g. 15 s, 30 s, 300 s high-resolution candles)
    Seconds(u32),
}

impl Resolution {
    pub fn width_ms(&self) -> i64 {
        match self {
            Resolution::Second => MS_PER_SECOND,
            Resolution::Minute => MS_PER_MINUTE,
            Resolution::Hour => MS_PER_HOUR,
            Resolution::Day => MS_PER_DAY,
            Resolution::Week => MS_PER_WEEK,
            Resolution::Seconds(n) => i64::from(*n) * MS_PER_SECOND,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Resolution::Second => "second".to_string(),
            Resolution::Minute => "minute".to_string(),
            Resolution::Hour => "hour".to_string(),
            Resolution::Day => "day".to_string(),
            Resolution::Week => "week".to_string(),
            Resolution::Seconds(n) => format!("{n}s"),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl std::str::FromStr for Resolution {
    type Err = EngineError;

    /// Parses the labels produced by [`Resolution::label`]
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(Resolution::Second),
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            "week" => Ok(Resolution::Week),
            other => other
                .strip_suffix('s')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(Resolution::Seconds)
                .ok_or_else(|| EngineError::InvalidConfig(format!("unknown resolution {text:?}"))),
        }
    }
}

/// Candle field used as a K-line or feature source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleField {
    Open,
    High,
    Low,
    #[default]
    Close,
    Mean,
}

/// Open/high/low/close summary of a non-empty period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Arithmetic mean of every sample in the period
    pub mean: f64,
}

/// One fixed-width period of the canonical stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub resolution: Resolution,
    /// Absent for empty candles
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub ohlc: Option<Ohlc>,
    pub sample_count: usize,
    pub imputed_count: usize,
    /// imputed / total samples; 0 for empty candles
    pub imputed_fraction: f64,
}

impl Candle {
    pub fn is_empty(&self) -> bool {
        self.ohlc.is_none()
    }

    pub fn period(&self) -> TimeRange {
        TimeRange::new(self.period_start, self.period_end)
    }

    pub fn field(&self, field: CandleField) -> Option<f64> {
        self.ohlc.map(|c| match field {
            CandleField::Open => c.open,
            CandleField::High => c.high,
            CandleField::Low => c.low,
            CandleField::Close => c.close,
            CandleField::Mean => c.mean,
        })
    }

    /// Close at or above open ("green" candle)
    pub fn is_rising(&self) -> Option<bool> {
        self.ohlc.map(|c| c.close >= c.open)
    }

    /// |close - open|
    pub fn body(&self) -> Option<f64> {
        self.ohlc.map(|c| (c.close - c.open).abs())
    }

    /// high - max(open, close)
    pub fn upper_wick(&self) -> Option<f64> {
        self.ohlc.map(|c| c.high - c.open.max(c.close))
    }

    /// min(open, close) - low
    pub fn lower_wick(&self) -> Option<f64> {
        self.ohlc.map(|c| c.open.min(c.close) - c.low)
    }
}

/// Contiguous candles of one resolution covering `range`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub resolution: Resolution,
    pub range: TimeRange,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn non_empty(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter().filter(|c| !c.is_empty())
    }

    pub fn empty_count(&self) -> usize {
        self.candles.iter().filter(|c| c.is_empty()).count()
    }
}

/// Moving-average value for one candle position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KLinePoint {
    pub period_start: DateTime<Utc>,
    /// Undefined for leading positions and all-empty windows
    pub value: Option<f64>,
}

/// A K-line overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KLine {
    pub window: usize,
    pub field: CandleField,
    pub points: Vec<KLinePoint>,
}

/// Named feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // Time domain
    Mean,
    StdDev,
    CoefficientOfVariation,
    Min,
    Max,
    Median,
    P25,
    P75,
    LowIntensityShare,
    ModerateIntensityShare,
    HighIntensityShare,
    // Candle shape
    BodyMean,
    BodyStdDev,
    UpperWickMean,
    LowerWickMean,
    RisingShare,
    // Frequency domain
    DominantFrequency,
    DominantPeriodSecs,
    SpectralPowerRatio,
    // Complexity
    SampleEntropy,
    ApproximateEntropy,
    DfaAlpha,
    PoincareSd1,
    PoincareSd2,
    PoincareRatio,
    // Peak structure
    PeakCount,
    TroughDepth,
    // Day-part and weekly profile
    MorningMean,
    MiddayMean,
    EveningMean,
    PeakHour,
    WeekdayMean,
    WeekendMean,
    DailyMeanStdDev,
    MostActiveWeekday,
    LeastActiveWeekday,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Mean => "mean",
            Feature::StdDev => "std_dev",
            Feature::CoefficientOfVariation => "coefficient_of_variation",
            Feature::Min => "min",
            Feature::Max => "max",
            Feature::Median => "median",
            Feature::P25 => "p25",
            Feature::P75 => "p75",
            Feature::LowIntensityShare => "low_intensity_share",
            Feature::ModerateIntensityShare => "moderate_intensity_share",
            Feature::HighIntensityShare => "high_intensity_share",
            Feature::BodyMean => "body_mean",
            Feature::BodyStdDev => "body_std_dev",
            Feature::UpperWickMean => "upper_wick_mean",
            Feature::LowerWickMean => "lower_wick_mean",
            Feature::RisingShare => "rising_share",
            Feature::DominantFrequency => "dominant_frequency",
            Feature::DominantPeriodSecs => "dominant_period_secs",
            Feature::SpectralPowerRatio => "spectral_power_ratio",
            Feature::SampleEntropy => "sample_entropy",
            Feature::ApproximateEntropy => "approximate_entropy",
            Feature::DfaAlpha => "dfa_alpha",
            Feature::PoincareSd1 => "poincare_sd1",
            Feature::PoincareSd2 => "poincare_sd2",
            Feature::PoincareRatio => "poincare_ratio",
            Feature::PeakCount => "peak_count",
            Feature::TroughDepth => "trough_depth",
            Feature::MorningMean => "morning_mean",
            Feature::MiddayMean => "midday_mean",
            Feature::EveningMean => "evening_mean",
            Feature::PeakHour => "peak_hour",
            Feature::WeekdayMean => "weekday_mean",
            Feature::WeekendMean => "weekend_mean",
            Feature::DailyMeanStdDev => "daily_mean_std_dev",
            Feature::MostActiveWeekday => "most_active_weekday",
            Feature::LeastActiveWeekday => "least_active_weekday",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single measure could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
    pub reason: String,
}

impl InsufficientData {
    pub fn new(required: usize, available: usize, reason: impl Into<String>) -> Self {
        Self {
            required,
            available,
            reason: reason.into(),
        }
    }

    pub fn into_error(self, feature: Feature) -> EngineError {
        EngineError::InsufficientData {
            feature,
            required: self.required,
            available: self.available,
            reason: self.reason,
        }
    }
}

/// What a feature vector was computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSource {
    CandleSeries {
        resolution: Resolution,
        field: CandleField,
    },
    RawWindow,
}

/// Named numeric summary of one window
///
/// Partial vectors are valid: measures whose preconditions failed are listed in
/// `unavailable` instead of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub window: TimeRange,
    pub source: FeatureSource,
    pub values: BTreeMap<Feature, f64>,
    pub unavailable: BTreeMap<Feature, InsufficientData>,
}

impl FeatureVector {
    pub fn new(window: TimeRange, source: FeatureSource) -> Self {
        Self {
            window,
            source,
            values: BTreeMap::new(),
            unavailable: BTreeMap::new(),
        }
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    /// Builder used by tests and custom collaborators
    pub fn with(mut self, feature: Feature, value: f64) -> Self {
        self.values.insert(feature, value);
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.unavailable.is_empty()
    }
}

/// One template that scored at or above the configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub template_name: String,
    pub score: f64,
    pub matched_window: TimeRange,
}
