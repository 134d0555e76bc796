//! Engine configuration
//!
//! Every stage is a pure function of its input plus an explicit slice of
//! [`EngineConfig`]. Sections default independently, so a partial JSON document
//! such as `{"candles": {"resolution": "day"}}` is a valid configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::types::{CandleField, Feature, ImputationMethod, Resolution, Unit};

/// Monday 1970-01-05, the default alignment for weekly candles
pub const WEEK_EPOCH_MS: i64 = 4 * crate::types::MS_PER_DAY;

/// Default ceiling on the periods one series may cover
pub const DEFAULT_MAX_CANDLES: usize = 2_000_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub sync: SyncConfig,
    pub impute: ImputeConfig,
    pub candles: CandleConfig,
    pub kline: KLineConfig,
    pub features: FeatureConfig,
    pub patterns: PatternConfig,
    /// Dedicated worker-pool size; `None` uses the global pool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fail on the first malformed record instead of collecting rejections
    pub strict: bool,
}

/// Linear conversion `to = from * scale + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: Unit,
    pub to: Unit,
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitConversion {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Clock correction added to every timestamp of a device
    pub device_offsets_ms: BTreeMap<String, i64>,
    /// Unit of the merged stream; defaults to the unit of the first device by id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_unit: Option<Unit>,
    pub unit_conversions: Vec<UnitConversion>,
}

impl SyncConfig {
    pub fn conversion(&self, from: &Unit, to: &Unit) -> Option<&UnitConversion> {
        self.unit_conversions
            .iter()
            .find(|c| &c.from == from && &c.to == to)
    }
}

/// Gap-filling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationPolicy {
    #[default]
    Linear,
    HoldLast,
    HoldNext,
    ZeroFill,
    /// Leave an explicit hole
    MarkMissing,
}

impl ImputationPolicy {
    /// Fill method, or `None` when gaps are left missing
    pub fn method(&self) -> Option<ImputationMethod> {
        match self {
            ImputationPolicy::Linear => Some(ImputationMethod::Linear),
            ImputationPolicy::HoldLast => Some(ImputationMethod::HoldLast),
            ImputationPolicy::HoldNext => Some(ImputationMethod::HoldNext),
            ImputationPolicy::ZeroFill => Some(ImputationMethod::ZeroFill),
            ImputationPolicy::MarkMissing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputeConfig {
    /// Defaults to the finest detected device interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_sampling_interval_ms: Option<i64>,
    pub gap_factor: f64,
    pub policy: ImputationPolicy,
    pub max_impute_span_ms: i64,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            expected_sampling_interval_ms: None,
            gap_factor: 5.0,
            policy: ImputationPolicy::Linear,
            max_impute_span_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleConfig {
    pub resolution: Resolution,
    /// Anchor for period boundaries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch_alignment: Option<DateTime<Utc>>,
    /// Ranges needing more periods than this are rejected before binning
    pub max_candles: usize,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hour,
            epoch_alignment: None,
            max_candles: DEFAULT_MAX_CANDLES,
        }
    }
}

impl CandleConfig {
    /// Alignment anchor in epoch milliseconds for the given resolution.
    ///
    /// Without an explicit anchor, periods align to the Unix epoch (midnight,
    /// top of the hour, top of the minute) and weeks start on Monday.
    pub fn epoch_ms(&self, resolution: Resolution) -> i64 {
        match (self.epoch_alignment, resolution) {
            (Some(anchor), _) => anchor.timestamp_millis(),
            (None, Resolution::Week) => WEEK_EPOCH_MS,
            (None, _) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KLineConfig {
    pub window: usize,
    pub field: CandleField,
}

impl Default for KLineConfig {
    fn default() -> Self {
        Self {
            window: 3,
            field: CandleField::Close,
        }
    }
}

/// Inclusive UTC hour bounds of a day part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourSpan {
    pub first: u32,
    pub last: u32,
}

impl HourSpan {
    pub const fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.first && hour <= self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayParts {
    pub morning: HourSpan,
    pub midday: HourSpan,
    pub evening: HourSpan,
}

impl Default for DayParts {
    fn default() -> Self {
        Self {
            morning: HourSpan::new(6, 11),
            midday: HourSpan::new(12, 17),
            evening: HourSpan::new(18, 23),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub time_domain: bool,
    pub candle_shape: bool,
    pub spectral: bool,
    pub sample_entropy: bool,
    pub approximate_entropy: bool,
    pub dfa: bool,
    pub poincare: bool,
    pub peaks: bool,
    pub profile: bool,
    /// Individual measures left out of every vector
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub disabled: BTreeSet<Feature>,

    pub entropy_embedding_dim: usize,
    /// Tolerance as a fraction of the series standard deviation
    pub entropy_tolerance: f64,
    /// Box sizes (in points) used by DFA
    pub dfa_scale_range: (usize, usize),
    /// Candle field used when extracting from a candle series
    pub source_field: CandleField,
    /// Uniform grid for spectral analysis; `None` uses the source cadence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resample_interval_ms: Option<i64>,
    pub min_spectral_points: usize,
    /// Minimum peak prominence as a fraction of the series range
    pub peak_prominence: f64,
    /// (moderate, high) intensity cut-offs
    pub intensity_thresholds: (f64, f64),
    pub day_parts: DayParts,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            time_domain: true,
            candle_shape: true,
            spectral: true,
            sample_entropy: true,
            approximate_entropy: true,
            dfa: true,
            poincare: true,
            peaks: true,
            profile: true,
            disabled: BTreeSet::new(),
            entropy_embedding_dim: 2,
            entropy_tolerance: 0.2,
            dfa_scale_range: (4, 64),
            source_field: CandleField::Close,
            resample_interval_ms: None,
            min_spectral_points: 8,
            peak_prominence: 0.2,
            intensity_thresholds: (30.0, 60.0),
            day_parts: DayParts::default(),
        }
    }
}

/// Documented thresholds of the built-in pattern templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    /// Relative lead a day part needs for full strength
    pub dominance_margin: f64,
    pub biphasic_trough_depth: f64,
    pub consistent_cv_max: f64,
    pub weekly_ratio: f64,
    pub consistent_weekly_std: f64,
    pub irregular_entropy: f64,
    pub burst_min_run: usize,
    /// Minimum rising body as a fraction of the series range
    pub burst_body_fraction: f64,
    pub rest_min_run: usize,
    /// Rest ceiling above the series low, as a fraction of the range
    pub rest_level_fraction: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            dominance_margin: 0.5,
            biphasic_trough_depth: 0.3,
            consistent_cv_max: 0.25,
            weekly_ratio: 1.3,
            consistent_weekly_std: 10.0,
            irregular_entropy: 1.0,
            burst_min_run: 3,
            burst_body_fraction: 0.15,
            rest_min_run: 3,
            rest_level_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_score: f64,
    pub thresholds: PatternThresholds,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            thresholds: PatternThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// SHA-256 of the canonical JSON rendering, used in cache keys.
    ///
    /// Only analysis parameters are hashed; `workers` never changes results.
    pub fn config_hash(&self) -> Result<String, EngineError> {
        let analysis = EngineConfig {
            workers: None,
            ..self.clone()
        };
        let json = analysis.to_json()?;
        Ok(format!("{:x}", Sha256::digest(json.as_bytes())))
    }

    /// Reject option combinations that no stage can honour
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !(self.impute.gap_factor.is_finite() && self.impute.gap_factor > 1.0) {
            return invalid(format!(
                "impute.gap_factor must be > 1, got {}",
                self.impute.gap_factor
            ));
        }
        if let Some(interval) = self.impute.expected_sampling_interval_ms {
            if interval <= 0 {
                return invalid(format!(
                    "impute.expected_sampling_interval_ms must be positive, got {interval}"
                ));
            }
        }
        if self.impute.max_impute_span_ms <= 0 {
            return invalid(format!(
                "impute.max_impute_span_ms must be positive, got {}",
                self.impute.max_impute_span_ms
            ));
        }
        if self.candles.resolution == Resolution::Seconds(0) {
            return invalid("candles.resolution must have a non-zero width".to_string());
        }
        if self.candles.max_candles == 0 {
            return invalid("candles.max_candles must be at least 1".to_string());
        }
        if self.kline.window == 0 {
            return invalid("kline.window must be at least 1".to_string());
        }

        let f = &self.features;
        if f.entropy_embedding_dim == 0 {
            return invalid("features.entropy_embedding_dim must be at least 1".to_string());
        }
        if !(f.entropy_tolerance.is_finite() && f.entropy_tolerance > 0.0) {
            return invalid(format!(
                "features.entropy_tolerance must be positive, got {}",
                f.entropy_tolerance
            ));
        }
        let (lo, hi) = f.dfa_scale_range;
        if lo < 4 || lo >= hi {
            return invalid(format!(
                "features.dfa_scale_range must satisfy 4 <= min < max, got ({lo}, {hi})"
            ));
        }
        if let Some(interval) = f.resample_interval_ms {
            if interval <= 0 {
                return invalid(format!(
                    "features.resample_interval_ms must be positive, got {interval}"
                ));
            }
        }
        if f.intensity_thresholds.0 > f.intensity_thresholds.1 {
            return invalid("features.intensity_thresholds must be ascending".to_string());
        }

        let min_score = self.patterns.min_score;
        if !(min_score > 0.0 && min_score <= 1.0) {
            return invalid(format!(
                "patterns.min_score must be in (0, 1], got {min_score}"
            ));
        }
        let t = &self.patterns.thresholds;
        if t.burst_min_run == 0 || t.rest_min_run == 0 {
            return invalid("pattern run lengths must be at least 1".to_string());
        }
        if !(t.biphasic_trough_depth >= 0.0 && t.biphasic_trough_depth < 1.0) {
            return invalid("patterns.thresholds.biphasic_trough_depth must be in [0, 1)".to_string());
        }
        if t.weekly_ratio <= 0.0 || t.consistent_weekly_std <= 0.0 || t.consistent_cv_max <= 0.0 {
            return invalid("pattern ratio thresholds must be positive".to_string());
        }
        if t.irregular_entropy <= 0.0 || t.dominance_margin <= 0.0 {
            return invalid("pattern entropy and dominance thresholds must be positive".to_string());
        }

        if self.workers == Some(0) {
            return invalid("workers must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

/// Cache key for a derived entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub stream_hash: String,
    pub resolution: Resolution,
    pub config_hash: String,
}

impl CacheKey {
    pub fn new(
        stream_hash: impl Into<String>,
        resolution: Resolution,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            stream_hash: stream_hash.into(),
            resolution,
            config_hash: config.config_hash()?,
        })
    }
}

/// Parse a `YYYY-MM-DDTHH:MM:SSZ` anchor; used by the CLI's `--epoch` flag
pub fn parse_epoch(text: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|e| EngineError::InvalidConfig(format!("invalid epoch {text:?}: {e}")))
}
