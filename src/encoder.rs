//! Report encoding
//!
//! Encodes an [`Analysis`] into a self-describing JSON report. The output
//! carries no wall-clock time or random identifiers; identical inputs and
//! configuration always encode to identical bytes.

use serde::Serialize;

use crate::cancel::Completion;
use crate::config::CacheKey;
use crate::error::EngineError;
use crate::ingest::MalformedSample;
use crate::pipeline::{Analysis, DayReport};
use crate::quality::{QualityAssessor, QualityReport};
use crate::types::{CandleSeries, FeatureVector, KLine, MissingInterval, PatternMatch, Unit};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportProvenance {
    pub devices: Vec<String>,
    pub unit: Unit,
    pub stream_hash: String,
    pub cache_key: CacheKey,
}

/// Encoded analysis
#[derive(Debug, Clone, Serialize)]
pub struct Report<'a> {
    pub report_version: &'static str,
    pub producer: ReportProducer,
    pub provenance: ReportProvenance,
    pub quality: QualityReport,
    pub rejected: &'a [MalformedSample],
    pub missing: &'a [MissingInterval],
    pub candles: &'a CandleSeries,
    pub kline: Option<&'a KLine>,
    pub features: Option<&'a FeatureVector>,
    pub matches: &'a [PatternMatch],
    pub days: Option<&'a DayReport>,
    pub completion: Completion,
}

/// Report encoder
#[derive(Debug, Clone, Default)]
pub struct ReportEncoder {
    pretty: bool,
}

impl ReportEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indent the JSON output
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Build the report view of an analysis
    pub fn encode<'a>(&self, analysis: &'a Analysis) -> Report<'a> {
        let quality = QualityAssessor::assess(&analysis.stream, &analysis.candles, analysis.rejected.len());
        Report {
            report_version: REPORT_VERSION,
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
            },
            provenance: ReportProvenance {
                devices: analysis.stream.devices.clone(),
                unit: analysis.stream.unit.clone(),
                stream_hash: analysis.cache_key.stream_hash.clone(),
                cache_key: analysis.cache_key.clone(),
            },
            quality,
            rejected: &analysis.rejected,
            missing: &analysis.stream.missing,
            candles: &analysis.candles,
            kline: analysis.kline.as_ref(),
            features: analysis.features.as_ref(),
            matches: &analysis.matches,
            days: analysis.days.as_ref(),
            completion: analysis.completion,
        }
    }

    /// Encode to a JSON string
    pub fn encode_to_json(&self, analysis: &Analysis) -> Result<String, EngineError> {
        let report = self.encode(analysis);
        let json = if self.pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        Ok(json)
    }
}
