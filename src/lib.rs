//! KinetiCandles - Deterministic candle engine for multi-device activity streams
//!
//! KinetiCandles turns raw accelerometer / activity samples from one or more
//! wearables into financial-style OHLC candles and matches them against a
//! library of movement-pattern templates through a staged pipeline:
//! ingestion → synchronization → imputation → candle aggregation →
//! {K-line trend, feature extraction} → pattern matching.
//!
//! ## Modules
//!
//! - **Timeline**: [`ingest`], [`sync`], [`impute`] build one canonical stream
//! - **Candles**: [`aggregate`], [`kline`] bin and smooth it at any resolution
//! - **Analysis**: [`features`], [`patterns`], [`quality`] describe and classify it
//! - **Surfaces**: [`pipeline`], [`encoder`], [`ffi`] and the `kcandles` CLI

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod impute;
pub mod ingest;
pub mod kline;
pub mod patterns;
pub mod pipeline;
pub mod quality;
pub mod sync;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregate::{CandleAggregator, CandleIter};
pub use cancel::{CancelToken, Completion, Outcome};
pub use config::{CacheKey, EngineConfig};
pub use encoder::ReportEncoder;
pub use error::EngineError;
pub use features::FeatureExtractor;
pub use impute::Imputer;
pub use ingest::{RawRecord, SampleIngestor};
pub use kline::KLineComputer;
pub use patterns::{PatternLibrary, PatternMatcher, PatternTemplate};
pub use pipeline::{records_to_analysis, records_to_candles, Analysis, KineticsEngine};
pub use sync::Synchronizer;

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "kinetic-candles";
