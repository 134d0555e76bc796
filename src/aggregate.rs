//! Candle aggregation
//!
//! Bins a canonical stream into fixed-width, half-open periods aligned to an
//! epoch. Every period in the requested range yields a candle; periods
//! without samples yield empty candles so series at any resolution keep a
//! fixed cadence. Candles are always built from the canonical stream, never
//! from another candle series.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;

use crate::cancel::{CancelToken, Outcome};
use crate::config::CandleConfig;
use crate::error::EngineError;
use crate::types::{instant_from_ms, CanonicalSample, CanonicalStream, Candle, CandleSeries, Ohlc, Resolution, TimeRange};

/// Candles per rayon work unit in [`CandleAggregator::aggregate_parallel`]
pub const DEFAULT_CHUNK_CANDLES: usize = 1024;

/// Candle aggregator for one resolution
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    resolution: Resolution,
    width_ms: i64,
    epoch_ms: i64,
    max_candles: usize,
    cancel: CancelToken,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new(&CandleConfig::default())
    }
}

impl CandleAggregator {
    /// Aggregator at the configured resolution
    pub fn new(config: &CandleConfig) -> Self {
        Self::at(config.resolution, config)
    }

    /// Aggregator at an explicit resolution, aligned per `config`
    pub fn at(resolution: Resolution, config: &CandleConfig) -> Self {
        Self {
            resolution,
            width_ms: resolution.width_ms().max(1),
            epoch_ms: config.epoch_ms(resolution),
            max_candles: config.max_candles,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Start (epoch ms) of the period containing `t_ms`
    pub fn period_start_ms(&self, t_ms: i64) -> i64 {
        self.epoch_ms + (t_ms - self.epoch_ms).div_euclid(self.width_ms) * self.width_ms
    }

    /// Widen `range` outward to whole periods
    pub fn align(&self, range: &TimeRange) -> Result<TimeRange, EngineError> {
        let start = self.period_start_ms(range.start.timestamp_millis());
        let end_ms = range.end.timestamp_millis();
        let mut end = self.period_start_ms(end_ms);
        if end < end_ms {
            end += self.width_ms;
        }
        let end = end.max(start);
        Ok(TimeRange::new(instant_from_ms(start)?, instant_from_ms(end)?))
    }

    /// Aligned range to cover: the requested one, else the stream's span
    fn resolve_range(
        &self,
        stream: &CanonicalStream,
        range: Option<TimeRange>,
    ) -> Result<TimeRange, EngineError> {
        match range.or_else(|| stream.span()) {
            Some(range) => self.align(&range),
            None => Err(EngineError::EmptyStream),
        }
    }

    /// Lazy, restartable sequence of candles over `range`
    ///
    /// Fails with [`EngineError::TooManyPeriods`] when the aligned range holds
    /// more periods than `max_candles`.
    pub fn iter<'a>(
        &self,
        stream: &'a CanonicalStream,
        range: Option<TimeRange>,
    ) -> Result<CandleIter<'a>, EngineError> {
        let range = self.resolve_range(stream, range)?;
        let periods = range.duration_ms() / self.width_ms;
        if periods > self.max_candles as i64 {
            return Err(EngineError::TooManyPeriods {
                range,
                resolution: self.resolution,
                periods,
                limit: self.max_candles,
            });
        }
        Ok(self.iter_between(&stream.samples, range.start, range.end))
    }

    fn iter_between<'a>(
        &self,
        samples: &'a [CanonicalSample],
        next: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CandleIter<'a> {
        CandleIter {
            samples,
            resolution: self.resolution,
            width_ms: self.width_ms,
            next,
            end,
        }
    }

    /// Materialize the candle series over `range`
    ///
    /// On cancellation the series holds every candle finished so far and its
    /// range is trimmed to them.
    pub fn aggregate(
        &self,
        stream: &CanonicalStream,
        range: Option<TimeRange>,
    ) -> Result<Outcome<CandleSeries>, EngineError> {
        let iter = self.iter(stream, range)?;
        let range = iter.range();
        let mut candles = Vec::with_capacity(iter.len());

        for candle in iter {
            if self.cancel.is_cancelled() {
                tracing::warn!(built = candles.len(), "candle aggregation cancelled");
                let series = self.partial_series(range, candles);
                return Ok(Outcome::cancelled(series, "aggregate"));
            }
            candles.push(candle);
        }

        tracing::debug!(
            resolution = %self.resolution,
            candles = candles.len(),
            "aggregated candles"
        );
        Ok(Outcome::complete(CandleSeries {
            resolution: self.resolution,
            range,
            candles,
        }))
    }

    /// Like [`aggregate`](Self::aggregate), binning chunks of periods on the rayon pool.
    ///
    /// Output is identical to the sequential path for any thread count.
    pub fn aggregate_parallel(
        &self,
        stream: &CanonicalStream,
        range: Option<TimeRange>,
        chunk_candles: usize,
    ) -> Result<Outcome<CandleSeries>, EngineError> {
        let iter = self.iter(stream, range)?;
        let range = iter.range();
        let total = iter.len();
        let chunk = chunk_candles.max(1);
        // Chunk bounds lie inside the validated range, so clamping never bites
        let boundary = |periods: usize| {
            Duration::try_milliseconds(periods as i64 * self.width_ms)
                .and_then(|offset| range.start.checked_add_signed(offset))
                .map_or(range.end, |t| t.min(range.end))
        };

        let chunks: Vec<(Vec<Candle>, bool)> = (0..total.div_ceil(chunk))
            .into_par_iter()
            .map(|c| {
                let first = c * chunk;
                let count = chunk.min(total - first);
                let sub = self.iter_between(&stream.samples, boundary(first), boundary(first + count));
                let mut out = Vec::with_capacity(count);
                for candle in sub {
                    if self.cancel.is_cancelled() {
                        return (out, false);
                    }
                    out.push(candle);
                }
                (out, true)
            })
            .collect();

        let mut candles = Vec::with_capacity(total);
        for (part, finished) in chunks {
            candles.extend(part);
            if !finished {
                tracing::warn!(built = candles.len(), "candle aggregation cancelled");
                let series = self.partial_series(range, candles);
                return Ok(Outcome::cancelled(series, "aggregate"));
            }
        }

        tracing::debug!(
            resolution = %self.resolution,
            candles = candles.len(),
            "aggregated candles in parallel"
        );
        Ok(Outcome::complete(CandleSeries {
            resolution: self.resolution,
            range,
            candles,
        }))
    }

    fn partial_series(&self, range: TimeRange, candles: Vec<Candle>) -> CandleSeries {
        let end = candles.last().map_or(range.start, |c| c.period_end);
        CandleSeries {
            resolution: self.resolution,
            range: TimeRange::new(range.start, end),
            candles,
        }
    }
}

/// Lazy candle sequence over an aligned range
///
/// Cloning restarts from the clone point; each candle locates its samples by
/// binary search, so nothing before it has to be materialized.
#[derive(Debug, Clone)]
pub struct CandleIter<'a> {
    samples: &'a [CanonicalSample],
    resolution: Resolution,
    width_ms: i64,
    next: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl CandleIter<'_> {
    /// Remaining range
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.next, self.end)
    }
}

impl Iterator for CandleIter<'_> {
    type Item = Candle;

    fn next(&mut self) -> Option<Candle> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next;
        // Bounds are aligned, so a period never runs past `end`
        let end = Duration::try_milliseconds(self.width_ms)
            .and_then(|width| start.checked_add_signed(width))
            .map_or(self.end, |t| t.min(self.end));
        self.next = end;

        let lo = self.samples.partition_point(|s| s.timestamp < start);
        let hi = self.samples.partition_point(|s| s.timestamp < end);
        Some(build_candle(&self.samples[lo..hi.max(lo)], start, end, self.resolution))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range().duration_ms().max(0) / self.width_ms) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CandleIter<'_> {}

/// Summarize the samples of one period
pub fn build_candle(
    samples: &[CanonicalSample],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    resolution: Resolution,
) -> Candle {
    let sample_count = samples.len();
    let imputed_count = samples.iter().filter(|s| s.origin.is_imputed()).count();

    let ohlc = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            let open = samples
                .iter()
                .find(|s| !s.origin.is_imputed())
                .unwrap_or(first)
                .value;
            let (high, low, sum) = samples.iter().fold(
                (f64::NEG_INFINITY, f64::INFINITY, 0.0),
                |(hi, lo, sum), s| (hi.max(s.value), lo.min(s.value), sum + s.value),
            );
            Some(Ohlc {
                open,
                high,
                low,
                close: last.value,
                mean: sum / sample_count as f64,
            })
        }
        _ => None,
    };

    Candle {
        period_start,
        period_end,
        resolution,
        ohlc,
        sample_count,
        imputed_count,
        imputed_fraction: if sample_count == 0 {
            0.0
        } else {
            imputed_count as f64 / sample_count as f64
        },
    }
}
