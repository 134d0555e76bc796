//! K-line (trend) overlays
//!
//! Trailing moving averages over a candle series. Empty candles are excluded
//! from both sum and count; positions without a full window are undefined.

use std::collections::VecDeque;

use crate::config::KLineConfig;
use crate::error::EngineError;
use crate::types::{CandleField, CandleSeries, KLine, KLinePoint};

/// K-line computer
pub struct KLineComputer;

impl KLineComputer {
    /// Moving average of `field` over the trailing `window` candles
    pub fn compute(
        series: &CandleSeries,
        window: usize,
        field: CandleField,
    ) -> Result<KLine, EngineError> {
        if window == 0 {
            return Err(EngineError::InvalidConfig(
                "K-line window must be at least 1".to_string(),
            ));
        }

        let mut trailing: VecDeque<Option<f64>> = VecDeque::with_capacity(window);
        let mut points = Vec::with_capacity(series.len());

        for (i, candle) in series.candles.iter().enumerate() {
            trailing.push_back(candle.field(field));
            while trailing.len() > window {
                trailing.pop_front();
            }
            let value = if i + 1 < window {
                None
            } else {
                Self::window_average(&trailing)
            };
            points.push(KLinePoint {
                period_start: candle.period_start,
                value,
            });
        }

        Ok(KLine {
            window,
            field,
            points,
        })
    }

    /// K-line using configured window and field
    pub fn from_config(series: &CandleSeries, config: &KLineConfig) -> Result<KLine, EngineError> {
        Self::compute(series, config.window, config.field)
    }

    /// Several overlays at once, in the order of `windows`
    pub fn compute_many(
        series: &CandleSeries,
        windows: &[usize],
        field: CandleField,
    ) -> Result<Vec<KLine>, EngineError> {
        windows
            .iter()
            .map(|&window| Self::compute(series, window, field))
            .collect()
    }

    /// Mean of the defined values, `None` if the window is all empty
    fn window_average(window: &VecDeque<Option<f64>>) -> Option<f64> {
        let (sum, count) = window
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_candle;
    use crate::types::{CanonicalSample, Origin, Resolution, TimeRange};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// One candle per entry; `None` yields an empty candle
    fn make_series(closes: &[Option<f64>]) -> CandleSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let start = at(i as i64 * 60);
                let samples: Vec<CanonicalSample> = close
                    .iter()
                    .map(|v| CanonicalSample {
                        timestamp: start,
                        value: *v,
                        device_id: "a".to_string(),
                        origin: Origin::Real,
                    })
                    .collect();
                build_candle(&samples, start, at(i as i64 * 60 + 60), Resolution::Minute)
            })
            .collect();
        CandleSeries {
            resolution: Resolution::Minute,
            range: TimeRange::new(at(0), at(closes.len() as i64 * 60)),
            candles,
        }
    }

    #[test]
    fn test_leading_positions_undefined() {
        let series = make_series(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let kline = KLineComputer::compute(&series, 3, CandleField::Close).unwrap();
        let values: Vec<Option<f64>> = kline.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![None, None, Some(2.0), Some(3.0)]);
        assert_eq!(kline.points[3].period_start, at(180));
    }

    #[test]
    fn test_empty_candles_excluded_from_average() {
        let series = make_series(&[Some(2.0), None, Some(4.0), None, None, None]);
        let kline = KLineComputer::compute(&series, 3, CandleField::Close).unwrap();
        assert_eq!(kline.points[2].value, Some(3.0));
        assert_eq!(kline.points[3].value, Some(4.0));
        assert_eq!(kline.points[4].value, Some(4.0));
        assert_eq!(kline.points[5].value, None);
    }

    #[test]
    fn test_window_of_one_tracks_field() {
        let series = make_series(&[Some(5.0), None, Some(7.0)]);
        let kline = KLineComputer::compute(&series, 1, CandleField::Mean).unwrap();
        let values: Vec<Option<f64>> = kline.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(5.0), None, Some(7.0)]);
    }

    #[test]
    fn test_compute_many_and_zero_window() {
        let series = make_series(&[Some(1.0), Some(3.0)]);
        let lines = KLineComputer::compute_many(&series, &[1, 2], CandleField::Close).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].points[1].value, Some(2.0));
        assert!(KLineComputer::compute(&series, 0, CandleField::Close).is_err());
    }
}
