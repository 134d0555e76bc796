//! Time-domain statistics
//!
//! Central tendency, spread, quartiles and intensity shares of the values,
//! plus body and wick statistics of a candle series.

use crate::features::Measure;
use crate::types::{CandleSeries, Feature, InsufficientData};

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Percentile with linear interpolation between closest ranks; `p` in [0, 100]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Mean, spread and quartiles of the values
pub fn basic_stats(values: &[f64]) -> Vec<Measure> {
    let n = values.len();
    let need = |required: usize, what: &str| {
        InsufficientData::new(required, n, format!("{what} needs at least {required} values"))
    };

    let mean_value = mean(values);
    let sd = if n >= 2 { std_dev(values) } else { None };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let cv = match (mean_value, sd) {
        (Some(m), Some(s)) if m.abs() > f64::EPSILON => Ok(s / m),
        (Some(_), Some(_)) => Err(InsufficientData::new(2, n, "mean is zero")),
        _ => Err(need(2, "coefficient of variation")),
    };

    vec![
        (Feature::Mean, mean_value.ok_or_else(|| need(1, "mean"))),
        (Feature::StdDev, sd.ok_or_else(|| need(2, "standard deviation"))),
        (Feature::CoefficientOfVariation, cv),
        (Feature::Min, sorted.first().copied().ok_or_else(|| need(1, "min"))),
        (Feature::Max, sorted.last().copied().ok_or_else(|| need(1, "max"))),
        (Feature::Median, percentile(&sorted, 50.0).ok_or_else(|| need(1, "median"))),
        (Feature::P25, percentile(&sorted, 25.0).ok_or_else(|| need(1, "p25"))),
        (Feature::P75, percentile(&sorted, 75.0).ok_or_else(|| need(1, "p75"))),
    ]
}

/// Share of values below `moderate`, in `[moderate, high)` and at or above `high`
pub fn intensity_shares(values: &[f64], (moderate, high): (f64, f64)) -> Vec<Measure> {
    if values.is_empty() {
        let missing = || Err(InsufficientData::new(1, 0, "intensity shares need at least 1 value"));
        return vec![
            (Feature::LowIntensityShare, missing()),
            (Feature::ModerateIntensityShare, missing()),
            (Feature::HighIntensityShare, missing()),
        ];
    }
    let n = values.len() as f64;
    let low = values.iter().filter(|v| **v < moderate).count() as f64;
    let high_count = values.iter().filter(|v| **v >= high).count() as f64;
    let moderate_count = n - low - high_count;
    vec![
        (Feature::LowIntensityShare, Ok(low / n)),
        (Feature::ModerateIntensityShare, Ok(moderate_count / n)),
        (Feature::HighIntensityShare, Ok(high_count / n)),
    ]
}

/// Body and wick statistics over the non-empty candles
pub fn candle_shape(series: &CandleSeries) -> Vec<Measure> {
    let candles: Vec<_> = series.non_empty().collect();
    let n = candles.len();
    let need = |required: usize, what: &str| {
        InsufficientData::new(required, n, format!("{what} needs at least {required} non-empty candles"))
    };

    let bodies: Vec<f64> = candles.iter().filter_map(|c| c.body()).collect();
    let upper: Vec<f64> = candles.iter().filter_map(|c| c.upper_wick()).collect();
    let lower: Vec<f64> = candles.iter().filter_map(|c| c.lower_wick()).collect();
    let rising = candles.iter().filter(|c| c.is_rising() == Some(true)).count();

    vec![
        (Feature::BodyMean, mean(&bodies).ok_or_else(|| need(1, "body mean"))),
        (
            Feature::BodyStdDev,
            (if n >= 2 { std_dev(&bodies) } else { None }).ok_or_else(|| need(2, "body spread")),
        ),
        (Feature::UpperWickMean, mean(&upper).ok_or_else(|| need(1, "upper wick mean"))),
        (Feature::LowerWickMean, mean(&lower).ok_or_else(|| need(1, "lower wick mean"))),
        (
            Feature::RisingShare,
            if n == 0 { Err(need(1, "rising share")) } else { Ok(rising as f64 / n as f64) },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(measures: &[Measure], feature: Feature) -> Option<f64> {
        measures
            .iter()
            .find(|(f, _)| *f == feature)
            .and_then(|(_, r)| r.as_ref().ok().copied())
    }

    #[test]
    fn test_basic_stats() {
        let stats = basic_stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((lookup(&stats, Feature::Mean).unwrap() - 5.0).abs() < 1e-12);
        assert!((lookup(&stats, Feature::StdDev).unwrap() - 2.0).abs() < 1e-12);
        assert!((lookup(&stats, Feature::CoefficientOfVariation).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(lookup(&stats, Feature::Median), Some(4.5));
        assert_eq!(lookup(&stats, Feature::Min), Some(2.0));
        assert_eq!(lookup(&stats, Feature::P75), Some(5.5));
    }

    #[test]
    fn test_single_value_spread_unavailable() {
        let stats = basic_stats(&[3.0]);
        assert_eq!(lookup(&stats, Feature::Mean), Some(3.0));
        let sd = stats.iter().find(|(f, _)| *f == Feature::StdDev).unwrap();
        let err = sd.1.as_ref().unwrap_err();
        assert_eq!((err.required, err.available), (2, 1));
    }

    #[test]
    fn test_cv_unavailable_for_zero_mean() {
        let stats = basic_stats(&[-1.0, 1.0]);
        assert_eq!(lookup(&stats, Feature::CoefficientOfVariation), None);
    }

    #[test]
    fn test_intensity_shares() {
        let shares = intensity_shares(&[10.0, 29.9, 30.0, 59.9, 60.0], (30.0, 60.0));
        assert!((lookup(&shares, Feature::LowIntensityShare).unwrap() - 0.4).abs() < 1e-12);
        assert!((lookup(&shares, Feature::ModerateIntensityShare).unwrap() - 0.4).abs() < 1e-12);
        assert!((lookup(&shares, Feature::HighIntensityShare).unwrap() - 0.2).abs() < 1e-12);
    }
}
