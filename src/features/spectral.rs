//! Frequency-domain measures
//!
//! The input may be irregular (empty candles, unfilled gaps), so it is first
//! resampled onto a uniform grid by linear interpolation. The mean is removed
//! and a plain DFT gives the one-sided power spectrum.

use std::f64::consts::PI;

use crate::features::Measure;
use crate::types::{Feature, InsufficientData};

/// Grid points above this widen the resampling interval
pub const MAX_SPECTRAL_POINTS: usize = 4096;

/// Linear interpolation of `(t_ms, value)` points onto `first + k × interval_ms`.
///
/// Points must be sorted by time; repeated timestamps keep the last value.
pub fn resample_uniform(points: &[(i64, f64)], interval_ms: i64) -> Vec<f64> {
    let (Some(&(first, _)), Some(&(last, _))) = (points.first(), points.last()) else {
        return Vec::new();
    };
    if interval_ms <= 0 {
        return Vec::new();
    }

    let count = ((last - first) / interval_ms) as usize + 1;
    let mut out = Vec::with_capacity(count);
    let mut seg = 0usize;
    for k in 0..count {
        let t = first + k as i64 * interval_ms;
        while seg + 1 < points.len() && points[seg + 1].0 <= t {
            seg += 1;
        }
        let (t0, v0) = points[seg];
        let value = match points.get(seg + 1) {
            Some(&(t1, v1)) if t1 > t0 => v0 + (v1 - v0) * (t - t0) as f64 / (t1 - t0) as f64,
            _ => v0,
        };
        out.push(value);
    }
    out
}

/// One-sided power spectrum of the mean-removed values, bins `1..=n/2`
pub fn power_spectrum(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return Vec::new();
    }
    let m = values.iter().sum::<f64>() / n as f64;
    (1..=n / 2)
        .map(|k| {
            let (re, im) = values.iter().enumerate().fold((0.0, 0.0), |(re, im), (i, v)| {
                let angle = 2.0 * PI * (k * i % n) as f64 / n as f64;
                (re + (v - m) * angle.cos(), im - (v - m) * angle.sin())
            });
            re * re + im * im
        })
        .collect()
}

/// Dominant frequency (Hz), its period (s) and its share of non-DC power
pub fn dominant_frequency(
    points: &[(i64, f64)],
    interval_ms: i64,
    min_points: usize,
) -> Vec<Measure> {
    let fail = |e: InsufficientData| {
        vec![
            (Feature::DominantFrequency, Err(e.clone())),
            (Feature::DominantPeriodSecs, Err(e.clone())),
            (Feature::SpectralPowerRatio, Err(e)),
        ]
    };

    let span = match (points.first(), points.last()) {
        (Some(a), Some(b)) => b.0 - a.0,
        _ => 0,
    };
    let mut interval = interval_ms.max(1);
    if span / interval >= MAX_SPECTRAL_POINTS as i64 {
        interval = span / (MAX_SPECTRAL_POINTS as i64 - 1) + 1;
    }

    let grid = resample_uniform(points, interval);
    let required = min_points.max(4);
    if grid.len() < required {
        return fail(InsufficientData::new(
            required,
            grid.len(),
            "spectral analysis needs more uniformly resampled points",
        ));
    }

    let spectrum = power_spectrum(&grid);
    let total: f64 = spectrum.iter().sum();
    if total <= f64::EPSILON {
        return fail(InsufficientData::new(required, grid.len(), "series has no variance"));
    }

    // earliest bin wins ties
    let (idx, peak) = spectrum
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (i, &p)| {
            if p > best.1 {
                (i, p)
            } else {
                best
            }
        });
    let k = idx + 1;
    let dt_secs = interval as f64 / 1000.0;
    let freq = k as f64 / (grid.len() as f64 * dt_secs);

    vec![
        (Feature::DominantFrequency, Ok(freq)),
        (Feature::DominantPeriodSecs, Ok(1.0 / freq)),
        (Feature::SpectralPowerRatio, Ok(peak / total)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_fills_holes_linearly() {
        let points = [(0, 0.0), (10, 10.0), (40, 40.0)];
        let grid = resample_uniform(&points, 10);
        assert_eq!(grid, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_dominant_frequency_of_sine() {
        // period of 16 samples at 1 s spacing
        let points: Vec<(i64, f64)> = (0..128)
            .map(|i| (i * 1000, (2.0 * PI * i as f64 / 16.0).sin()))
            .collect();
        let measures = dominant_frequency(&points, 1000, 8);
        let freq = measures[0].1.as_ref().copied().unwrap();
        let period = measures[1].1.as_ref().copied().unwrap();
        let ratio = measures[2].1.as_ref().copied().unwrap();
        assert!((freq - 1.0 / 16.0).abs() < 1e-9);
        assert!((period - 16.0).abs() < 1e-6);
        assert!(ratio > 0.99);
    }

    #[test]
    fn test_constant_series_has_no_spectrum() {
        let points: Vec<(i64, f64)> = (0..32).map(|i| (i * 1000, 3.0)).collect();
        let measures = dominant_frequency(&points, 1000, 8);
        assert!(measures.iter().all(|(_, r)| r.is_err()));
    }

    #[test]
    fn test_too_few_points() {
        let points = [(0, 1.0), (1000, 2.0)];
        let measures = dominant_frequency(&points, 1000, 8);
        let err = measures[0].1.as_ref().unwrap_err();
        assert_eq!(err.required, 8);
        assert_eq!(err.available, 2);
    }
}
