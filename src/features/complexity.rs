//! Complexity measures
//!
//! Sample and approximate entropy (regularity), detrended fluctuation
//! analysis (scaling exponent) and Poincaré-plot descriptors.

use crate::features::time_domain::std_dev;
use crate::features::Measure;
use crate::types::{Feature, InsufficientData};

/// Number of candidate DFA box sizes between the scale bounds
const DFA_SCALE_STEPS: usize = 12;

fn chebyshev_within(values: &[f64], i: usize, j: usize, len: usize, r: f64) -> bool {
    (0..len).all(|k| (values[i + k] - values[j + k]).abs() <= r)
}

/// Sample entropy with embedding dimension `m` and tolerance `tolerance × SD`.
///
/// Both template lengths use the same `N - m` starting points; self-matches
/// are excluded. Undefined when no template pair matches.
pub fn sample_entropy(values: &[f64], m: usize, tolerance: f64) -> Result<f64, InsufficientData> {
    let n = values.len();
    let required = m + 2;
    if m == 0 || n < required {
        return Err(InsufficientData::new(
            required,
            n,
            format!("sample entropy with m={m} needs at least {required} values"),
        ));
    }
    let r = tolerance * std_dev(values).unwrap_or(0.0);
    let templates = n - m;

    let (mut b, mut a) = (0u64, 0u64);
    for i in 0..templates {
        for j in (i + 1)..templates {
            if chebyshev_within(values, i, j, m, r) {
                b += 1;
                if (values[i + m] - values[j + m]).abs() <= r {
                    a += 1;
                }
            }
        }
    }

    if a == 0 || b == 0 {
        return Err(InsufficientData::new(
            required,
            n,
            format!("no template matches at tolerance {r:.4} (A={a}, B={b})"),
        ));
    }
    Ok(-((a as f64) / (b as f64)).ln())
}

/// Approximate entropy; self-matches are counted so it is always defined
pub fn approximate_entropy(values: &[f64], m: usize, tolerance: f64) -> Result<f64, InsufficientData> {
    let n = values.len();
    let required = m + 2;
    if m == 0 || n < required {
        return Err(InsufficientData::new(
            required,
            n,
            format!("approximate entropy with m={m} needs at least {required} values"),
        ));
    }
    let r = tolerance * std_dev(values).unwrap_or(0.0);

    let phi = |len: usize| -> f64 {
        let count = n - len + 1;
        let total: f64 = (0..count)
            .map(|i| {
                let matches = (0..count)
                    .filter(|&j| chebyshev_within(values, i, j, len, r))
                    .count();
                (matches as f64 / count as f64).ln()
            })
            .sum();
        total / count as f64
    };

    Ok((phi(m) - phi(m + 1)).max(0.0))
}

/// Detrended fluctuation analysis exponent (first-order detrending).
///
/// Box sizes are log-spaced within `(min, max)`, capped at `N / 4`.
pub fn dfa_alpha(values: &[f64], (min_scale, max_scale): (usize, usize)) -> Result<f64, InsufficientData> {
    let n = values.len();
    let upper = max_scale.min(n / 4);
    let required = 4 * (min_scale + 1);
    if upper <= min_scale {
        return Err(InsufficientData::new(
            required,
            n,
            format!("DFA needs box sizes from {min_scale} with at least 4 boxes each"),
        ));
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let profile: Vec<f64> = values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v - mean;
            Some(*acc)
        })
        .collect();

    let ratio = (upper as f64 / min_scale as f64).ln();
    let mut scales: Vec<usize> = (0..DFA_SCALE_STEPS)
        .map(|s| {
            let frac = s as f64 / (DFA_SCALE_STEPS - 1) as f64;
            (min_scale as f64 * (ratio * frac).exp()).round() as usize
        })
        .collect();
    scales.dedup();

    let mut log_points = Vec::with_capacity(scales.len());
    for &scale in &scales {
        let boxes = n / scale;
        let mut residual = 0.0;
        for b in 0..boxes {
            residual += detrended_sq_sum(&profile[b * scale..(b + 1) * scale]);
        }
        let fluctuation = (residual / (boxes * scale) as f64).sqrt();
        if fluctuation > 0.0 {
            log_points.push(((scale as f64).ln(), fluctuation.ln()));
        }
    }

    if log_points.len() < 2 {
        return Err(InsufficientData::new(
            required,
            n,
            "DFA needs two scales with non-zero fluctuation",
        ));
    }
    Ok(slope(&log_points))
}

/// Sum of squared residuals after a least-squares line fit
fn detrended_sq_sum(segment: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = segment
        .iter()
        .enumerate()
        .map(|(i, y)| (i as f64, *y))
        .collect();
    let (a, b) = line_fit(&points);
    points.iter().map(|(x, y)| (y - (a + b * x)).powi(2)).sum()
}

/// Intercept and slope of the least-squares line
fn line_fit(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let b = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (my - b * mx, b)
}

fn slope(points: &[(f64, f64)]) -> f64 {
    line_fit(points).1
}

/// Poincaré SD1 (short-term), SD2 (long-term) and SD1/SD2.
///
/// Computed from the successive-difference and successive-sum series
/// rotated by 45 degrees.
pub fn poincare(values: &[f64]) -> Vec<Measure> {
    let n = values.len();
    if n < 3 {
        let e = InsufficientData::new(3, n, "Poincaré descriptors need at least 3 values");
        return vec![
            (Feature::PoincareSd1, Err(e.clone())),
            (Feature::PoincareSd2, Err(e.clone())),
            (Feature::PoincareRatio, Err(e)),
        ];
    }
    let diffs: Vec<f64> = values
        .windows(2)
        .map(|w| (w[1] - w[0]) / std::f64::consts::SQRT_2)
        .collect();
    let sums: Vec<f64> = values
        .windows(2)
        .map(|w| (w[1] + w[0]) / std::f64::consts::SQRT_2)
        .collect();
    let sd1 = std_dev(&diffs).unwrap_or(0.0);
    let sd2 = std_dev(&sums).unwrap_or(0.0);
    let ratio = if sd2 > 1e-12 {
        Ok(sd1 / sd2)
    } else {
        Err(InsufficientData::new(3, n, "SD2 is zero"))
    };
    vec![
        (Feature::PoincareSd1, Ok(sd1)),
        (Feature::PoincareSd2, Ok(sd2)),
        (Feature::PoincareRatio, ratio),
    ]
}
