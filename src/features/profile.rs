//! Daily and weekly activity profile, peak structure
//!
//! All calendar arithmetic is UTC: hours of day, day boundaries and weekdays.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike};

use crate::config::{DayParts, HourSpan};
use crate::features::time_domain::{mean, std_dev};
use crate::features::Measure;
use crate::types::{Feature, InsufficientData, MS_PER_DAY};

/// Day-part means and the most active hour
pub fn day_parts(points: &[(i64, f64)], parts: &DayParts) -> Vec<Measure> {
    let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for &(t, v) in points {
        if let Some(dt) = DateTime::from_timestamp_millis(t) {
            by_hour.entry(dt.hour()).or_default().push(v);
        }
    }

    let span_mean = |name: &str, span: &HourSpan| -> Result<f64, InsufficientData> {
        let values: Vec<f64> = by_hour
            .iter()
            .filter(|(hour, _)| span.contains(**hour))
            .flat_map(|(_, vs)| vs.iter().copied())
            .collect();
        mean(&values).ok_or_else(|| {
            InsufficientData::new(
                1,
                0,
                format!("no data in {name} hours {:02}-{:02}", span.first, span.last),
            )
        })
    };

    // ties resolve to the earliest hour
    let peak_hour = by_hour
        .iter()
        .filter_map(|(hour, vs)| mean(vs).map(|m| (*hour, m)))
        .fold(None::<(u32, f64)>, |best, (hour, m)| match best {
            Some((_, bm)) if bm >= m => best,
            _ => Some((hour, m)),
        })
        .map(|(hour, _)| f64::from(hour))
        .ok_or_else(|| InsufficientData::new(1, 0, "no data to locate a peak hour"));

    vec![
        (Feature::MorningMean, span_mean("morning", &parts.morning)),
        (Feature::MiddayMean, span_mean("midday", &parts.midday)),
        (Feature::EveningMean, span_mean("evening", &parts.evening)),
        (Feature::PeakHour, peak_hour),
    ]
}

/// Weekday/weekend means, spread of daily means and most/least active weekday.
///
/// Weekdays are numbered from Monday = 0.
pub fn weekly(points: &[(i64, f64)]) -> Vec<Measure> {
    let mut by_day: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for &(t, v) in points {
        by_day.entry(t.div_euclid(MS_PER_DAY)).or_default().push(v);
    }

    let mut weekday_values = Vec::new();
    let mut weekend_values = Vec::new();
    let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut daily_means = Vec::with_capacity(by_day.len());

    for (day, values) in &by_day {
        let Some(date) = DateTime::from_timestamp_millis(day * MS_PER_DAY) else {
            continue;
        };
        let weekday = date.weekday().num_days_from_monday();
        if weekday >= 5 {
            weekend_values.extend_from_slice(values);
        } else {
            weekday_values.extend_from_slice(values);
        }
        by_weekday.entry(weekday).or_default().extend_from_slice(values);
        if let Some(m) = mean(values) {
            daily_means.push(m);
        }
    }

    let days = daily_means.len();
    let daily_spread = if days >= 2 {
        std_dev(&daily_means).ok_or_else(|| InsufficientData::new(2, days, "no daily means"))
    } else {
        Err(InsufficientData::new(2, days, "daily spread needs at least 2 calendar days"))
    };

    let weekday_means: Vec<(u32, f64)> = by_weekday
        .iter()
        .filter_map(|(d, vs)| mean(vs).map(|m| (*d, m)))
        .collect();
    let distinct = weekday_means.len();
    let extreme = |most: bool| -> Result<f64, InsufficientData> {
        if distinct < 2 {
            return Err(InsufficientData::new(
                2,
                distinct,
                "weekday ranking needs at least 2 distinct weekdays",
            ));
        }
        let pick = weekday_means.iter().fold(weekday_means[0], |best, &(d, m)| {
            let better = if most { m > best.1 } else { m < best.1 };
            if better {
                (d, m)
            } else {
                best
            }
        });
        Ok(f64::from(pick.0))
    };

    vec![
        (
            Feature::WeekdayMean,
            mean(&weekday_values)
                .ok_or_else(|| InsufficientData::new(1, 0, "no weekday data")),
        ),
        (
            Feature::WeekendMean,
            mean(&weekend_values)
                .ok_or_else(|| InsufficientData::new(1, 0, "no weekend data")),
        ),
        (Feature::DailyMeanStdDev, daily_spread),
        (Feature::MostActiveWeekday, extreme(true)),
        (Feature::LeastActiveWeekday, extreme(false)),
    ]
}

/// Indices of local maxima whose prominence is at least `min_prominence`.
///
/// Plateaus report their first index; the two end points are never peaks.
pub fn prominent_peaks(values: &[f64], min_prominence: f64) -> Vec<usize> {
    let n = values.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if values[i] > values[i - 1] {
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[i] {
                j += 1;
            }
            if j + 1 < n && values[j + 1] < values[i] && prominence(values, i, j) >= min_prominence {
                peaks.push(i);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Height above the higher of the two bases (lowest points before reaching higher ground)
fn prominence(values: &[f64], start: usize, end: usize) -> f64 {
    let height = values[start];
    let mut left_min = height;
    for &v in values[..start].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }
    let mut right_min = height;
    for &v in &values[end + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }
    height - left_min.max(right_min)
}

/// Count of prominent peaks and the deepest relative trough between neighbours
pub fn peak_structure(values: &[f64], prominence_fraction: f64) -> Vec<Measure> {
    let n = values.len();
    if n < 3 {
        let e = InsufficientData::new(3, n, "peak detection needs at least 3 values");
        return vec![(Feature::PeakCount, Err(e.clone())), (Feature::TroughDepth, Err(e))];
    }
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if range <= 0.0 {
        return vec![(Feature::PeakCount, Ok(0.0)), (Feature::TroughDepth, Ok(0.0))];
    }

    let peaks = prominent_peaks(values, prominence_fraction * range);
    let depth = peaks
        .windows(2)
        .map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let trough = values[a..=b].iter().copied().fold(f64::INFINITY, f64::min);
            (values[a].min(values[b]) - trough) / range
        })
        .fold(0.0, f64::max);

    vec![
        (Feature::PeakCount, Ok(peaks.len() as f64)),
        (Feature::TroughDepth, Ok(depth)),
    ]
}
