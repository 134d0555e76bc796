//! Built-in pattern rules
//!
//! Every rule scores 0 when violated or when a feature it reads is
//! unavailable, and `0.5 + 0.5 × strength` when it holds, so a satisfied rule
//! always reaches the default `min_score`.

use serde::{Deserialize, Serialize};

use crate::config::PatternThresholds;
use crate::patterns::{Matcher, PatternInput, PatternTemplate};
use crate::types::{CandleSeries, Feature, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPart {
    Morning,
    Midday,
    Evening,
}

impl DayPart {
    fn feature(&self) -> Feature {
        match self {
            DayPart::Morning => Feature::MorningMean,
            DayPart::Midday => Feature::MiddayMean,
            DayPart::Evening => Feature::EveningMean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekSide {
    Weekend,
    Weekday,
}

/// Rule-based matchers behind the built-in templates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// One day part's mean strictly exceeds the other two
    DayPartDominant { part: DayPart, margin: f64 },
    /// Exactly two prominent peaks with a deep enough trough between them
    Biphasic { min_trough_depth: f64 },
    /// Low coefficient of variation
    Consistent { max_cv: f64 },
    /// One side of the week exceeds the other by a ratio
    WeeklyShift { favours: WeekSide, ratio: f64 },
    ConsistentWeekly { max_daily_std: f64 },
    VariableWeekly { min_daily_std: f64 },
    /// High sample entropy
    Irregular { min_entropy: f64 },
    /// Run of tall rising candles
    ActivityBurst { min_run: usize, body_fraction: f64 },
    /// Run of candles pinned near the series low
    RestInterval { min_run: usize, level_fraction: f64 },
}

fn satisfied(strength: f64) -> f64 {
    0.5 + 0.5 * strength.clamp(0.0, 1.0)
}

impl Rule {
    fn feature_score(&self, input: &PatternInput<'_>) -> Option<f64> {
        let fv = input.features?;
        match *self {
            Rule::DayPartDominant { part, margin } => {
                let own = fv.get(part.feature())?;
                let mut rival = f64::NEG_INFINITY;
                for other in [DayPart::Morning, DayPart::Midday, DayPart::Evening] {
                    if other != part {
                        rival = rival.max(fv.get(other.feature())?);
                    }
                }
                (own > rival && own > 0.0).then(|| satisfied((own - rival) / own / margin))
            }
            Rule::Biphasic { min_trough_depth } => {
                let peaks = fv.get(Feature::PeakCount)?;
                let depth = fv.get(Feature::TroughDepth)?;
                (peaks == 2.0 && depth >= min_trough_depth)
                    .then(|| satisfied((depth - min_trough_depth) / (1.0 - min_trough_depth)))
            }
            Rule::Consistent { max_cv } => {
                let cv = fv.get(Feature::CoefficientOfVariation)?;
                (cv >= 0.0 && cv <= max_cv).then(|| satisfied(1.0 - cv / max_cv))
            }
            Rule::WeeklyShift { favours, ratio } => {
                let weekday = fv.get(Feature::WeekdayMean)?;
                let weekend = fv.get(Feature::WeekendMean)?;
                let (high, low) = match favours {
                    WeekSide::Weekend => (weekend, weekday),
                    WeekSide::Weekday => (weekday, weekend),
                };
                if low <= 0.0 {
                    return (high > 0.0).then_some(satisfied(1.0));
                }
                (high > low * ratio).then(|| satisfied((high / low - ratio) / ratio))
            }
            Rule::ConsistentWeekly { max_daily_std } => {
                let sd = fv.get(Feature::DailyMeanStdDev)?;
                (sd < max_daily_std).then(|| satisfied(1.0 - sd / max_daily_std))
            }
            Rule::VariableWeekly { min_daily_std } => {
                let sd = fv.get(Feature::DailyMeanStdDev)?;
                (sd >= min_daily_std).then(|| satisfied((sd - min_daily_std) / min_daily_std))
            }
            Rule::Irregular { min_entropy } => {
                let se = fv.get(Feature::SampleEntropy)?;
                (se >= min_entropy).then(|| satisfied((se - min_entropy) / min_entropy))
            }
            Rule::ActivityBurst { .. } | Rule::RestInterval { .. } => None,
        }
    }

    /// Longest qualifying candle run as `(first index, length)`; ties keep the earliest
    fn best_run(&self, series: &CandleSeries) -> Option<(usize, usize)> {
        let (lo, hi) = series
            .non_empty()
            .filter_map(|c| c.ohlc)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), o| {
                (lo.min(o.low), hi.max(o.high))
            });
        let range = hi - lo;
        if range.is_nan() || range <= 0.0 {
            return None;
        }

        let qualifies = |i: usize| -> bool {
            let candle = &series.candles[i];
            match (*self, candle.ohlc) {
                (Rule::ActivityBurst { body_fraction, .. }, Some(o)) => {
                    o.close >= o.open && (o.close - o.open) >= body_fraction * range
                }
                (Rule::RestInterval { level_fraction, .. }, Some(o)) => {
                    o.high <= lo + level_fraction * range
                }
                _ => false,
            }
        };

        let mut best: Option<(usize, usize)> = None;
        let mut start = 0;
        while start < series.candles.len() {
            if !qualifies(start) {
                start += 1;
                continue;
            }
            let mut end = start;
            while end + 1 < series.candles.len() && qualifies(end + 1) {
                end += 1;
            }
            let len = end - start + 1;
            if best.map_or(true, |(_, b)| len > b) {
                best = Some((start, len));
            }
            start = end + 1;
        }
        best
    }

    fn min_run(&self) -> Option<usize> {
        match self {
            Rule::ActivityBurst { min_run, .. } | Rule::RestInterval { min_run, .. } => Some(*min_run),
            _ => None,
        }
    }

    fn run_window(&self, series: &CandleSeries) -> Option<TimeRange> {
        let min_run = self.min_run()?;
        let (start, len) = self.best_run(series)?;
        (len >= min_run).then(|| {
            TimeRange::new(
                series.candles[start].period_start,
                series.candles[start + len - 1].period_end,
            )
        })
    }
}

impl Matcher for Rule {
    fn score(&self, input: &PatternInput<'_>) -> f64 {
        match self.min_run() {
            Some(min_run) => input
                .candles
                .and_then(|series| self.best_run(series))
                .filter(|(_, len)| *len >= min_run)
                .map_or(0.0, |(_, len)| {
                    satisfied((len - min_run) as f64 / min_run as f64)
                }),
            None => self.feature_score(input).unwrap_or(0.0),
        }
    }

    fn matched_window(&self, input: &PatternInput<'_>) -> Option<TimeRange> {
        match self.min_run() {
            Some(_) => input.candles.and_then(|series| self.run_window(series)),
            None => input.window(),
        }
    }
}

/// The shipped template set, in declaration order
pub(crate) fn builtin_templates(t: &PatternThresholds) -> Vec<PatternTemplate> {
    vec![
        PatternTemplate::new(
            "Morning Peak",
            "Highest activity in morning hours, gradually decreasing throughout the day. \
             Tall green candles between 6 and 11 with progressively smaller candles afterward.",
            "Often associated with good sleep hygiene and regular circadian rhythm",
            Rule::DayPartDominant { part: DayPart::Morning, margin: t.dominance_margin },
        ),
        PatternTemplate::new(
            "Midday Peak",
            "Activity concentrated during midday hours (12 to 17).",
            "Often reflects activity anchored to lunch breaks or midday routines",
            Rule::DayPartDominant { part: DayPart::Midday, margin: t.dominance_margin },
        ),
        PatternTemplate::new(
            "Evening Active",
            "Activity builds throughout the day, reaching highest levels in evening (18 to 23). \
             Small morning candles with progressively larger candles later.",
            "May indicate delayed circadian rhythm or night owl chronotype",
            Rule::DayPartDominant { part: DayPart::Evening, margin: t.dominance_margin },
        ),
        PatternTemplate::new(
            "Biphasic Mover",
            "Two distinct activity peaks with a pronounced trough between them.",
            "Often seen in people with structured work schedules and good work-life balance",
            Rule::Biphasic { min_trough_depth: t.biphasic_trough_depth },
        ),
        PatternTemplate::new(
            "Consistent Mover",
            "Relatively consistent activity levels throughout active hours.",
            "Steady movement spread across the day rather than concentrated bouts",
            Rule::Consistent { max_cv: t.consistent_cv_max },
        ),
        PatternTemplate::new(
            "Weekend Shifter",
            "Significantly higher activity on weekends compared to weekdays.",
            "May indicate work-driven movement patterns rather than intrinsic preferences",
            Rule::WeeklyShift { favours: WeekSide::Weekend, ratio: t.weekly_ratio },
        ),
        PatternTemplate::new(
            "Workweek Active",
            "Higher activity during the workweek with less active weekends.",
            "Movement likely tied to commuting or occupational demands",
            Rule::WeeklyShift { favours: WeekSide::Weekday, ratio: t.weekly_ratio },
        ),
        PatternTemplate::new(
            "Consistent Weekly",
            "Relatively consistent activity levels throughout the week.",
            "Regular weekly routine with little day-to-day variation",
            Rule::ConsistentWeekly { max_daily_std: t.consistent_weekly_std },
        ),
        PatternTemplate::new(
            "Variable Weekly",
            "Activity levels vary significantly across different days of the week.",
            "Irregular weekly routine; day-to-day load differs substantially",
            Rule::VariableWeekly { min_daily_std: t.consistent_weekly_std },
        ),
        PatternTemplate::new(
            "Irregular",
            "Activity with little repeating structure (high sample entropy).",
            "May reflect fragmented routines or inconsistent daily structure",
            Rule::Irregular { min_entropy: t.irregular_entropy },
        ),
        PatternTemplate::new(
            "Activity Burst",
            "Cluster of tall green candles: intense, short-duration activity.",
            "Short vigorous bouts; typical of exercise sessions or active commuting",
            Rule::ActivityBurst { min_run: t.burst_min_run, body_fraction: t.burst_body_fraction },
        ),
        PatternTemplate::new(
            "Rest Interval",
            "Series of candles with low activity levels.",
            "Sustained low movement such as sleep, sedentary work or recovery",
            Rule::RestInterval { min_run: t.rest_min_run, level_fraction: t.rest_level_fraction },
        ),
    ]
}
