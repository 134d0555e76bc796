//! Pattern matching
//!
//! Scores every template of a library independently (in parallel), keeps
//! those at or above `min_score` and ranks them by score, ties broken by
//! declaration order.

use rayon::prelude::*;

use crate::cancel::{CancelToken, Outcome};
use crate::config::PatternConfig;
use crate::patterns::{PatternInput, PatternLibrary};
use crate::types::PatternMatch;

/// Pattern matcher
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    min_score: f64,
    cancel: CancelToken,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(&PatternConfig::default())
    }
}

impl PatternMatcher {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            min_score: config.min_score,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ranked matches of `input` against every template in `library`
    pub fn match_all(
        &self,
        library: &PatternLibrary,
        input: &PatternInput<'_>,
    ) -> Outcome<Vec<PatternMatch>> {
        // None marks a template skipped after cancellation
        let scored: Vec<Option<Option<PatternMatch>>> = library
            .templates()
            .par_iter()
            .map(|template| {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let raw = template.matcher.score(input);
                let score = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
                if score <= 0.0 || score < self.min_score {
                    return Some(None);
                }
                let Some(window) = template
                    .matcher
                    .matched_window(input)
                    .or_else(|| input.window())
                else {
                    return Some(None);
                };
                Some(Some(PatternMatch {
                    template_name: template.name.clone(),
                    score,
                    matched_window: window,
                }))
            })
            .collect();

        let complete = scored.iter().all(Option::is_some);
        let mut matches: Vec<PatternMatch> = scored.into_iter().flatten().flatten().collect();
        // stable: equal scores keep declaration order
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        tracing::debug!(
            templates = library.len(),
            matches = matches.len(),
            complete,
            "matched pattern templates"
        );
        if complete {
            Outcome::complete(matches)
        } else {
            tracing::warn!(matches = matches.len(), "pattern matching cancelled");
            Outcome::cancelled(matches, "patterns")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternThresholds;
    use crate::patterns::{Matcher, PatternTemplate};
    use crate::types::{Feature, FeatureSource, FeatureVector, TimeRange};
    use chrono::{TimeZone, Utc};

    #[derive(Debug)]
    struct Fixed(f64);

    impl Matcher for Fixed {
        fn score(&self, _input: &PatternInput<'_>) -> f64 {
            self.0
        }
    }

    fn make_features(pairs: &[(Feature, f64)]) -> FeatureVector {
        let window = TimeRange::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(86_400, 0).unwrap(),
        );
        pairs
            .iter()
            .fold(FeatureVector::new(window, FeatureSource::RawWindow), |fv, (f, v)| {
                fv.with(*f, *v)
            })
    }

    #[test]
    fn test_ranking_and_threshold() {
        let library = PatternLibrary::empty()
            .with_template(PatternTemplate::new("low", "", "", Fixed(0.3)))
            .unwrap()
            .with_template(PatternTemplate::new("tie-a", "", "", Fixed(0.8)))
            .unwrap()
            .with_template(PatternTemplate::new("top", "", "", Fixed(0.9)))
            .unwrap()
            .with_template(PatternTemplate::new("tie-b", "", "", Fixed(0.8)))
            .unwrap();
        let fv = make_features(&[]);
        let outcome = PatternMatcher::default().match_all(&library, &PatternInput::new(Some(&fv), None));
        assert!(outcome.is_complete());
        let names: Vec<&str> = outcome.value.iter().map(|m| m.template_name.as_str()).collect();
        assert_eq!(names, vec!["top", "tie-a", "tie-b"]);
        assert_eq!(outcome.value[0].matched_window, fv.window);
    }

    #[test]
    fn test_biphasic_fixture_matches_and_violations_do_not() {
        let library = PatternLibrary::builtin(&PatternThresholds::default());
        let fv = make_features(&[
            (Feature::PeakCount, 2.0),
            (Feature::TroughDepth, 0.7),
            (Feature::MorningMean, 60.0),
            (Feature::MiddayMean, 20.0),
            (Feature::EveningMean, 65.0),
        ]);
        let matches = PatternMatcher::default()
            .match_all(&library, &PatternInput::new(Some(&fv), None))
            .value;
        let biphasic = matches.iter().find(|m| m.template_name == "Biphasic Mover").unwrap();
        assert!(biphasic.score > 0.5);
        assert!(matches.iter().all(|m| m.template_name != "Morning Peak"));
        assert!(matches.iter().all(|m| m.template_name != "Irregular"));
    }

    #[test]
    fn test_adding_a_template_does_not_change_others() {
        let base = PatternLibrary::builtin(&PatternThresholds::default());
        let extended = base
            .clone()
            .with_template(PatternTemplate::new("Always", "", "", Fixed(1.0)))
            .unwrap();
        let fv = make_features(&[(Feature::CoefficientOfVariation, 0.1)]);
        let input = PatternInput::new(Some(&fv), None);
        let before = PatternMatcher::default().match_all(&base, &input).value;
        let after = PatternMatcher::default().match_all(&extended, &input).value;
        let consistent = |ms: &[PatternMatch]| {
            ms.iter().find(|m| m.template_name == "Consistent Mover").map(|m| m.score)
        };
        assert_eq!(consistent(&before), consistent(&after));
        assert_eq!(after.len(), before.len() + 1);
    }

    #[test]
    fn test_cancelled_matching() {
        let token = CancelToken::new();
        token.cancel();
        let library = PatternLibrary::builtin(&PatternThresholds::default());
        let outcome = PatternMatcher::default()
            .with_cancel(token)
            .match_all(&library, &PatternInput::default());
        assert!(!outcome.is_complete());
        assert!(outcome.value.is_empty());
    }
}
