//! Pattern templates and matching
//!
//! A [`PatternLibrary`] is an explicit, ordered collection of named
//! templates. Each template owns a [`Matcher`] that scores a feature vector
//! and/or candle series in `[0, 1]`; templates never look at each other.

mod matcher;
mod rules;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::PatternThresholds;
use crate::error::EngineError;
use crate::types::{CandleSeries, FeatureVector, TimeRange};

pub use matcher::PatternMatcher;
pub use rules::{DayPart, Rule, WeekSide};

/// What a matcher sees
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternInput<'a> {
    pub features: Option<&'a FeatureVector>,
    pub candles: Option<&'a CandleSeries>,
}

impl<'a> PatternInput<'a> {
    pub fn new(features: Option<&'a FeatureVector>, candles: Option<&'a CandleSeries>) -> Self {
        Self { features, candles }
    }

    /// Window of the feature vector, else of the candle series
    pub fn window(&self) -> Option<TimeRange> {
        self.features
            .map(|f| f.window)
            .or_else(|| self.candles.map(|c| c.range))
    }
}

/// Scoring capability of a template
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Score in `[0, 1]`; 0 when the rule is violated or its inputs are missing
    fn score(&self, input: &PatternInput<'_>) -> f64;

    /// Time range the match refers to
    fn matched_window(&self, input: &PatternInput<'_>) -> Option<TimeRange> {
        input.window()
    }
}

/// Named template
#[derive(Debug, Clone, Serialize)]
pub struct PatternTemplate {
    pub name: String,
    pub description: String,
    pub health_implications: String,
    #[serde(skip)]
    pub matcher: Arc<dyn Matcher>,
}

impl PatternTemplate {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        health_implications: impl Into<String>,
        matcher: impl Matcher + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            health_implications: health_implications.into(),
            matcher: Arc::new(matcher),
        }
    }
}

/// Ordered set of templates with unique names
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternLibrary {
    templates: Vec<PatternTemplate>,
}

impl PatternLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in templates with the given thresholds
    pub fn builtin(thresholds: &PatternThresholds) -> Self {
        Self {
            templates: rules::builtin_templates(thresholds),
        }
    }

    /// Add a template at the end
    pub fn register(&mut self, template: PatternTemplate) -> Result<(), EngineError> {
        if self.get(&template.name).is_some() {
            return Err(EngineError::DuplicateTemplate(template.name));
        }
        self.templates.push(template);
        Ok(())
    }

    pub fn with_template(mut self, template: PatternTemplate) -> Result<Self, EngineError> {
        self.register(template)?;
        Ok(self)
    }

    /// Library without the named template
    pub fn without(mut self, name: &str) -> Result<Self, EngineError> {
        let before = self.templates.len();
        self.templates.retain(|t| t.name != name);
        if self.templates.len() == before {
            return Err(EngineError::UnknownTemplate(name.to_string()));
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&PatternTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn templates(&self) -> &[PatternTemplate] {
        &self.templates
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Human-readable reference guide
    pub fn guide(&self) -> String {
        let mut out = String::from("KinetiCandles: Movement Pattern Reference Guide\n\n");
        for template in &self.templates {
            out.push_str(&template.name);
            out.push('\n');
            out.push_str(&"-".repeat(template.name.chars().count()));
            out.push('\n');
            out.push_str(&template.description);
            out.push_str("\n\nHealth Implications: ");
            out.push_str(&template.health_implications);
            out.push_str("\n\n");
        }
        out
    }
}
