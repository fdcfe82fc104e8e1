// adaptive-tuner-rs/src/predictor.rs
// Advisory steady-state configuration derived from the history.
//
// Pure read path: nothing here touches the live configuration.

use serde::{Deserialize, Serialize};

use crate::configuration::{
    Configuration, EMBEDDING_GENERAL, EMBEDDING_HIGH_PERFORMANCE, EMBEDDING_MULTILINGUAL,
};
use crate::history::{HistorySummary, MetricsHistory, DEFAULT_LANGUAGE};
use crate::model::{PatternKind, UsagePattern};

/// Hour span `[start_hour, end_hour)` wrapping at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for MaintenanceWindow {
    fn default() -> Self {
        Self {
            start_hour: 2,
            end_hour: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedSettings {
    pub configuration: Configuration,
    pub peak_hours: Vec<u32>,
    pub maintenance_window: MaintenanceWindow,
}

#[derive(Debug, Clone)]
pub struct ConfigurationPredictor {
    base: Configuration,
    default_language: String,
}

impl Default for ConfigurationPredictor {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl ConfigurationPredictor {
    /// Predictions start from `base` and override the tuned fields.
    pub fn new(base: Configuration) -> Self {
        Self {
            base,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn predict(&self, history: &MetricsHistory, patterns: &[UsagePattern]) -> PredictedSettings {
        let Some(summary) = history.summary() else {
            return PredictedSettings {
                configuration: Configuration {
                    chunk_size: 1200,
                    max_context_docs: 5,
                    embedding_model: EMBEDDING_GENERAL.to_string(),
                    ..self.base.clone()
                },
                peak_hours: Vec::new(),
                maintenance_window: MaintenanceWindow::default(),
            };
        };

        let complexity = summary.mean_complexity;

        let chunk_size = if complexity > 0.7 {
            1500
        } else if complexity < 0.3 {
            800
        } else {
            1200
        };

        let max_context_docs = match summary.mean_satisfaction {
            Some(s) if s < 0.7 => 7,
            _ if complexity > 0.6 => 6,
            _ => 5,
        };

        let language = dominant_language(&summary, patterns);
        let embedding_model = if language.is_some_and(|l| l != self.default_language) {
            EMBEDDING_MULTILINGUAL
        } else if complexity > 0.7 {
            EMBEDDING_HIGH_PERFORMANCE
        } else {
            EMBEDDING_GENERAL
        };

        PredictedSettings {
            configuration: Configuration {
                chunk_size,
                max_context_docs,
                embedding_model: embedding_model.to_string(),
                ..self.base.clone()
            },
            peak_hours: peak_hours(&summary),
            maintenance_window: maintenance_window(&summary),
        }
    }
}

/// Prefer the analyzer's language pattern; fall back to the raw distribution.
fn dominant_language(summary: &HistorySummary, patterns: &[UsagePattern]) -> Option<String> {
    patterns
        .iter()
        .find(|p| p.kind == PatternKind::LanguagePreference)
        .and_then(|p| p.metadata.get("language"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| summary.dominant_language().map(|(l, _)| l.to_string()))
}

/// Observed hours whose usage is at least 30% above the mean.
fn peak_hours(summary: &HistorySummary) -> Vec<u32> {
    let counts = &summary.hourly_counts;
    if counts.is_empty() {
        return Vec::new();
    }
    let mean = counts.values().sum::<usize>() as f64 / counts.len() as f64;
    counts
        .iter()
        .filter(|(_, &c)| c as f64 >= mean * 1.3)
        .map(|(&h, _)| h)
        .collect()
}

/// Least-used observed hour plus three hours; earliest hour wins ties.
fn maintenance_window(summary: &HistorySummary) -> MaintenanceWindow {
    summary
        .hourly_counts
        .iter()
        .min_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
        .map(|(&hour, _)| MaintenanceWindow {
            start_hour: hour,
            end_hour: (hour + 3) % 24,
        })
        .unwrap_or_default()
}
