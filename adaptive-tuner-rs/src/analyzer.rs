// adaptive-tuner-rs/src/analyzer.rs
// Statistical pattern extraction over the metrics history.
//
// Each detector is independent; any subset may fire on one call. Confidence
// values are fixed per pattern kind rather than derived from sample
// statistics. They live in `AnalyzerThresholds` so deployments can calibrate
// them.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::history::MetricsHistory;
use crate::model::{PatternKind, UsagePattern};

/// Detection thresholds and per-kind confidence constants.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerThresholds {
    /// Busiest hour must reach this multiple of the mean hourly count.
    pub peak_ratio: f64,
    pub high_complexity: f64,
    /// Recent mean latency must reach this multiple of the older mean.
    pub degradation_ratio: f64,
    pub recent_window: usize,
    pub baseline_window: usize,
    pub language_share: f64,

    pub peak_confidence: f64,
    pub complexity_confidence: f64,
    pub degradation_confidence: f64,
    pub language_confidence: f64,
}

impl Default for AnalyzerThresholds {
    fn default() -> Self {
        Self {
            peak_ratio: 1.5,
            high_complexity: 0.7,
            degradation_ratio: 1.3,
            recent_window: 10,
            baseline_window: 20,
            language_share: 0.8,
            peak_confidence: 0.8,
            complexity_confidence: 0.75,
            degradation_confidence: 0.9,
            language_confidence: 0.85,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternAnalyzer {
    thresholds: AnalyzerThresholds,
}

impl PatternAnalyzer {
    pub fn new(thresholds: AnalyzerThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AnalyzerThresholds {
        &self.thresholds
    }

    /// Detect patterns in `history`. Empty until the history is analysis-ready.
    pub fn analyze(&self, history: &MetricsHistory) -> Vec<UsagePattern> {
        if !history.analysis_ready() {
            debug!(
                samples = history.len(),
                required = history.min_samples(),
                "not enough samples for pattern analysis"
            );
            return Vec::new();
        }

        [
            self.temporal(history),
            self.content(history),
            self.performance(history),
            self.language(history),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn temporal(&self, history: &MetricsHistory) -> Option<UsagePattern> {
        let summary = history.summary()?;
        let counts = &summary.hourly_counts;
        let mean = counts.values().sum::<usize>() as f64 / counts.len() as f64;
        let (&hour, &busiest) = counts.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;

        if (busiest as f64) < mean * self.thresholds.peak_ratio {
            return None;
        }

        Some(UsagePattern {
            kind: PatternKind::PeakHours,
            description: format!(
                "Traffic peaks at {hour:02}:00 with {busiest} requests (mean {mean:.1} per active hour)"
            ),
            frequency: busiest as f64 / summary.samples as f64,
            confidence: self.thresholds.peak_confidence,
            recommended_actions: vec![
                "Scale retrieval capacity ahead of the peak hour".to_string(),
                "Pre-warm the response cache before peak traffic".to_string(),
            ],
            metadata: json!({
                "peak_hour": hour,
                "peak_count": busiest,
                "mean_hourly_count": mean,
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            detected_at: Utc::now(),
        })
    }

    fn content(&self, history: &MetricsHistory) -> Option<UsagePattern> {
        let summary = history.summary()?;
        if summary.mean_complexity <= self.thresholds.high_complexity {
            return None;
        }

        let complex = history
            .records()
            .filter(|r| r.complexity > self.thresholds.high_complexity)
            .count();

        Some(UsagePattern {
            kind: PatternKind::HighComplexityQueries,
            description: format!(
                "Queries are predominantly complex (mean complexity {:.2})",
                summary.mean_complexity
            ),
            frequency: complex as f64 / summary.samples as f64,
            confidence: self.thresholds.complexity_confidence,
            recommended_actions: vec![
                "Increase chunk size to keep related context together".to_string(),
                "Retrieve more context documents per query".to_string(),
            ],
            metadata: json!({ "mean_complexity": summary.mean_complexity })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            detected_at: Utc::now(),
        })
    }

    fn performance(&self, history: &MetricsHistory) -> Option<UsagePattern> {
        let recent_n = self.thresholds.recent_window;
        let older_n = self.thresholds.baseline_window;
        if recent_n == 0 || older_n == 0 || history.len() < recent_n + older_n {
            return None;
        }

        let latencies: Vec<f64> = history
            .samples()
            .rev()
            .take(recent_n + older_n)
            .map(|s| s.response_time_secs)
            .collect();
        let recent = mean(&latencies[..recent_n]);
        let older = mean(&latencies[recent_n..]);
        if older <= f64::EPSILON || recent < older * self.thresholds.degradation_ratio {
            return None;
        }

        let degradation = (recent - older) / older;
        Some(UsagePattern {
            kind: PatternKind::PerformanceDegradation,
            description: format!(
                "Recent latency {recent:.2}s is {:.0}% above the preceding {older:.2}s",
                degradation * 100.0
            ),
            frequency: degradation.min(1.0),
            confidence: self.thresholds.degradation_confidence,
            recommended_actions: vec![
                "Enable or enlarge the response cache".to_string(),
                "Reduce retrieved context to shorten generation".to_string(),
            ],
            metadata: json!({
                "recent_mean_latency": recent,
                "older_mean_latency": older,
                "degradation_pct": degradation * 100.0,
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            detected_at: Utc::now(),
        })
    }

    fn language(&self, history: &MetricsHistory) -> Option<UsagePattern> {
        let summary = history.summary()?;
        let (language, share) = summary.dominant_language()?;
        if share < self.thresholds.language_share {
            return None;
        }

        Some(UsagePattern {
            kind: PatternKind::LanguagePreference,
            description: format!("{:.0}% of requests are in '{language}'", share * 100.0),
            frequency: share,
            confidence: self.thresholds.language_confidence,
            recommended_actions: vec![format!(
                "Use an embedding model optimized for '{language}'"
            )],
            metadata: json!({ "language": language, "share": share })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            detected_at: Utc::now(),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Most recent analysis plus the throttle that decides when to redo it.
#[derive(Debug, Clone)]
pub struct PatternCache {
    interval: Duration,
    last_analysis: Option<Instant>,
    patterns: Vec<UsagePattern>,
}

impl PatternCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_analysis: None,
            patterns: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[UsagePattern] {
        &self.patterns
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_analysis {
            None => true,
            Some(at) => now.saturating_duration_since(at) > self.interval,
        }
    }

    /// Re-analyze when stale. Returns true if the patterns were recomputed.
    ///
    /// The throttle clock only starts once the history is analysis-ready, so
    /// a young history is re-checked on every call.
    pub fn refresh(&mut self, analyzer: &PatternAnalyzer, history: &MetricsHistory) -> bool {
        let now = Instant::now();
        if !self.is_stale(now) {
            return false;
        }
        self.force_refresh(analyzer, history, now);
        true
    }

    pub fn force_refresh(&mut self, analyzer: &PatternAnalyzer, history: &MetricsHistory, now: Instant) {
        self.patterns = analyzer.analyze(history);
        if history.analysis_ready() {
            self.last_analysis = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryMetadata;
    use chrono::{TimeZone, Utc};

    fn at_hour(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn record(history: &mut MetricsHistory, hour: u32, latency: f64, complexity: f64, lang: &str) {
        history.record(QueryMetadata {
            timestamp: Some(at_hour(hour)),
            query: "q".to_string(),
            language: Some(lang.to_string()),
            response_time_secs: latency,
            context_docs: 4,
            satisfaction: None,
            complexity: Some(complexity),
        });
    }

    fn kinds(patterns: &[UsagePattern]) -> Vec<PatternKind> {
        patterns.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn empty_below_minimum_samples() {
        let mut history = MetricsHistory::new(1000, 50);
        for i in 0..49 {
            // Would trigger every detector if the history were ready
            record(&mut history, 9, if i > 40 { 10.0 } else { 1.0 }, 0.9, "de");
        }
        assert!(PatternAnalyzer::default().analyze(&history).is_empty());
    }

    #[test]
    fn quiet_balanced_history_yields_no_patterns() {
        let mut history = MetricsHistory::new(1000, 50);
        for i in 0..60 {
            let lang = if i % 2 == 0 { "en" } else { "es" };
            record(&mut history, (i % 6) as u32, 1.0, 0.4, lang);
        }
        assert!(PatternAnalyzer::default().analyze(&history).is_empty());
    }

    #[test]
    fn detects_all_four_patterns_independently() {
        let mut history = MetricsHistory::new(1000, 50);
        // 40 records spread over four hours, then 20 in a single hour.
        for i in 0..40 {
            record(&mut history, (i % 4) as u32, 1.0, 0.8, "de");
        }
        for i in 0..20 {
            let latency = if i >= 10 { 2.0 } else { 1.0 };
            record(&mut history, 12, latency, 0.8, "de");
        }

        let patterns = PatternAnalyzer::default().analyze(&history);
        let found = kinds(&patterns);
        assert!(found.contains(&PatternKind::PeakHours));
        assert!(found.contains(&PatternKind::HighComplexityQueries));
        assert!(found.contains(&PatternKind::PerformanceDegradation));
        assert!(found.contains(&PatternKind::LanguagePreference));

        let peak = patterns.iter().find(|p| p.kind == PatternKind::PeakHours).unwrap();
        assert_eq!(peak.metadata["peak_hour"], 12);
        assert_eq!(peak.confidence, 0.8);

        let degradation = patterns
            .iter()
            .find(|p| p.kind == PatternKind::PerformanceDegradation)
            .unwrap();
        // recent 10 = 2.0s, prior 20 = 1.0s
        assert!((degradation.metadata["degradation_pct"].as_f64().unwrap() - 100.0).abs() < 1e-9);

        let language = patterns
            .iter()
            .find(|p| p.kind == PatternKind::LanguagePreference)
            .unwrap();
        assert_eq!(language.metadata["language"], "de");
    }

    #[test]
    fn degradation_needs_thirty_percent() {
        let mut history = MetricsHistory::new(1000, 50);
        for i in 0..60 {
            let latency = if i >= 50 { 1.25 } else { 1.0 };
            let lang = if i % 2 == 0 { "en" } else { "es" };
            record(&mut history, (i % 6) as u32, latency, 0.2, lang);
        }
        let found = kinds(&PatternAnalyzer::default().analyze(&history));
        assert!(!found.contains(&PatternKind::PerformanceDegradation));
    }

    #[test]
    fn confidence_constants_are_calibratable() {
        let mut history = MetricsHistory::new(1000, 50);
        for i in 0..60 {
            record(&mut history, (i % 6) as u32, 1.0, 0.9, "en");
        }
        let analyzer = PatternAnalyzer::new(AnalyzerThresholds {
            complexity_confidence: 0.6,
            ..Default::default()
        });
        let patterns = analyzer.analyze(&history);
        let complexity = patterns
            .iter()
            .find(|p| p.kind == PatternKind::HighComplexityQueries)
            .unwrap();
        assert_eq!(complexity.confidence, 0.6);
    }

    #[test]
    fn cache_throttles_reanalysis_once_ready() {
        let analyzer = PatternAnalyzer::default();
        let mut cache = PatternCache::new(Duration::from_secs(3600));

        let mut history = MetricsHistory::new(1000, 50);
        for _ in 0..10 {
            record(&mut history, 1, 1.0, 0.9, "en");
        }
        // Not ready: recomputed every time, clock not started
        assert!(cache.refresh(&analyzer, &history));
        assert!(cache.patterns().is_empty());
        assert!(cache.refresh(&analyzer, &history));

        for _ in 0..50 {
            record(&mut history, 1, 1.0, 0.9, "en");
        }
        assert!(cache.refresh(&analyzer, &history));
        assert!(!cache.patterns().is_empty());
        // Within the interval the cached patterns are kept
        assert!(!cache.refresh(&analyzer, &history));
    }
}
