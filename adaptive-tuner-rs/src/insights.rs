// adaptive-tuner-rs/src/insights.rs
// Turns patterns and window statistics into ranked, actionable insights.

use chrono::Utc;

use crate::history::HistorySummary;
use crate::metrics::{MetricsSnapshot, AVG_RESPONSE_TIME};
use crate::model::{ImpactLevel, InsightKind, PredictiveInsight, UsagePattern};

#[derive(Debug, Clone)]
pub struct InsightGenerator {
    /// Mean latency above this raises a performance insight.
    pub target_latency_secs: f64,
    /// Patterns must exceed this confidence to become usage insights.
    pub min_pattern_confidence: f64,
    /// Mean context-document count below this raises a retrieval insight.
    pub min_context_docs: f64,
}

impl Default for InsightGenerator {
    fn default() -> Self {
        Self {
            target_latency_secs: 3.0,
            min_pattern_confidence: 0.7,
            min_context_docs: 3.0,
        }
    }
}

impl InsightGenerator {
    pub fn new(target_latency_secs: f64) -> Self {
        Self {
            target_latency_secs,
            ..Default::default()
        }
    }

    /// Build insights, highest confidence first.
    ///
    /// Window means come from `window` when the history has data; otherwise
    /// the latency rule falls back to the live `avg_response_time` metric and
    /// the context rule is skipped.
    pub fn generate(
        &self,
        patterns: &[UsagePattern],
        window: Option<&HistorySummary>,
        current: &MetricsSnapshot,
    ) -> Vec<PredictiveInsight> {
        let now = Utc::now();
        let data_points = window.map(|w| w.samples).unwrap_or(0);
        let mut insights = Vec::new();

        let mean_latency = window
            .map(|w| w.mean_latency_secs)
            .or_else(|| current.get(AVG_RESPONSE_TIME).copied());
        if let Some(latency) = mean_latency.filter(|l| *l > self.target_latency_secs) {
            insights.push(PredictiveInsight {
                kind: InsightKind::Performance,
                source_pattern: None,
                title: "Response time above target".to_string(),
                description: format!(
                    "Mean response time {latency:.2}s exceeds the {:.2}s target",
                    self.target_latency_secs
                ),
                impact: ImpactLevel::High,
                recommended_actions: vec![
                    "Reduce chunk size".to_string(),
                    "Retrieve fewer context documents".to_string(),
                    "Enable response caching".to_string(),
                ],
                estimated_improvement: 0.4,
                confidence: 0.85,
                data_points,
                created_at: now,
            });
        }

        for pattern in patterns
            .iter()
            .filter(|p| p.confidence > self.min_pattern_confidence)
        {
            insights.push(PredictiveInsight {
                kind: InsightKind::Usage,
                source_pattern: Some(pattern.kind),
                title: format!("Usage pattern: {}", pattern.kind),
                description: pattern.description.clone(),
                impact: ImpactLevel::Medium,
                recommended_actions: pattern.recommended_actions.clone(),
                estimated_improvement: 0.25,
                confidence: pattern.confidence,
                data_points,
                created_at: now,
            });
        }

        if let Some(w) = window.filter(|w| w.mean_context_docs < self.min_context_docs) {
            insights.push(PredictiveInsight {
                kind: InsightKind::Optimization,
                source_pattern: None,
                title: "Narrow retrieval context".to_string(),
                description: format!(
                    "Only {:.1} context documents are used per query on average",
                    w.mean_context_docs
                ),
                impact: ImpactLevel::Medium,
                recommended_actions: vec![
                    "Increase the number of retrieved context documents".to_string(),
                    "Broaden the retrieval strategy".to_string(),
                ],
                estimated_improvement: 0.3,
                confidence: 0.7,
                data_points,
                created_at: now,
            });
        }

        insights.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        insights
    }
}
