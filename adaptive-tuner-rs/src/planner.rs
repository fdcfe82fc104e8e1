// adaptive-tuner-rs/src/planner.rs
// Candidate action synthesis, risk filtering and prioritization.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::configuration::{Configuration, EMBEDDING_HIGH_PERFORMANCE, EMBEDDING_MULTILINGUAL};
use crate::metrics::{MetricsSnapshot, AVG_RESPONSE_TIME, CONTEXT_RELEVANCE_SCORE};
use crate::model::{
    ActionKind, InsightKind, OptimizationAction, Parameters, PatternKind, PredictiveInsight,
    RiskLevel, RiskTolerance,
};

#[derive(Debug, Clone)]
pub struct ActionPlanner {
    pub tolerance: RiskTolerance,
    pub max_actions: usize,
    /// Insights at or below this confidence are not acted on.
    pub min_insight_confidence: f64,
    /// Live latency (seconds) above which a pipeline change is proposed.
    pub latency_threshold_secs: f64,
    /// Live relevance below which an embedding switch is proposed.
    pub relevance_threshold: f64,
    /// Cache cleanup runs on every n-th completed cycle.
    pub maintenance_every: u64,
}

impl Default for ActionPlanner {
    fn default() -> Self {
        Self {
            tolerance: RiskTolerance::default(),
            max_actions: 3,
            min_insight_confidence: 0.7,
            latency_threshold_secs: 4.0,
            relevance_threshold: 0.75,
            maintenance_every: 10,
        }
    }
}

fn params(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

impl ActionPlanner {
    pub fn new(tolerance: RiskTolerance, max_actions: usize) -> Self {
        Self {
            tolerance,
            max_actions,
            ..Default::default()
        }
    }

    /// Build the filtered, prioritized action list for one cycle.
    ///
    /// `completed_cycles` is the number of cycles finished before this one;
    /// maintenance is scheduled when this cycle is a multiple of
    /// `maintenance_every`.
    pub fn plan(
        &self,
        insights: &[PredictiveInsight],
        current: &MetricsSnapshot,
        configuration: &Configuration,
        completed_cycles: u64,
    ) -> Vec<OptimizationAction> {
        let mut candidates = Vec::new();

        for insight in insights
            .iter()
            .filter(|i| i.confidence > self.min_insight_confidence)
        {
            if let Some(action) = self.from_insight(insight, configuration) {
                candidates.push(action);
            }
        }

        candidates.extend(self.from_thresholds(current, configuration));

        if self.maintenance_every > 0 && (completed_cycles + 1) % self.maintenance_every == 0 {
            candidates.push(
                OptimizationAction::new(
                    ActionKind::Maintenance,
                    "cache",
                    "Scheduled cache cleanup",
                    0.25,
                    RiskLevel::Low,
                )
                .with_parameters(params(json!({"operation": "cache_cleanup"}))),
            );
        }

        let planned = self.prioritize(candidates);
        tracing::debug!(
            tolerance = %self.tolerance,
            planned = planned.len(),
            "action plan ready"
        );
        planned
    }

    fn from_insight(
        &self,
        insight: &PredictiveInsight,
        configuration: &Configuration,
    ) -> Option<OptimizationAction> {
        let action = match (insight.kind, insight.source_pattern) {
            (InsightKind::Performance, _) => config_change(
                configuration,
                "rag_pipeline",
                "Reduce chunk size and context to lower latency",
                insight.estimated_improvement,
                reduced_pipeline(configuration),
            ),
            (InsightKind::Usage, Some(PatternKind::PeakHours)) => OptimizationAction::new(
                ActionKind::ResourceScaling,
                "infrastructure",
                "Scale retrieval capacity ahead of peak hours",
                insight.estimated_improvement,
                RiskLevel::Medium,
            )
            .with_parameters(params(json!({"scale_factor": 1.5})))
            .with_rollback(params(json!({"scale_factor": 1.0}))),
            (InsightKind::Usage, Some(PatternKind::HighComplexityQueries)) => config_change(
                configuration,
                "chunking",
                "Use larger chunks for complex queries",
                insight.estimated_improvement,
                params(json!({"chunk_size": 1500})),
            ),
            (InsightKind::Usage, Some(PatternKind::PerformanceDegradation)) => config_change(
                configuration,
                "cache",
                "Enable and enlarge the response cache",
                insight.estimated_improvement,
                params(json!({
                    "enable_caching": true,
                    "cache_size": configuration.cache_size.saturating_mul(2),
                })),
            ),
            (InsightKind::Usage, Some(PatternKind::LanguagePreference)) => model_switch(
                configuration,
                EMBEDDING_MULTILINGUAL,
                "Switch to a multilingual embedding model",
                insight.estimated_improvement,
            ),
            (InsightKind::Usage, None) => return None,
            (InsightKind::Optimization, _) => config_change(
                configuration,
                "retrieval",
                "Retrieve more context documents",
                insight.estimated_improvement,
                params(json!({"max_context_docs": configuration.max_context_docs + 2})),
            ),
        };
        Some(action)
    }

    fn from_thresholds(
        &self,
        current: &MetricsSnapshot,
        configuration: &Configuration,
    ) -> Vec<OptimizationAction> {
        let mut out = Vec::new();

        if let Some(latency) = current
            .get(AVG_RESPONSE_TIME)
            .filter(|l| **l > self.latency_threshold_secs)
        {
            out.push(config_change(
                configuration,
                "rag_pipeline",
                &format!("Latency {latency:.2}s above threshold; trim pipeline"),
                0.3,
                reduced_pipeline(configuration),
            ));
        }

        if let Some(relevance) = current
            .get(CONTEXT_RELEVANCE_SCORE)
            .filter(|r| **r < self.relevance_threshold)
        {
            out.push(model_switch(
                configuration,
                EMBEDDING_HIGH_PERFORMANCE,
                &format!("Relevance {relevance:.2} below threshold; upgrade embeddings"),
                0.2,
            ));
        }

        out
    }

    /// Deduplicate, filter by tolerance, rank and truncate.
    fn prioritize(&self, candidates: Vec<OptimizationAction>) -> Vec<OptimizationAction> {
        let mut best: HashMap<(ActionKind, String), OptimizationAction> = HashMap::new();
        for action in candidates {
            let key = (action.kind, action.target_component.clone());
            match best.get(&key) {
                Some(existing) if existing.expected_improvement >= action.expected_improvement => {}
                _ => {
                    best.insert(key, action);
                }
            }
        }

        let mut admitted: Vec<OptimizationAction> = best
            .into_values()
            .filter(|a| self.tolerance.admits(a.risk, a.expected_improvement))
            .collect();

        admitted.sort_by(|a, b| {
            b.priority_score()
                .total_cmp(&a.priority_score())
                .then_with(|| a.target_component.cmp(&b.target_component))
        });
        admitted.truncate(self.max_actions);
        admitted
    }
}

fn reduced_pipeline(configuration: &Configuration) -> Parameters {
    let chunk_size = ((configuration.chunk_size as f64 * 0.8) as u32).max(400);
    let max_context_docs = configuration.max_context_docs.saturating_sub(1).max(3);
    params(json!({
        "chunk_size": chunk_size,
        "max_context_docs": max_context_docs,
        "enable_caching": true,
    }))
}

/// Low-risk configuration change whose rollback restores the current values.
fn config_change(
    configuration: &Configuration,
    target: &str,
    description: &str,
    expected_improvement: f64,
    parameters: Parameters,
) -> OptimizationAction {
    let rollback = configuration.extract(parameters.keys());
    OptimizationAction::new(
        ActionKind::ConfigChange,
        target,
        description,
        expected_improvement,
        RiskLevel::Low,
    )
    .with_parameters(parameters)
    .with_rollback(rollback)
}

fn model_switch(
    configuration: &Configuration,
    model: &str,
    description: &str,
    expected_improvement: f64,
) -> OptimizationAction {
    let parameters = params(json!({"embedding_model": model}));
    let rollback = configuration.extract(parameters.keys());
    OptimizationAction::new(
        ActionKind::ModelSwitch,
        "embeddings",
        description,
        expected_improvement,
        RiskLevel::Medium,
    )
    .with_parameters(parameters)
    .with_rollback(rollback)
}
