// adaptive-tuner-rs/src/model.rs
// Data model shared by the analyzer, planner, executor and control loop.
//
// Records and results are plain serde DTOs so they can be mirrored to
// NDJSON files and telemetry sinks without extra mapping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricsSnapshot;

/// Free-form parameter mapping carried by actions and rollback descriptors.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Telemetry for one completed request, as handed over by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Completion time; `None` means "now".
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw query text. Only its length and complexity are kept.
    pub query: String,
    /// Detected language code, e.g. "en".
    pub language: Option<String>,
    pub response_time_secs: f64,
    pub context_docs: usize,
    /// Optional user satisfaction in [0, 1].
    pub satisfaction: Option<f64>,
    /// Caller-supplied complexity in [0, 1]; derived from the query when absent.
    pub complexity: Option<f64>,
}

/// One observed request inside the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: DateTime<Utc>,
    pub query_length: usize,
    pub language: String,
    pub response_time_secs: f64,
    pub context_docs: usize,
    pub satisfaction: Option<f64>,
    pub complexity: f64,
    /// 0-23
    pub hour: u32,
    /// 0-6, Monday = 0
    pub weekday: u32,
}

/// Compact sample derived from a [`QueryRecord`] for aggregate statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub response_time_secs: f64,
    pub context_docs: usize,
    pub complexity: f64,
    pub satisfaction: Option<f64>,
}

impl From<&QueryRecord> for PerformanceSample {
    fn from(record: &QueryRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            response_time_secs: record.response_time_secs,
            context_docs: record.context_docs,
            complexity: record.complexity,
            satisfaction: record.satisfaction,
        }
    }
}

/// Kinds of regularities the analyzer can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    PeakHours,
    HighComplexityQueries,
    PerformanceDegradation,
    LanguagePreference,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::PeakHours => "peak_hours",
            PatternKind::HighComplexityQueries => "high_complexity_queries",
            PatternKind::PerformanceDegradation => "performance_degradation",
            PatternKind::LanguagePreference => "language_preference",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected usage or performance regularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    pub kind: PatternKind,
    pub description: String,
    /// Share of the window exhibiting the pattern, in [0, 1].
    pub frequency: f64,
    pub confidence: f64,
    pub recommended_actions: Vec<String>,
    /// Supporting values such as the peak hour or degradation percentage.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Performance,
    Usage,
    Optimization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Actionable conclusion derived from patterns and window statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveInsight {
    pub kind: InsightKind,
    /// Set for usage insights translated from a pattern.
    pub source_pattern: Option<PatternKind>,
    pub title: String,
    pub description: String,
    pub impact: ImpactLevel,
    pub recommended_actions: Vec<String>,
    pub estimated_improvement: f64,
    pub confidence: f64,
    pub data_points: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ConfigChange,
    ResourceScaling,
    ModelSwitch,
    Maintenance,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ConfigChange => "config_change",
            ActionKind::ResourceScaling => "resource_scaling",
            ActionKind::ModelSwitch => "model_switch",
            ActionKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Subtracted from the expected improvement when ranking actions.
    pub fn penalty(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.0,
            RiskLevel::Medium => 0.1,
            RiskLevel::High => 0.3,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Operator-configured aggressiveness of the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    /// Whether an action with this risk and expected improvement may run.
    pub fn admits(&self, risk: RiskLevel, expected_improvement: f64) -> bool {
        match self {
            RiskTolerance::Conservative => risk == RiskLevel::Low && expected_improvement > 0.2,
            RiskTolerance::Moderate => risk != RiskLevel::High && expected_improvement > 0.1,
            RiskTolerance::Aggressive => expected_improvement > 0.05,
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTolerance::Conservative => write!(f, "conservative"),
            RiskTolerance::Moderate => write!(f, "moderate"),
            RiskTolerance::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl FromStr for RiskTolerance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskTolerance::Conservative),
            "moderate" => Ok(RiskTolerance::Moderate),
            "aggressive" => Ok(RiskTolerance::Aggressive),
            other => Err(format!("unknown risk tolerance: {other}")),
        }
    }
}

/// A proposed change to one pipeline component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub description: String,
    pub target_component: String,
    pub parameters: Parameters,
    pub expected_improvement: f64,
    pub risk: RiskLevel,
    /// Parameters that undo `parameters` when handed to the same capability.
    pub rollback: Parameters,
    pub created_at: DateTime<Utc>,
}

impl OptimizationAction {
    pub fn new(
        kind: ActionKind,
        target_component: impl Into<String>,
        description: impl Into<String>,
        expected_improvement: f64,
        risk: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            target_component: target_component.into(),
            parameters: Parameters::new(),
            expected_improvement,
            risk,
            rollback: Parameters::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_rollback(mut self, rollback: Parameters) -> Self {
        self.rollback = rollback;
        self
    }

    /// Ranking score: expected improvement minus the risk penalty.
    pub fn priority_score(&self) -> f64 {
        self.expected_improvement - self.risk.penalty()
    }
}

/// Per-action execution state.
///
/// `Planned -> Applying -> Measuring -> Accepted | RolledBack`, or
/// `Applying/Measuring -> RolledBack` on a fault. `Faulted` is terminal and
/// only reached when the rollback itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Planned,
    Applying,
    Measuring,
    Accepted,
    RolledBack,
    Faulted,
}

/// Ledger entry for one executed action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub action_id: Uuid,
    pub action_kind: ActionKind,
    pub target_component: String,
    pub risk: RiskLevel,
    pub success: bool,
    /// Signed composite improvement; -1.0 marks a faulted execution.
    pub improvement: f64,
    pub final_state: ActionState,
    pub side_effects: Vec<String>,
    pub metrics_before: MetricsSnapshot,
    pub metrics_after: MetricsSnapshot,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn rolled_back(&self) -> bool {
        self.final_state == ActionState::RolledBack
    }
}
