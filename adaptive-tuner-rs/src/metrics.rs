// adaptive-tuner-rs/src/metrics.rs
// Metric snapshots, the metrics-source seam, and the smoothed baseline.
//
// Snapshots are sparse: a key that the source does not report is absent,
// never zero. Every computation here skips absent keys.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Point-in-time metric values keyed by name.
pub type MetricsSnapshot = BTreeMap<String, f64>;

pub const AVG_RESPONSE_TIME: &str = "avg_response_time";
pub const QUERY_SUCCESS_RATE: &str = "query_success_rate";
pub const CONTEXT_RELEVANCE_SCORE: &str = "context_relevance_score";
pub const USER_SATISFACTION: &str = "user_satisfaction";
pub const CPU_USAGE: &str = "cpu_usage";
pub const MEMORY_USAGE: &str = "memory_usage";
pub const CACHE_HIT_RATE: &str = "cache_hit_rate";

/// Smoothing factor for [`MetricsBaseline`].
pub const BASELINE_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Direction of a known metric; unknown metrics do not contribute to scores.
pub fn direction(metric: &str) -> Option<MetricDirection> {
    match metric {
        QUERY_SUCCESS_RATE | CONTEXT_RELEVANCE_SCORE | USER_SATISFACTION | CACHE_HIT_RATE => {
            Some(MetricDirection::HigherIsBetter)
        }
        AVG_RESPONSE_TIME | CPU_USAGE | MEMORY_USAGE => Some(MetricDirection::LowerIsBetter),
        _ => None,
    }
}

/// Average relative improvement from `before` to `after`.
///
/// Higher-is-better metrics contribute `(after - before) / before`,
/// lower-is-better ones `(before - after) / before`. Metrics missing from
/// either side, unknown metrics and zero baselines are skipped. Returns 0.0
/// when nothing is comparable.
pub fn composite_improvement(before: &MetricsSnapshot, after: &MetricsSnapshot) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;

    for (key, &b) in before {
        let Some(dir) = direction(key) else { continue };
        let Some(&a) = after.get(key) else { continue };
        if b.abs() < f64::EPSILON {
            continue;
        }
        let change = match dir {
            MetricDirection::HigherIsBetter => (a - b) / b,
            MetricDirection::LowerIsBetter => (b - a) / b,
        };
        total += change;
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metrics payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("metrics unavailable: {0}")]
    Unavailable(String),
}

/// Source of the pipeline's current metrics.
#[async_trait]
pub trait MetricsSource {
    async fn current_metrics(&self) -> Result<MetricsSnapshot, MetricsError>;
}

/// Reads a JSON object of metric values that the pipeline rewrites in place.
///
/// Non-numeric values are ignored so a partially populated file still works.
pub struct FileMetricsSource {
    path: PathBuf,
}

impl FileMetricsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSource for FileMetricsSource {
    async fn current_metrics(&self) -> Result<MetricsSnapshot, MetricsError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let obj = value.as_object().ok_or_else(|| {
            MetricsError::Unavailable(format!("{} is not a JSON object", self.path.display()))
        })?;

        Ok(obj
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect())
    }
}

/// Serves a scripted sequence of snapshots; the last one repeats forever.
pub struct StaticMetricsSource {
    script: Mutex<VecDeque<MetricsSnapshot>>,
}

impl StaticMetricsSource {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        Self::scripted(vec![snapshot])
    }

    pub fn scripted(snapshots: Vec<MetricsSnapshot>) -> Self {
        Self {
            script: Mutex::new(snapshots.into()),
        }
    }

    /// Queue more snapshots behind the current script.
    pub fn push(&self, snapshot: MetricsSnapshot) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.push_back(snapshot);
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn current_metrics(&self) -> Result<MetricsSnapshot, MetricsError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if script.len() > 1 {
            script
                .pop_front()
                .ok_or_else(|| MetricsError::Unavailable("empty script".to_string()))
        } else {
            script
                .front()
                .cloned()
                .ok_or_else(|| MetricsError::Unavailable("empty script".to_string()))
        }
    }
}

/// Exponentially smoothed steady-state metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBaseline {
    pub alpha: f64,
    pub values: MetricsSnapshot,
    pub updates: u64,
}

impl Default for MetricsBaseline {
    fn default() -> Self {
        Self::new(BASELINE_ALPHA)
    }
}

impl MetricsBaseline {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            values: MetricsSnapshot::new(),
            updates: 0,
        }
    }

    /// Fold a snapshot into the baseline. The first observation of a metric
    /// seeds it directly.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        let alpha = self.alpha;
        for (key, &value) in snapshot {
            if !value.is_finite() {
                continue;
            }
            self.values
                .entry(key.clone())
                .and_modify(|v| *v = alpha * value + (1.0 - alpha) * *v)
                .or_insert(value);
        }
        self.updates += 1;
    }

    /// Relative deviation of `current` from the baseline, per shared metric.
    pub fn drift(&self, current: &MetricsSnapshot) -> MetricsSnapshot {
        current
            .iter()
            .filter_map(|(key, &value)| {
                let base = *self.values.get(key)?;
                if base.abs() < f64::EPSILON {
                    return None;
                }
                Some((key.clone(), (value - base) / base))
            })
            .collect()
    }
}
