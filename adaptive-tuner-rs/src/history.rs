// adaptive-tuner-rs/src/history.rs
// Bounded, time-ordered history of per-request telemetry.
//
// Two parallel ring buffers are kept: full query records for pattern
// analysis and compact performance samples for aggregate statistics. Both
// share the same capacity and evict oldest-first.

use std::collections::{BTreeMap, VecDeque};

use chrono::{Datelike, Timelike, Utc};

use crate::model::{PerformanceSample, QueryMetadata, QueryRecord};

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_MIN_SAMPLES: usize = 50;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Aggregate view over the whole window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub samples: usize,
    pub mean_latency_secs: f64,
    pub mean_context_docs: f64,
    pub mean_complexity: f64,
    /// Mean over records that carry a score; `None` when none do.
    pub mean_satisfaction: Option<f64>,
    /// Request count per observed hour of day.
    pub hourly_counts: BTreeMap<u32, usize>,
    pub language_counts: BTreeMap<String, usize>,
}

impl HistorySummary {
    /// Most frequent language and its share of the window.
    /// Ties resolve to the alphabetically first code.
    pub fn dominant_language(&self) -> Option<(&str, f64)> {
        let (lang, count) = self
            .language_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        Some((lang.as_str(), *count as f64 / self.samples.max(1) as f64))
    }
}

#[derive(Debug, Clone)]
pub struct MetricsHistory {
    capacity: usize,
    min_samples: usize,
    default_language: String,
    records: VecDeque<QueryRecord>,
    samples: VecDeque<PerformanceSample>,
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MIN_SAMPLES)
    }
}

impl MetricsHistory {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            min_samples,
            default_language: DEFAULT_LANGUAGE.to_string(),
            records: VecDeque::with_capacity(capacity.min(1024)),
            samples: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Language assumed when a request carries none.
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Record one completed request.
    pub fn record(&mut self, metadata: QueryMetadata) {
        let record = build_record(metadata, &self.default_language);
        self.push(record);
    }

    /// Append an already-built record, evicting the oldest when full.
    pub fn push(&mut self, record: QueryRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.samples.pop_front();
        }
        self.samples.push_back(PerformanceSample::from(&record));
        self.records.push_back(record);
    }

    pub fn analysis_ready(&self) -> bool {
        self.records.len() >= self.min_samples
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Records, oldest first.
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &QueryRecord> + ExactSizeIterator {
        self.records.iter()
    }

    /// Performance samples, oldest first.
    pub fn samples(&self) -> impl DoubleEndedIterator<Item = &PerformanceSample> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn summary(&self) -> Option<HistorySummary> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;

        let mut latency = 0.0;
        let mut docs = 0.0;
        let mut complexity = 0.0;
        let mut satisfaction_sum = 0.0;
        let mut satisfaction_n = 0usize;
        for s in &self.samples {
            latency += s.response_time_secs;
            docs += s.context_docs as f64;
            complexity += s.complexity;
            if let Some(score) = s.satisfaction {
                satisfaction_sum += score;
                satisfaction_n += 1;
            }
        }

        let mut hourly_counts = BTreeMap::new();
        let mut language_counts = BTreeMap::new();
        for r in &self.records {
            *hourly_counts.entry(r.hour).or_insert(0) += 1;
            *language_counts.entry(r.language.clone()).or_insert(0) += 1;
        }

        Some(HistorySummary {
            samples: self.samples.len(),
            mean_latency_secs: latency / n,
            mean_context_docs: docs / n,
            mean_complexity: complexity / n,
            mean_satisfaction: (satisfaction_n > 0)
                .then(|| satisfaction_sum / satisfaction_n as f64),
            hourly_counts,
            language_counts,
        })
    }
}

fn build_record(metadata: QueryMetadata, default_language: &str) -> QueryRecord {
    let timestamp = metadata.timestamp.unwrap_or_else(Utc::now);
    let complexity = metadata
        .complexity
        .unwrap_or_else(|| estimate_complexity(&metadata.query))
        .clamp(0.0, 1.0);
    let language = metadata
        .language
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_ascii_lowercase())
        .unwrap_or_else(|| default_language.to_string());

    QueryRecord {
        timestamp,
        query_length: metadata.query.chars().count(),
        language,
        response_time_secs: metadata.response_time_secs.max(0.0),
        context_docs: metadata.context_docs,
        satisfaction: metadata.satisfaction.map(|s| s.clamp(0.0, 1.0)),
        complexity,
        hour: timestamp.hour(),
        weekday: timestamp.weekday().num_days_from_monday(),
    }
}

const CLAUSE_WORDS: &[&str] = &["and", "or", "but", "because", "versus", "vs", "compare", "whereas"];

/// Heuristic query complexity in [0, 1].
///
/// Weighted blend of length (saturating at 30 words), share of long words
/// and the number of clause markers (saturating at 4).
pub fn estimate_complexity(query: &str) -> f64 {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let length_score = (words.len() as f64 / 30.0).min(1.0);
    let long_words = words.iter().filter(|w| w.chars().count() > 7).count();
    let long_ratio = long_words as f64 / words.len() as f64;

    let punctuation = query
        .chars()
        .filter(|c| matches!(c, ',' | ';' | ':' | '?'))
        .count();
    let connectives = words
        .iter()
        .filter(|w| {
            let bare = w
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase();
            CLAUSE_WORDS.contains(&bare.as_str())
        })
        .count();
    let clause_score = ((punctuation + connectives) as f64 / 4.0).min(1.0);

    (0.5 * length_score + 0.3 * long_ratio + 0.2 * clause_score).clamp(0.0, 1.0)
}
