// adaptive-tuner-rs/src/telemetry.rs
// Telemetry for detected patterns and optimization results.
//
// `emit` never blocks the control loop. Sinks that do I/O hand events to a
// background writer over an unbounded channel.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{OptimizationResult, UsagePattern};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TelemetryEvent {
    PatternDetected(UsagePattern),
    ActionCompleted(OptimizationResult),
    CycleCompleted {
        cycle: u64,
        actions: usize,
        accepted: usize,
        rolled_back: usize,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::PatternDetected(_) => "pattern_detected",
            TelemetryEvent::ActionCompleted(_) => "action_completed",
            TelemetryEvent::CycleCompleted { .. } => "cycle_completed",
        }
    }
}

/// Event wrapper written to durable sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub event_id: String,
    pub emitted_at: DateTime<Utc>,
    pub event: TelemetryEvent,
}

impl From<TelemetryEvent> for TelemetryEnvelope {
    fn from(event: TelemetryEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TelemetrySink {
    fn emit(&self, event: TelemetryEvent);

    /// Flush buffered events. Called once on shutdown.
    async fn close(&self) {}
}

/// Writes events to the `tracing` pipeline only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

#[async_trait]
impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::PatternDetected(pattern) => tracing::info!(
                event = event.name(),
                pattern = %pattern.kind,
                confidence = pattern.confidence,
                frequency = pattern.frequency,
                "usage pattern detected"
            ),
            TelemetryEvent::ActionCompleted(result) => tracing::info!(
                event = event.name(),
                action_id = %result.action_id,
                kind = %result.action_kind,
                target = %result.target_component,
                success = result.success,
                improvement = result.improvement,
                state = ?result.final_state,
                "optimization action completed"
            ),
            TelemetryEvent::CycleCompleted {
                cycle,
                actions,
                accepted,
                rolled_back,
            } => tracing::info!(
                event = event.name(),
                cycle = *cycle,
                actions = *actions,
                accepted = *accepted,
                rolled_back = *rolled_back,
                "optimization cycle completed"
            ),
        }
    }
}

/// Appends one JSON envelope per line to a local file.
pub struct NdjsonTelemetrySink {
    sender: Mutex<Option<mpsc::UnboundedSender<TelemetryEnvelope>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl NdjsonTelemetrySink {
    /// Start the background writer. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Result<Self, TelemetryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEnvelope>();
        let writer_path = path.clone();
        let handle = tokio::spawn(async move {
            let mut file = match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&writer_path)
                .await
            {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        path = %writer_path.display(),
                        "cannot open telemetry file; dropping events"
                    );
                    while rx.recv().await.is_some() {}
                    return;
                }
            };

            while let Some(envelope) = rx.recv().await {
                let line = match serde_json::to_string(&envelope) {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize telemetry event");
                        continue;
                    }
                };
                if let Err(err) = file.write_all(format!("{line}\n").as_bytes()).await {
                    tracing::warn!(error = %err, "failed to write telemetry event");
                }
            }

            if let Err(err) = file.flush().await {
                tracing::warn!(error = %err, "failed to flush telemetry file");
            }
        });

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for NdjsonTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(event.into()).is_err() {
                    tracing::debug!("telemetry writer stopped; event dropped");
                }
            }
            None => tracing::debug!("telemetry sink closed; event dropped"),
        }
    }

    async fn close(&self) {
        // Dropping the sender lets the writer drain and exit.
        drop(self.sender.lock().unwrap_or_else(|e| e.into_inner()).take());
        let handle = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "telemetry writer task failed");
            }
        }
    }
}
