// adaptive-tuner-rs/src/executor.rs
// Speculative application of one action with measurement and rollback.
//
// Flow per action:
// - snapshot the live configuration and "before" metrics
// - apply through the registered capability, or the built-in default
// - settle, then snapshot "after" metrics and score the change
// - roll back on a meaningful regression or any fault once the component
//   has been touched; a timed-out apply may have left it half-changed
// - append exactly one result to the ledger

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::capability::{CapabilityError, CapabilityRegistry};
use crate::configuration::{Configuration, SharedConfiguration};
use crate::ledger::OptimizationLedger;
use crate::metrics::{composite_improvement, MetricsSnapshot, MetricsSource};
use crate::model::{ActionKind, ActionState, OptimizationAction, OptimizationResult};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::TunerError;

/// Improvement recorded for a faulted execution.
pub const FAULT_IMPROVEMENT: f64 = -1.0;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Wait between applying a change and measuring its effect.
    pub settle: Duration,
    /// Upper bound for apply + settle + measure, and separately for rollback.
    pub action_timeout: Duration,
    /// Composite improvement below this triggers a rollback.
    pub rollback_threshold: f64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            action_timeout: Duration::from_secs(30),
            rollback_threshold: -0.05,
        }
    }
}

/// What happened before a fault or a completed measurement.
#[derive(Default)]
struct Progress {
    /// A registered capability's `apply` was called.
    entered: bool,
    applied: bool,
    before: MetricsSnapshot,
    after: MetricsSnapshot,
    side_effects: Vec<String>,
}

pub struct ActionExecutor {
    registry: Arc<CapabilityRegistry>,
    configuration: SharedConfiguration,
    metrics: Arc<dyn MetricsSource + Send + Sync>,
    ledger: Arc<OptimizationLedger>,
    telemetry: Arc<dyn TelemetrySink + Send + Sync>,
    settings: ExecutorSettings,
}

impl ActionExecutor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        configuration: SharedConfiguration,
        metrics: Arc<dyn MetricsSource + Send + Sync>,
        ledger: Arc<OptimizationLedger>,
        telemetry: Arc<dyn TelemetrySink + Send + Sync>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            configuration,
            metrics,
            ledger,
            telemetry,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute `action` and record the outcome. Never returns an error; faults
    /// are reported through the result's `success` and `final_state`.
    #[instrument(
        name = "optimization_action",
        skip(self, action),
        fields(
            action.id = %action.id,
            action.kind = %action.kind,
            action.target = %action.target_component
        )
    )]
    pub async fn execute(&self, action: &OptimizationAction) -> OptimizationResult {
        let started = Instant::now();
        let config_before = self.configuration.snapshot().await;
        let mut progress = Progress::default();

        let timed = tokio::time::timeout(
            self.settings.action_timeout,
            self.attempt(action, &mut progress),
        )
        .await;
        let outcome: Result<(), TunerError> = match timed {
            Ok(outcome) => outcome,
            Err(_) => Err(CapabilityError::Timeout(self.settings.action_timeout).into()),
        };

        let (final_state, success, improvement) = match outcome {
            Ok(()) => {
                let improvement = composite_improvement(&progress.before, &progress.after);
                if improvement < self.settings.rollback_threshold {
                    warn!(improvement, "regression detected; rolling back");
                    progress.side_effects.push(format!(
                        "rollback: composite improvement {improvement:.3} below {:.3}",
                        self.settings.rollback_threshold
                    ));
                    let state = self
                        .finish_rollback(action, &config_before, &mut progress)
                        .await;
                    (state, false, improvement)
                } else {
                    info!(improvement, "action accepted");
                    (ActionState::Accepted, true, improvement)
                }
            }
            Err(err) => {
                warn!(error = %err, applied = progress.applied, "action faulted");
                progress.side_effects.push(format!("fault: {err}"));
                let state = if progress.entered || progress.applied {
                    self.finish_rollback(action, &config_before, &mut progress)
                        .await
                } else {
                    progress
                        .side_effects
                        .push("nothing was applied; no rollback needed".to_string());
                    ActionState::RolledBack
                };
                (state, false, FAULT_IMPROVEMENT)
            }
        };

        let result = OptimizationResult {
            action_id: action.id,
            action_kind: action.kind,
            target_component: action.target_component.clone(),
            risk: action.risk,
            success,
            improvement,
            final_state,
            side_effects: progress.side_effects,
            metrics_before: progress.before,
            metrics_after: progress.after,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };

        self.record(&result).await;
        result
    }

    async fn attempt(
        &self,
        action: &OptimizationAction,
        progress: &mut Progress,
    ) -> Result<(), TunerError> {
        progress.before = self.metrics.current_metrics().await?;

        match self.registry.get(&action.target_component) {
            Some(capability) => {
                progress.entered = true;
                if !capability.apply(&action.parameters).await? {
                    return Err(CapabilityError::Rejected(action.target_component.clone()).into());
                }
                progress.applied = true;

                if action.kind == ActionKind::ConfigChange {
                    // Track the component's new values in the live configuration.
                    if let Err(err) = self
                        .configuration
                        .update(|cfg| cfg.merge_parameters(&action.parameters))
                        .await
                    {
                        warn!(error = %err, "capability accepted change; live configuration not updated");
                        progress
                            .side_effects
                            .push(format!("live configuration not updated: {err}"));
                    }
                }
            }
            None => match action.kind {
                ActionKind::ConfigChange => {
                    self.configuration
                        .update(|cfg| cfg.merge_parameters(&action.parameters))
                        .await?;
                    progress.applied = true;
                }
                kind => {
                    progress.side_effects.push(format!(
                        "no capability registered for '{}'; {} simulated",
                        action.target_component, kind
                    ));
                }
            },
        }

        if !self.settings.settle.is_zero() {
            tokio::time::sleep(self.settings.settle).await;
        }
        progress.after = self.metrics.current_metrics().await?;
        Ok(())
    }

    /// Run the rollback and map its outcome to a terminal state.
    async fn finish_rollback(
        &self,
        action: &OptimizationAction,
        config_before: &Configuration,
        progress: &mut Progress,
    ) -> ActionState {
        match self.rollback(action, config_before).await {
            Ok(()) => {
                progress
                    .side_effects
                    .push(format!("rolled back '{}'", action.target_component));
                metrics::increment_counter!("adaptive_tuner_rollbacks_total");
                ActionState::RolledBack
            }
            Err(err) => {
                error!(
                    error = %err,
                    action.id = %action.id,
                    target = %action.target_component,
                    "rollback failed; component needs operator attention"
                );
                progress.side_effects.push(format!("rollback failed: {err}"));
                ActionState::Faulted
            }
        }
    }

    /// Restore the pre-action configuration, then undo the component change.
    async fn rollback(
        &self,
        action: &OptimizationAction,
        config_before: &Configuration,
    ) -> Result<(), TunerError> {
        if *self.configuration.snapshot().await != *config_before {
            self.configuration.replace(config_before.clone()).await;
        }

        if let Some(capability) = self.registry.get(&action.target_component) {
            let reverted = tokio::time::timeout(
                self.settings.action_timeout,
                capability.rollback(&action.rollback),
            )
            .await
            .map_err(|_| CapabilityError::Timeout(self.settings.action_timeout))??;

            if !reverted {
                return Err(CapabilityError::Rejected(action.target_component.clone()).into());
            }
        }
        Ok(())
    }

    async fn record(&self, result: &OptimizationResult) {
        self.ledger.append(result.clone()).await;
        self.telemetry
            .emit(TelemetryEvent::ActionCompleted(result.clone()));

        let outcome = match result.final_state {
            ActionState::Accepted => "accepted",
            ActionState::RolledBack => "rolled_back",
            _ => "faulted",
        };
        metrics::increment_counter!(
            "adaptive_tuner_actions_total",
            "kind" => result.action_kind.as_str(),
            "outcome" => outcome
        );
        metrics::histogram!("adaptive_tuner_action_duration_ms", result.duration_ms as f64);
    }
}
