use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::capability::{Capability, CapabilityError, CapabilityRegistry};
use crate::configuration::{Configuration, SharedConfiguration};
use crate::control::ControlLoop;
use crate::executor::{ActionExecutor, ExecutorSettings, FAULT_IMPROVEMENT};
use crate::ledger::OptimizationLedger;
use crate::metrics::{
    MetricsError, MetricsSnapshot, MetricsSource, StaticMetricsSource, AVG_RESPONSE_TIME,
    QUERY_SUCCESS_RATE,
};
use crate::model::{
    ActionKind, ActionState, OptimizationAction, Parameters, QueryMetadata, RiskLevel,
};
use crate::settings::TunerSettings;
use crate::store::{ConfigStore, MemoryConfigStore, StoreError};
use crate::telemetry::TracingTelemetrySink;
use crate::TunerError;

fn params(value: serde_json::Value) -> Parameters {
    value.as_object().cloned().unwrap()
}

fn latency(secs: f64) -> MetricsSnapshot {
    MetricsSnapshot::from([(AVG_RESPONSE_TIME.to_string(), secs)])
}

fn slow_pipeline() -> MetricsSnapshot {
    MetricsSnapshot::from([
        (AVG_RESPONSE_TIME.to_string(), 5.2),
        (QUERY_SUCCESS_RATE.to_string(), 0.95),
    ])
}

fn test_settings() -> TunerSettings {
    TunerSettings {
        settle: Duration::ZERO,
        action_timeout: Duration::from_secs(5),
        loop_backoff: Duration::from_millis(50),
        stop_grace: Duration::from_secs(5),
        ..Default::default()
    }
}

fn chunk_action() -> OptimizationAction {
    OptimizationAction::new(
        ActionKind::ConfigChange,
        "chunking",
        "smaller chunks",
        0.3,
        RiskLevel::Low,
    )
    .with_parameters(params(json!({"chunk_size": 800})))
    .with_rollback(params(json!({"chunk_size": 1000})))
}

fn executor_with(
    registry: Arc<CapabilityRegistry>,
    metrics: Arc<dyn MetricsSource + Send + Sync>,
) -> (ActionExecutor, SharedConfiguration, Arc<OptimizationLedger>) {
    let configuration = SharedConfiguration::default();
    let ledger = Arc::new(OptimizationLedger::new());
    let executor = ActionExecutor::new(
        registry,
        configuration.clone(),
        metrics,
        Arc::clone(&ledger),
        Arc::new(TracingTelemetrySink),
        ExecutorSettings {
            settle: Duration::ZERO,
            ..Default::default()
        },
    );
    (executor, configuration, ledger)
}

/// Records every apply/rollback call; optionally fails rollbacks.
#[derive(Default)]
struct RecordingCapability {
    applied: Mutex<Vec<Parameters>>,
    rolled_back: Mutex<Vec<Parameters>>,
    fail_rollback: bool,
}

#[async_trait]
impl Capability for RecordingCapability {
    async fn apply(&self, parameters: &Parameters) -> Result<bool, CapabilityError> {
        self.applied.lock().unwrap().push(parameters.clone());
        Ok(true)
    }

    async fn rollback(&self, descriptor: &Parameters) -> Result<bool, CapabilityError> {
        self.rolled_back.lock().unwrap().push(descriptor.clone());
        if self.fail_rollback {
            return Err(CapabilityError::Failed("component unreachable".to_string()));
        }
        Ok(true)
    }
}

#[derive(Default)]
struct FailingCapability {
    rolled_back: Mutex<Vec<Parameters>>,
}

#[async_trait]
impl Capability for FailingCapability {
    async fn apply(&self, _parameters: &Parameters) -> Result<bool, CapabilityError> {
        Err(CapabilityError::Failed("chunker crashed".to_string()))
    }

    async fn rollback(&self, descriptor: &Parameters) -> Result<bool, CapabilityError> {
        self.rolled_back.lock().unwrap().push(descriptor.clone());
        Ok(true)
    }
}

/// Changes its state, then stalls past the action timeout.
#[derive(Default)]
struct HalfApplyingCapability {
    chunk_size: Mutex<u64>,
    rollbacks: Mutex<usize>,
}

#[async_trait]
impl Capability for HalfApplyingCapability {
    async fn apply(&self, parameters: &Parameters) -> Result<bool, CapabilityError> {
        if let Some(size) = parameters.get("chunk_size").and_then(|v| v.as_u64()) {
            *self.chunk_size.lock().unwrap() = size;
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(true)
    }

    async fn rollback(&self, descriptor: &Parameters) -> Result<bool, CapabilityError> {
        *self.rollbacks.lock().unwrap() += 1;
        if let Some(size) = descriptor.get("chunk_size").and_then(|v| v.as_u64()) {
            *self.chunk_size.lock().unwrap() = size;
        }
        Ok(true)
    }
}

/// Blocks inside `apply` until released, to hold a cycle open.
#[derive(Default)]
struct GatedCapability {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Capability for GatedCapability {
    async fn apply(&self, _parameters: &Parameters) -> Result<bool, CapabilityError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(true)
    }
}

/// Serves one good snapshot, then fails.
struct FlakyMetrics {
    calls: Mutex<usize>,
}

#[async_trait]
impl MetricsSource for FlakyMetrics {
    async fn current_metrics(&self) -> Result<MetricsSnapshot, MetricsError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls == 1 {
            Ok(latency(2.0))
        } else {
            Err(MetricsError::Unavailable("collector offline".to_string()))
        }
    }
}

struct ReadOnlyStore;

#[async_trait]
impl ConfigStore for ReadOnlyStore {
    async fn load(&self) -> Result<Option<Configuration>, StoreError> {
        Ok(None)
    }

    async fn save(&self, _configuration: &Configuration) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

#[tokio::test]
async fn latency_regression_is_rolled_back_through_capability() {
    let capability = Arc::new(RecordingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", capability.clone());
    let metrics = Arc::new(StaticMetricsSource::scripted(vec![latency(2.0), latency(2.2)]));
    let (executor, configuration, ledger) = executor_with(registry, metrics);

    let result = executor.execute(&chunk_action()).await;

    assert!(!result.success);
    assert!(result.rolled_back());
    assert!((result.improvement + 0.1).abs() < 1e-9);
    assert!(result.side_effects.iter().any(|s| s.starts_with("rollback")));
    assert_eq!(*configuration.snapshot().await, Configuration::default());
    assert_eq!(
        *capability.rolled_back.lock().unwrap(),
        vec![params(json!({"chunk_size": 1000}))]
    );
    assert_eq!(ledger.entries(), vec![result]);
}

#[tokio::test]
async fn failing_capability_records_fault_improvement() {
    let capability = Arc::new(FailingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", capability.clone());
    let metrics = Arc::new(StaticMetricsSource::new(latency(2.0)));
    let (executor, configuration, ledger) = executor_with(registry, metrics);

    let result = executor.execute(&chunk_action()).await;

    assert!(!result.success);
    assert_eq!(result.improvement, FAULT_IMPROVEMENT);
    assert_eq!(result.final_state, ActionState::RolledBack);
    assert!(result.side_effects.iter().any(|s| s.contains("chunker crashed")));
    assert_eq!(
        *capability.rolled_back.lock().unwrap(),
        vec![params(json!({"chunk_size": 1000}))]
    );
    assert_eq!(*configuration.snapshot().await, Configuration::default());
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn timed_out_apply_is_rolled_back() {
    let capability = Arc::new(HalfApplyingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", capability.clone());
    let configuration = SharedConfiguration::default();
    let executor = ActionExecutor::new(
        registry,
        configuration.clone(),
        Arc::new(StaticMetricsSource::new(latency(2.0))),
        Arc::new(OptimizationLedger::new()),
        Arc::new(TracingTelemetrySink),
        ExecutorSettings {
            settle: Duration::ZERO,
            action_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );

    let result = executor.execute(&chunk_action()).await;

    assert!(!result.success);
    assert_eq!(result.improvement, FAULT_IMPROVEMENT);
    assert_eq!(result.final_state, ActionState::RolledBack);
    assert!(result.side_effects.iter().any(|s| s.contains("did not respond")));
    assert_eq!(*capability.rollbacks.lock().unwrap(), 1);
    assert_eq!(*capability.chunk_size.lock().unwrap(), 1000);
    assert_eq!(*configuration.snapshot().await, Configuration::default());
}

#[tokio::test]
async fn fault_after_apply_triggers_rollback() {
    let capability = Arc::new(RecordingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", capability.clone());
    let metrics = Arc::new(FlakyMetrics {
        calls: Mutex::new(0),
    });
    let (executor, configuration, _ledger) = executor_with(registry, metrics);

    let result = executor.execute(&chunk_action()).await;

    assert_eq!(result.improvement, FAULT_IMPROVEMENT);
    assert_eq!(result.final_state, ActionState::RolledBack);
    assert_eq!(capability.applied.lock().unwrap().len(), 1);
    assert_eq!(capability.rolled_back.lock().unwrap().len(), 1);
    // The live configuration followed the change and was restored.
    assert_eq!(configuration.snapshot().await.chunk_size, 1000);
}

#[tokio::test]
async fn failed_rollback_is_terminal_fault() {
    let capability = Arc::new(RecordingCapability {
        fail_rollback: true,
        ..Default::default()
    });
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", capability.clone());
    let metrics = Arc::new(StaticMetricsSource::scripted(vec![latency(2.0), latency(3.0)]));
    let (executor, configuration, _ledger) = executor_with(registry, metrics);

    let result = executor.execute(&chunk_action()).await;

    assert_eq!(result.final_state, ActionState::Faulted);
    assert!(!result.success);
    assert!(result.side_effects.iter().any(|s| s.starts_with("rollback failed")));
    assert_eq!(*configuration.snapshot().await, Configuration::default());
}

#[tokio::test]
async fn ledger_only_grows_across_cycles() {
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .build()
        .await;

    let first = tuner.run_cycle().await.unwrap();
    assert!(!first.is_empty());
    let ledger = tuner.ledger();
    assert_eq!(ledger.len(), first.len());
    let after_first = ledger.entries();

    let second = tuner.run_cycle().await.unwrap();
    assert_eq!(ledger.len(), first.len() + second.len());
    assert_eq!(ledger.entries()[..after_first.len()], after_first[..]);
    assert_eq!(tuner.completed_cycles(), 2);
}

#[tokio::test]
async fn slow_pipeline_cycle_trims_and_persists_configuration() {
    let store = Arc::new(MemoryConfigStore::new());
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
        .config_store(store.clone())
        .build()
        .await;

    let results = tuner.run_cycle().await.unwrap();
    let pipeline = results
        .iter()
        .find(|r| r.target_component == "rag_pipeline")
        .expect("rag_pipeline action executed");
    assert_eq!(pipeline.final_state, ActionState::Accepted);

    let live = tuner.current_configuration().await;
    assert_eq!(live.chunk_size, 800);
    assert_eq!(live.max_context_docs, 4);
    assert_eq!(store.saved().as_ref(), Some(&*live));
    assert_eq!(tuner.baseline().values.get(AVG_RESPONSE_TIME), Some(&5.2));
}

#[tokio::test]
async fn persistence_fault_does_not_abort_cycle() {
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
        .config_store(Arc::new(ReadOnlyStore))
        .build()
        .await;

    let results = tuner.run_cycle().await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(tuner.current_configuration().await.chunk_size, 800);
}

#[tokio::test]
async fn disabled_tuner_skips_cycles() {
    let tuner = ControlLoop::builder(TunerSettings {
        enabled: false,
        ..test_settings()
    })
    .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
    .config_store(Arc::new(MemoryConfigStore::new()))
    .build()
    .await;

    assert!(tuner.run_cycle().await.unwrap().is_empty());
    assert!(tuner.ledger().is_empty());
    assert_eq!(tuner.completed_cycles(), 0);
}

#[tokio::test]
async fn overlapping_cycle_is_rejected_and_registration_stays_open() {
    let gate = Arc::new(GatedCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("rag_pipeline", gate.clone());

    let tuner = Arc::new(
        ControlLoop::builder(test_settings())
            .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
            .config_store(Arc::new(MemoryConfigStore::new()))
            .registry(registry)
            .build()
            .await,
    );

    let background = {
        let tuner = Arc::clone(&tuner);
        tokio::spawn(async move { tuner.run_cycle().await })
    };
    gate.entered.notified().await;

    assert!(matches!(
        tuner.run_cycle().await,
        Err(TunerError::CycleInProgress)
    ));
    tuner
        .registry()
        .register("cache", Arc::new(RecordingCapability::default()));
    assert!(tuner.registry().get("cache").is_some());

    gate.release.notify_one();
    let results = background.await.unwrap().unwrap();
    assert!(!results.is_empty());

    // The flag is cleared once the cycle ends.
    gate.release.notify_one();
    assert!(tuner.run_cycle().await.is_ok());
}

#[tokio::test]
async fn start_and_stop_background_loop() {
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(latency(1.0))))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .build()
        .await;

    tuner.start(Duration::from_millis(10));
    tuner.start(Duration::from_millis(10));
    assert!(tuner.is_running());

    for _ in 0..200 {
        if tuner.completed_cycles() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(tuner.completed_cycles() >= 2);

    tuner.stop().await;
    assert!(!tuner.is_running());
    let settled = tuner.completed_cycles();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tuner.completed_cycles(), settled);
}

#[tokio::test]
async fn failed_high_risk_action_ends_the_plan() {
    let tuned = Arc::new(RecordingCapability::default());
    let index = Arc::new(FailingCapability::default());
    let later = Arc::new(RecordingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", tuned.clone());
    registry.register("search_index", index.clone());
    registry.register("cache", later.clone());

    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(latency(2.0))))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .registry(registry)
        .build()
        .await;

    let reindex = OptimizationAction::new(
        ActionKind::ConfigChange,
        "search_index",
        "rebuild the index",
        0.6,
        RiskLevel::High,
    )
    .with_parameters(params(json!({"reindex": true})));
    let cleanup = OptimizationAction::new(
        ActionKind::ConfigChange,
        "cache",
        "cache cleanup",
        0.25,
        RiskLevel::Low,
    )
    .with_parameters(params(json!({"operation": "cache_cleanup"})));

    let results = tuner
        .execute_plan(&[chunk_action(), reindex, cleanup])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].final_state, ActionState::Accepted);
    assert!(!results[1].success);
    assert_eq!(results[1].risk, RiskLevel::High);
    assert_eq!(tuner.ledger().len(), 2);
    assert_eq!(index.rolled_back.lock().unwrap().len(), 1);
    assert!(later.applied.lock().unwrap().is_empty());
    assert_eq!(tuner.current_configuration().await.chunk_size, 800);
}

#[tokio::test]
async fn failed_low_risk_action_does_not_end_the_plan() {
    let later = Arc::new(RecordingCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("chunking", Arc::new(FailingCapability::default()));
    registry.register("cache", later.clone());

    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(latency(2.0))))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .registry(registry)
        .build()
        .await;

    let cleanup = OptimizationAction::new(
        ActionKind::ConfigChange,
        "cache",
        "cache cleanup",
        0.25,
        RiskLevel::Low,
    )
    .with_parameters(params(json!({"operation": "cache_cleanup"})));

    let results = tuner.execute_plan(&[chunk_action(), cleanup]).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert_eq!(later.applied.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn worker_draining_after_stop_timeout_blocks_restart() {
    let gate = Arc::new(GatedCapability::default());
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("rag_pipeline", gate.clone());

    let tuner = ControlLoop::builder(TunerSettings {
        stop_grace: Duration::from_millis(20),
        ..test_settings()
    })
    .metrics_source(Arc::new(StaticMetricsSource::new(slow_pipeline())))
    .config_store(Arc::new(MemoryConfigStore::new()))
    .registry(Arc::clone(&registry))
    .build()
    .await;

    tuner.start(Duration::from_millis(10));
    gate.entered.notified().await;

    tuner.stop().await;
    assert!(tuner.is_running());

    // Still draining: a restart must not revive the old worker.
    tuner.start(Duration::from_millis(10));
    registry.deregister("rag_pipeline");
    gate.release.notify_one();

    for _ in 0..200 {
        if !tuner.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!tuner.is_running());
    assert_eq!(tuner.completed_cycles(), 1);

    tuner.start(Duration::from_millis(10));
    assert!(tuner.is_running());
    tuner.stop().await;
    for _ in 0..200 {
        if !tuner.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!tuner.is_running());
}

#[tokio::test]
async fn loop_survives_metrics_outage() {
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(FlakyMetrics {
            calls: Mutex::new(1),
        }))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .build()
        .await;

    assert!(matches!(tuner.run_cycle().await, Err(TunerError::Metrics(_))));

    tuner.start(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(tuner.is_running());
    tuner.stop().await;
    assert_eq!(tuner.completed_cycles(), 0);
}

#[tokio::test]
async fn recorded_history_drives_prediction_and_insights() {
    let tuner = ControlLoop::builder(test_settings())
        .metrics_source(Arc::new(StaticMetricsSource::new(latency(1.0))))
        .config_store(Arc::new(MemoryConfigStore::new()))
        .build()
        .await;

    for i in 0..60 {
        let (complexity, satisfaction) = if i % 2 == 0 { (0.7, 0.5) } else { (0.8, 0.7) };
        tuner
            .record(QueryMetadata {
                query: "compare the retention clauses across both contracts".to_string(),
                language: Some("en".to_string()),
                response_time_secs: 3.5,
                context_docs: 5,
                satisfaction: Some(satisfaction),
                complexity: Some(complexity),
                ..Default::default()
            })
            .await;
    }
    assert_eq!(tuner.history_len().await, 60);

    let predicted = tuner.predict_configuration().await;
    assert_eq!(predicted.configuration.chunk_size, 1500);
    assert_eq!(predicted.configuration.max_context_docs, 7);
    // Advisory only
    assert_eq!(*tuner.current_configuration().await, Configuration::default());

    tuner.run_cycle().await.unwrap();
    let insights = tuner.latest_insights();
    assert!(insights
        .iter()
        .any(|i| i.kind == crate::model::InsightKind::Performance));
    assert!(!tuner.patterns().await.is_empty());
}
