// adaptive-tuner-rs/src/control.rs
// Control loop driver: one cycle is
// collect -> analyze -> insights -> plan -> execute -> update baseline.
//
// - Only one cycle runs at a time; an overlapping `run_cycle` is rejected.
// - The background worker never lets a cycle error escape; it logs and backs
//   off before the next attempt.
// - `stop` waits for the in-flight action (including its rollback) to finish,
//   bounded by the configured grace period. A worker still draining after
//   that stays tracked, so `is_running` reports it and `start` waits for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::analyzer::{PatternAnalyzer, PatternCache};
use crate::capability::CapabilityRegistry;
use crate::configuration::{Configuration, SharedConfiguration};
use crate::executor::ActionExecutor;
use crate::insights::InsightGenerator;
use crate::ledger::OptimizationLedger;
use crate::metrics::{FileMetricsSource, MetricsBaseline, MetricsSnapshot, MetricsSource};
use crate::model::{
    ActionState, OptimizationAction, OptimizationResult, PredictiveInsight, QueryMetadata, RiskLevel, UsagePattern,
};
use crate::planner::ActionPlanner;
use crate::predictor::{ConfigurationPredictor, PredictedSettings};
use crate::history::MetricsHistory;
use crate::settings::TunerSettings;
use crate::store::{ConfigStore, JsonFileConfigStore};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};
use crate::{Result, TunerError};

/// Relative baseline deviation above which a metric is reported as drifting.
pub const DRIFT_WARN_RATIO: f64 = 0.2;

/// Clears the running flag when the cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TunerError::CycleInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct LoopInner {
    settings: TunerSettings,
    history: tokio::sync::RwLock<MetricsHistory>,
    patterns: tokio::sync::Mutex<PatternCache>,
    analyzer: PatternAnalyzer,
    insights: InsightGenerator,
    predictor: ConfigurationPredictor,
    planner: ActionPlanner,
    executor: ActionExecutor,
    metrics: Arc<dyn MetricsSource + Send + Sync>,
    store: Arc<dyn ConfigStore + Send + Sync>,
    telemetry: Arc<dyn TelemetrySink + Send + Sync>,
    configuration: SharedConfiguration,
    ledger: Arc<OptimizationLedger>,
    registry: Arc<CapabilityRegistry>,
    baseline: Mutex<MetricsBaseline>,
    latest_insights: RwLock<Vec<PredictiveInsight>>,
    cycle_running: AtomicBool,
    completed_cycles: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl LoopInner {
    fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    #[instrument(name = "optimization_cycle", skip(self))]
    async fn run_cycle(&self) -> Result<Vec<OptimizationResult>> {
        if !self.settings.enabled {
            debug!("Adaptive tuning disabled; skipping cycle");
            return Ok(Vec::new());
        }
        let _guard = CycleGuard::acquire(&self.cycle_running)?;
        let started = Instant::now();
        let cycle = self.completed_cycles.load(Ordering::Acquire);

        let current = self.metrics.current_metrics().await?;

        let (patterns, summary) = {
            let history = self.history.read().await;
            let mut cache = self.patterns.lock().await;
            if cache.refresh(&self.analyzer, &history) {
                metrics::gauge!(
                    "adaptive_tuner_patterns_detected",
                    cache.patterns().len() as f64
                );
                for pattern in cache.patterns() {
                    self.telemetry
                        .emit(TelemetryEvent::PatternDetected(pattern.clone()));
                }
            }
            (cache.patterns().to_vec(), history.summary())
        };

        let insights = self
            .insights
            .generate(&patterns, summary.as_ref(), &current);
        *self
            .latest_insights
            .write()
            .unwrap_or_else(|e| e.into_inner()) = insights.clone();

        let config_before = self.configuration.snapshot().await;
        let actions = self
            .planner
            .plan(&insights, &current, &config_before, cycle);

        let results = self.execute_actions(&actions).await;

        match self.metrics.current_metrics().await {
            Ok(post) => self.update_baseline(&post),
            Err(err) => warn!(error = %err, "post-cycle metrics unavailable; baseline unchanged"),
        }

        self.persist_if_changed(&config_before).await;

        let completed = self.completed_cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let accepted = results
            .iter()
            .filter(|r| r.final_state == ActionState::Accepted)
            .count();
        let rolled_back = results
            .iter()
            .filter(|r| r.final_state == ActionState::RolledBack)
            .count();

        metrics::increment_counter!("adaptive_tuner_cycles_total");
        self.telemetry.emit(TelemetryEvent::CycleCompleted {
            cycle: completed,
            actions: results.len(),
            accepted,
            rolled_back,
        });
        info!(
            cycle = completed,
            patterns = patterns.len(),
            insights = insights.len(),
            planned = actions.len(),
            executed = results.len(),
            accepted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Optimization cycle finished"
        );

        Ok(results)
    }

    /// Execute `actions` in order. Stops between actions on shutdown, and
    /// after the first high-risk action that does not succeed.
    async fn execute_actions(&self, actions: &[OptimizationAction]) -> Vec<OptimizationResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            if self.shutdown_requested() {
                info!(remaining = actions.len() - results.len(), "shutdown requested; skipping remaining actions");
                break;
            }
            let result = self.executor.execute(action).await;
            let stop_early = action.risk == RiskLevel::High && !result.success;
            results.push(result);
            if stop_early {
                warn!(
                    action.id = %action.id,
                    skipped = actions.len() - results.len(),
                    "high-risk action failed; ending cycle early"
                );
                break;
            }
        }
        results
    }

    async fn persist_if_changed(&self, before: &Configuration) {
        let after = self.configuration.snapshot().await;
        if *after != *before {
            if let Err(err) = self.store.save(&after).await {
                warn!(error = %err, "failed to persist configuration; continuing");
            }
        }
    }

    fn update_baseline(&self, post: &MetricsSnapshot) {
        let mut baseline = self.baseline.lock().unwrap_or_else(|e| e.into_inner());
        for (metric, drift) in baseline.drift(post) {
            if drift.abs() > DRIFT_WARN_RATIO {
                warn!(metric = %metric, drift, "metric drifting from baseline");
            }
        }
        baseline.update(post);
    }
}

/// Handle to the adaptive tuning control loop.
///
/// ```ignore
/// let tuner = ControlLoop::builder(TunerSettings::from_env())
///     .metrics_source(Arc::new(FileMetricsSource::new("metrics.json")))
///     .build()
///     .await;
/// tuner.start(Duration::from_secs(3600));
/// ```
pub struct ControlLoop {
    inner: Arc<LoopInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ControlLoop {
    pub fn builder(settings: TunerSettings) -> ControlLoopBuilder {
        ControlLoopBuilder::new(settings)
    }

    /// Run one cycle now. Fails with `CycleInProgress` if one is running.
    pub async fn run_cycle(&self) -> Result<Vec<OptimizationResult>> {
        self.inner.run_cycle().await
    }

    /// Execute an externally prepared plan under the same single-cycle rule
    /// as `run_cycle`, persisting the configuration if it changed. Does not
    /// analyze, plan or count as a completed cycle.
    pub async fn execute_plan(
        &self,
        actions: &[OptimizationAction],
    ) -> Result<Vec<OptimizationResult>> {
        let _guard = CycleGuard::acquire(&self.inner.cycle_running)?;
        let before = self.inner.configuration.snapshot().await;
        let results = self.inner.execute_actions(actions).await;
        self.inner.persist_if_changed(&before).await;
        Ok(results)
    }

    /// Start the background loop. No-op while a worker, including one
    /// detached by a timed-out `stop`, is still running.
    pub fn start(&self, interval: Duration) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            if self.inner.shutdown_requested() {
                warn!("Previous control loop worker is still draining; not starting");
            } else {
                debug!("Control loop already running");
            }
            return;
        }

        self.inner.shutdown_tx.send_replace(false);
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let interval = interval.max(Duration::from_millis(1));
        let backoff = self.inner.settings.loop_backoff;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match inner.run_cycle().await {
                            Ok(results) => debug!(executed = results.len(), "scheduled cycle complete"),
                            Err(TunerError::CycleInProgress) => {
                                debug!("manual cycle in flight; skipping tick");
                            }
                            Err(err) => {
                                error!(
                                    error = %err,
                                    backoff_secs = backoff.as_secs(),
                                    "optimization cycle failed; backing off"
                                );
                                tokio::select! {
                                    _ = shutdown_rx.changed() => {}
                                    _ = tokio::time::sleep(backoff) => {}
                                }
                            }
                        }
                    }
                }
            }
            info!("Control loop worker shutting down");
        });

        *worker = Some(handle);
        info!(interval_secs = interval.as_secs(), "Control loop started");
    }

    /// Request shutdown and wait for the worker, bounded by the stop grace.
    pub async fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut handle) = handle else {
            self.inner.shutdown_tx.send_replace(false);
            return;
        };

        match tokio::time::timeout(self.inner.settings.stop_grace, &mut handle).await {
            Ok(Ok(())) => {
                self.inner.shutdown_tx.send_replace(false);
                info!("Control loop stopped");
            }
            Ok(Err(err)) => {
                self.inner.shutdown_tx.send_replace(false);
                error!(error = %err, "Control loop worker failed");
            }
            Err(_) => {
                // Shutdown stays requested; the worker exits after its cycle.
                warn!(
                    grace_secs = self.inner.settings.stop_grace.as_secs(),
                    "Control loop did not stop within grace period; detaching"
                );
                *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Feed one completed request into the history.
    pub async fn record(&self, metadata: QueryMetadata) {
        self.inner.history.write().await.record(metadata);
    }

    pub async fn history_len(&self) -> usize {
        self.inner.history.read().await.len()
    }

    /// Re-run pattern analysis regardless of the throttle.
    pub async fn analyze_now(&self) -> Vec<UsagePattern> {
        let history = self.inner.history.read().await;
        let mut cache = self.inner.patterns.lock().await;
        cache.force_refresh(&self.inner.analyzer, &history, Instant::now());
        cache.patterns().to_vec()
    }

    pub async fn patterns(&self) -> Vec<UsagePattern> {
        self.inner.patterns.lock().await.patterns().to_vec()
    }

    /// Advisory settings from the current history; does not touch live state.
    pub async fn predict_configuration(&self) -> PredictedSettings {
        let history = self.inner.history.read().await;
        let patterns = self.inner.patterns.lock().await;
        self.inner.predictor.predict(&history, patterns.patterns())
    }

    pub fn configuration(&self) -> SharedConfiguration {
        self.inner.configuration.clone()
    }

    pub async fn current_configuration(&self) -> Arc<Configuration> {
        self.inner.configuration.snapshot().await
    }

    pub fn ledger(&self) -> Arc<OptimizationLedger> {
        Arc::clone(&self.inner.ledger)
    }

    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn baseline(&self) -> MetricsBaseline {
        self.inner
            .baseline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn latest_insights(&self) -> Vec<PredictiveInsight> {
        self.inner
            .latest_insights
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn completed_cycles(&self) -> u64 {
        self.inner.completed_cycles.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &TunerSettings {
        &self.inner.settings
    }
}

pub struct ControlLoopBuilder {
    settings: TunerSettings,
    metrics: Option<Arc<dyn MetricsSource + Send + Sync>>,
    store: Option<Arc<dyn ConfigStore + Send + Sync>>,
    telemetry: Option<Arc<dyn TelemetrySink + Send + Sync>>,
    registry: Option<Arc<CapabilityRegistry>>,
    ledger: Option<Arc<OptimizationLedger>>,
}

impl ControlLoopBuilder {
    pub fn new(settings: TunerSettings) -> Self {
        Self {
            settings,
            metrics: None,
            store: None,
            telemetry: None,
            registry: None,
            ledger: None,
        }
    }

    pub fn metrics_source(mut self, metrics: Arc<dyn MetricsSource + Send + Sync>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore + Send + Sync>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink + Send + Sync>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ledger(mut self, ledger: Arc<OptimizationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Assemble the loop, loading the persisted configuration.
    ///
    /// A missing or unreadable configuration falls back to the defaults.
    pub async fn build(self) -> ControlLoop {
        let settings = self.settings;
        let metrics: Arc<dyn MetricsSource + Send + Sync> = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(FileMetricsSource::new(settings.metrics_path.clone())),
        };
        let store: Arc<dyn ConfigStore + Send + Sync> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileConfigStore::new(settings.config_path.clone())),
        };
        let telemetry: Arc<dyn TelemetrySink + Send + Sync> = match self.telemetry {
            Some(telemetry) => telemetry,
            None => Arc::new(TracingTelemetrySink),
        };
        let registry = self.registry.unwrap_or_default();
        let ledger = self.ledger.unwrap_or_default();

        let initial = match store.load().await {
            Ok(Some(configuration)) => {
                info!("Loaded persisted configuration");
                configuration
            }
            Ok(None) => Configuration::default(),
            Err(err) => {
                warn!(error = %err, "failed to load persisted configuration; using defaults");
                Configuration::default()
            }
        };
        let configuration = SharedConfiguration::new(initial.clone());

        let executor = ActionExecutor::new(
            Arc::clone(&registry),
            configuration.clone(),
            Arc::clone(&metrics),
            Arc::clone(&ledger),
            Arc::clone(&telemetry),
            settings.executor_settings(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            enabled = settings.enabled,
            risk_tolerance = %settings.risk_tolerance,
            max_actions = settings.max_actions,
            history_capacity = settings.history_capacity,
            "Adaptive tuner initialized"
        );

        let inner = LoopInner {
            history: tokio::sync::RwLock::new(MetricsHistory::new(
                settings.history_capacity,
                settings.min_samples,
            )),
            patterns: tokio::sync::Mutex::new(PatternCache::new(settings.analysis_interval)),
            analyzer: PatternAnalyzer::new(settings.thresholds.clone()),
            insights: InsightGenerator::new(settings.target_latency_secs),
            predictor: ConfigurationPredictor::new(initial),
            planner: ActionPlanner::new(settings.risk_tolerance, settings.max_actions),
            executor,
            metrics,
            store,
            telemetry,
            configuration,
            ledger,
            registry,
            baseline: Mutex::new(MetricsBaseline::default()),
            latest_insights: RwLock::new(Vec::new()),
            cycle_running: AtomicBool::new(false),
            completed_cycles: AtomicU64::new(0),
            shutdown_tx,
            settings,
        };

        ControlLoop {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }
}
