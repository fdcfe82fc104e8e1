// adaptive-tuner-rs/src/main.rs
// Service entrypoint: runs the control loop against file-backed metrics until
// Ctrl-C, then stops gracefully.

use std::sync::Arc;

use adaptive_tuner::ledger::FileLedgerRepository;
use adaptive_tuner::metrics::FileMetricsSource;
use adaptive_tuner::store::JsonFileConfigStore;
use adaptive_tuner::telemetry::{NdjsonTelemetrySink, TracingTelemetrySink};
use adaptive_tuner::{ControlLoop, OptimizationLedger, TelemetrySink, TunerSettings};
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(true));

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_loaded = config_rs::load_dotenv();
    let settings = TunerSettings::from_env();
    init_logging(settings.log_json)?;

    if dotenv_loaded {
        info!("Loaded environment from .env");
    }

    let ledger_repo = FileLedgerRepository::new(&settings.ledger_path).with_context(|| {
        format!("cannot open ledger at {}", settings.ledger_path.display())
    })?;
    let ledger = Arc::new(OptimizationLedger::with_mirror(Arc::new(ledger_repo)));

    let telemetry: Arc<dyn TelemetrySink + Send + Sync> = match &settings.telemetry_path {
        Some(path) => Arc::new(NdjsonTelemetrySink::spawn(path).with_context(|| {
            format!("cannot open telemetry file {}", path.display())
        })?),
        None => Arc::new(TracingTelemetrySink),
    };

    let interval = settings.cycle_interval;
    let tuner = ControlLoop::builder(settings.clone())
        .metrics_source(Arc::new(FileMetricsSource::new(settings.metrics_path.clone())))
        .config_store(Arc::new(JsonFileConfigStore::new(settings.config_path.clone())))
        .telemetry(Arc::clone(&telemetry))
        .ledger(ledger)
        .build()
        .await;

    if !settings.enabled {
        warn!("TUNER_ENABLED is false; cycles will be skipped");
    }

    tuner.start(interval);
    info!(
        metrics_path = %settings.metrics_path.display(),
        config_path = %settings.config_path.display(),
        "adaptive-tuner running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    tuner.stop().await;
    telemetry.close().await;
    info!(
        cycles = tuner.completed_cycles(),
        ledger_entries = tuner.ledger().len(),
        "adaptive-tuner stopped"
    );
    Ok(())
}
