// adaptive-tuner-rs/src/lib.rs
// Adaptive configuration control loop for a retrieval/response pipeline.
//
// The loop observes per-request telemetry, detects usage and performance
// patterns, plans risk-weighted tuning actions and applies them through
// registered component capabilities, rolling back changes that regress the
// pipeline's metrics.
//
// Design notes:
// - All collaborators (metrics source, config store, telemetry sink,
//   capabilities) are injected as trait objects; there are no globals.
// - The live configuration is replaced as a whole value so readers always
//   see a consistent snapshot.
// - Every executed action produces exactly one ledger entry, in order.

pub mod analyzer;
pub mod capability;
pub mod configuration;
pub mod control;
pub mod executor;
pub mod history;
pub mod insights;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod planner;
pub mod predictor;
pub mod settings;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use crate::capability::{Capability, CapabilityError, CapabilityRegistry};
pub use crate::configuration::{Configuration, ConfigurationError, SharedConfiguration};
pub use crate::control::{ControlLoop, ControlLoopBuilder};
pub use crate::ledger::{FileLedgerRepository, LedgerError, OptimizationLedger};
pub use crate::metrics::{MetricsError, MetricsSnapshot, MetricsSource};
pub use crate::model::{
    ActionKind, OptimizationAction, OptimizationResult, Parameters, QueryMetadata, RiskLevel,
    RiskTolerance,
};
pub use crate::settings::TunerSettings;
pub use crate::store::{ConfigStore, StoreError};
pub use crate::telemetry::{TelemetryError, TelemetryEvent, TelemetrySink};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, TunerError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum TunerError {
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("an optimization cycle is already running")]
    CycleInProgress,
}
