// adaptive-tuner-rs/src/ledger.rs
// Append-only ledger of optimization results.
//
// - The in-memory ledger is authoritative for the running process.
// - Entries are appended in execution order and never modified.
// - An optional repository mirrors each entry to durable storage; mirror
//   failures are logged and never drop the in-memory entry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::model::OptimizationResult;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait LedgerRepository {
    async fn append(&self, result: &OptimizationResult) -> Result<(), LedgerError>;

    async fn read_all(&self) -> Result<Vec<OptimizationResult>, LedgerError>;
}

/// NDJSON file repository: one serialized result per line.
pub struct FileLedgerRepository {
    path: PathBuf,
}

impl FileLedgerRepository {
    /// Create the repository, eagerly creating the parent directory so an
    /// unwritable path fails at startup.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            // Blocking is fine here; this is a one-time startup check.
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerRepository for FileLedgerRepository {
    async fn append(&self, result: &OptimizationResult) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = serde_json::to_string(result)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<OptimizationResult>, LedgerError> {
        if fs::metadata(&self.path).await.is_err() {
            return Ok(Vec::new());
        }

        let buf = fs::read_to_string(&self.path).await?;
        let mut out = Vec::new();
        for line in buf.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OptimizationResult>(line) {
                Ok(result) => out.push(result),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse ledger line; skipping");
                }
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct OptimizationLedger {
    entries: RwLock<Vec<OptimizationResult>>,
    mirror: Option<Arc<dyn LedgerRepository + Send + Sync>>,
}

impl OptimizationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(mirror: Arc<dyn LedgerRepository + Send + Sync>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            mirror: Some(mirror),
        }
    }

    /// Append `result`; returns its position in the ledger.
    pub async fn append(&self, result: OptimizationResult) -> usize {
        let index = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.push(result.clone());
            entries.len() - 1
        };

        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.append(&result).await {
                tracing::warn!(
                    error = %err,
                    action_id = %result.action_id,
                    "failed to mirror optimization result; in-memory ledger unaffected"
                );
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries in execution order.
    pub fn entries(&self) -> Vec<OptimizationResult> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<OptimizationResult> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }
}

impl std::fmt::Debug for OptimizationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationLedger")
            .field("len", &self.len())
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}
