// adaptive-tuner-rs/src/store.rs
// Durable storage for the live configuration.
//
// The control loop loads once at startup and saves after a cycle that
// changed the configuration. A failed save never aborts a cycle.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::configuration::Configuration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConfigStore {
    /// Load the persisted configuration; `Ok(None)` if nothing was saved yet.
    async fn load(&self) -> Result<Option<Configuration>, StoreError>;

    async fn save(&self, configuration: &Configuration) -> Result<(), StoreError>;
}

/// Pretty-printed JSON file, written via a temporary sibling and a rename.
#[derive(Debug, Clone)]
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "configuration.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn load(&self) -> Result<Option<Configuration>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Configuration file not found, using defaults: {}",
                    self.path.display()
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let configuration = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "loaded persisted configuration");
        Ok(Some(configuration))
    }

    async fn save(&self, configuration: &Configuration) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(configuration)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "saved configuration");
        Ok(())
    }
}

/// In-process store, used when persistence is not wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    saved: Mutex<Option<Configuration>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configuration(configuration: Configuration) -> Self {
        Self {
            saved: Mutex::new(Some(configuration)),
        }
    }

    pub fn saved(&self) -> Option<Configuration> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Option<Configuration>, StoreError> {
        Ok(self.saved())
    }

    async fn save(&self, configuration: &Configuration) -> Result<(), StoreError> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(configuration.clone());
        Ok(())
    }
}
