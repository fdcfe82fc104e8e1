// adaptive-tuner-rs/src/configuration.rs
// Tunable pipeline configuration and its shared, copy-on-write holder.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::Parameters;

pub const EMBEDDING_GENERAL: &str = "all-MiniLM-L6-v2";
pub const EMBEDDING_HIGH_PERFORMANCE: &str = "all-mpnet-base-v2";
pub const EMBEDDING_MULTILINGUAL: &str = "paraphrase-multilingual-mpnet-base-v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Semantic,
    Keyword,
    Hybrid,
}

/// Current tunable state of the retrieval/response pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub max_context_docs: u32,
    pub embedding_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,
    pub retrieval_strategy: RetrievalStrategy,
    pub enable_caching: bool,
    pub cache_size: u32,
    pub enable_reranking: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_context_docs: 5,
            embedding_model: EMBEDDING_GENERAL.to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 1024,
            retrieval_strategy: RetrievalStrategy::Hybrid,
            enable_caching: true,
            cache_size: 1000,
            enable_reranking: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown configuration parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(#[from] serde_json::Error),
}

impl Configuration {
    /// Return a new configuration with `parameters` overlaid.
    ///
    /// Every key must name a configuration field; values must deserialize
    /// into the field's type. `self` is left untouched.
    pub fn merge_parameters(&self, parameters: &Parameters) -> Result<Self, ConfigurationError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            for (key, new_value) in parameters {
                if !fields.contains_key(key) {
                    return Err(ConfigurationError::UnknownParameter(key.clone()));
                }
                fields.insert(key.clone(), new_value.clone());
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Current values of `keys`, suitable as a rollback descriptor.
    ///
    /// Keys that are not configuration fields are skipped.
    pub fn extract<'a, I>(&self, keys: I) -> Parameters
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out = Parameters::new();
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            for key in keys {
                if let Some(v) = fields.get(key) {
                    out.insert(key.clone(), v.clone());
                }
            }
        }
        out
    }
}

/// Live configuration shared between the control loop and pipeline readers.
///
/// Writers replace the whole value; readers hold an `Arc` snapshot that is
/// never mutated underneath them.
#[derive(Debug, Clone)]
pub struct SharedConfiguration {
    inner: Arc<RwLock<Arc<Configuration>>>,
}

impl SharedConfiguration {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(configuration))),
        }
    }

    pub async fn snapshot(&self) -> Arc<Configuration> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Swap in a new configuration, returning the previous one.
    pub async fn replace(&self, configuration: Configuration) -> Arc<Configuration> {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, Arc::new(configuration))
    }

    /// Atomically derive and install a new value from the current one.
    pub async fn update<F, E>(&self, f: F) -> Result<Arc<Configuration>, E>
    where
        F: FnOnce(&Configuration) -> Result<Configuration, E>,
    {
        let mut guard = self.inner.write().await;
        let next = Arc::new(f(&guard)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

impl Default for SharedConfiguration {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}
