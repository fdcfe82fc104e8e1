// adaptive-tuner-rs/src/capability.rs
// Typed registry of per-component apply/rollback handlers.
//
// Pipeline components register a `Capability` under their name at startup.
// The registry is read-mostly; registration takes a short write lock and is
// safe while a cycle is executing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::Parameters;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("component '{0}' rejected the change")]
    Rejected(String),

    #[error("component failure: {0}")]
    Failed(String),

    #[error("component did not respond within {0:?}")]
    Timeout(Duration),
}

/// Ability to change one pipeline component's parameters.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Apply `parameters`. `Ok(false)` means the component declined.
    async fn apply(&self, parameters: &Parameters) -> Result<bool, CapabilityError>;

    /// Undo a previous apply using the action's rollback descriptor.
    ///
    /// The default re-applies the descriptor, which holds the prior values.
    async fn rollback(&self, descriptor: &Parameters) -> Result<bool, CapabilityError> {
        self.apply(descriptor).await
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("components", &self.components())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` for `component`, returning any handler it replaces.
    pub fn register(
        &self,
        component: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Option<Arc<dyn Capability>> {
        let component = component.into();
        tracing::info!(component = %component, "registering capability");
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(component, capability)
    }

    pub fn deregister(&self, component: &str) -> Option<Arc<dyn Capability>> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(component)
    }

    pub fn get(&self, component: &str) -> Option<Arc<dyn Capability>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(component).cloned()
    }

    /// Registered component names, sorted.
    pub fn components(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
