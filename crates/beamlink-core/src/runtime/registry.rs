//! Registry of active runtimes
//!
//! Replaces process-wide singletons: the embedder owns one registry and
//! passes it where runtimes need to be looked up by name.

use super::supervisor::RuntimeSupervisor;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
pub struct RuntimeRegistry {
    runtimes: DashMap<String, Arc<RuntimeSupervisor>>,
    ide_runtime: RwLock<Option<String>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a supervisor under its name, returning any supervisor it replaced
    pub fn insert(&self, supervisor: Arc<RuntimeSupervisor>) -> Option<Arc<RuntimeSupervisor>> {
        let name = supervisor.name().to_string();
        debug!("Registered runtime '{}'", name);
        self.runtimes.insert(name, supervisor)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuntimeSupervisor>> {
        self.runtimes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a supervisor without disposing it
    pub fn remove(&self, name: &str) -> Option<Arc<RuntimeSupervisor>> {
        let removed = self.runtimes.remove(name).map(|(_, supervisor)| supervisor);
        if removed.is_some() {
            let mut ide = self.ide_runtime.write();
            if ide.as_deref() == Some(name) {
                ide.take();
            }
        }
        removed
    }

    /// Names of registered runtimes, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runtimes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Designate the runtime hosting tooling support; false if `name` is unknown
    pub fn set_ide_runtime(&self, name: &str) -> bool {
        if !self.runtimes.contains_key(name) {
            return false;
        }
        *self.ide_runtime.write() = Some(name.to_string());
        true
    }

    pub fn ide_runtime(&self) -> Option<Arc<RuntimeSupervisor>> {
        let name = self.ide_runtime.read().clone()?;
        self.get(&name)
    }

    /// Dispose and remove every runtime, concurrently
    pub async fn dispose_all(&self) {
        let removed: Vec<_> = self
            .names()
            .iter()
            .filter_map(|name| self.remove(name))
            .collect();
        info!("Disposing {} runtime(s)", removed.len());
        join_all(removed.iter().map(|supervisor| supervisor.dispose())).await;
    }
}
