//! Preflight discovery: start the configured observer extensions, match
//! discoverable receivers against whichever observers came up, and synthesize
//! the configuration fragment describing what was found.
//!
//! Observers are pluggable through [`ObserverFactory`]; the built-in registry
//! carries a closed allow-list of observer types, and tests inject their own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Mapping;

use crate::error::LookoutResult;

mod discoverer;
mod observers;

pub use discoverer::{Discoverer, DiscoveryOutput, DEFAULT_START_TIMEOUT};
pub use observers::{DockerObserver, HostObserver, K8sObserver};

/// Lifecycle contract for an observer component. An observer lives for one
/// discovery pass: started once, shut down unconditionally at the end.
#[async_trait]
pub trait Observer: Send {
    /// Bring the observer up. An error (or a timeout imposed by the caller)
    /// removes it from the pass without affecting other observers.
    async fn start(&mut self) -> LookoutResult<()>;

    /// Tear the observer down. Errors are logged by the caller, never fatal.
    async fn shutdown(&mut self) -> LookoutResult<()>;
}

/// Capability-typed factory: builds an observer from its resolved config.
pub trait ObserverFactory: Send + Sync {
    fn create(&self, config: &Mapping) -> LookoutResult<Box<dyn Observer>>;
}

/// The closed set of observer types the orchestrator knows how to build.
/// Unknown types in a config are logged and skipped, not fatal.
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn ObserverFactory>>,
}

impl FactoryRegistry {
    /// Registry with no factories; used by tests that register their own.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in observer types.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("host_observer", Arc::new(observers::HostObserverFactory));
        registry.register("docker_observer", Arc::new(observers::DockerObserverFactory));
        registry.register("k8s_observer", Arc::new(observers::K8sObserverFactory));
        registry
    }

    pub fn register(&mut self, observer_type: &str, factory: Arc<dyn ObserverFactory>) {
        self.factories.insert(observer_type.to_string(), factory);
    }

    pub fn get(&self, observer_type: &str) -> Option<Arc<dyn ObserverFactory>> {
        self.factories.get(observer_type).cloned()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_the_allow_list() {
        let registry = FactoryRegistry::builtin();
        for ty in ["host_observer", "docker_observer", "k8s_observer"] {
            assert!(registry.get(ty).is_some(), "missing factory for {ty}");
        }
        assert!(registry.get("hypothetical_observer").is_none());
    }
}
