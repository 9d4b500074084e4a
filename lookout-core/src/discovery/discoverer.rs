//! The discovery pass: six linear stages, no retries.
//!
//! 1. resolve property overrides (properties file < env vars < --set)
//! 2. overlay observer configs and enabled flags
//! 3. start enabled observers concurrently, each bounded by a timeout
//! 4. match discoverable receivers against operational observers
//! 5. synthesize the discovery configuration fragment
//! 6. shut every operational observer down, unconditionally
//!
//! Per-component failures (unknown observer type, start error or timeout,
//! bad receiver block) are logged and excluded; only a structurally invalid
//! properties file fails the pass.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use super::{FactoryRegistry, Observer};
use crate::confdir::{Config, DEFAULT_CONFIG_KEY};
use crate::confmap::merge;
use crate::error::{LookoutError, LookoutResult};
use crate::properties::{parse_enabled, ComponentId, Property};

/// How long each observer gets to start before it is dropped from the pass.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Observers that started successfully. Teardown is unconditional: the
/// normal path drains the set in the teardown stage, and dropping the set
/// with entries still inside (a cancelled pass) spawns their shutdowns on
/// the runtime instead of leaking them.
struct OperationalSet {
    inner: Arc<Mutex<SetInner>>,
}

#[derive(Default)]
struct SetInner {
    closed: bool,
    observers: Vec<(ComponentId, Box<dyn Observer>)>,
}

impl OperationalSet {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SetInner::default())),
        }
    }

    fn slot(&self) -> Weak<Mutex<SetInner>> {
        Arc::downgrade(&self.inner)
    }

    /// Sorted IDs of every observer currently in the set.
    fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .inner
            .lock()
            .observers
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn pop(&self) -> Option<(ComponentId, Box<dyn Observer>)> {
        self.inner.lock().observers.pop()
    }
}

impl Drop for OperationalSet {
    fn drop(&mut self) {
        let remaining = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.observers)
        };
        if remaining.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("discovery pass dropped outside a runtime; observers not shut down");
            return;
        };
        for (id, mut observer) in remaining {
            runtime.spawn(async move {
                if let Err(e) = observer.shutdown().await {
                    warn!(observer = %id, error = %e, "observer shutdown failed");
                }
            });
        }
    }
}

/// Hand a started observer to the set, or shut it down right here when the
/// pass was abandoned while its start was in flight.
async fn deposit(slot: Weak<Mutex<SetInner>>, id: &ComponentId, observer: Box<dyn Observer>) {
    let orphaned = match slot.upgrade() {
        Some(inner) => {
            let mut inner = inner.lock();
            if inner.closed {
                Some(observer)
            } else {
                inner.observers.push((id.clone(), observer));
                None
            }
        }
        None => Some(observer),
    };
    if let Some(mut observer) = orphaned {
        debug!(observer = %id, "pass abandoned before this observer started");
        if let Err(e) = observer.shutdown().await {
            warn!(observer = %id, error = %e, "observer shutdown failed");
        }
    }
}

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryOutput {
    /// Synthesized configuration: `extensions`, `receivers`, and `service`
    /// sections for the bootstrapper to splice in. Empty when nothing was
    /// discovered.
    pub config: Mapping,
    /// Observers that started successfully, sorted.
    pub operational_observers: Vec<ComponentId>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<String>,
}

/// Orchestrates one discovery pass over a loaded [`Config`].
pub struct Discoverer {
    registry: FactoryRegistry,
    file_properties: Option<Mapping>,
    env_properties: Vec<Property>,
    set_properties: Vec<Property>,
    start_timeout: Duration,
}

impl Discoverer {
    pub fn new(registry: FactoryRegistry) -> Self {
        Self {
            registry,
            file_properties: None,
            env_properties: Vec::new(),
            set_properties: Vec::new(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Raw mapping from `properties.discovery.yaml`; lowest precedence.
    pub fn with_file_properties(mut self, properties: Mapping) -> Self {
        self.file_properties = Some(properties);
        self
    }

    /// Properties scanned from the environment; middle precedence.
    pub fn with_env_properties(mut self, properties: Vec<Property>) -> Self {
        self.env_properties = properties;
        self
    }

    /// Explicit `--set` properties; highest precedence.
    pub fn with_set_properties(mut self, properties: Vec<Property>) -> Self {
        self.set_properties = properties;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Read a `properties.discovery.yaml`. A missing file is fine; an
    /// unparsable or non-mapping one is fatal.
    pub fn load_properties_file(path: &Path) -> LookoutResult<Option<Mapping>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| LookoutError::Load {
            path: path.to_path_buf(),
            message: format!("cannot read file: {e}"),
        })?;
        let value: Value = serde_yaml::from_str(&text).map_err(|e| LookoutError::Load {
            path: path.to_path_buf(),
            message: format!("invalid YAML: {e}"),
        })?;
        match value {
            Value::Null => Ok(Some(Mapping::new())),
            Value::Mapping(map) => Ok(Some(map)),
            other => Err(LookoutError::Load {
                path: path.to_path_buf(),
                message: format!("properties file must be a mapping, got {other:?}"),
            }),
        }
    }

    /// Run one discovery pass. The passed configuration is not mutated; the
    /// pass works on its own copy.
    pub async fn discover(&self, config: &Config) -> LookoutResult<DiscoveryOutput> {
        let mut config = config.clone();
        let mut warnings = Vec::new();

        let properties = self.resolve_properties(&mut warnings)?;

        if config.discovery_observers.is_empty() {
            info!("no discovery observers are configured; nothing to discover");
            return Ok(DiscoveryOutput {
                warnings,
                ..DiscoveryOutput::default()
            });
        }

        self.overlay_observers(&mut config, &properties, &mut warnings);
        let operational = self.start_observers(&config, &mut warnings).await;
        let operational_observers = operational.ids();

        let output = if operational_observers.is_empty() {
            info!("no observers are operational; discovery produced an empty configuration");
            Mapping::new()
        } else {
            self.synthesize(&config, &properties, &operational_observers, &mut warnings)
        };

        // Teardown runs regardless of what matching produced. Entries still
        // in the set when it drops (a cancelled pass) are shut down from its
        // Drop impl.
        while let Some((id, mut observer)) = operational.pop() {
            match tokio::time::timeout(self.start_timeout, observer.shutdown()).await {
                Ok(Ok(())) => debug!(observer = %id, "observer shut down"),
                Ok(Err(e)) => warn!(observer = %id, error = %e, "observer shutdown failed"),
                Err(_) => warn!(observer = %id, "observer shutdown timed out"),
            }
        }

        Ok(DiscoveryOutput {
            config: output,
            operational_observers,
            warnings,
        })
    }

    /// Stage 1: merge all property sources into one tree, lowest precedence
    /// first. Malformed property strings become warnings; only the rendered
    /// trees of valid properties are merged, so the merges themselves cannot
    /// fail on key shape.
    fn resolve_properties(&self, warnings: &mut Vec<String>) -> LookoutResult<Mapping> {
        let mut tree = Mapping::new();
        if let Some(file) = &self.file_properties {
            for (key, value) in file {
                let Some(key) = key.as_str() else {
                    record(warnings, format!("property keys must be strings, got {key:?}"));
                    continue;
                };
                match Property::parse_dotted(key, &scalar_string(value)) {
                    Ok(property) => merge(&mut tree, &property.rendered)?,
                    Err(e) => record(warnings, format!("dropping property {key}: {e}")),
                }
            }
        }
        for property in self.env_properties.iter().chain(&self.set_properties) {
            merge(&mut tree, &property.rendered)?;
        }
        Ok(tree)
    }

    /// Stage 2: apply `extensions` property overlays to the stored observer
    /// entries and resolve their effective enabled flags.
    fn overlay_observers(
        &self,
        config: &mut Config,
        properties: &Mapping,
        warnings: &mut Vec<String>,
    ) {
        let overlays = properties.get("extensions").and_then(Value::as_mapping);
        for (id, entry) in &mut config.discovery_observers {
            let Some(overlay) = overlays
                .and_then(|m| m.get(id.to_string().as_str()))
                .and_then(Value::as_mapping)
            else {
                continue;
            };
            let mut overlay = overlay.clone();
            if let Some(enabled) = overlay.remove("enabled") {
                match parse_enabled(&enabled) {
                    Some(enabled) => entry.enabled = Some(enabled),
                    None => record(
                        warnings,
                        format!("observer {id}: enabled override {enabled:?} is not a boolean"),
                    ),
                }
            }
            if let Err(e) = merge(&mut entry.config, &overlay) {
                record(warnings, format!("observer {id}: config overlay failed: {e}"));
            }
        }
    }

    /// Stage 3: fan out one start task per enabled observer, join them all,
    /// and keep whichever started within the timeout.
    async fn start_observers(&self, config: &Config, warnings: &mut Vec<String>) -> OperationalSet {
        let operational = OperationalSet::new();
        let mut handles = Vec::new();
        for (id, entry) in &config.discovery_observers {
            if !entry.is_enabled() {
                debug!(observer = %id, "observer disabled, skipping");
                continue;
            }
            let Some(factory) = self.registry.get(&id.ty) else {
                record(warnings, format!("unsupported observer type {}", id.ty));
                continue;
            };
            let mut observer = match factory.create(&entry.config) {
                Ok(observer) => observer,
                Err(e) => {
                    record(warnings, format!("cannot build observer {id}: {e}"));
                    continue;
                }
            };
            let id = id.clone();
            let timeout = self.start_timeout;
            let slot = operational.slot();
            handles.push(tokio::spawn(async move {
                let began = Instant::now();
                let result = match tokio::time::timeout(timeout, observer.start()).await {
                    Ok(Ok(())) => {
                        debug!(observer = %id, elapsed = ?began.elapsed(), "observer started");
                        deposit(slot, &id, observer).await;
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(LookoutError::Timeout {
                        operation: format!("starting observer {id}"),
                        duration: timeout,
                    }),
                };
                (id, result)
            }));
        }

        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => {
                    record(warnings, format!("observer {id} failed to start: {e}"));
                }
                Err(e) => record(warnings, format!("observer start task panicked: {e}")),
            }
        }
        operational
    }

    /// Stages 4 and 5: match receivers to operational observers and build the
    /// synthesized configuration.
    fn synthesize(
        &self,
        config: &Config,
        properties: &Mapping,
        operational: &[ComponentId],
        warnings: &mut Vec<String>,
    ) -> Mapping {
        let receiver_overlays = properties.get("receivers").and_then(Value::as_mapping);

        let mut extensions_out = Mapping::new();
        let mut receivers_out = Mapping::new();
        let mut observer_ids = Vec::new();
        let mut discovery_ids = Vec::new();

        for observer_id in operational {
            let mut matched = Mapping::new();
            for (receiver_id, entry) in &config.receivers_to_discover {
                let Some(resolved) = self.resolve_receiver(
                    receiver_id,
                    entry,
                    observer_id,
                    receiver_overlays,
                    warnings,
                ) else {
                    continue;
                };
                matched.insert(
                    Value::String(receiver_id.to_string()),
                    Value::Mapping(resolved),
                );
            }

            let mut wrapper = Mapping::new();
            wrapper.insert(
                Value::String("receivers".to_string()),
                Value::Mapping(matched),
            );
            wrapper.insert(
                Value::String("watch_observers".to_string()),
                Value::Sequence(vec![Value::String(observer_id.to_string())]),
            );
            wrapper.insert(
                Value::String("embed_receiver_config".to_string()),
                Value::Bool(true),
            );

            let discovery_id = format!("discovery/{observer_id}");
            receivers_out.insert(Value::String(discovery_id.clone()), Value::Mapping(wrapper));
            discovery_ids.push(Value::String(discovery_id));

            if let Some(entry) = config.discovery_observers.get(observer_id) {
                extensions_out.insert(
                    Value::String(observer_id.to_string()),
                    Value::Mapping(entry.config.clone()),
                );
            }
            observer_ids.push(Value::String(observer_id.to_string()));
        }

        let mut service = Mapping::new();
        service.insert(
            Value::String("extensions".to_string()),
            Value::Sequence(observer_ids),
        );
        service.insert(
            Value::String("receivers".to_string()),
            Value::Sequence(discovery_ids),
        );

        let mut output = Mapping::new();
        output.insert(
            Value::String("extensions".to_string()),
            Value::Mapping(extensions_out),
        );
        output.insert(
            Value::String("receivers".to_string()),
            Value::Mapping(receivers_out),
        );
        output.insert(Value::String("service".to_string()), Value::Mapping(service));
        output
    }

    /// Stage 4 for one (receiver, observer) pair. Returns the effective
    /// receiver entry, or `None` when the pair does not produce one.
    fn resolve_receiver(
        &self,
        receiver_id: &ComponentId,
        entry: &crate::confdir::ReceiverToDiscoverEntry,
        observer_id: &ComponentId,
        overlays: Option<&Mapping>,
        warnings: &mut Vec<String>,
    ) -> Option<Mapping> {
        let Some(expression) = entry.rule.get(observer_id) else {
            debug!(receiver = %receiver_id, observer = %observer_id, "no rule for observer");
            return None;
        };

        let default_block = entry.config.get(DEFAULT_CONFIG_KEY);
        let specific_block = entry.config.get(&observer_id.to_string());
        if default_block.is_none() && specific_block.is_none() {
            debug!(
                receiver = %receiver_id,
                observer = %observer_id,
                "no config block for observer, skipping"
            );
            return None;
        }

        // Observer-specific values win over the default baseline at any depth.
        let mut receiver_config = Mapping::new();
        for block in [default_block, specific_block].into_iter().flatten() {
            if let Err(e) = merge(&mut receiver_config, block) {
                record(
                    warnings,
                    format!("receiver {receiver_id}: config block merge failed: {e}"),
                );
                return None;
            }
        }

        let mut resolved = entry.entry.clone();
        resolved.insert(
            Value::String("rule".to_string()),
            Value::String(expression.clone()),
        );
        resolved.insert(
            Value::String("config".to_string()),
            Value::Mapping(receiver_config),
        );

        let mut enabled = entry.enabled;
        if let Some(overlay) = overlays
            .and_then(|m| m.get(receiver_id.to_string().as_str()))
            .and_then(Value::as_mapping)
        {
            let mut overlay = overlay.clone();
            if let Some(value) = overlay.remove("enabled") {
                match parse_enabled(&value) {
                    Some(value) => enabled = Some(value),
                    None => record(
                        warnings,
                        format!(
                            "receiver {receiver_id}: enabled override {value:?} is not a boolean"
                        ),
                    ),
                }
            }
            if let Err(e) = merge(&mut resolved, &overlay) {
                record(
                    warnings,
                    format!("receiver {receiver_id}: property overlay failed: {e}"),
                );
                return None;
            }
        }

        if !enabled.unwrap_or(true) {
            debug!(receiver = %receiver_id, "receiver disabled, skipping");
            return None;
        }
        Some(resolved)
    }
}

fn record(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}

/// String form of a YAML value as a property value: strings verbatim,
/// everything else re-rendered as YAML so structure survives the round trip.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
