//! Directory walker that classifies per-component YAML files and assembles a
//! [`Config`]. Any per-file problem fails the whole load; a partially built
//! configuration is never returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::{ComponentEntry, Config, ReceiverToDiscoverEntry};
use crate::confmap;
use crate::error::{LookoutError, LookoutResult};
use crate::properties::ComponentId;

/// File categories, decided purely by path suffix. Files matching nothing
/// (for example `properties.discovery.yaml` at the root) are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Service,
    Exporter,
    Extension,
    DiscoveryObserver,
    Processor,
    Receiver,
    ReceiverToDiscover,
}

fn classify(path: &Path) -> Option<Category> {
    let file_name = path.file_name()?.to_str()?;
    if !file_name.ends_with(".yaml") && !file_name.ends_with(".yml") {
        return None;
    }
    if file_name == "service.yaml" || file_name == "service.yml" {
        return Some(Category::Service);
    }
    let parent = path.parent()?.file_name()?.to_str()?;
    let is_discovery =
        file_name.ends_with(".discovery.yaml") || file_name.ends_with(".discovery.yml");
    match parent {
        "exporters" => Some(Category::Exporter),
        "processors" => Some(Category::Processor),
        "extensions" if is_discovery => Some(Category::DiscoveryObserver),
        "extensions" => Some(Category::Extension),
        "receivers" if is_discovery => Some(Category::ReceiverToDiscover),
        "receivers" => Some(Category::Receiver),
        _ => None,
    }
}

fn load_error(path: &Path, message: impl Into<String>) -> LookoutError {
    LookoutError::Load {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Load a config directory into a fresh [`Config`].
pub fn load(root: &Path) -> LookoutResult<Config> {
    let mut config = Config::default();
    visit(root, &mut config)?;
    Ok(config)
}

fn visit(dir: &Path, config: &mut Config) -> LookoutResult<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| load_error(dir, format!("cannot read directory: {e}")))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .map_err(|e| load_error(dir, format!("cannot read directory: {e}")))?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            visit(&path, config)?;
        } else if let Some(category) = classify(&path) {
            load_file(&path, category, config)?;
        } else {
            debug!(path = %path.display(), "skipping uncategorized file");
        }
    }
    Ok(())
}

fn load_file(path: &Path, category: Category, config: &mut Config) -> LookoutResult<()> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| load_error(path, format!("cannot read file: {e}")))?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| load_error(path, format!("invalid YAML: {e}")))?;

    let body = match value {
        // Comment-only placeholder files decode to null and are skipped.
        Value::Null => return Ok(()),
        Value::Mapping(map) => map,
        other => return Err(load_error(path, format!("expected a mapping, got {other:?}"))),
    };

    if category == Category::Service {
        confmap::merge(&mut config.service, &body)
            .map_err(|e| load_error(path, e.to_string()))?;
        return Ok(());
    }

    // Zero top-level keys is a placeholder file, not an error.
    if body.is_empty() {
        return Ok(());
    }

    let (id, entry_body) = single_component(path, body)?;
    match category {
        Category::Service => unreachable!("handled above"),
        Category::Exporter => {
            insert_unique(&mut config.exporters, id, entry_body, path)?;
        }
        Category::Processor => {
            insert_unique(&mut config.processors, id, entry_body, path)?;
        }
        Category::Extension => {
            let entry = ComponentEntry::from_mapping(entry_body)
                .map_err(|e| load_error(path, e.to_string()))?;
            insert_unique(&mut config.extensions, id, entry, path)?;
        }
        Category::DiscoveryObserver => {
            let entry = ComponentEntry::from_mapping(entry_body)
                .map_err(|e| load_error(path, e.to_string()))?;
            insert_unique(&mut config.discovery_observers, id, entry, path)?;
        }
        Category::Receiver => {
            let entry = ComponentEntry::from_mapping(entry_body)
                .map_err(|e| load_error(path, e.to_string()))?;
            insert_unique(&mut config.receivers, id, entry, path)?;
        }
        Category::ReceiverToDiscover => {
            let entry = ReceiverToDiscoverEntry::from_mapping(entry_body)
                .map_err(|e| load_error(path, e.to_string()))?;
            insert_unique(&mut config.receivers_to_discover, id, entry, path)?;
        }
    }
    Ok(())
}

/// Enforce the exactly-one-top-level-key rule and name every offending key,
/// sorted, when there are more.
fn single_component(path: &Path, body: Mapping) -> LookoutResult<(ComponentId, Mapping)> {
    if body.len() > 1 {
        let mut keys: Vec<String> = body
            .keys()
            .map(|k| match k.as_str() {
                Some(s) => s.to_string(),
                None => format!("{k:?}"),
            })
            .collect();
        keys.sort();
        return Err(load_error(
            path,
            format!(
                "component files must have exactly one top-level key, found {}: {}",
                keys.len(),
                keys.join(", ")
            ),
        ));
    }
    let (key, value) = match body.into_iter().next() {
        Some(pair) => pair,
        // Zero keys is tolerated upstream; callers never reach here for an
        // empty mapping because load_file returns early.
        None => {
            return Err(load_error(path, "component file has no top-level key"));
        }
    };
    let key = key
        .as_str()
        .ok_or_else(|| load_error(path, format!("component key must be a string, got {key:?}")))?
        .to_string();
    let id = ComponentId::from_str(&key).map_err(|e| load_error(path, e.to_string()))?;
    let body = match value {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        other => {
            return Err(load_error(
                path,
                format!("component {key} must be a mapping, got {other:?}"),
            ))
        }
    };
    Ok((id, body))
}

fn insert_unique<T>(
    map: &mut HashMap<ComponentId, T>,
    id: ComponentId,
    entry: T,
    path: &Path,
) -> LookoutResult<()> {
    if map.contains_key(&id) {
        return Err(load_error(
            path,
            format!("duplicate component {id} already defined in this category"),
        ));
    }
    map.insert(id, entry);
    Ok(())
}

/// Explicit per-process cache of loaded config directories, keyed by
/// canonical path. Cleared only by [`ConfigDirCache::reset`].
#[derive(Default)]
pub struct ConfigDirCache {
    inner: Mutex<HashMap<PathBuf, Arc<Config>>>,
}

impl ConfigDirCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load through the cache. Failed loads are never cached.
    pub fn load(&self, root: &Path) -> LookoutResult<Arc<Config>> {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if let Some(config) = self.inner.lock().get(&key) {
            debug!(dir = %key.display(), "config dir cache hit");
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(load(root)?);
        self.inner.lock().insert(key, Arc::clone(&config));
        Ok(config)
    }

    pub fn reset(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sample_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "service.yaml", "pipelines:\n  metrics:\n    receivers: [otlp]\n");
        write(root, "exporters/otlp.yaml", "otlp:\n  endpoint: collector:4317\n");
        write(root, "extensions/zpages.yaml", "zpages: {}\n");
        write(
            root,
            "extensions/docker.discovery.yaml",
            "docker_observer:\n  endpoint: unix:///var/run/docker.sock\n",
        );
        write(root, "processors/batch.yaml", "batch: {}\n");
        write(root, "receivers/otlp.yaml", "otlp:\n  protocols:\n    grpc: {}\n");
        write(
            root,
            "receivers/redis.discovery.yaml",
            "redis:\n  rule:\n    docker_observer: port == 6379\n  config:\n    default:\n      type: collectd/redis\n",
        );
        // Not in any category; must be skipped.
        write(root, "properties.discovery.yaml", "splunk.discovery.receivers.redis.enabled: true\n");
        dir
    }

    #[test]
    fn loads_every_category() {
        let dir = sample_dir();
        let config = load(dir.path()).unwrap();

        assert!(config.service.contains_key("pipelines"));
        assert!(config.exporters.contains_key(&ComponentId::of("otlp")));
        assert!(config.extensions.contains_key(&ComponentId::of("zpages")));
        assert!(config
            .discovery_observers
            .contains_key(&ComponentId::of("docker_observer")));
        assert!(config.processors.contains_key(&ComponentId::of("batch")));
        assert!(config.receivers.contains_key(&ComponentId::of("otlp")));
        let redis = config
            .receivers_to_discover
            .get(&ComponentId::of("redis"))
            .unwrap();
        assert_eq!(
            redis.rule.get(&ComponentId::of("docker_observer")).unwrap(),
            "port == 6379"
        );
    }

    #[test]
    fn comment_only_files_are_skipped() {
        let dir = sample_dir();
        write(dir.path(), "receivers/placeholder.yaml", "# nothing here yet\n");
        write(dir.path(), "exporters/empty.yaml", "{}\n");
        let config = load(dir.path()).unwrap();
        assert_eq!(config.receivers.len(), 1);
        assert_eq!(config.exporters.len(), 1);
    }

    #[test]
    fn multiple_top_level_keys_is_a_sorted_fatal_error() {
        let dir = sample_dir();
        write(dir.path(), "receivers/multi.yaml", "zz: {}\naa: {}\n");
        let err = load(dir.path()).unwrap_err().to_string();
        assert!(err.contains("exactly one top-level key"));
        // Sorted regardless of file order.
        let aa = err.find("aa").unwrap();
        let zz = err.find("zz").unwrap();
        assert!(aa < zz);
    }

    #[test]
    fn duplicate_component_is_fatal_and_named() {
        let dir = sample_dir();
        write(dir.path(), "receivers/otlp_again.yaml", "otlp:\n  other: true\n");
        let err = load(dir.path()).unwrap_err().to_string();
        assert!(err.contains("duplicate component otlp"));
    }

    #[test]
    fn any_file_error_discards_the_whole_config() {
        let dir = sample_dir();
        write(dir.path(), "receivers/broken.yaml", ": : :\n");
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn cache_returns_the_same_config_until_reset() {
        let dir = sample_dir();
        let cache = ConfigDirCache::new();
        let first = cache.load(dir.path()).unwrap();
        let second = cache.load(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.reset();
        let third = cache.load(dir.path()).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let dir = sample_dir();
        write(dir.path(), "receivers/broken.yaml", "a: {}\nb: {}\n");
        let cache = ConfigDirCache::new();
        assert!(cache.load(dir.path()).is_err());

        fs::remove_file(dir.path().join("receivers/broken.yaml")).unwrap();
        assert!(cache.load(dir.path()).is_ok());
    }
}
