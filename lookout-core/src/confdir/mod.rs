//! The config-dir model: one logical collector configuration split across
//! many small per-component YAML files, assembled into a single [`Config`].

use std::collections::HashMap;
use std::str::FromStr;

use serde_yaml::{Mapping, Value};

use crate::error::{LookoutError, LookoutResult};
use crate::properties::{parse_enabled, ComponentId};

mod loader;

pub use loader::{load, ConfigDirCache};

/// A plain component definition: its free-form config plus an optional
/// `enabled` flag defaulting to true.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentEntry {
    pub enabled: Option<bool>,
    pub config: Mapping,
}

pub type ExtensionEntry = ComponentEntry;
pub type ObserverEntry = ComponentEntry;
pub type ReceiverEntry = ComponentEntry;

impl ComponentEntry {
    /// Split an on-disk entry body into the flag and the remaining config.
    pub fn from_mapping(body: Mapping) -> LookoutResult<Self> {
        let mut entry = ComponentEntry::default();
        for (key, value) in body {
            if key.as_str() == Some("enabled") {
                entry.enabled = Some(parse_enabled(&value).ok_or_else(|| {
                    LookoutError::Discovery {
                        message: format!("enabled must be a boolean, got {value:?}"),
                    }
                })?);
            } else {
                entry.config.insert(key, value);
            }
        }
        Ok(entry)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// A receiver that is only materialized when a live observer satisfies one of
/// its rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverToDiscoverEntry {
    pub enabled: Option<bool>,
    /// Matching expression per observer that can discover this receiver.
    pub rule: HashMap<ComponentId, String>,
    /// Config blocks keyed by `"default"` or an observer ID string.
    pub config: HashMap<String, Mapping>,
    /// Remaining free-form fields (e.g. status-matching rules).
    pub entry: Mapping,
}

/// Key of the per-observer baseline block in a receiver's `config` map.
pub const DEFAULT_CONFIG_KEY: &str = "default";

impl ReceiverToDiscoverEntry {
    pub fn from_mapping(body: Mapping) -> LookoutResult<Self> {
        let mut entry = ReceiverToDiscoverEntry::default();
        for (key, value) in body {
            match key.as_str() {
                Some("enabled") => {
                    entry.enabled = Some(parse_enabled(&value).ok_or_else(|| {
                        LookoutError::Discovery {
                            message: format!("enabled must be a boolean, got {value:?}"),
                        }
                    })?);
                }
                Some("rule") => {
                    let rules = as_mapping(value, "rule")?;
                    for (observer, expression) in rules {
                        let observer = string_key(&observer, "rule")?;
                        let expression = match expression {
                            Value::String(s) => s,
                            other => {
                                return Err(LookoutError::Discovery {
                                    message: format!(
                                        "rule for {observer} must be a string, got {other:?}"
                                    ),
                                })
                            }
                        };
                        entry
                            .rule
                            .insert(ComponentId::from_str(&observer)?, expression);
                    }
                }
                Some("config") => {
                    let blocks = as_mapping(value, "config")?;
                    for (block_key, block) in blocks {
                        let block_key = string_key(&block_key, "config")?;
                        entry.config.insert(block_key, as_mapping(block, "config block")?);
                    }
                }
                _ => {
                    entry.entry.insert(key, value);
                }
            }
        }
        Ok(entry)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

fn as_mapping(value: Value, what: &str) -> LookoutResult<Mapping> {
    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        other => Err(LookoutError::Discovery {
            message: format!("{what} must be a mapping, got {other:?}"),
        }),
    }
}

fn string_key(key: &Value, what: &str) -> LookoutResult<String> {
    key.as_str().map(str::to_string).ok_or_else(|| LookoutError::Discovery {
        message: format!("{what} keys must be strings, got {key:?}"),
    })
}

/// The assembled configuration: seven independent category maps, built
/// all-or-nothing from one directory tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub service: Mapping,
    pub exporters: HashMap<ComponentId, Mapping>,
    pub extensions: HashMap<ComponentId, ExtensionEntry>,
    pub discovery_observers: HashMap<ComponentId, ObserverEntry>,
    pub processors: HashMap<ComponentId, Mapping>,
    pub receivers: HashMap<ComponentId, ReceiverEntry>,
    pub receivers_to_discover: HashMap<ComponentId, ReceiverToDiscoverEntry>,
}
