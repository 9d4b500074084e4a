//! The discovery property language.
//!
//! A property addresses one component's `enabled` flag or a single nested
//! config field, and exists in two surface encodings:
//!
//! - dotted: `splunk.discovery.receivers.redis.config.auth`
//! - env var: `SPLUNK_DISCOVERY_RECEIVERS_redis_CONFIG_auth`
//!
//! The env-var form passes the component ID and config path through the
//! wordify codec so that arbitrary identifiers survive the `[0-9A-Za-z_]`
//! restriction on variable names. Parsing either form yields the same
//! [`Property`], and every parsed property carries its single-branch nested
//! map for merging into a configuration tree.
//!
//! Dotted grammar:
//!
//! ```text
//! property    := "splunk" "." "discovery" "." kind "." componentID "." field
//! kind        := "receivers" | "extensions"
//! componentID := type ("/" name)?
//! field       := "enabled" | "config" "." path
//! path        := segment ("." segment)*    ; "::" inside a segment nests further
//! ```
//!
//! The env-var grammar is isomorphic with `_` as the delimiter and every
//! componentID/path token wordified.

use std::fmt;
use std::str::FromStr;

use serde_yaml::{Mapping, Value};

use crate::error::{LookoutError, LookoutResult};

mod parser;
pub mod wordify;

pub use wordify::{unwordify, wordify};

/// Prefix shared by every discovery property environment variable.
pub const ENV_VAR_PREFIX: &str = "SPLUNK_DISCOVERY_";

/// Prefix shared by every dotted discovery property.
pub const DOTTED_PREFIX: &str = "splunk.discovery.";

/// Environment variables under the discovery prefix that are not properties.
const NON_PROPERTY_VARS: &[&str] = &["SPLUNK_DISCOVERY_LOG_LEVEL"];

/// Identifier of a collector component: a type with an optional instance name,
/// rendered as `type` or `type/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    pub ty: String,
    pub name: String,
}

impl ComponentId {
    pub fn new(ty: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            name: name.into(),
        }
    }

    /// Bare-type constructor.
    pub fn of(ty: impl Into<String>) -> Self {
        Self::new(ty, "")
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.ty)
        } else {
            write!(f, "{}/{}", self.ty, self.name)
        }
    }
}

impl FromStr for ComponentId {
    type Err = LookoutError;

    fn from_str(s: &str) -> LookoutResult<Self> {
        let (ty, name) = match s.split_once('/') {
            Some((ty, name)) => (ty, name),
            None => (s, ""),
        };
        if ty.is_empty() {
            return Err(LookoutError::Property {
                input: s.to_string(),
                message: "component type must be non-empty".to_string(),
            });
        }
        Ok(Self::new(ty, name))
    }
}

/// Which component table a property addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Receivers,
    Extensions,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Receivers => "receivers",
            ComponentKind::Extensions => "extensions",
        }
    }

    fn env_keyword(&self) -> &'static str {
        match self {
            ComponentKind::Receivers => "RECEIVERS",
            ComponentKind::Extensions => "EXTENSIONS",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The component field a property sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyField {
    Enabled,
    Config,
}

/// One parsed discovery property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub kind: ComponentKind,
    pub component: ComponentId,
    pub field: PropertyField,
    /// Dotted config sub-keys; empty for `enabled`. A segment may contain
    /// `::` to open further nesting inside a single dotted segment.
    pub path: Vec<String>,
    pub value: String,
    /// The property as a single-branch nested map, ready to merge.
    pub rendered: Mapping,
}

impl Property {
    pub(crate) fn new(
        kind: ComponentKind,
        component: ComponentId,
        field: PropertyField,
        path: Vec<String>,
        value: String,
    ) -> Self {
        let rendered = render_tree(kind, &component, field, &path, &value);
        Self {
            kind,
            component,
            field,
            path,
            value,
            rendered,
        }
    }

    /// Parse the dotted form, e.g. `splunk.discovery.receivers.redis.config.auth`.
    pub fn parse_dotted(key: &str, value: &str) -> LookoutResult<Self> {
        parser::parse_dotted(key, value)
    }

    /// Parse the environment-variable form, e.g.
    /// `SPLUNK_DISCOVERY_RECEIVERS_redis_CONFIG_auth`.
    pub fn parse_env_var(name: &str, value: &str) -> LookoutResult<Self> {
        parser::parse_env_var(name, value)
    }

    /// Render the dotted key for this property.
    pub fn to_dotted_string(&self) -> String {
        let mut out = format!(
            "{}{}.{}",
            DOTTED_PREFIX,
            self.kind.as_str(),
            self.component
        );
        match self.field {
            PropertyField::Enabled => out.push_str(".enabled"),
            PropertyField::Config => {
                out.push_str(".config.");
                out.push_str(&self.path.join("."));
            }
        }
        out
    }

    /// Render the environment variable name for this property.
    pub fn to_env_var(&self) -> String {
        let mut out = format!(
            "{}{}_{}",
            ENV_VAR_PREFIX,
            self.kind.env_keyword(),
            wordify(&self.component.to_string())
        );
        match self.field {
            PropertyField::Enabled => out.push_str("_ENABLED"),
            PropertyField::Config => {
                out.push_str("_CONFIG_");
                out.push_str(&wordify(&self.path.join(".")));
            }
        }
        out
    }

    /// Collect every discovery property from an iterator of environment
    /// variables. Malformed names under the discovery prefix are returned as
    /// warnings rather than failing the scan.
    pub fn from_env_vars(
        vars: impl Iterator<Item = (String, String)>,
    ) -> (Vec<Property>, Vec<String>) {
        let mut properties = Vec::new();
        let mut warnings = Vec::new();
        for (name, value) in vars {
            if !name.starts_with(ENV_VAR_PREFIX) || NON_PROPERTY_VARS.contains(&name.as_str()) {
                continue;
            }
            match Property::parse_env_var(&name, &value) {
                Ok(property) => properties.push(property),
                Err(e) => warnings.push(format!("ignoring environment variable {name}: {e}")),
            }
        }
        (properties, warnings)
    }
}

/// Build the single-branch nested map for a property.
///
/// Receiver config is nested one level deeper under a literal `config` key
/// because discoverable-receiver entries keep their runtime config there;
/// extension entries are their config, so their path applies directly.
fn render_tree(
    kind: ComponentKind,
    component: &ComponentId,
    field: PropertyField,
    path: &[String],
    value: &str,
) -> Mapping {
    let leaf: Value =
        serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    let mut keys: Vec<String> = Vec::new();
    match field {
        PropertyField::Enabled => keys.push("enabled".to_string()),
        PropertyField::Config => {
            if kind == ComponentKind::Receivers {
                keys.push("config".to_string());
            }
            for segment in path {
                keys.extend(segment.split("::").map(str::to_string));
            }
        }
    }

    let mut node = leaf;
    for key in keys.iter().rev() {
        let mut map = Mapping::new();
        map.insert(Value::String(key.clone()), node);
        node = Value::Mapping(map);
    }

    let mut component_map = Mapping::new();
    component_map.insert(Value::String(component.to_string()), node);
    let mut root = Mapping::new();
    root.insert(
        Value::String(kind.as_str().to_string()),
        Value::Mapping(component_map),
    );
    root
}

/// Read an `enabled` value from a YAML node. Properties arrive as strings, so
/// both native booleans and true/false strings are accepted.
pub fn parse_enabled(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
