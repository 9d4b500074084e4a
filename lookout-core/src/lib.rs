//! Discovery configuration engine: the property grammar and its encodings,
//! the config-dir loader, the central deep-merge, and the preflight
//! discovery orchestrator that works out which observers are actually
//! reachable before the collector proper starts.

pub mod confdir;
pub mod confmap;
pub mod discovery;
pub mod error;
pub mod properties;

pub use confdir::{Config, ConfigDirCache};
pub use discovery::{Discoverer, DiscoveryOutput, FactoryRegistry};
pub use error::{LookoutError, LookoutResult};
pub use properties::{ComponentId, Property};
