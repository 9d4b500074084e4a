use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lookout_core::{ConfigDirCache, Discoverer, FactoryRegistry, Property};

/// Environment variable overriding the discovery pass log level.
const LOG_LEVEL_VAR: &str = "SPLUNK_DISCOVERY_LOG_LEVEL";

#[derive(Parser)]
#[command(name = "lookout")]
#[command(about = "Preflight discovery for telemetry-collector configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run one discovery pass over a config directory and print the
    /// synthesized configuration as YAML
    Discover {
        /// Config directory (service.yaml plus per-component subdirectories)
        #[arg(long)]
        config_dir: PathBuf,

        /// Discovery property override, e.g.
        /// splunk.discovery.receivers.redis.config.auth=secret (repeatable)
        #[arg(long = "set", value_name = "PROPERTY=VALUE")]
        set: Vec<String>,

        /// Per-observer start timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

fn init_tracing() {
    let default = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Split `--set` arguments into parsed properties, warning on bad ones.
fn parse_set_properties(args: &[String]) -> Vec<Property> {
    let mut properties = Vec::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            warn!("ignoring --set {arg}: expected PROPERTY=VALUE");
            continue;
        };
        match Property::parse_dotted(key, value) {
            Ok(property) => properties.push(property),
            Err(e) => warn!("ignoring --set {arg}: {e}"),
        }
    }
    properties
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover {
            config_dir,
            set,
            timeout_secs,
        } => {
            let cache = ConfigDirCache::new();
            let config = cache
                .load(&config_dir)
                .with_context(|| format!("loading config dir {}", config_dir.display()))?;

            let (env_properties, env_warnings) = Property::from_env_vars(std::env::vars());
            for warning in env_warnings {
                warn!("{warning}");
            }

            let mut discoverer = Discoverer::new(FactoryRegistry::builtin())
                .with_env_properties(env_properties)
                .with_set_properties(parse_set_properties(&set))
                .with_start_timeout(Duration::from_secs(timeout_secs));

            let properties_path = config_dir.join("properties.discovery.yaml");
            if let Some(file_properties) = Discoverer::load_properties_file(&properties_path)? {
                discoverer = discoverer.with_file_properties(file_properties);
            }

            let output = discoverer.discover(&config).await?;
            print!("{}", serde_yaml::to_string(&output.config)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parsing_drops_malformed_arguments() {
        let properties = parse_set_properties(&[
            "splunk.discovery.receivers.redis.config.auth=secret".to_string(),
            "no-equals-sign".to_string(),
            "splunk.discovery.processors.batch.enabled=true".to_string(),
        ]);
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].value, "secret");
    }
}
