//! Built-in observer implementations. These only establish that the target
//! environment is reachable; enumerating and scraping endpoints belongs to
//! the collection pipeline, not to preflight discovery.

use async_trait::async_trait;
use serde_yaml::Mapping;
use tracing::debug;

use super::{Observer, ObserverFactory};
use crate::error::{LookoutError, LookoutResult};

/// Observes the local host. There is nothing to probe: if the pass is
/// running, the host is there.
#[derive(Debug, Default)]
pub struct HostObserver;

#[async_trait]
impl Observer for HostObserver {
    async fn start(&mut self) -> LookoutResult<()> {
        debug!("host observer started");
        Ok(())
    }

    async fn shutdown(&mut self) -> LookoutResult<()> {
        Ok(())
    }
}

pub(super) struct HostObserverFactory;

impl ObserverFactory for HostObserverFactory {
    fn create(&self, _config: &Mapping) -> LookoutResult<Box<dyn Observer>> {
        Ok(Box::new(HostObserver))
    }
}

const DEFAULT_DOCKER_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Probes the Docker daemon socket configured under `endpoint`.
#[derive(Debug)]
pub struct DockerObserver {
    endpoint: String,
}

impl DockerObserver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Observer for DockerObserver {
    async fn start(&mut self) -> LookoutResult<()> {
        if let Some(path) = self.endpoint.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| LookoutError::Discovery {
                        message: format!("docker socket {path} unreachable: {e}"),
                    })?;
            }
            #[cfg(not(unix))]
            {
                return Err(LookoutError::Discovery {
                    message: format!("unix endpoint {path} unsupported on this platform"),
                });
            }
        } else if let Some(addr) = self
            .endpoint
            .strip_prefix("tcp://")
            .or_else(|| self.endpoint.strip_prefix("http://"))
        {
            tokio::net::TcpStream::connect(addr)
                .await
                .map_err(|e| LookoutError::Discovery {
                    message: format!("docker endpoint {addr} unreachable: {e}"),
                })?;
        } else {
            return Err(LookoutError::Discovery {
                message: format!("unsupported docker endpoint {}", self.endpoint),
            });
        }
        debug!(endpoint = %self.endpoint, "docker observer started");
        Ok(())
    }

    async fn shutdown(&mut self) -> LookoutResult<()> {
        Ok(())
    }
}

pub(super) struct DockerObserverFactory;

impl ObserverFactory for DockerObserverFactory {
    fn create(&self, config: &Mapping) -> LookoutResult<Box<dyn Observer>> {
        let endpoint = match config.get("endpoint") {
            None => DEFAULT_DOCKER_ENDPOINT.to_string(),
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| LookoutError::Discovery {
                    message: format!("docker_observer endpoint must be a string, got {value:?}"),
                })?,
        };
        Ok(Box::new(DockerObserver::new(endpoint)))
    }
}

/// Checks for a Kubernetes environment: either the in-cluster service
/// environment or a kubeconfig on disk.
#[derive(Debug, Default)]
pub struct K8sObserver;

impl K8sObserver {
    fn kubeconfig_path() -> Option<std::path::PathBuf> {
        if let Ok(path) = std::env::var("KUBECONFIG") {
            return Some(path.into());
        }
        std::env::var_os("HOME").map(|home| std::path::Path::new(&home).join(".kube/config"))
    }
}

#[async_trait]
impl Observer for K8sObserver {
    async fn start(&mut self) -> LookoutResult<()> {
        if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            debug!("k8s observer started with in-cluster environment");
            return Ok(());
        }
        match Self::kubeconfig_path() {
            Some(path) if path.exists() => {
                debug!(kubeconfig = %path.display(), "k8s observer started");
                Ok(())
            }
            _ => Err(LookoutError::Discovery {
                message: "no in-cluster environment and no kubeconfig found".to_string(),
            }),
        }
    }

    async fn shutdown(&mut self) -> LookoutResult<()> {
        Ok(())
    }
}

pub(super) struct K8sObserverFactory;

impl ObserverFactory for K8sObserverFactory {
    fn create(&self, _config: &Mapping) -> LookoutResult<Box<dyn Observer>> {
        Ok(Box::new(K8sObserver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_observer_always_starts() {
        let mut observer = HostObserver;
        assert!(observer.start().await.is_ok());
        assert!(observer.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn docker_observer_fails_on_missing_socket() {
        let mut observer = DockerObserver::new("unix:///nonexistent/docker.sock");
        assert!(observer.start().await.is_err());
    }

    #[tokio::test]
    async fn docker_observer_rejects_unknown_scheme() {
        let mut observer = DockerObserver::new("ftp://somewhere");
        let err = observer.start().await.unwrap_err();
        assert!(err.to_string().contains("unsupported docker endpoint"));
    }

    #[test]
    fn docker_factory_reads_endpoint_from_config() {
        let config: Mapping = serde_yaml::from_str("endpoint: tcp://localhost:2375").unwrap();
        assert!(DockerObserverFactory.create(&config).is_ok());

        let bad: Mapping = serde_yaml::from_str("endpoint: [not, a, string]").unwrap();
        assert!(DockerObserverFactory.create(&bad).is_err());
    }
}
