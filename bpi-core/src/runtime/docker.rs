//! Docker implementation of the container runtime.

use super::{ContainerRuntime, ContainerSummary, LogLine, LogStream, STACK_LABEL};
use crate::error::{Result, StackError};
use crate::types::ContainerSpec;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HealthConfig, HostConfig, PortBinding};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform's default socket (or `DOCKER_HOST`).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| StackError::RuntimeUnavailable { reason: e.to_string() })?;
        Ok(Self { docker })
    }

    async fn network_id(&self, name: &str) -> Result<Option<String>> {
        match self.docker.inspect_network(name, None::<InspectNetworkOptions<String>>).await {
            Ok(network) => Ok(network.id),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(StackError::NetworkSetupFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn summarize(summary: bollard::models::ContainerSummary) -> Option<ContainerSummary> {
        let id = summary.id?;
        let name = summary
            .names
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|n| n.trim_start_matches('/').to_string())?;
        Some(ContainerSummary {
            id,
            name,
            image: summary.image.unwrap_or_default(),
            state: summary.state.unwrap_or_default(),
            stack: summary.labels.and_then(|mut labels| labels.remove(STACK_LABEL)),
        })
    }

    /// List every container matching one daemon-side filter.
    async fn list_filtered(&self, key: &str, value: String) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert(key.to_string(), vec![value]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| StackError::RuntimeUnavailable { reason: e.to_string() })?;

        Ok(containers.into_iter().filter_map(Self::summarize).collect())
    }
}

/// HTTP status carried by a Docker daemon error, if any.
fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn nanos(duration: Duration) -> i64 {
    duration.as_nanos().min(i64::MAX as u128) as i64
}

fn container_config(spec: &ContainerSpec, stack_name: &str, network_id: &str) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> =
        spec.ports.iter().map(|p| (p.container_key(), HashMap::new())).collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|p| {
            (
                p.container_key(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(p.host_port.to_string()),
                }]),
            )
        })
        .collect();

    let healthcheck = spec.healthcheck.as_ref().map(|h| HealthConfig {
        test: Some(h.test.clone()),
        interval: Some(nanos(h.interval)),
        timeout: Some(nanos(h.timeout)),
        retries: Some(h.retries as i64),
        start_period: Some(nanos(h.start_period)),
        ..Default::default()
    });

    let host_config = HostConfig {
        port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
        network_mode: Some(network_id.to_string()),
        ..Default::default()
    };

    let mut endpoints = HashMap::new();
    endpoints.insert(
        network_id.to_string(),
        EndpointSettings { aliases: Some(vec![spec.hostname.clone()]), ..Default::default() },
    );

    Config {
        hostname: Some(spec.hostname.clone()),
        image: Some(spec.image.clone()),
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.cmd.clone(),
        env: Some(spec.env_vars()),
        exposed_ports: if exposed_ports.is_empty() { None } else { Some(exposed_ports) },
        healthcheck,
        labels: Some(HashMap::from([(STACK_LABEL.to_string(), stack_name.to_string())])),
        host_config: Some(host_config),
        networking_config: Some(NetworkingConfig { endpoints_config: endpoints }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self))]
    async fn ensure_network(&self, name: &str) -> Result<String> {
        if let Some(id) = self.network_id(name).await? {
            debug!(network = %name, id = %id, "Network already exists");
            return Ok(id);
        }

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| StackError::NetworkSetupFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let id = self.network_id(name).await?.ok_or_else(|| StackError::NetworkSetupFailed {
            name: name.to_string(),
            reason: "network created but not visible".to_string(),
        })?;
        info!(network = %name, id = %id, "Created network");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(StackError::NetworkSetupFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions { from_image: image.to_string(), ..Default::default() };

        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| StackError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerSummary>> {
        // The daemon's name filter is a substring match.
        Ok(self
            .list_filtered("name", name.to_string())
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    async fn list_containers(&self, stack_name: &str) -> Result<Vec<ContainerSummary>> {
        self.list_filtered("label", format!("{}={}", STACK_LABEL, stack_name)).await
    }

    #[instrument(skip(self, spec), fields(image = %spec.image))]
    async fn create_container(
        &self,
        name: &str,
        stack_name: &str,
        spec: &ContainerSpec,
        network_id: &str,
    ) -> Result<String> {
        let options = CreateContainerOptions { name: name.to_string(), ..Default::default() };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec, stack_name, network_id))
            .await
            .map_err(|e| StackError::ContainerStartFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            warn!(container = %name, "Runtime warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(()) => Ok(()),
            // 304: already started
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(StackError::ContainerStartFailed {
                name: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn connect_network(&self, network_id: &str, id: &str, aliases: &[String]) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: id.to_string(),
            endpoint_config: EndpointSettings {
                aliases: Some(aliases.to_vec()),
                ..Default::default()
            },
        };

        match self.docker.connect_network(network_id, options).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => Ok(()),
            Err(e) => Err(StackError::NetworkSetupFailed {
                name: network_id.to_string(),
                reason: format!("failed to attach {}: {}", id, e),
            }),
        }
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(StackError::ContainerStopFailed {
                name: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions { force: true, v: remove_volumes, ..Default::default() };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(StackError::ContainerStopFailed {
                name: id.to_string(),
                reason: format!("remove failed: {}", e),
            }),
        }
    }

    async fn logs(&self, id: &str, follow: bool, tail: Option<u32>) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let container = id.to_string();
        let stream = self.docker.logs(id, Some(options)).map(move |entry| match entry {
            Ok(output) => Ok(LogLine {
                container: container.clone(),
                line: output.to_string().trim_end_matches('\n').to_string(),
            }),
            Err(e) => Err(StackError::RuntimeUnavailable { reason: e.to_string() }),
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthCheck, PortMapping, ServiceRole};
    use std::collections::BTreeMap;

    #[test]
    fn test_container_config_maps_spec() {
        let spec = ContainerSpec {
            name: "api".to_string(),
            hostname: "acme-api".to_string(),
            image: "provide/baseline:latest".to_string(),
            entrypoint: Some(vec!["./ops/run_api.sh".to_string()]),
            cmd: None,
            healthcheck: Some(HealthCheck::shell("curl -f http://localhost:8080/status")),
            env: BTreeMap::from([("PORT".to_string(), "8080".to_string())]),
            ports: vec![PortMapping::tcp(18080, 8080)],
            role: ServiceRole::Service,
        };

        let config = container_config(&spec, "acme", "net-123");

        assert_eq!(config.hostname.as_deref(), Some("acme-api"));
        assert_eq!(config.labels.unwrap()[STACK_LABEL], "acme");
        assert_eq!(config.env, Some(vec!["PORT=8080".to_string()]));
        assert!(config.exposed_ports.unwrap().contains_key("8080/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("net-123"));
        let binding = &host.port_bindings.unwrap()["8080/tcp"];
        assert_eq!(binding.as_ref().unwrap()[0].host_port.as_deref(), Some("18080"));

        let health = config.healthcheck.unwrap();
        assert_eq!(health.retries, Some(3));
        assert_eq!(health.interval, Some(10_000_000_000));

        let endpoints = config.networking_config.unwrap().endpoints_config;
        assert_eq!(endpoints["net-123"].aliases, Some(vec!["acme-api".to_string()]));
    }
}
