//! Stack lifecycle orchestration.
//!
//! Start order:
//! 1. Ensure the stack network exists
//! 2. Pull every image concurrently
//! 3. Start the infrastructure containers
//! 4. Gate on messaging, database and cache, in that order
//! 5. Start the application services concurrently
//!
//! Concurrent phases run in a `JoinSet`; the first failure aborts the
//! remaining tasks and is returned to the caller.

use super::catalog::{self, ServiceCatalog};
use crate::error::{Result, StackError};
use crate::observability::health::{HealthChecker, HealthStatus};
use crate::observability::metrics;
use crate::readiness::ReadinessGate;
use crate::runtime::{ContainerRuntime, ContainerSummary, LogStream};
use crate::types::{ContainerHandle, ContainerSpec, Dependency, StackInstance, StackOptions};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Time a container gets to exit before the runtime kills it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives a container runtime to realize, stop and prune named stacks.
#[derive(Clone)]
pub struct StackOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    gate: ReadinessGate,
    health: HealthChecker,
}

impl StackOrchestrator {
    /// Create a new stack orchestrator.
    ///
    /// # Arguments
    /// * `runtime` - Container runtime for container and network lifecycle
    /// * `gate` - Readiness gate for infrastructure dependencies
    pub fn new(runtime: Arc<dyn ContainerRuntime>, gate: ReadinessGate) -> Self {
        Self { runtime, gate, health: HealthChecker::new() }
    }

    /// Report dependency health into a shared checker.
    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = health;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Start (or restart) a stack.
    ///
    /// Safe to repeat: existing containers are found by name and restarted.
    #[instrument(skip(self, options), fields(stack = %options.name))]
    pub async fn start(&self, options: &StackOptions) -> Result<StackInstance> {
        options.validate()?;
        let catalog = ServiceCatalog::compose(options);
        info!(
            infrastructure = catalog.infrastructure.len(),
            services = catalog.services.len(),
            "Starting stack"
        );

        let network_id = self.runtime.ensure_network(&options.name).await?;

        if options.pull_images {
            self.pull_images(catalog.images()).await?;
        } else {
            debug!("Skipping image pulls");
        }

        let mut containers =
            self.start_all(&options.name, &network_id, catalog.infrastructure.clone()).await?;

        for dependency in Dependency::ALL {
            if catalog.dependency(dependency).is_none() {
                continue;
            }
            self.health.register_subsystem(dependency.as_str()).await;
            let addr = catalog::probe_address(options, dependency);
            let reachable =
                self.gate.await_reachable(dependency, &addr, options.readiness_timeout).await;
            let (status, message) = match &reachable {
                Ok(()) => (HealthStatus::Healthy, None),
                Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
            };
            self.health.update_subsystem(dependency.as_str(), status, message).await;
            reachable?;
        }

        containers.extend(self.start_all(&options.name, &network_id, catalog.services).await?);

        info!(containers = containers.len(), network = %network_id, "Stack started");
        Ok(StackInstance {
            name: options.name.clone(),
            network_id,
            containers,
            options: options.clone(),
        })
    }

    /// Pull images concurrently; the first failure aborts the rest.
    async fn pull_images(&self, images: Vec<String>) -> Result<()> {
        let mut tasks = JoinSet::new();
        for image in images {
            let runtime = Arc::clone(&self.runtime);
            tasks.spawn(async move {
                info!(image = %image, "Pulling image");
                runtime.pull_image(&image).await?;
                metrics::record_image_pulled(&image);
                Ok::<_, StackError>(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                error!(error = %e, "Image pull failed, aborting remaining pulls");
                tasks.abort_all();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Create-or-reuse and start containers concurrently, in no particular order.
    async fn start_all(
        &self,
        stack_name: &str,
        network_id: &str,
        specs: Vec<ContainerSpec>,
    ) -> Result<Vec<ContainerHandle>> {
        let mut tasks = JoinSet::new();
        for spec in specs {
            let runtime = Arc::clone(&self.runtime);
            let stack_name = stack_name.to_string();
            let network_id = network_id.to_string();
            tasks.spawn(async move { runtime.run_container(&stack_name, &network_id, &spec).await });
        }

        let mut handles = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match flatten(joined) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(error = %e, "Container start failed, aborting remaining starts");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Containers labelled as belonging to the stack, running or not.
    pub async fn ps(&self, stack_name: &str) -> Result<Vec<ContainerSummary>> {
        let mut containers = self.runtime.list_containers(stack_name).await?;
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    /// Stop every container of the stack, leaving containers and volumes in place.
    ///
    /// Every container is attempted; the first failure is returned afterwards.
    #[instrument(skip(self))]
    pub async fn stop(&self, stack_name: &str) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        let mut first_error = None;

        for container in self.ps(stack_name).await? {
            match self.runtime.stop_container(&container.id, STOP_TIMEOUT).await {
                Ok(()) => {
                    info!(container = %container.name, "Stopped container");
                    stopped.push(container.name);
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to stop container");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stopped),
        }
    }

    /// Stop and remove every container of the stack. With `remove_volumes`
    /// the containers' anonymous volumes and the stack network go too.
    #[instrument(skip(self))]
    pub async fn prune(&self, stack_name: &str, remove_volumes: bool) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        let mut first_error = None;

        for container in self.ps(stack_name).await? {
            if container.is_running() {
                if let Err(e) = self.runtime.stop_container(&container.id, STOP_TIMEOUT).await {
                    warn!(container = %container.name, error = %e, "Stop failed, removing anyway");
                }
            }
            match self.runtime.remove_container(&container.id, remove_volumes).await {
                Ok(()) => {
                    info!(container = %container.name, "Removed container");
                    removed.push(container.name);
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to remove container");
                    first_error.get_or_insert(e);
                }
            }
        }

        if remove_volumes {
            if let Err(e) = self.runtime.remove_network(stack_name).await {
                warn!(network = %stack_name, error = %e, "Failed to remove network");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Merged log stream of every container in the stack.
    pub async fn logs(&self, stack_name: &str, follow: bool, tail: Option<u32>) -> Result<LogStream> {
        let containers = self.ps(stack_name).await?;
        if containers.is_empty() {
            return Err(StackError::NotFound {
                resource: "stack".to_string(),
                id: stack_name.to_string(),
            });
        }

        let mut streams = Vec::with_capacity(containers.len());
        for container in containers {
            let name = container.name.clone();
            let stream = self.runtime.logs(&container.id, follow, tail).await?;
            // Label lines with the container name rather than its id.
            let labelled = stream.map(move |line| {
                line.map(|mut l| {
                    l.container = name.clone();
                    l
                })
            });
            streams.push(labelled.boxed());
        }

        Ok(Box::pin(stream::select_all(streams)))
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(StackError::Internal(format!("task failed: {}", e))),
    }
}
