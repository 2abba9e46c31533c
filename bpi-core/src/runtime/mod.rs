//! Container runtime abstraction.
//!
//! The orchestrator drives containers only through the `ContainerRuntime`
//! trait: network create/remove, image pull, container create/start/stop/
//! remove, list-by-stack and log streams. `DockerRuntime` talks to the
//! local Docker daemon; tests substitute recording mocks.

use crate::error::{Result, StackError};
use crate::observability::metrics;
use crate::types::{ContainerHandle, ContainerSpec};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

mod docker;
pub use docker::DockerRuntime;

/// Label recording which stack a container belongs to.
pub const STACK_LABEL: &str = "com.provide.stack";

/// Stream of log lines from one container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine>> + Send>>;

/// One line of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Container the line came from
    pub container: String,

    /// Line content, without trailing newline
    pub line: String,
}

/// Summary of a container known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,

    /// Value of the stack label, if set
    pub stack: Option<String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Container runtime trait.
///
/// Implementations must treat "already exists", "already started" and
/// "already stopped" answers as success so every operation is safe to repeat.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the named network if absent; return its runtime ID.
    async fn ensure_network(&self, name: &str) -> Result<String>;

    /// Remove the named network. Missing networks are not an error.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Pull an image reference.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Find a container by exact name.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerSummary>>;

    /// List containers (running or not) labelled as members of `stack_name`.
    async fn list_containers(&self, stack_name: &str) -> Result<Vec<ContainerSummary>>;

    /// Create a container attached to `network_id`, labelled with its
    /// stack; return its runtime ID.
    async fn create_container(
        &self,
        name: &str,
        stack_name: &str,
        spec: &ContainerSpec,
        network_id: &str,
    ) -> Result<String>;

    /// Start a container. Starting a running container is a no-op.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Attach a container to a network under the given aliases.
    async fn connect_network(&self, network_id: &str, id: &str, aliases: &[String]) -> Result<()>;

    /// Stop a container, waiting up to `timeout` before the runtime kills it.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Remove a container, optionally with its anonymous volumes.
    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()>;

    /// Stream a container's output.
    async fn logs(&self, id: &str, follow: bool, tail: Option<u32>) -> Result<LogStream>;

    /// Get runtime name (for logging).
    fn name(&self) -> &str;

    /// Create-or-reuse a container for `spec`, (re)start it and attach it.
    ///
    /// The fully-qualified name is looked up first so repeated starts never
    /// create a second container for the same service. A container holding
    /// the name for another stack is an error.
    async fn run_container(
        &self,
        stack_name: &str,
        network_id: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle> {
        let name = spec.container_name(stack_name);

        let (id, reused) = match self.find_container(&name).await? {
            Some(existing) if existing.stack.as_deref() == Some(stack_name) => {
                debug!(container = %name, id = %existing.id, "Reusing existing container");
                (existing.id, true)
            }
            Some(existing) => {
                return Err(StackError::ContainerStartFailed {
                    name,
                    reason: format!(
                        "name already used by stack {}",
                        existing.stack.as_deref().unwrap_or("<unlabelled>")
                    ),
                });
            }
            None => (self.create_container(&name, stack_name, spec, network_id).await?, false),
        };

        self.start_container(&id).await?;
        if reused {
            self.connect_network(network_id, &id, std::slice::from_ref(&spec.hostname)).await?;
        }

        metrics::record_container_started(&spec.name, reused);
        info!(container = %name, runtime = self.name(), reused, "Container running");

        Ok(ContainerHandle { id, name, service: spec.name.clone(), reused })
    }
}
