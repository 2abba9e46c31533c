//! Container domain types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Host to container port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host
    pub host_port: u16,

    /// Port inside the container
    pub container_port: u16,

    /// Protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(host_port: u16, container_port: u16) -> Self {
        Self { host_port, container_port, protocol: Protocol::Tcp }
    }

    /// Key used by the runtime for exposed ports (e.g. "8080/tcp").
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Health check delegated to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Health check command (runtime form, e.g. `["CMD-SHELL", "..."]`)
    pub test: Vec<String>,

    /// Interval between checks
    pub interval: Duration,

    /// Timeout for each check
    pub timeout: Duration,

    /// Number of retries before marking unhealthy
    pub retries: u32,

    /// Grace period before failures count
    pub start_period: Duration,
}

impl HealthCheck {
    /// Shell health check with the stack's standard cadence.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.into()],
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            retries: 3,
            start_period: Duration::from_secs(10),
        }
    }
}

/// Infrastructure dependency that gates service startup.
///
/// Declaration order is the order the readiness gate checks them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    Messaging,
    Database,
    Cache,
}

impl Dependency {
    /// All dependencies, in gate order.
    pub const ALL: [Dependency; 3] = [Dependency::Messaging, Dependency::Database, Dependency::Cache];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Messaging => "messaging",
            Dependency::Database => "database",
            Dependency::Cache => "cache",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a container within the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRole {
    /// Bare infrastructure dependency, probed by the readiness gate
    Infrastructure(Dependency),

    /// Application service, health-checked by the runtime
    Service,
}

/// Everything needed to create one container of the stack.
///
/// Immutable once computed for a given stack start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Logical service name; doubles as the container-name suffix
    pub name: String,

    /// Hostname on the stack network
    pub hostname: String,

    /// Image reference
    pub image: String,

    /// Entrypoint override
    pub entrypoint: Option<Vec<String>>,

    /// Command override
    pub cmd: Option<Vec<String>>,

    /// Runtime health check
    pub healthcheck: Option<HealthCheck>,

    /// Environment variables
    pub env: BTreeMap<String, String>,

    /// Published ports
    pub ports: Vec<PortMapping>,

    /// Infrastructure or application service
    pub role: ServiceRole,
}

impl ContainerSpec {
    /// Fully-qualified container name within a stack.
    pub fn container_name(&self, stack_name: &str) -> String {
        format!("{}-{}", stack_name, self.name)
    }

    /// Environment in runtime form (`KEY=VALUE`).
    pub fn env_vars(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn dependency(&self) -> Option<Dependency> {
        match self.role {
            ServiceRole::Infrastructure(dep) => Some(dep),
            ServiceRole::Service => None,
        }
    }
}

/// Runtime identifier bound to a container spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime container ID
    pub id: String,

    /// Fully-qualified container name
    pub name: String,

    /// Logical service name
    pub service: String,

    /// Whether an existing container was found and restarted
    pub reused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_and_env() {
        let mut env = BTreeMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());

        let spec = ContainerSpec {
            name: "api".to_string(),
            hostname: "bpi-api".to_string(),
            image: "provide/baseline:latest".to_string(),
            entrypoint: None,
            cmd: None,
            healthcheck: None,
            env,
            ports: vec![PortMapping::tcp(8080, 8080)],
            role: ServiceRole::Service,
        };

        assert_eq!(spec.container_name("acme"), "acme-api");
        assert_eq!(spec.env_vars(), vec!["A=1".to_string(), "B=2".to_string()]);
        assert_eq!(spec.ports[0].container_key(), "8080/tcp");
        assert_eq!(spec.dependency(), None);
    }

    #[test]
    fn test_dependency_gate_order() {
        let mut shuffled = vec![Dependency::Cache, Dependency::Messaging, Dependency::Database];
        shuffled.sort();
        assert_eq!(shuffled, Dependency::ALL.to_vec());
    }
}
