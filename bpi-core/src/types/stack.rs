//! Stack domain types.

use crate::config::{Config, ImageConfig};
use crate::error::{Result, StackError};
use crate::ports;
use crate::types::container::ContainerHandle;
use crate::types::organization::OrganizationContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A hostname and port on the stack network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub hostname: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self { hostname: hostname.into(), port }
    }
}

/// Credentials and location of the relational database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    pub endpoint: ServiceEndpoint,
    pub user: String,
    pub password: String,
    pub name: String,
}

/// A platform service that runs either as a local container or remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformServiceOptions {
    /// Run the service (and its workers) as containers in this stack
    pub run_locally: bool,

    /// Hostname and host port when running locally
    pub endpoint: ServiceEndpoint,

    /// Remote endpoint (scheme://host[:port]) when not running locally
    pub remote: String,
}

impl PlatformServiceOptions {
    /// Base URL the stack's containers should use to reach this service.
    pub fn internal_url(&self) -> String {
        if self.run_locally {
            format!("http://{}:{}", self.endpoint.hostname, ports::PORT_CONTAINER_HTTP)
        } else {
            self.remote.trim_end_matches('/').to_string()
        }
    }

    /// Base URL this process should use to reach this service.
    pub fn host_url(&self) -> String {
        if self.run_locally {
            format!("http://localhost:{}", self.endpoint.port)
        } else {
            self.remote.trim_end_matches('/').to_string()
        }
    }
}

/// Which stack ports to expose publicly through tunnels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure {
    pub api: bool,
    pub messaging: bool,
    pub websocket: bool,
}

impl Exposure {
    pub fn any(&self) -> bool {
        self.api || self.messaging || self.websocket
    }
}

/// Operator-supplied configuration for one stack start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOptions {
    /// Stack name; doubles as network name and container-name prefix
    pub name: String,

    pub api: ServiceEndpoint,
    pub consumer_hostname: String,
    pub messaging: ServiceEndpoint,
    pub messaging_ws_port: u16,
    pub database: DatabaseOptions,
    pub cache: ServiceEndpoint,

    pub ident: PlatformServiceOptions,
    pub nchain: PlatformServiceOptions,
    pub privacy: PlatformServiceOptions,
    pub vault: PlatformServiceOptions,

    pub images: ImageConfig,
    pub organization: OrganizationContext,
    pub exposure: Exposure,

    /// Pull images before starting
    pub pull_images: bool,

    /// Prune instead of stop on shutdown
    pub prune_on_exit: bool,

    /// Bound on each infrastructure readiness wait
    pub readiness_timeout: Duration,

    pub log_level: String,
}

impl StackOptions {
    /// Options with the stack's conventional hostnames and ports.
    pub fn new(name: impl Into<String>, config: &Config, organization: OrganizationContext) -> Self {
        let name = name.into();
        let host = |suffix: &str| format!("{}-{}", name, suffix);
        let platform = |suffix: &str, port: u16, remote: &str| PlatformServiceOptions {
            run_locally: false,
            endpoint: ServiceEndpoint::new(host(suffix), port),
            remote: remote.to_string(),
        };

        Self {
            api: ServiceEndpoint::new(host("api"), ports::PORT_API),
            consumer_hostname: host("consumer"),
            messaging: ServiceEndpoint::new(host("nats"), ports::PORT_MESSAGING),
            messaging_ws_port: ports::PORT_MESSAGING_WS,
            database: DatabaseOptions {
                endpoint: ServiceEndpoint::new(host("postgres"), ports::PORT_DATABASE),
                user: "baseline".to_string(),
                password: "baseline".to_string(),
                name: "baseline".to_string(),
            },
            cache: ServiceEndpoint::new(host("redis"), ports::PORT_CACHE),
            ident: platform("ident", ports::PORT_IDENT, &config.ident_endpoint),
            nchain: platform("nchain", ports::PORT_NCHAIN, &config.nchain_endpoint),
            privacy: platform("privacy", ports::PORT_PRIVACY, &config.privacy_endpoint),
            vault: platform("vault", ports::PORT_VAULT, &config.vault_endpoint),
            images: config.images.clone(),
            organization,
            exposure: Exposure::default(),
            pull_images: true,
            prune_on_exit: false,
            readiness_timeout: Duration::from_secs(config.readiness_timeout_secs),
            log_level: config.log_level.to_uppercase(),
            name,
        }
    }

    /// Reject configurations that cannot produce a working stack.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(StackError::InvalidConfig {
                reason: format!("stack name '{}' must be non-empty without whitespace", self.name),
            });
        }

        let mut claimed: HashMap<u16, &str> = HashMap::new();
        let mut claim = |port: u16, owner: &'static str| -> Result<()> {
            if let Some(existing) = claimed.insert(port, owner) {
                return Err(StackError::InvalidConfig {
                    reason: format!("host port {} used by both {} and {}", port, existing, owner),
                });
            }
            Ok(())
        };

        claim(self.api.port, "api")?;
        claim(self.messaging.port, "messaging")?;
        claim(self.messaging_ws_port, "messaging websocket")?;
        claim(self.database.endpoint.port, "database")?;
        claim(self.cache.port, "cache")?;
        for (service, owner) in [
            (&self.ident, "ident"),
            (&self.nchain, "nchain"),
            (&self.privacy, "privacy"),
            (&self.vault, "vault"),
        ] {
            if service.run_locally {
                claim(service.endpoint.port, owner)?;
            }
        }

        Ok(())
    }
}

/// A named collection of containers plus a dedicated network.
#[derive(Debug, Clone)]
pub struct StackInstance {
    /// Stack name
    pub name: String,

    /// Runtime network identifier
    pub network_id: String,

    /// Containers started for this stack
    pub containers: Vec<ContainerHandle>,

    /// Configuration the stack was started with
    pub options: StackOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> StackOptions {
        StackOptions::new("acme", &Config::default(), OrganizationContext::new("org-1", "wg-1"))
    }

    #[test]
    fn test_default_options_validate() {
        let opts = options();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.api.hostname, "acme-api");
        assert_eq!(opts.database.endpoint.port, 5432);
    }

    #[test]
    fn test_port_collision_rejected() {
        let mut opts = options();
        opts.cache.port = opts.database.endpoint.port;
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("5432"));
    }

    #[test]
    fn test_remote_services_do_not_claim_ports() {
        let mut opts = options();
        opts.vault.endpoint.port = opts.api.port;
        assert!(opts.validate().is_ok());

        opts.vault.run_locally = true;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut opts = options();
        opts.name = "my stack".to_string();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_platform_urls() {
        let mut opts = options();
        opts.ident.remote = "https://ident.example.com/".to_string();
        assert_eq!(opts.ident.internal_url(), "https://ident.example.com");

        opts.ident.run_locally = true;
        assert_eq!(opts.ident.internal_url(), "http://acme-ident:8080");
        assert_eq!(opts.ident.host_url(), "http://localhost:8081");
    }
}
