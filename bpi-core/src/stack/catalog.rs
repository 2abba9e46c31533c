//! Fixed service catalog.
//!
//! Translates `StackOptions` into the concrete container specs of one stack:
//! the three infrastructure dependencies, any platform services the operator
//! chose to run locally, and the protocol API with its consumer.

use crate::ports;
use crate::types::{
    ContainerSpec, Dependency, HealthCheck, PlatformServiceOptions, PortMapping, ServiceRole,
    StackOptions,
};
use std::collections::BTreeMap;

const RUN_API: &str = "./ops/run_api.sh";
const RUN_CONSUMER: &str = "./ops/run_consumer.sh";
const MESSAGING_CONFIG: &str = "/etc/nats/nats-server.conf";

/// Container specs for one stack start, split by role.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    /// Infrastructure dependencies, in gate order
    pub infrastructure: Vec<ContainerSpec>,

    /// Application services, started once every dependency is reachable
    pub services: Vec<ContainerSpec>,
}

impl ServiceCatalog {
    /// Compose the catalog for the given options.
    pub fn compose(options: &StackOptions) -> Self {
        let env = SharedEnv::new(options);

        let infrastructure = vec![messaging(options), database(options), cache(options)];

        let mut services = Vec::new();
        if options.ident.run_locally {
            services.push(platform_api("ident", &options.images.ident, &options.ident, &env));
            services.push(platform_worker(
                "ident-consumer",
                &options.images.ident,
                RUN_CONSUMER,
                options,
                &env,
            ));
        }
        if options.nchain.run_locally {
            services.push(platform_api("nchain", &options.images.nchain, &options.nchain, &env));
            services.push(platform_worker(
                "nchain-consumer",
                &options.images.nchain,
                RUN_CONSUMER,
                options,
                &env,
            ));
            services.push(platform_worker(
                "nchain-statsdaemon",
                &options.images.nchain,
                "./ops/run_statsdaemon.sh",
                options,
                &env,
            ));
        }
        if options.privacy.run_locally {
            services.push(platform_api("privacy", &options.images.privacy, &options.privacy, &env));
            services.push(platform_worker(
                "privacy-consumer",
                &options.images.privacy,
                RUN_CONSUMER,
                options,
                &env,
            ));
        }
        if options.vault.run_locally {
            services.push(platform_api("vault", &options.images.vault, &options.vault, &env));
        }

        services.push(baseline_api(options, &env));
        services.push(baseline_consumer(options, &env));

        Self { infrastructure, services }
    }

    /// Distinct image references, in first-use order.
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for spec in self.all() {
            if !images.contains(&spec.image) {
                images.push(spec.image.clone());
            }
        }
        images
    }

    /// Every spec, infrastructure first.
    pub fn all(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.infrastructure.iter().chain(self.services.iter())
    }

    /// Infrastructure spec backing a dependency.
    pub fn dependency(&self, dependency: Dependency) -> Option<&ContainerSpec> {
        self.infrastructure.iter().find(|s| s.dependency() == Some(dependency))
    }
}

/// Host address the readiness gate probes for a dependency.
pub fn probe_address(options: &StackOptions, dependency: Dependency) -> String {
    let port = match dependency {
        Dependency::Messaging => options.messaging.port,
        Dependency::Database => options.database.endpoint.port,
        Dependency::Cache => options.cache.port,
    };
    format!("127.0.0.1:{}", port)
}

/// Split `scheme://host[:port]` into (host[:port], scheme).
fn host_and_scheme(url: &str) -> (String, String) {
    match url.split_once("://") {
        Some((scheme, rest)) => (rest.trim_end_matches('/').to_string(), scheme.to_string()),
        None => (url.trim_end_matches('/').to_string(), "http".to_string()),
    }
}

/// Environment every application container shares.
struct SharedEnv(BTreeMap<String, String>);

impl SharedEnv {
    fn new(options: &StackOptions) -> Self {
        let mut env = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            env.insert(k.to_string(), v);
        };

        set("LOG_LEVEL", options.log_level.clone());
        set("DATABASE_HOST", options.database.endpoint.hostname.clone());
        set("DATABASE_PORT", ports::PORT_DATABASE.to_string());
        set("DATABASE_USER", options.database.user.clone());
        set("DATABASE_PASSWORD", options.database.password.clone());
        set("DATABASE_SSL_MODE", "disable".to_string());
        set("NATS_URL", format!("nats://{}:{}", options.messaging.hostname, ports::PORT_MESSAGING));
        set("NATS_CLIENT_PREFIX", options.name.clone());
        set("REDIS_HOSTS", format!("{}:{}", options.cache.hostname, ports::PORT_CACHE));

        for (prefix, service) in [
            ("IDENT", &options.ident),
            ("NCHAIN", &options.nchain),
            ("PRIVACY", &options.privacy),
            ("VAULT", &options.vault),
        ] {
            let (host, scheme) = host_and_scheme(&service.internal_url());
            set(&format!("{}_API_HOST", prefix), host);
            set(&format!("{}_API_SCHEME", prefix), scheme);
        }

        Self(env)
    }

    fn with(&self, extra: &[(&str, String)]) -> BTreeMap<String, String> {
        let mut env = self.0.clone();
        for (k, v) in extra {
            env.insert((*k).to_string(), v.clone());
        }
        env
    }
}

fn http_health() -> HealthCheck {
    HealthCheck::shell(format!("curl -f http://localhost:{}/status", ports::PORT_CONTAINER_HTTP))
}

fn messaging(options: &StackOptions) -> ContainerSpec {
    ContainerSpec {
        name: "nats".to_string(),
        hostname: options.messaging.hostname.clone(),
        image: options.images.messaging.clone(),
        entrypoint: None,
        // The image's bundled config declares the websocket listener; the
        // monitoring endpoint the healthcheck polls is enabled here.
        cmd: Some(vec![
            "-c".to_string(),
            MESSAGING_CONFIG.to_string(),
            "-m".to_string(),
            ports::PORT_MESSAGING_MONITOR.to_string(),
        ]),
        healthcheck: Some(HealthCheck::shell(format!(
            "wget -q --spider http://localhost:{}/healthz",
            ports::PORT_MESSAGING_MONITOR
        ))),
        env: BTreeMap::new(),
        ports: vec![
            PortMapping::tcp(options.messaging.port, ports::PORT_MESSAGING),
            PortMapping::tcp(options.messaging_ws_port, ports::PORT_MESSAGING_WS),
        ],
        role: ServiceRole::Infrastructure(Dependency::Messaging),
    }
}

fn database(options: &StackOptions) -> ContainerSpec {
    let db = &options.database;
    let env = BTreeMap::from([
        ("POSTGRES_USER".to_string(), db.user.clone()),
        ("POSTGRES_PASSWORD".to_string(), db.password.clone()),
        ("POSTGRES_DB".to_string(), db.name.clone()),
    ]);

    ContainerSpec {
        name: "postgres".to_string(),
        hostname: db.endpoint.hostname.clone(),
        image: options.images.database.clone(),
        entrypoint: None,
        cmd: None,
        healthcheck: Some(HealthCheck::shell(format!("pg_isready -U {} -d {}", db.user, db.name))),
        env,
        ports: vec![PortMapping::tcp(db.endpoint.port, ports::PORT_DATABASE)],
        role: ServiceRole::Infrastructure(Dependency::Database),
    }
}

fn cache(options: &StackOptions) -> ContainerSpec {
    ContainerSpec {
        name: "redis".to_string(),
        hostname: options.cache.hostname.clone(),
        image: options.images.cache.clone(),
        entrypoint: None,
        cmd: None,
        healthcheck: Some(HealthCheck::shell("redis-cli ping")),
        env: BTreeMap::new(),
        ports: vec![PortMapping::tcp(options.cache.port, ports::PORT_CACHE)],
        role: ServiceRole::Infrastructure(Dependency::Cache),
    }
}

fn platform_api(
    name: &str,
    image: &str,
    service: &PlatformServiceOptions,
    env: &SharedEnv,
) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        hostname: service.endpoint.hostname.clone(),
        image: image.to_string(),
        entrypoint: Some(vec![RUN_API.to_string()]),
        cmd: None,
        healthcheck: Some(http_health()),
        env: env.with(&[
            ("DATABASE_NAME", name.to_string()),
            ("PORT", ports::PORT_CONTAINER_HTTP.to_string()),
        ]),
        ports: vec![PortMapping::tcp(service.endpoint.port, ports::PORT_CONTAINER_HTTP)],
        role: ServiceRole::Service,
    }
}

fn platform_worker(
    name: &str,
    image: &str,
    entrypoint: &str,
    options: &StackOptions,
    env: &SharedEnv,
) -> ContainerSpec {
    let database = name.split('-').next().unwrap_or(name).to_string();
    ContainerSpec {
        name: name.to_string(),
        hostname: format!("{}-{}", options.name, name),
        image: image.to_string(),
        entrypoint: Some(vec![entrypoint.to_string()]),
        cmd: None,
        healthcheck: Some(HealthCheck::shell("pgrep -f consumer || pgrep -f statsdaemon")),
        env: env.with(&[("DATABASE_NAME", database)]),
        ports: Vec::new(),
        role: ServiceRole::Service,
    }
}

fn baseline_env(options: &StackOptions, env: &SharedEnv) -> BTreeMap<String, String> {
    let org = &options.organization;
    let mut extra = vec![
        ("DATABASE_NAME", options.database.name.clone()),
        ("BASELINE_ORGANIZATION_ID", org.organization_id.clone()),
        ("BASELINE_WORKGROUP_ID", org.workgroup_id.clone()),
        ("BASELINE_SUBJECT_ACCOUNT_ID", org.subject_account_id().to_string()),
        ("PORT", ports::PORT_CONTAINER_HTTP.to_string()),
    ];
    if let Some(name) = &org.organization_name {
        extra.push(("BASELINE_ORGANIZATION_NAME", name.clone()));
    }
    if let Some(address) = &org.registry_contract_address {
        extra.push(("BASELINE_REGISTRY_CONTRACT_ADDRESS", address.clone()));
    }
    if let Some(network) = &org.network_id {
        extra.push(("NCHAIN_NETWORK_ID", network.clone()));
    }
    if let Some(token) = &org.refresh_token {
        extra.push(("PROVIDE_REFRESH_TOKEN", token.clone()));
    }
    env.with(&extra)
}

fn baseline_api(options: &StackOptions, env: &SharedEnv) -> ContainerSpec {
    ContainerSpec {
        name: "api".to_string(),
        hostname: options.api.hostname.clone(),
        image: options.images.api.clone(),
        entrypoint: Some(vec![RUN_API.to_string()]),
        cmd: None,
        healthcheck: Some(http_health()),
        env: baseline_env(options, env),
        ports: vec![PortMapping::tcp(options.api.port, ports::PORT_CONTAINER_HTTP)],
        role: ServiceRole::Service,
    }
}

fn baseline_consumer(options: &StackOptions, env: &SharedEnv) -> ContainerSpec {
    ContainerSpec {
        name: "consumer".to_string(),
        hostname: options.consumer_hostname.clone(),
        image: options.images.api.clone(),
        entrypoint: Some(vec![RUN_CONSUMER.to_string()]),
        cmd: None,
        healthcheck: Some(HealthCheck::shell("pgrep -f consumer")),
        env: baseline_env(options, env),
        ports: Vec::new(),
        role: ServiceRole::Service,
    }
}
