//! `bpi start` command
//!
//! Brings the stack up, optionally exposes it through tunnels, bootstraps the
//! organization and then stays in the foreground until a signal or a tunnel
//! failure shuts it down.

use crate::signal;
use anyhow::{anyhow, Context, Result};
use bpi_core::observability::health::HealthStatus;
use bpi_core::platform::PlatformEndpoints;
use bpi_core::shutdown::stack_cleanup;
use bpi_core::tunnel::{FailureCallback, TunnelDescriptor};
use bpi_core::types::Exposure;
use bpi_core::{
    BootstrapOptions, BootstrapOutcome, BrokerTunnelClient, Config, HealthChecker,
    HttpPlatformClient, OrganizationBootstrap, OrganizationContext, ShutdownCoordinator,
    StackInstance, StackOptions, TunnelManager,
};
use clap::Args;
use colored::Colorize;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Interval of the foreground liveness tick.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Stack name (network name and container prefix)
    #[arg(short, long, default_value = crate::DEFAULT_STACK, env = "BPI_STACK")]
    pub name: String,

    /// Organization id
    #[arg(long, env = "BPI_ORGANIZATION_ID")]
    pub organization: String,

    /// Organization display name
    #[arg(long)]
    pub organization_name: Option<String>,

    /// Workgroup id
    #[arg(long, env = "BPI_WORKGROUP_ID")]
    pub workgroup: String,

    /// Operator-separation degree (0 = workgroup operator)
    #[arg(long, default_value_t = 0)]
    pub separation_degree: u32,

    /// Refresh token handed to the protocol API container
    #[arg(long, env = "BPI_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Registry contract address, if already known
    #[arg(long)]
    pub registry_contract: Option<String>,

    /// Chain network id
    #[arg(long)]
    pub network_id: Option<String>,

    /// Host port of the protocol API
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Host port of the messaging server
    #[arg(long)]
    pub nats_port: Option<u16>,

    /// Host port of the messaging websocket listener
    #[arg(long)]
    pub nats_ws_port: Option<u16>,

    /// Host port of the database
    #[arg(long)]
    pub postgres_port: Option<u16>,

    /// Host port of the cache
    #[arg(long)]
    pub redis_port: Option<u16>,

    /// Run the identity service locally
    #[arg(long)]
    pub ident_local: bool,

    /// Run the chain service locally
    #[arg(long)]
    pub nchain_local: bool,

    /// Run the privacy service locally
    #[arg(long)]
    pub privacy_local: bool,

    /// Run the vault service locally
    #[arg(long)]
    pub vault_local: bool,

    /// Expose the protocol API through a tunnel
    #[arg(long)]
    pub expose_api: bool,

    /// Expose the messaging port through a tunnel
    #[arg(long)]
    pub expose_nats: bool,

    /// Expose the messaging websocket port through a tunnel
    #[arg(long)]
    pub expose_nats_ws: bool,

    /// Use local images without pulling
    #[arg(long)]
    pub no_pull: bool,

    /// Prune containers, volumes and network on exit instead of stopping
    #[arg(long)]
    pub prune_on_exit: bool,

    /// Seconds to wait for each infrastructure dependency
    #[arg(long, value_name = "SECS")]
    pub readiness_timeout: Option<u64>,

    /// Skip vault, key and subject account bootstrap
    #[arg(long)]
    pub no_bootstrap: bool,
}

impl StartArgs {
    fn context(&self) -> OrganizationContext {
        let mut context = OrganizationContext::new(&self.organization, &self.workgroup)
            .with_tokens(Config::access_token(), self.refresh_token.clone())
            .with_registry_contract(self.registry_contract.clone())
            .with_network(self.network_id.clone())
            .with_separation_degree(self.separation_degree);
        context.organization_name = self.organization_name.clone();
        context
    }

    /// Flags layered over the persisted defaults.
    fn stack_options(&self, config: &Config, organization: OrganizationContext) -> StackOptions {
        let mut options = StackOptions::new(self.name.clone(), config, organization);

        if let Some(port) = self.api_port {
            options.api.port = port;
        }
        if let Some(port) = self.nats_port {
            options.messaging.port = port;
        }
        if let Some(port) = self.nats_ws_port {
            options.messaging_ws_port = port;
        }
        if let Some(port) = self.postgres_port {
            options.database.endpoint.port = port;
        }
        if let Some(port) = self.redis_port {
            options.cache.port = port;
        }

        options.ident.run_locally = self.ident_local;
        options.nchain.run_locally = self.nchain_local;
        options.privacy.run_locally = self.privacy_local;
        options.vault.run_locally = self.vault_local;

        options.exposure = Exposure {
            api: self.expose_api,
            messaging: self.expose_nats,
            websocket: self.expose_nats_ws,
        };
        options.pull_images = !self.no_pull;
        options.prune_on_exit = self.prune_on_exit;
        if let Some(secs) = self.readiness_timeout {
            options.readiness_timeout = Duration::from_secs(secs);
        }
        options
    }
}

/// Start the stack and run it in the foreground.
pub async fn start(args: StartArgs, config: Config) -> Result<()> {
    let context = Arc::new(args.context());
    let options = args.stack_options(&config, (*context).clone());
    options.validate()?;

    if !args.no_bootstrap && context.access_token.is_none() {
        return Err(anyhow!(
            "BPI_ACCESS_TOKEN must be set to bootstrap the organization (or pass --no-bootstrap)"
        ));
    }
    let tunnel_token = if options.exposure.any() {
        Some(Config::tunnel_token().context("BPI_TUNNEL_TOKEN must be set to expose stack ports")?)
    } else {
        None
    };

    let health = HealthChecker::new();
    let orchestrator = super::orchestrator()?.with_health(health.clone());
    let tunnels = tunnel_token.as_ref().map(|_| {
        let client = BrokerTunnelClient::new(config.tunnel_broker_url.clone());
        Arc::new(TunnelManager::new(Arc::new(client)))
    });
    let coordinator = Arc::new(ShutdownCoordinator::new(stack_cleanup(
        orchestrator.clone(),
        tunnels.clone(),
        options.name.clone(),
        options.prune_on_exit,
    )));
    let mut signals = signal::shutdown_signal();

    println!("{} Starting stack {}", "→".cyan().bold(), options.name.bold());
    let spinner = super::spinner("Pulling images and starting containers...")?;
    let started = interruptible(&mut signals, &coordinator, orchestrator.start(&options)).await;
    spinner.finish_and_clear();

    let instance = match started {
        None => return exit_status(&coordinator),
        Some(Ok(instance)) => instance,
        Some(Err(e)) => return Err(abort(&coordinator, e.into(), "Failed to start stack").await),
    };
    print_containers(&instance);

    if let (Some(manager), Some(token)) = (&tunnels, &tunnel_token) {
        health.register_subsystem("tunnel").await;
        let descriptors = TunnelDescriptor::for_stack(&options, token);
        let on_failure = on_tunnel_failure(Arc::downgrade(&coordinator));

        let spinner = super::spinner("Establishing tunnels...")?;
        let established =
            interruptible(&mut signals, &coordinator, manager.establish(descriptors, on_failure))
                .await;
        spinner.finish_and_clear();

        match established {
            None => return exit_status(&coordinator),
            Some(Ok(endpoints)) => {
                health.update_subsystem("tunnel", HealthStatus::Healthy, None).await;
                for endpoint in endpoints {
                    println!(
                        "  {} {} {}",
                        "↗".cyan(),
                        endpoint.subject.bold(),
                        endpoint.remote_addr
                    );
                }
            }
            Some(Err(e)) => {
                return Err(abort(&coordinator, e.into(), "Failed to establish tunnels").await)
            }
        }
    }

    if !args.no_bootstrap {
        let platform = HttpPlatformClient::new(
            PlatformEndpoints {
                ident: options.ident.host_url(),
                vault: options.vault.host_url(),
                nchain: options.nchain.host_url(),
                api: format!("http://localhost:{}", options.api.port),
            },
            context.access_token.clone(),
        )?;
        let bootstrap = OrganizationBootstrap::new(
            Arc::new(platform),
            Arc::clone(&context),
            BootstrapOptions {
                api_health_timeout: Duration::from_secs(config.api_health_timeout_secs),
                ..Default::default()
            },
        );
        health.register_subsystem("api").await;

        let spinner = super::spinner("Bootstrapping organization...")?;
        let bootstrapped = interruptible(&mut signals, &coordinator, bootstrap.run()).await;
        spinner.finish_and_clear();

        match bootstrapped {
            None => return exit_status(&coordinator),
            Some(Ok(outcome)) => {
                health.update_subsystem("api", HealthStatus::Healthy, None).await;
                print_bootstrap(&outcome);
            }
            Some(Err(e)) if e.is_fatal() => {
                return Err(abort(&coordinator, e.into(), "Organization bootstrap failed").await)
            }
            Some(Err(e)) => {
                health.update_subsystem("api", HealthStatus::Unhealthy, Some(e.to_string())).await;
                warn!(error = %e, "Bootstrap incomplete; stack keeps running");
                println!("{} Bootstrap incomplete: {}", "⚠".yellow().bold(), e);
            }
        }
    }

    println!(
        "{} Stack running: {} {}",
        "✓".green().bold(),
        options.name.bold(),
        "(Ctrl+C to stop)".dimmed()
    );

    let token = coordinator.token();
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = health.get_health().await;
                if report.status == HealthStatus::Healthy {
                    debug!("Liveness tick");
                } else {
                    warn!(status = %report.status, subsystems = ?report.not_healthy(), "Stack not fully healthy");
                }
            }
            received = signals.recv() => {
                coordinator.trigger(received.unwrap_or(signal::SIGINT)).await;
                break;
            }
            _ = token.cancelled() => break,
        }
    }

    exit_status(&coordinator)
}

/// Run a startup phase unless a signal or a tunnel failure ends the process first.
///
/// Returns `None` once shutdown has completed.
async fn interruptible<T>(
    signals: &mut broadcast::Receiver<&'static str>,
    coordinator: &ShutdownCoordinator,
    phase: impl Future<Output = T>,
) -> Option<T> {
    let token = coordinator.token();
    tokio::select! {
        output = phase => Some(output),
        received = signals.recv() => {
            coordinator.trigger(received.unwrap_or(signal::SIGINT)).await;
            None
        }
        _ = token.cancelled() => None,
    }
}

/// Close tunnels after a fatal error and hand the error back. Containers are
/// only removed when the stack was started with prune-on-exit.
async fn abort(coordinator: &ShutdownCoordinator, err: anyhow::Error, what: &str) -> anyhow::Error {
    let err = err.context(what.to_string());
    coordinator.abort(&format!("{:#}", err)).await;
    err
}

/// Exit cleanly after a signal; anything else that shut the stack down is an error.
fn exit_status(coordinator: &ShutdownCoordinator) -> Result<()> {
    match coordinator.reason() {
        Some(reason) if !signal::is_signal(reason) => Err(anyhow!("Stack shut down: {}", reason)),
        _ => {
            println!("{} Stack shut down", "✓".green().bold());
            Ok(())
        }
    }
}

/// Failure callback that triggers shutdown from whichever task observed the failure.
fn on_tunnel_failure(coordinator: Weak<ShutdownCoordinator>) -> FailureCallback {
    Arc::new(move |subject: &str, reason: &str| {
        error!(subject = %subject, reason = %reason, "Tunnel failed");
        let Some(coordinator) = coordinator.upgrade() else {
            return;
        };
        let reason = format!("tunnel {} failed: {}", subject, reason);
        tokio::spawn(async move {
            coordinator.trigger(&reason).await;
        });
    })
}

fn print_containers(instance: &StackInstance) {
    #[derive(Tabled)]
    struct ContainerRow {
        #[tabled(rename = "SERVICE")]
        service: String,
        #[tabled(rename = "CONTAINER")]
        name: String,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "REUSED")]
        reused: String,
    }

    let mut rows: Vec<ContainerRow> = instance
        .containers
        .iter()
        .map(|c| ContainerRow {
            service: c.service.clone(),
            name: c.name.clone(),
            id: c.id[..12.min(c.id.len())].to_string(),
            reused: if c.reused { "yes" } else { "no" }.to_string(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}

fn print_bootstrap(outcome: &BootstrapOutcome) {
    println!("{} Organization bootstrapped", "✓".green().bold());
    println!("  Vault:            {}", outcome.vault.id);
    println!("  Keys:             {}", outcome.keys.keys().cloned().collect::<Vec<_>>().join(", "));
    println!(
        "  Registry:         {}",
        outcome.registry_contract_address.as_deref().unwrap_or("-")
    );
    println!(
        "  Subject account:  {}{}",
        outcome.subject_account.id.to_string().cyan(),
        if outcome.subject_account_created { " (created)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: StartArgs,
    }

    fn parse(extra: &[&str]) -> StartArgs {
        let mut argv = vec!["bpi", "--organization", "org-1", "--workgroup", "wg-1"];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).args
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "--name",
            "acme",
            "--api-port",
            "9080",
            "--vault-local",
            "--expose-api",
            "--no-pull",
            "--readiness-timeout",
            "5",
        ]);
        let options = args.stack_options(&Config::default(), args.context());

        assert_eq!(options.name, "acme");
        assert_eq!(options.api.port, 9080);
        assert!(options.vault.run_locally);
        assert!(!options.ident.run_locally);
        assert!(options.exposure.api && !options.exposure.messaging);
        assert!(!options.pull_images);
        assert_eq!(options.readiness_timeout, Duration::from_secs(5));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_defaults_follow_config() {
        let args = parse(&[]);
        let mut config = Config::default();
        config.readiness_timeout_secs = 7;
        let options = args.stack_options(&config, args.context());

        assert!(options.pull_images);
        assert!(!options.prune_on_exit);
        assert!(!options.exposure.any());
        assert_eq!(options.readiness_timeout, Duration::from_secs(7));
        assert_eq!(options.organization.workgroup_id, "wg-1");
    }

    #[test]
    fn test_participant_context() {
        let args = parse(&["--separation-degree", "1", "--registry-contract", "0xaa"]);
        let context = args.context();
        assert!(!context.is_operator());
        assert_eq!(context.registry_contract_address.as_deref(), Some("0xaa"));
    }
}
