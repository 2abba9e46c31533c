use anyhow::Result;
use bpi_core::Config;
use clap::{Args, Parser, Subcommand};

mod commands;
mod signal;

/// Stack name used when `--name` is not given.
const DEFAULT_STACK: &str = "bpi";

#[derive(Parser)]
#[command(name = "bpi")]
#[command(about = "Run a local BPI stack and bootstrap its organization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StackName {
    /// Stack name (network name and container prefix)
    #[arg(short, long, default_value = DEFAULT_STACK, env = "BPI_STACK")]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the stack and keep it running until interrupted
    Start(commands::start::StartArgs),

    /// Stop the stack's containers, keeping containers and volumes
    Stop {
        #[command(flatten)]
        stack: StackName,
    },

    /// Remove the stack's containers
    Prune {
        #[command(flatten)]
        stack: StackName,

        /// Also remove anonymous volumes and the stack network
        #[arg(long)]
        volumes: bool,
    },

    /// Show logs from every container in the stack
    Logs {
        #[command(flatten)]
        stack: StackName,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show from the end of each container's logs
        #[arg(long)]
        tail: Option<u32>,
    },

    /// List the stack's containers
    Ps {
        #[command(flatten)]
        stack: StackName,
    },

    /// Sign an invitation to join a workgroup and deliver it
    Invite(commands::invite::InviteArgs),

    /// Verify an invitation received from another organization
    Accept(commands::accept::AcceptArgs),

    /// Print the deterministic subject account id of an organization in a workgroup
    SubjectAccount {
        /// Organization id
        #[arg(short, long, env = "BPI_ORGANIZATION_ID")]
        organization: String,

        /// Workgroup id
        #[arg(short, long, env = "BPI_WORKGROUP_ID")]
        workgroup: String,

        /// Expected id to check against the derived one
        #[arg(long)]
        check: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = bpi_core::init_observability(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli, config).await {
        tracing::error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Start(args) => commands::start::start(args, config).await?,

        Commands::Stop { stack } => commands::stop::stop(&stack.name).await?,

        Commands::Prune { stack, volumes } => commands::prune::prune(&stack.name, volumes).await?,

        Commands::Logs { stack, follow, tail } => {
            commands::logs::logs(&stack.name, follow, tail).await?;
        }

        Commands::Ps { stack } => commands::ps::ps(&stack.name).await?,

        Commands::Invite(args) => commands::invite::invite(args, config).await?,

        Commands::Accept(args) => commands::accept::accept(args)?,

        Commands::SubjectAccount { organization, workgroup, check } => {
            commands::subject_account::subject_account(&organization, &workgroup, check.as_deref())?;
        }
    }

    Ok(())
}
