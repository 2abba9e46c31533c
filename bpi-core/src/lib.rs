//! BPI Core Library
//!
//! Local stack orchestration and organization bootstrap: container lifecycle,
//! dependency readiness, tunnels with exactly-once shutdown, key provisioning,
//! invitation tokens and deterministic subject accounts.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod invite;
pub mod observability;
pub mod paths;
pub mod platform;
pub mod ports;
pub mod provision;
pub mod readiness;
pub mod runtime;
pub mod shutdown;
pub mod stack;
pub mod subject;
pub mod tunnel;
pub mod types;

// Re-export commonly used items
pub use bootstrap::{BootstrapOptions, BootstrapOutcome, OrganizationBootstrap};
pub use config::Config;
pub use error::{Result, StackError};
pub use invite::{InvitationClaims, InvitationVendor, InvitationVerifier};
pub use observability::{health::HealthChecker, init as init_observability};
pub use platform::{HttpPlatformClient, PlatformApi};
pub use provision::KeyProvisioner;
pub use readiness::{ReadinessGate, TcpProbe};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use shutdown::ShutdownCoordinator;
pub use stack::StackOrchestrator;
pub use subject::SubjectAccountId;
pub use tunnel::{BrokerTunnelClient, TunnelManager};
pub use types::{ContainerHandle, ContainerSpec, OrganizationContext, StackInstance, StackOptions};
