//! Core domain types.

pub mod container;
pub mod organization;
pub mod stack;

// Re-exports
pub use container::{ContainerHandle, ContainerSpec, Dependency, HealthCheck, PortMapping, Protocol, ServiceRole};
pub use organization::{
    ConsentKind, ConsentRecord, OrganizationContext, OrganizationMetadata, WorkgroupMetadata,
};
pub use stack::{
    DatabaseOptions, Exposure, PlatformServiceOptions, ServiceEndpoint, StackInstance,
    StackOptions,
};
