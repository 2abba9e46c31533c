//! Error types for the local stack.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for stack operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for the local stack.
#[derive(Error, Debug)]
pub enum StackError {
    // Container runtime errors
    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Failed to start container {name}: {reason}")]
    ContainerStartFailed { name: String, reason: String },

    #[error("Failed to stop container {name}: {reason}")]
    ContainerStopFailed { name: String, reason: String },

    #[error("Network setup failed for {name}: {reason}")]
    NetworkSetupFailed { name: String, reason: String },

    // Readiness errors
    #[error("Dependency {name} at {addr} unreachable after {waited:?}")]
    DependencyUnreachable { name: String, addr: String, waited: Duration },

    #[error("API at {endpoint} not healthy after {waited:?}")]
    ApiUnhealthy { endpoint: String, waited: Duration },

    // Tunnel errors
    #[error("Tunnel address assignment timed out after {waited:?} (pending: {pending})")]
    TunnelTimeout { pending: String, waited: Duration },

    #[error("Tunnel {subject} failed: {reason}")]
    TunnelFailed { subject: String, reason: String },

    // Remote platform errors
    #[error("Platform request {operation} failed{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    PlatformRequest { operation: String, status: Option<u16>, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Registry contract for workgroup {workgroup_id} not visible after {waited:?}")]
    ContractNotDeployed { workgroup_id: String, waited: Duration },

    // Signing and token errors
    #[error("Signing failed: {reason}")]
    SigningFailed { reason: String },

    #[error("Invalid public key: {reason}")]
    InvalidPublicKey { reason: String },

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Shorthand for a failed remote platform call.
    pub fn platform(operation: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::PlatformRequest { operation: operation.to_string(), status, message: message.into() }
    }

    /// Whether this error means the local environment is unusable.
    ///
    /// Fatal errors are logged and end the process with exit code 1. Everything
    /// else is surfaced to the caller, which may have a fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StackError::RuntimeUnavailable { .. }
                | StackError::ImagePullFailed { .. }
                | StackError::ContainerStartFailed { .. }
                | StackError::NetworkSetupFailed { .. }
                | StackError::DependencyUnreachable { .. }
                | StackError::TunnelTimeout { .. }
                | StackError::TunnelFailed { .. }
                | StackError::SigningFailed { .. }
                | StackError::InvalidPublicKey { .. }
        )
    }

    /// Whether this error is a not-found answer rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StackError::NotFound { .. })
            || matches!(self, StackError::PlatformRequest { status: Some(404), .. })
    }
}
