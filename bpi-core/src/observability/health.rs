//! Health of the pieces a running stack depends on.
//!
//! Subsystems are the three infrastructure dependencies plus, when used, the
//! tunnels and the protocol API. Each starts `Pending` and moves to `Healthy`
//! or `Unhealthy` as startup progresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Pending,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Pending => write!(f, "pending"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,

    /// When the subsystem entered its current status
    pub since: DateTime<Utc>,
}

/// Point-in-time view of every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across subsystems: unhealthy, then pending, then healthy
    pub status: HealthStatus,
    pub subsystems: Vec<SubsystemHealth>,
}

impl HealthReport {
    /// Names of subsystems not yet healthy.
    pub fn not_healthy(&self) -> Vec<&str> {
        self.subsystems
            .iter()
            .filter(|s| s.status != HealthStatus::Healthy)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Shared, cloneable subsystem tracker.
#[derive(Clone, Default)]
pub struct HealthChecker {
    subsystems: Arc<RwLock<BTreeMap<String, SubsystemHealth>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a subsystem as `Pending`. Re-registering keeps its state.
    pub async fn register_subsystem(&self, name: impl Into<String>) {
        let name = name.into();
        self.subsystems.write().await.entry(name.clone()).or_insert_with(|| SubsystemHealth {
            name,
            status: HealthStatus::Pending,
            message: None,
            since: Utc::now(),
        });
    }

    /// Record a subsystem's status. Unregistered names are ignored.
    pub async fn update_subsystem(&self, name: &str, status: HealthStatus, message: Option<String>) {
        if let Some(subsystem) = self.subsystems.write().await.get_mut(name) {
            if subsystem.status != status {
                subsystem.since = Utc::now();
            }
            subsystem.status = status;
            subsystem.message = message;
        }
    }

    pub async fn get_health(&self) -> HealthReport {
        let subsystems: Vec<_> = self.subsystems.read().await.values().cloned().collect();

        let status = if subsystems.iter().any(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if subsystems.iter().any(|s| s.status == HealthStatus::Pending) {
            HealthStatus::Pending
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, subsystems }
    }

    pub async fn is_ready(&self) -> bool {
        self.get_health().await.status == HealthStatus::Healthy
    }
}
