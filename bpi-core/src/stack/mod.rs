//! Stack composition and lifecycle.

pub mod catalog;
mod orchestrator;

pub use catalog::ServiceCatalog;
pub use orchestrator::{StackOrchestrator, STOP_TIMEOUT};
