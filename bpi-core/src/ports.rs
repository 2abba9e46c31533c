//! Default host ports for the local stack.
//!
//! Infrastructure dependencies keep their conventional ports so existing
//! client tooling (psql, redis-cli, nats) works against the stack unchanged.

// ============================================================================
// Protocol API
// ============================================================================

/// Protocol API HTTP port
pub const PORT_API: u16 = 8080;

// ============================================================================
// Infrastructure
// ============================================================================

/// Message broker client port
pub const PORT_MESSAGING: u16 = 4222;

/// Message broker websocket port
pub const PORT_MESSAGING_WS: u16 = 4221;

/// Message broker monitoring endpoint, container-internal only
pub const PORT_MESSAGING_MONITOR: u16 = 8222;

/// Relational database
pub const PORT_DATABASE: u16 = 5432;

/// Cache
pub const PORT_CACHE: u16 = 6379;

// ============================================================================
// Optional local platform services
// ============================================================================

/// Identity service
pub const PORT_IDENT: u16 = 8081;

/// Chain service
pub const PORT_NCHAIN: u16 = 8082;

/// Vault service
pub const PORT_VAULT: u16 = 8083;

/// Privacy service
pub const PORT_PRIVACY: u16 = 8084;

/// Port every platform service listens on inside its container
pub const PORT_CONTAINER_HTTP: u16 = 8080;
