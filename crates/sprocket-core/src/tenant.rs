//! Tenant connection configuration

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Health status of a tenant's stored connection config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealth {
    /// Never tested
    #[default]
    Unknown,
    /// Last test succeeded
    Connected,
    /// Last test failed
    Failed,
}

/// Connection configuration for one tenant's external database.
///
/// Owned by the tenant; the core consumes it read-only.
#[derive(Clone, Serialize, Deserialize)]
pub struct TenantConnectionConfig {
    /// Host address
    pub host: String,
    /// Port number (1433 when zero)
    pub port: u16,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Database name
    pub database: String,
    /// Timeout for opening a connection, in milliseconds
    pub connect_timeout_ms: u64,
    /// Whether to require transport encryption
    pub encrypt: bool,
    /// Result of the most recent test
    #[serde(default)]
    pub status: ConnectionHealth,
    /// When the config was last tested
    #[serde(default)]
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl TenantConnectionConfig {
    /// Create a config with default timeout and encryption settings
    pub fn new(host: &str, port: u16, database: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            database: database.to_string(),
            connect_timeout_ms: 15_000,
            encrypt: true,
            status: ConnectionHealth::Unknown,
            last_tested_at: None,
        }
    }

    /// Effective port, defaulting to 1433
    pub fn effective_port(&self) -> u16 {
        if self.port > 0 { self.port } else { 1433 }
    }
}

// Manual Debug so the password never reaches a log line.
impl std::fmt::Debug for TenantConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("encrypt", &self.encrypt)
            .field("status", &self.status)
            .finish()
    }
}

/// Resolves a tenant id to its stored connection config.
///
/// Implemented outside the core (the workspace CRUD layer); the registry
/// calls it whenever it needs to open a fresh connection.
#[async_trait]
pub trait TenantConfigProvider: Send + Sync {
    /// Fetch the config for a tenant, or `NotFound`
    async fn fetch(&self, tenant_id: Uuid) -> Result<TenantConnectionConfig>;
}
