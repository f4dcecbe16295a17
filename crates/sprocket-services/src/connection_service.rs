//! Connection diagnostics service

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sprocket_connection::{RegistryStats, TenantRegistry};
use sprocket_core::{Result, TenantConnectionConfig};
use uuid::Uuid;

/// Result of testing a connection config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestReport {
    pub success: bool,
    /// Round-trip latency when the test succeeded
    pub latency_ms: Option<u64>,
    /// Failure detail when it did not
    pub error: Option<String>,
}

/// Connection lifecycle operations for the outer layer
pub struct ConnectionService {
    registry: Arc<TenantRegistry>,
}

impl ConnectionService {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self { registry }
    }

    /// Test a (possibly unsaved) connection config with a throwaway
    /// handle. Never touches the registry's cached entries.
    #[tracing::instrument(skip(self, config), fields(tenant_id = %tenant_id))]
    pub async fn test_connection(
        &self,
        tenant_id: Uuid,
        config: &TenantConnectionConfig,
    ) -> ConnectionTestReport {
        match self.registry.test_config(tenant_id, config).await {
            Ok(latency) => ConnectionTestReport {
                success: true,
                latency_ms: Some(latency.as_millis() as u64),
                error: None,
            },
            Err(e) => ConnectionTestReport {
                success: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Drop and reopen a tenant's pooled connection (e.g. after a config
    /// change)
    pub async fn refresh_connection(&self, tenant_id: Uuid) -> Result<()> {
        self.registry.refresh(tenant_id).await.map(|_| ())
    }

    /// Drop a tenant's pooled connection without reopening
    pub async fn evict_connection(&self, tenant_id: Uuid) -> bool {
        self.registry.evict(tenant_id).await
    }

    /// Registry diagnostics
    pub fn connection_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
