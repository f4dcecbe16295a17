//! Registry statistics

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of one tenant's pooled entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantEntryStats {
    pub tenant_id: Uuid,
    /// Milliseconds since the entry was last used
    pub idle_ms: u64,
    /// Milliseconds since the connection was opened
    pub age_ms: u64,
}

/// Point-in-time view of the registry, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Configured capacity
    pub capacity: usize,
    /// Number of live cached connections
    pub total: usize,
    /// Per-tenant entries, one per live connection
    pub tenants: Vec<TenantEntryStats>,
}

impl RegistryStats {
    /// Fraction of capacity in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.total as f64 / self.capacity as f64
    }

    /// Whether the registry is at capacity
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.total >= self.capacity
    }
}
