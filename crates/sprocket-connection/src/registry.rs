//! Tenant connection registry implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use sprocket_core::{
    Connection, Connector, Result, SprocketError, TenantConfigProvider, TenantConnectionConfig,
};
use uuid::Uuid;

use crate::config::RegistryConfig;
use crate::stats::{RegistryStats, TenantEntryStats};

const PING_QUERY: &str = "SELECT 1";

/// One cached connection with usage metadata
struct PooledEntry {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_used_at: Instant,
    active: bool,
}

impl PooledEntry {
    fn new(connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used_at: now,
            active: true,
        }
    }
}

/// Per-tenant slot. The async gate serializes lookups and creation for
/// one tenant; the entry mutex protects the cached handle and is never
/// held across an await.
struct TenantSlot {
    gate: tokio::sync::Mutex<()>,
    entry: Mutex<Option<PooledEntry>>,
}

impl TenantSlot {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            entry: Mutex::new(None),
        }
    }
}

/// Registry of live tenant database connections.
///
/// One health-checked connection per tenant, bounded by a global
/// capacity. Callers receive a shared handle; the entry stays cached
/// across requests until the idle timeout, a health failure, or an
/// explicit refresh evicts it.
pub struct TenantRegistry {
    config: RegistryConfig,
    provider: Arc<dyn TenantConfigProvider>,
    connector: Arc<dyn Connector>,
    slots: RwLock<HashMap<Uuid, Arc<TenantSlot>>>,
}

impl TenantRegistry {
    /// Create a registry over the given config provider and connector
    pub fn new(
        config: RegistryConfig,
        provider: Arc<dyn TenantConfigProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            provider,
            connector,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn slot(&self, tenant_id: Uuid) -> Arc<TenantSlot> {
        if let Some(slot) = self.slots.read().get(&tenant_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(TenantSlot::new()))
            .clone()
    }

    /// Get a live connection for a tenant.
    ///
    /// Reuses the cached handle when it is active and answers a
    /// round-trip health check; otherwise evicts it and opens a fresh
    /// connection from the tenant's stored config. When the registry is
    /// at capacity, idle entries are cleaned up first; if that frees
    /// nothing the call fails with `ResourceExhausted`.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn get(&self, tenant_id: Uuid) -> Result<Arc<dyn Connection>> {
        let slot = self.slot(tenant_id);
        let _gate = slot.gate.lock().await;

        // Reuse path: the entry must still be active and answer a ping.
        let cached = {
            let entry = slot.entry.lock();
            entry
                .as_ref()
                .filter(|e| e.active && !e.connection.is_closed())
                .map(|e| e.connection.clone())
        };

        if let Some(conn) = cached {
            if self.ping(&conn).await.is_ok() {
                if let Some(entry) = slot.entry.lock().as_mut() {
                    entry.last_used_at = Instant::now();
                }
                tracing::debug!("reusing cached connection");
                return Ok(conn);
            }
            tracing::debug!("cached connection failed health check, evicting");
            Self::evict_slot(&slot).await;
        } else if slot.entry.lock().is_some() {
            // Entry exists but is inactive or closed.
            Self::evict_slot(&slot).await;
        }

        // Creation path: respect global capacity before opening.
        if self.live_count() >= self.config.capacity() {
            self.cleanup_idle().await;
            if self.live_count() >= self.config.capacity() {
                tracing::warn!(
                    capacity = self.config.capacity(),
                    "connection registry at capacity"
                );
                return Err(SprocketError::ResourceExhausted(format!(
                    "connection registry at capacity ({}) for tenant {}",
                    self.config.capacity(),
                    tenant_id
                )));
            }
        }

        let tenant_config = self.provider.fetch(tenant_id).await?;
        let conn = self.connector.connect(tenant_id, &tenant_config).await?;

        // Health-check before caching; a failed open is never cached.
        if let Err(e) = self.ping(&conn).await {
            let _ = conn.close().await;
            return Err(SprocketError::connection(
                tenant_id,
                format!("health check after connect failed: {e}"),
            ));
        }

        *slot.entry.lock() = Some(PooledEntry::new(conn.clone()));
        tracing::info!("opened new tenant connection");
        Ok(conn)
    }

    /// Test a connection config without touching the registry.
    ///
    /// Opens a throwaway handle, runs one round trip, and always tears
    /// the handle down. Returns the round-trip latency.
    #[tracing::instrument(skip(self, config), fields(tenant_id = %tenant_id, host = %config.host))]
    pub async fn test_config(
        &self,
        tenant_id: Uuid,
        config: &TenantConnectionConfig,
    ) -> Result<Duration> {
        let conn = self.connector.connect(tenant_id, config).await?;
        let outcome = self.ping(&conn).await;
        let _ = conn.close().await;
        outcome.map_err(|e| SprocketError::connection(tenant_id, e.to_string()))
    }

    /// Evict then recreate a tenant's connection
    pub async fn refresh(&self, tenant_id: Uuid) -> Result<Arc<dyn Connection>> {
        self.evict(tenant_id).await;
        self.get(tenant_id).await
    }

    /// Drop a tenant's cached connection, if any. Returns whether an
    /// entry was removed.
    pub async fn evict(&self, tenant_id: Uuid) -> bool {
        let slot = {
            let slots = self.slots.read();
            slots.get(&tenant_id).cloned()
        };
        match slot {
            Some(slot) => Self::evict_slot(&slot).await,
            None => false,
        }
    }

    async fn evict_slot(slot: &TenantSlot) -> bool {
        let taken = {
            let mut entry = slot.entry.lock();
            if let Some(e) = entry.as_mut() {
                e.active = false;
            }
            entry.take()
        };
        match taken {
            Some(e) => {
                let _ = e.connection.close().await;
                true
            }
            None => false,
        }
    }

    /// Evict entries idle beyond half the idle timeout, oldest first.
    ///
    /// Runs when the registry is at capacity and before failing a new
    /// connection request. Never surfaces errors.
    pub async fn cleanup_idle(&self) {
        let threshold = self.config.cleanup_threshold();
        let mut candidates: Vec<(Duration, Arc<TenantSlot>)> = {
            let slots = self.slots.read();
            slots
                .values()
                .filter_map(|slot| {
                    let entry = slot.entry.lock();
                    entry
                        .as_ref()
                        .map(|e| e.last_used_at.elapsed())
                        .filter(|idle| *idle > threshold)
                        .map(|idle| (idle, slot.clone()))
                })
                .collect()
        };
        // Oldest (most idle) first.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut evicted = 0usize;
        for (_, slot) in candidates {
            if Self::evict_slot(&slot).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "idle cleanup evicted connections");
        }
    }

    /// One pass of the background sweep: evict entries idle beyond the
    /// full idle timeout, and entries that fail a health check.
    pub async fn sweep_once(&self) {
        let snapshot: Vec<(Uuid, Arc<TenantSlot>)> = {
            let slots = self.slots.read();
            slots.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        for (tenant_id, slot) in snapshot {
            let (idle, conn) = {
                let entry = slot.entry.lock();
                match entry.as_ref() {
                    Some(e) => (e.last_used_at.elapsed(), e.connection.clone()),
                    None => continue,
                }
            };

            if idle > self.config.idle_timeout() {
                tracing::debug!(tenant_id = %tenant_id, idle_ms = idle.as_millis() as u64, "sweep evicting idle connection");
                Self::evict_slot(&slot).await;
                continue;
            }

            if self.ping(&conn).await.is_err() {
                tracing::debug!(tenant_id = %tenant_id, "sweep evicting unhealthy connection");
                Self::evict_slot(&slot).await;
            }
        }
    }

    /// Current registry statistics
    pub fn stats(&self) -> RegistryStats {
        let slots = self.slots.read();
        let tenants: Vec<TenantEntryStats> = slots
            .iter()
            .filter_map(|(tenant_id, slot)| {
                let entry = slot.entry.lock();
                entry.as_ref().map(|e| TenantEntryStats {
                    tenant_id: *tenant_id,
                    idle_ms: e.last_used_at.elapsed().as_millis() as u64,
                    age_ms: e.created_at.elapsed().as_millis() as u64,
                })
            })
            .collect();
        RegistryStats {
            capacity: self.config.capacity(),
            total: tenants.len(),
            tenants,
        }
    }

    fn live_count(&self) -> usize {
        let slots = self.slots.read();
        slots
            .values()
            .filter(|slot| slot.entry.lock().is_some())
            .count()
    }

    /// Lightweight round-trip health check with a bounded wait
    async fn ping(&self, conn: &Arc<dyn Connection>) -> Result<Duration> {
        if conn.is_closed() {
            return Err(SprocketError::Timeout("connection closed".to_string()));
        }
        let start = Instant::now();
        match tokio::time::timeout(self.config.ping_timeout(), conn.query(PING_QUERY, &[])).await {
            Ok(Ok(_)) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SprocketError::Timeout(format!(
                "health check exceeded {:?}",
                self.config.ping_timeout()
            ))),
        }
    }
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("capacity", &self.config.capacity())
            .field("live", &self.live_count())
            .finish()
    }
}
