//! Activity/audit event recording

use async_trait::async_trait;
use uuid::Uuid;

/// Records audit events for tenant-visible operations.
///
/// Persistence lives outside the core; the engine only emits. Recorders
/// must not fail the calling operation, so the trait returns nothing.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    /// Record one event. `metadata` is already redacted by the caller.
    async fn record(
        &self,
        actor_id: &str,
        event_type: &str,
        message: &str,
        tenant_id: Uuid,
        metadata: serde_json::Value,
    );
}

/// Default recorder that forwards events to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingRecorder;

#[async_trait]
impl ActivityRecorder for TracingRecorder {
    async fn record(
        &self,
        actor_id: &str,
        event_type: &str,
        message: &str,
        tenant_id: Uuid,
        metadata: serde_json::Value,
    ) {
        tracing::info!(
            actor_id = %actor_id,
            event_type = %event_type,
            tenant_id = %tenant_id,
            metadata = %metadata,
            "{message}"
        );
    }
}
