//! Background sweep task

use std::sync::Arc;

use crate::registry::TenantRegistry;

/// Spawn the background sweep for a registry.
///
/// Runs [`TenantRegistry::sweep_once`] on the configured interval until
/// the returned handle is aborted. The sweep works on a point-in-time
/// snapshot; racing lookups are safe because reuse re-checks health.
pub fn spawn_sweeper(registry: Arc<TenantRegistry>) -> tokio::task::JoinHandle<()> {
    let interval = registry.config().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a freshly started
        // registry is not swept before it has any entries.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep_once().await;
        }
    })
}
