//! Registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the tenant connection registry.
///
/// Controls global capacity, idle eviction, the sweep cadence and the
/// health-check budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of live tenant connections cached at once
    capacity: usize,
    /// Idle time in milliseconds before the sweep evicts an entry;
    /// on-demand cleanup uses half this value
    idle_timeout_ms: u64,
    /// Interval in milliseconds between background sweeps
    sweep_interval_ms: u64,
    /// Timeout in milliseconds for the health-check round trip
    ping_timeout_ms: u64,
}

impl RegistryConfig {
    /// Create a configuration with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            capacity,
            idle_timeout_ms: 600_000, // 10 minutes
            sweep_interval_ms: 60_000,
            ping_timeout_ms: 5_000,
        }
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the sweep interval in milliseconds
    pub fn with_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = interval_ms;
        self
    }

    /// Set the health-check timeout in milliseconds
    pub fn with_ping_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ping_timeout_ms = timeout_ms;
        self
    }

    /// Get the capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Idle threshold for on-demand cleanup (half the idle timeout)
    pub fn cleanup_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms / 2)
    }

    /// Get the sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Get the ping timeout as a Duration
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for RegistryConfig {
    /// Defaults: capacity 32, idle timeout 10 minutes, sweep every minute,
    /// ping timeout 5 seconds.
    fn default() -> Self {
        Self::new(32)
    }
}
