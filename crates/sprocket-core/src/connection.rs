//! Connection, connector and catalog traits

use crate::{QueryResult, Result, TenantConnectionConfig, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A live connection to a tenant's database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mssql")
    fn driver_name(&self) -> &str;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement that modifies data, returning rows affected
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a multi-statement batch without parameters.
    ///
    /// DDL such as `CREATE PROCEDURE` must lead its own batch, so this is
    /// the entry point for temp-compile validation and deployment.
    async fn batch(&self, sql: &str) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get the routine catalog interface if the driver supports it
    fn as_catalog(&self) -> Option<&dyn CatalogIntrospection> {
        None
    }
}

/// Routine catalog lookups against the target engine.
///
/// Used by the publish pipeline's verify stage and by unpublish to make
/// the drop idempotent.
#[async_trait]
pub trait CatalogIntrospection: Send + Sync {
    /// Whether a stored procedure with this name exists
    async fn routine_exists(&self, name: &str) -> Result<bool>;

    /// The engine's stored object definition, if the routine exists
    async fn routine_definition(&self, name: &str) -> Result<Option<String>>;
}

/// Opens connections from a tenant connection config.
///
/// The registry only ever talks to this trait, so tests and alternate
/// target engines can substitute their own implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and return a live connection.
    ///
    /// `tenant_id` is only for error attribution and logging; the target
    /// address comes entirely from `config`.
    async fn connect(
        &self,
        tenant_id: uuid::Uuid,
        config: &TenantConnectionConfig,
    ) -> Result<Arc<dyn Connection>>;
}
