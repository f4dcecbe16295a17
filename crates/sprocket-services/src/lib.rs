//! Sprocket Services - the upward-facing API
//!
//! The service layer orchestrates the domain crates and is what an HTTP
//! or CLI layer calls. It owns composition: [`Services::build`] wires the
//! production SQL Server stack (tiberius connector, MSSQL error parser,
//! temp-compile validator, publish pipeline, execution engine) around a
//! caller-supplied tenant config provider and activity recorder.
//!
//! Services return domain results and typed errors only; no raw vendor
//! error text leaves this layer unparsed.

mod connection_service;
mod procedure_service;

#[cfg(test)]
mod tests;

pub use connection_service::{ConnectionService, ConnectionTestReport};
pub use procedure_service::ProcedureService;

use std::path::PathBuf;
use std::sync::Arc;

use sprocket_connection::{RegistryConfig, TenantRegistry, spawn_sweeper};
use sprocket_core::{ActivityRecorder, Result, TenantConfigProvider};
use sprocket_execute::ExecutionEngine;
use sprocket_mssql::MssqlConnector;
use sprocket_publish::ProcedurePublisher;
use sprocket_store::{MetadataStorage, ProcedureStore, VersionStore};
use sprocket_validate::{MssqlErrorParser, TempCompileValidator};

/// Composition options for [`Services::build`]
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path of the engine's own SQLite metadata database
    pub metadata_db: PathBuf,
    /// Tenant connection registry settings
    pub registry: RegistryConfig,
    /// Result row cap for execution responses
    pub row_cap: Option<usize>,
}

/// The assembled engine: one value an outer layer holds on to.
pub struct Services {
    pub procedures: ProcedureService,
    pub connections: ConnectionService,
    registry: Arc<TenantRegistry>,
}

impl Services {
    /// Wire the production stack.
    pub fn build(
        config: ServiceConfig,
        provider: Arc<dyn TenantConfigProvider>,
        activity: Arc<dyn ActivityRecorder>,
    ) -> Result<Self> {
        let storage = Arc::new(MetadataStorage::new(config.metadata_db)?);
        let procedure_store = ProcedureStore::new(storage.clone());
        let version_store = VersionStore::new(storage);

        let registry = Arc::new(TenantRegistry::new(
            config.registry,
            provider,
            Arc::new(MssqlConnector::new()),
        ));

        let parser = Arc::new(MssqlErrorParser::new());
        let validator = Arc::new(TempCompileValidator::new(registry.clone(), parser.clone()));

        let publisher = Arc::new(ProcedurePublisher::new(
            registry.clone(),
            validator.clone(),
            parser.clone(),
            procedure_store.clone(),
            version_store.clone(),
            activity.clone(),
        ));

        let mut engine = ExecutionEngine::new(
            registry.clone(),
            procedure_store.clone(),
            parser,
            activity.clone(),
        );
        if let Some(row_cap) = config.row_cap {
            engine = engine.with_row_cap(row_cap);
        }

        let procedures = ProcedureService::new(
            procedure_store,
            version_store,
            validator,
            publisher,
            Arc::new(engine),
            activity,
        );
        let connections = ConnectionService::new(registry.clone());

        Ok(Self {
            procedures,
            connections,
            registry,
        })
    }

    /// Start the registry's background sweep; returns its task handle.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        spawn_sweeper(self.registry.clone())
    }
}
