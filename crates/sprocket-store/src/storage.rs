//! SQLite persistence layer

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sprocket_core::{Procedure, ProcedureStatus, ProcedureVersion, SprocketError, VersionSource};
use std::path::PathBuf;
use uuid::Uuid;

use sprocket_core::Result;

pub(crate) fn db_err(e: rusqlite::Error) -> SprocketError {
    SprocketError::Storage(e.to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SprocketError::Storage(format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SprocketError::Storage(format!("bad uuid '{raw}': {e}")))
}

/// Storage for procedure metadata using SQLite.
///
/// Opens a short-lived connection per operation; the database file is the
/// unit of sharing between [`crate::ProcedureStore`] and
/// [`crate::VersionStore`].
pub struct MetadataStorage {
    db_path: PathBuf,
}

impl MetadataStorage {
    /// Create storage at the given path, initializing the schema
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let storage = Self { db_path };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(db_err)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS procedures (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                sql_draft TEXT NOT NULL,
                sql_published TEXT,
                published_at TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(tenant_id, name)
            )",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_procedures_tenant
             ON procedures(tenant_id)",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS procedure_versions (
                id TEXT PRIMARY KEY,
                procedure_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                sql_text TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(procedure_id, version)
            )",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_versions_procedure
             ON procedure_versions(procedure_id, source)",
            [],
        )
        .map_err(db_err)?;

        Ok(())
    }
}

pub(crate) const PROCEDURE_COLUMNS: &str = "id, tenant_id, name, status, sql_draft, \
     sql_published, published_at, created_by, created_at, updated_at";

pub(crate) fn row_to_procedure(row: &rusqlite::Row<'_>) -> Result<Procedure> {
    let id: String = row.get(0).map_err(db_err)?;
    let tenant_id: String = row.get(1).map_err(db_err)?;
    let status: String = row.get(3).map_err(db_err)?;
    let published_at: Option<String> = row.get(6).map_err(db_err)?;
    let created_at: String = row.get(8).map_err(db_err)?;
    let updated_at: String = row.get(9).map_err(db_err)?;

    Ok(Procedure {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        name: row.get(2).map_err(db_err)?,
        status: ProcedureStatus::parse(&status)
            .ok_or_else(|| SprocketError::Storage(format!("bad status '{status}'")))?,
        sql_draft: row.get(4).map_err(db_err)?,
        sql_published: row.get(5).map_err(db_err)?,
        published_at: published_at.as_deref().map(parse_timestamp).transpose()?,
        created_by: row.get(7).map_err(db_err)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(crate) const VERSION_COLUMNS: &str =
    "id, procedure_id, tenant_id, version, source, name, sql_text, created_by, created_at";

pub(crate) fn row_to_version(row: &rusqlite::Row<'_>) -> Result<ProcedureVersion> {
    let id: String = row.get(0).map_err(db_err)?;
    let procedure_id: String = row.get(1).map_err(db_err)?;
    let tenant_id: String = row.get(2).map_err(db_err)?;
    let source: String = row.get(4).map_err(db_err)?;
    let created_at: String = row.get(8).map_err(db_err)?;

    Ok(ProcedureVersion {
        id: parse_uuid(&id)?,
        procedure_id: parse_uuid(&procedure_id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        version: row.get(3).map_err(db_err)?,
        source: VersionSource::parse(&source)
            .ok_or_else(|| SprocketError::Storage(format!("bad source '{source}'")))?,
        name: row.get(5).map_err(db_err)?,
        sql_text: row.get(6).map_err(db_err)?,
        created_by: row.get(7).map_err(db_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

impl std::fmt::Debug for MetadataStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStorage")
            .field("db_path", &self.db_path)
            .finish()
    }
}
