//! Immutable version snapshot persistence

use chrono::Utc;
use rusqlite::params;
use sprocket_core::{ProcedureVersion, Result, SprocketError, VersionSource};
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::{MetadataStorage, VERSION_COLUMNS, db_err, row_to_version};

// How often to retry when a concurrent writer wins the version number.
const CREATE_RETRIES: usize = 3;

/// Immutable, monotonically numbered snapshots per procedure.
///
/// Version numbers are assigned inside a transaction and defended by a
/// UNIQUE(procedure_id, version) constraint; losing a race means a
/// bounded retry with a fresh number, never a duplicate.
#[derive(Debug, Clone)]
pub struct VersionStore {
    storage: Arc<MetadataStorage>,
}

impl VersionStore {
    pub fn new(storage: Arc<MetadataStorage>) -> Self {
        Self { storage }
    }

    /// Snapshot a procedure's SQL, assigning the next version number
    /// (starting at 1).
    pub fn create_version(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        name: &str,
        sql_text: &str,
        source: VersionSource,
        created_by: &str,
    ) -> Result<ProcedureVersion> {
        let mut last_err: Option<SprocketError> = None;

        for _ in 0..CREATE_RETRIES {
            match self.try_create(procedure_id, tenant_id, name, sql_text, source, created_by) {
                Ok(version) => return Ok(version),
                Err(retryable) if retryable.is_conflict => {
                    tracing::debug!(
                        procedure_id = %procedure_id,
                        "version number taken by concurrent writer, retrying"
                    );
                    last_err = Some(retryable.error);
                }
                Err(fatal) => return Err(fatal.error),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            SprocketError::Storage("version creation retries exhausted".to_string())
        }))
    }

    fn try_create(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        name: &str,
        sql_text: &str,
        source: VersionSource,
        created_by: &str,
    ) -> std::result::Result<ProcedureVersion, TryCreateError> {
        let mut conn = self.storage.connect().map_err(TryCreateError::fatal)?;
        let tx = conn
            .transaction()
            .map_err(|e| TryCreateError::fatal(db_err(e)))?;

        let max: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM procedure_versions WHERE procedure_id = ?1",
                params![procedure_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| TryCreateError::fatal(db_err(e)))?;

        let entry = ProcedureVersion {
            id: Uuid::new_v4(),
            procedure_id,
            tenant_id,
            version: max + 1,
            source,
            name: name.to_string(),
            sql_text: sql_text.to_string(),
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };

        let insert = tx.execute(
            &format!(
                "INSERT INTO procedure_versions ({VERSION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                entry.id.to_string(),
                entry.procedure_id.to_string(),
                entry.tenant_id.to_string(),
                entry.version,
                entry.source.as_str(),
                entry.name,
                entry.sql_text,
                entry.created_by,
                entry.created_at.to_rfc3339(),
            ],
        );

        match insert {
            Ok(_) => {
                tx.commit().map_err(|e| TryCreateError::fatal(db_err(e)))?;
                Ok(entry)
            }
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(TryCreateError {
                    is_conflict: true,
                    error: SprocketError::Storage(
                        msg.unwrap_or_else(|| "version number conflict".to_string()),
                    ),
                })
            }
            Err(e) => Err(TryCreateError::fatal(db_err(e))),
        }
    }

    /// List Published snapshots for a procedure, newest first.
    ///
    /// Draft-sourced snapshots are internal and never listed.
    pub fn list_versions(&self, procedure_id: Uuid, tenant_id: Uuid) -> Result<Vec<ProcedureVersion>> {
        let conn = self.storage.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM procedure_versions
                 WHERE procedure_id = ?1 AND tenant_id = ?2 AND source = ?3
                 ORDER BY version DESC"
            ))
            .map_err(db_err)?;

        let mut rows = stmt
            .query(params![
                procedure_id.to_string(),
                tenant_id.to_string(),
                VersionSource::Published.as_str(),
            ])
            .map_err(db_err)?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            versions.push(row_to_version(row)?);
        }
        Ok(versions)
    }

    /// Fetch one snapshot by its version number (any source)
    pub fn get_version(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        version: i64,
    ) -> Result<ProcedureVersion> {
        let conn = self.storage.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM procedure_versions
                 WHERE procedure_id = ?1 AND tenant_id = ?2 AND version = ?3"
            ))
            .map_err(db_err)?;

        let mut rows = stmt
            .query(params![
                procedure_id.to_string(),
                tenant_id.to_string(),
                version,
            ])
            .map_err(db_err)?;

        match rows.next().map_err(db_err)? {
            Some(row) => row_to_version(row),
            None => Err(SprocketError::NotFound(format!(
                "version {version} of procedure {procedure_id}"
            ))),
        }
    }

    /// Highest assigned version number, 0 when none exist
    pub fn latest_version_number(&self, procedure_id: Uuid) -> Result<i64> {
        let conn = self.storage.connect()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM procedure_versions WHERE procedure_id = ?1",
            params![procedure_id.to_string()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }
}

struct TryCreateError {
    is_conflict: bool,
    error: SprocketError,
}

impl TryCreateError {
    fn fatal(error: SprocketError) -> Self {
        Self {
            is_conflict: false,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (VersionStore, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let storage =
            Arc::new(MetadataStorage::new(dir.path().join("meta.db")).expect("storage"));
        (VersionStore::new(storage), dir)
    }

    #[test]
    fn versions_number_from_one() {
        let (store, _dir) = test_store();
        let proc_id = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        let v1 = store
            .create_version(proc_id, tenant, "P", "v1 body", VersionSource::Published, "alice")
            .expect("v1");
        let v2 = store
            .create_version(proc_id, tenant, "P", "v2 body", VersionSource::Published, "alice")
            .expect("v2");

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(store.latest_version_number(proc_id).expect("latest"), 2);
    }

    #[test]
    fn numbering_is_per_procedure() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store
            .create_version(a, tenant, "A", "x", VersionSource::Published, "alice")
            .expect("a1");
        let b1 = store
            .create_version(b, tenant, "B", "y", VersionSource::Published, "alice")
            .expect("b1");
        assert_eq!(b1.version, 1);
    }

    #[test]
    fn list_returns_published_newest_first() {
        let (store, _dir) = test_store();
        let proc_id = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        store
            .create_version(proc_id, tenant, "P", "v1", VersionSource::Published, "a")
            .expect("v1");
        store
            .create_version(proc_id, tenant, "P", "draft snap", VersionSource::Draft, "a")
            .expect("v2 draft");
        store
            .create_version(proc_id, tenant, "P", "v3", VersionSource::Published, "a")
            .expect("v3");

        let listed = store.list_versions(proc_id, tenant).expect("list");
        let numbers: Vec<i64> = listed.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![3, 1]);
        assert!(listed.iter().all(|v| v.source == VersionSource::Published));
    }

    #[test]
    fn draft_snapshots_still_take_a_number() {
        let (store, _dir) = test_store();
        let proc_id = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        store
            .create_version(proc_id, tenant, "P", "d1", VersionSource::Draft, "a")
            .expect("d1");
        let published = store
            .create_version(proc_id, tenant, "P", "p2", VersionSource::Published, "a")
            .expect("p2");
        assert_eq!(published.version, 2);
    }

    #[test]
    fn get_version_by_number() {
        let (store, _dir) = test_store();
        let proc_id = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        store
            .create_version(proc_id, tenant, "P", "body", VersionSource::Published, "a")
            .expect("v1");

        let loaded = store.get_version(proc_id, tenant, 1).expect("get");
        assert_eq!(loaded.sql_text, "body");

        // Draft snapshots are reachable by exact number too.
        store
            .create_version(proc_id, tenant, "P", "draft", VersionSource::Draft, "a")
            .expect("v2");
        let draft = store.get_version(proc_id, tenant, 2).expect("get draft");
        assert_eq!(draft.source, VersionSource::Draft);
    }

    #[test]
    fn missing_version_is_not_found() {
        let (store, _dir) = test_store();
        let err = store
            .get_version(Uuid::new_v4(), Uuid::new_v4(), 1)
            .unwrap_err();
        assert!(matches!(err, SprocketError::NotFound(_)));
    }

    #[test]
    fn version_rows_are_tenant_scoped() {
        let (store, _dir) = test_store();
        let proc_id = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        store
            .create_version(proc_id, tenant, "P", "body", VersionSource::Published, "a")
            .expect("v1");

        let err = store.get_version(proc_id, Uuid::new_v4(), 1).unwrap_err();
        assert!(matches!(err, SprocketError::NotFound(_)));
    }
}
