//! Procedure record persistence

use chrono::{DateTime, Utc};
use rusqlite::params;
use sprocket_core::{Procedure, ProcedureStatus, Result, SprocketError};
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::{MetadataStorage, PROCEDURE_COLUMNS, db_err, row_to_procedure};

/// CRUD and status transitions for procedure records.
///
/// All writes are tenant-scoped; a procedure id from the wrong tenant
/// behaves exactly like a missing one.
#[derive(Debug, Clone)]
pub struct ProcedureStore {
    storage: Arc<MetadataStorage>,
}

impl ProcedureStore {
    pub fn new(storage: Arc<MetadataStorage>) -> Self {
        Self { storage }
    }

    /// Insert a new procedure. Fails with `Conflict` when the tenant
    /// already has a procedure with this name.
    pub fn create(&self, procedure: &Procedure) -> Result<()> {
        let conn = self.storage.connect()?;

        if self.name_taken(&conn, procedure.tenant_id, &procedure.name, None)? {
            return Err(SprocketError::Conflict(format!(
                "procedure name '{}' already exists in this workspace",
                procedure.name
            )));
        }

        conn.execute(
            &format!("INSERT INTO procedures ({PROCEDURE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                procedure.id.to_string(),
                procedure.tenant_id.to_string(),
                procedure.name,
                procedure.status.as_str(),
                procedure.sql_draft,
                procedure.sql_published,
                procedure.published_at.map(|t| t.to_rfc3339()),
                procedure.created_by,
                procedure.created_at.to_rfc3339(),
                procedure.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            // The UNIQUE(tenant_id, name) constraint backs up the check above.
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SprocketError::Conflict(format!(
                    "procedure name '{}' already exists in this workspace",
                    procedure.name
                ))
            }
            other => db_err(other),
        })?;

        Ok(())
    }

    /// Fetch one procedure, scoped to a tenant
    pub fn get(&self, procedure_id: Uuid, tenant_id: Uuid) -> Result<Procedure> {
        let conn = self.storage.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROCEDURE_COLUMNS} FROM procedures WHERE id = ?1 AND tenant_id = ?2"
            ))
            .map_err(db_err)?;

        let mut rows = stmt
            .query(params![procedure_id.to_string(), tenant_id.to_string()])
            .map_err(db_err)?;

        match rows.next().map_err(db_err)? {
            Some(row) => row_to_procedure(row),
            None => Err(SprocketError::NotFound(format!(
                "procedure {procedure_id}"
            ))),
        }
    }

    /// List a tenant's procedures, ordered by name
    pub fn list(&self, tenant_id: Uuid) -> Result<Vec<Procedure>> {
        let conn = self.storage.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROCEDURE_COLUMNS} FROM procedures WHERE tenant_id = ?1 ORDER BY name"
            ))
            .map_err(db_err)?;

        let mut rows = stmt.query(params![tenant_id.to_string()]).map_err(db_err)?;
        let mut procedures = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            procedures.push(row_to_procedure(row)?);
        }
        Ok(procedures)
    }

    /// Update the draft SQL
    pub fn update_draft(&self, procedure_id: Uuid, tenant_id: Uuid, sql_draft: &str) -> Result<()> {
        let conn = self.storage.connect()?;
        let affected = conn
            .execute(
                "UPDATE procedures SET sql_draft = ?1, updated_at = ?2
                 WHERE id = ?3 AND tenant_id = ?4",
                params![
                    sql_draft,
                    Utc::now().to_rfc3339(),
                    procedure_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    /// Rename a procedure, re-checking tenant-scoped uniqueness
    pub fn rename(&self, procedure_id: Uuid, tenant_id: Uuid, new_name: &str) -> Result<()> {
        let conn = self.storage.connect()?;

        if self.name_taken(&conn, tenant_id, new_name, Some(procedure_id))? {
            return Err(SprocketError::Conflict(format!(
                "procedure name '{new_name}' already exists in this workspace"
            )));
        }

        let affected = conn
            .execute(
                "UPDATE procedures SET name = ?1, updated_at = ?2
                 WHERE id = ?3 AND tenant_id = ?4",
                params![
                    new_name,
                    Utc::now().to_rfc3339(),
                    procedure_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    /// Delete a procedure record
    pub fn delete(&self, procedure_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let conn = self.storage.connect()?;
        let affected = conn
            .execute(
                "DELETE FROM procedures WHERE id = ?1 AND tenant_id = ?2",
                params![procedure_id.to_string(), tenant_id.to_string()],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    /// Record a successful publish: status, published SQL and timestamp
    /// change together
    pub fn mark_published(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        sql: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.storage.connect()?;
        let affected = conn
            .execute(
                "UPDATE procedures
                 SET status = ?1, sql_published = ?2, published_at = ?3, updated_at = ?3
                 WHERE id = ?4 AND tenant_id = ?5",
                params![
                    ProcedureStatus::Published.as_str(),
                    sql,
                    at.to_rfc3339(),
                    procedure_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    /// Record an unpublish: back to Draft with published fields cleared
    pub fn mark_unpublished(&self, procedure_id: Uuid, tenant_id: Uuid) -> Result<()> {
        let conn = self.storage.connect()?;
        let affected = conn
            .execute(
                "UPDATE procedures
                 SET status = ?1, sql_published = NULL, published_at = NULL, updated_at = ?2
                 WHERE id = ?3 AND tenant_id = ?4",
                params![
                    ProcedureStatus::Draft.as_str(),
                    Utc::now().to_rfc3339(),
                    procedure_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    /// Rollback support: replace the draft and force Draft status while
    /// leaving the published fields exactly as they are
    pub fn restore_draft(&self, procedure_id: Uuid, tenant_id: Uuid, sql_draft: &str) -> Result<()> {
        let conn = self.storage.connect()?;
        let affected = conn
            .execute(
                "UPDATE procedures SET sql_draft = ?1, status = ?2, updated_at = ?3
                 WHERE id = ?4 AND tenant_id = ?5",
                params![
                    sql_draft,
                    ProcedureStatus::Draft.as_str(),
                    Utc::now().to_rfc3339(),
                    procedure_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        self.require_hit(affected, procedure_id)
    }

    fn require_hit(&self, affected: usize, procedure_id: Uuid) -> Result<()> {
        if affected == 0 {
            return Err(SprocketError::NotFound(format!(
                "procedure {procedure_id}"
            )));
        }
        Ok(())
    }

    fn name_taken(
        &self,
        conn: &rusqlite::Connection,
        tenant_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool> {
        let count: i64 = match excluding {
            Some(id) => conn
                .query_row(
                    "SELECT COUNT(*) FROM procedures
                     WHERE tenant_id = ?1 AND name = ?2 AND id != ?3",
                    params![tenant_id.to_string(), name, id.to_string()],
                    |row| row.get(0),
                )
                .map_err(db_err)?,
            None => conn
                .query_row(
                    "SELECT COUNT(*) FROM procedures WHERE tenant_id = ?1 AND name = ?2",
                    params![tenant_id.to_string(), name],
                    |row| row.get(0),
                )
                .map_err(db_err)?,
        };
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (ProcedureStore, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let storage =
            Arc::new(MetadataStorage::new(dir.path().join("meta.db")).expect("storage"));
        (ProcedureStore::new(storage), dir)
    }

    fn draft(tenant: Uuid, name: &str) -> Procedure {
        Procedure::new_draft(tenant, name, "CREATE PROCEDURE x AS SELECT 1", "alice")
    }

    #[test]
    fn create_and_get_round_trip() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let proc = draft(tenant, "GetUsers");
        store.create(&proc).expect("create");

        let loaded = store.get(proc.id, tenant).expect("get");
        assert_eq!(loaded.name, "GetUsers");
        assert_eq!(loaded.status, ProcedureStatus::Draft);
        assert_eq!(loaded.sql_draft, proc.sql_draft);
        assert!(loaded.sql_published.is_none());
        assert_eq!(loaded.created_by, "alice");
    }

    #[test]
    fn duplicate_name_in_tenant_conflicts() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        store.create(&draft(tenant, "GetUsers")).expect("first");

        let err = store.create(&draft(tenant, "GetUsers")).unwrap_err();
        assert!(matches!(err, SprocketError::Conflict(_)));
    }

    #[test]
    fn same_name_in_other_tenant_is_fine() {
        let (store, _dir) = test_store();
        store.create(&draft(Uuid::new_v4(), "GetUsers")).expect("a");
        store.create(&draft(Uuid::new_v4(), "GetUsers")).expect("b");
    }

    #[test]
    fn get_is_tenant_scoped() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let proc = draft(tenant, "P");
        store.create(&proc).expect("create");

        let err = store.get(proc.id, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SprocketError::NotFound(_)));
    }

    #[test]
    fn publish_transition_round_trip() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let proc = draft(tenant, "P");
        store.create(&proc).expect("create");

        let at = Utc::now();
        store
            .mark_published(proc.id, tenant, &proc.sql_draft, at)
            .expect("publish");

        let loaded = store.get(proc.id, tenant).expect("get");
        assert_eq!(loaded.status, ProcedureStatus::Published);
        assert_eq!(loaded.sql_published.as_deref(), Some(proc.sql_draft.as_str()));
        assert!(loaded.published_at.is_some());
        assert!(loaded.invariant_holds());

        store.mark_unpublished(proc.id, tenant).expect("unpublish");
        let loaded = store.get(proc.id, tenant).expect("get");
        assert_eq!(loaded.status, ProcedureStatus::Draft);
        assert!(loaded.sql_published.is_none());
        assert!(loaded.published_at.is_none());
    }

    #[test]
    fn restore_draft_keeps_published_fields() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let proc = draft(tenant, "P");
        store.create(&proc).expect("create");
        store
            .mark_published(proc.id, tenant, "published body", Utc::now())
            .expect("publish");

        store
            .restore_draft(proc.id, tenant, "older body")
            .expect("restore");

        let loaded = store.get(proc.id, tenant).expect("get");
        assert_eq!(loaded.status, ProcedureStatus::Draft);
        assert_eq!(loaded.sql_draft, "older body");
        // The live published copy stays until an explicit publish replaces it.
        assert_eq!(loaded.sql_published.as_deref(), Some("published body"));
    }

    #[test]
    fn rename_checks_uniqueness() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let a = draft(tenant, "A");
        let b = draft(tenant, "B");
        store.create(&a).expect("a");
        store.create(&b).expect("b");

        let err = store.rename(b.id, tenant, "A").unwrap_err();
        assert!(matches!(err, SprocketError::Conflict(_)));

        store.rename(b.id, tenant, "C").expect("rename ok");
        assert_eq!(store.get(b.id, tenant).expect("get").name, "C");
    }

    #[test]
    fn list_orders_by_name() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        store.create(&draft(tenant, "Zeta")).expect("z");
        store.create(&draft(tenant, "Alpha")).expect("a");

        let names: Vec<String> = store
            .list(tenant)
            .expect("list")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn delete_removes_the_record() {
        let (store, _dir) = test_store();
        let tenant = Uuid::new_v4();
        let proc = draft(tenant, "P");
        store.create(&proc).expect("create");
        store.delete(proc.id, tenant).expect("delete");
        assert!(matches!(
            store.get(proc.id, tenant).unwrap_err(),
            SprocketError::NotFound(_)
        ));
    }
}
