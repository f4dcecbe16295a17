//! Procedure lifecycle service

use std::sync::Arc;

use sprocket_core::{
    ActivityRecorder, Procedure, ProcedureVersion, Result, ValidationIssue, VersionSource,
};
use sprocket_execute::{ExecutionEngine, ExecutionOutcome, ExecutionRequest};
use sprocket_publish::{PublishReport, Publisher, UnpublishReport};
use sprocket_store::{ProcedureStore, VersionStore};
use sprocket_validate::SyntaxValidator;
use uuid::Uuid;

/// Orchestrates procedure authoring, validation, publishing, execution
/// and version history for the outer (HTTP/CLI) layer.
pub struct ProcedureService {
    procedures: ProcedureStore,
    versions: VersionStore,
    validator: Arc<dyn SyntaxValidator>,
    publisher: Arc<dyn Publisher>,
    engine: Arc<ExecutionEngine>,
    activity: Arc<dyn ActivityRecorder>,
}

impl ProcedureService {
    pub fn new(
        procedures: ProcedureStore,
        versions: VersionStore,
        validator: Arc<dyn SyntaxValidator>,
        publisher: Arc<dyn Publisher>,
        engine: Arc<ExecutionEngine>,
        activity: Arc<dyn ActivityRecorder>,
    ) -> Self {
        Self {
            procedures,
            versions,
            validator,
            publisher,
            engine,
            activity,
        }
    }

    /// Create a new draft procedure. The name must be unique within the
    /// tenant.
    #[tracing::instrument(skip(self, sql_draft), fields(tenant_id = %tenant_id, name = %name))]
    pub async fn create_procedure(
        &self,
        tenant_id: Uuid,
        name: &str,
        sql_draft: &str,
        actor_id: &str,
    ) -> Result<Procedure> {
        let procedure = Procedure::new_draft(tenant_id, name, sql_draft, actor_id);
        self.procedures.create(&procedure)?;

        self.activity
            .record(
                actor_id,
                "procedure.created",
                &format!("created procedure '{name}'"),
                tenant_id,
                serde_json::json!({ "procedure_id": procedure.id }),
            )
            .await;

        Ok(procedure)
    }

    /// Replace the draft SQL. Allowed in both states; a published copy
    /// keeps serving until the next publish.
    pub async fn update_draft(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        sql_draft: &str,
    ) -> Result<Procedure> {
        self.procedures
            .update_draft(procedure_id, tenant_id, sql_draft)?;
        self.procedures.get(procedure_id, tenant_id)
    }

    /// Rename a procedure, re-checking tenant-scoped uniqueness
    pub async fn rename_procedure(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        new_name: &str,
    ) -> Result<Procedure> {
        self.procedures.rename(procedure_id, tenant_id, new_name)?;
        self.procedures.get(procedure_id, tenant_id)
    }

    /// Fetch one procedure
    pub fn get_procedure(&self, procedure_id: Uuid, tenant_id: Uuid) -> Result<Procedure> {
        self.procedures.get(procedure_id, tenant_id)
    }

    /// List a tenant's procedures
    pub fn list_procedures(&self, tenant_id: Uuid) -> Result<Vec<Procedure>> {
        self.procedures.list(tenant_id)
    }

    /// Delete a procedure record
    #[tracing::instrument(skip(self), fields(procedure_id = %procedure_id, tenant_id = %tenant_id))]
    pub async fn delete_procedure(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<()> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;
        self.procedures.delete(procedure_id, tenant_id)?;

        self.activity
            .record(
                actor_id,
                "procedure.deleted",
                &format!("deleted procedure '{}'", procedure.name),
                tenant_id,
                serde_json::json!({ "procedure_id": procedure_id }),
            )
            .await;
        Ok(())
    }

    /// Validate a procedure's current draft SQL
    pub async fn validate_draft(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<ValidationIssue>> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;
        self.validator
            .validate(tenant_id, &procedure.sql_draft)
            .await
    }

    /// Validate arbitrary SQL for a tenant without touching any record
    pub async fn validate_content(
        &self,
        tenant_id: Uuid,
        sql: &str,
    ) -> Result<Vec<ValidationIssue>> {
        self.validator.validate(tenant_id, sql).await
    }

    /// Run the publish pipeline
    pub async fn publish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<PublishReport> {
        self.publisher.publish(procedure_id, tenant_id, actor_id).await
    }

    /// Drop the deployed copy and return to Draft
    pub async fn unpublish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<UnpublishReport> {
        self.publisher
            .unpublish(procedure_id, tenant_id, actor_id)
            .await
    }

    /// Execute a published procedure
    pub async fn execute(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        self.engine
            .execute(procedure_id, tenant_id, actor_id, request)
            .await
    }

    /// Whether the procedure is executable right now
    pub fn can_execute(&self, procedure_id: Uuid, tenant_id: Uuid, actor_id: &str) -> Result<bool> {
        self.engine.can_execute(procedure_id, tenant_id, actor_id)
    }

    /// Published snapshots, newest first
    pub fn list_versions(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<ProcedureVersion>> {
        self.versions.list_versions(procedure_id, tenant_id)
    }

    /// One snapshot by version number
    pub fn get_version(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        version: i64,
    ) -> Result<ProcedureVersion> {
        self.versions.get_version(procedure_id, tenant_id, version)
    }

    /// Restore a snapshot into the draft and force Draft status.
    ///
    /// Rollback is draft-side only: the live published copy (and the
    /// deployed object) stay as they are until an explicit publish.
    #[tracing::instrument(skip(self), fields(procedure_id = %procedure_id, tenant_id = %tenant_id, version = version))]
    pub async fn rollback_to_version(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        version: i64,
        actor_id: &str,
    ) -> Result<Procedure> {
        let snapshot = self.versions.get_version(procedure_id, tenant_id, version)?;
        self.procedures
            .restore_draft(procedure_id, tenant_id, &snapshot.sql_text)?;

        self.activity
            .record(
                actor_id,
                "procedure.rolled_back",
                &format!("rolled back '{}' draft to version {version}", snapshot.name),
                tenant_id,
                serde_json::json!({
                    "procedure_id": procedure_id,
                    "version": version,
                }),
            )
            .await;

        self.procedures.get(procedure_id, tenant_id)
    }

    /// Explicitly snapshot the current draft (internal-only history;
    /// draft snapshots are not listed, only fetchable by number).
    pub async fn snapshot_draft(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<ProcedureVersion> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;
        self.versions.create_version(
            procedure_id,
            tenant_id,
            &procedure.name,
            &procedure.sql_draft,
            VersionSource::Draft,
            actor_id,
        )
    }
}
