//! The publish pipeline and its capability trait

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sprocket_connection::TenantRegistry;
use sprocket_core::{
    ActivityRecorder, EngineErrorParser, Procedure, Result, SprocketError, ValidationIssue,
    VersionSource,
};
use sprocket_store::{ProcedureStore, VersionStore};
use sprocket_validate::SyntaxValidator;
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::results::{
    DeployResult, PrecheckResult, PublishReport, UnpublishReport, VerifyResult,
};

/// Drives the Draft/Published state machine for procedures.
///
/// A capability trait so alternate target-engine pipelines can be
/// substituted without touching callers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Run precheck, deploy and verify; persist and snapshot on full
    /// success. Stage failures come back in the report; infrastructure
    /// failures (unknown tenant, unreachable database, storage) are
    /// errors.
    async fn publish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<PublishReport>;

    /// Drop the deployed object (skipping the drop when it is already
    /// absent) and reset the record to Draft.
    async fn unpublish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<UnpublishReport>;
}

/// The production publish pipeline.
///
/// Two publishes for the same procedure never interleave: the pipeline
/// takes a per-procedure lease up front and rejects the loser with a
/// `Conflict` instead of queueing it.
pub struct ProcedurePublisher {
    registry: Arc<TenantRegistry>,
    validator: Arc<dyn SyntaxValidator>,
    parser: Arc<dyn EngineErrorParser>,
    procedures: ProcedureStore,
    versions: VersionStore,
    activity: Arc<dyn ActivityRecorder>,
    leases: parking_lot::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcedurePublisher {
    pub fn new(
        registry: Arc<TenantRegistry>,
        validator: Arc<dyn SyntaxValidator>,
        parser: Arc<dyn EngineErrorParser>,
        procedures: ProcedureStore,
        versions: VersionStore,
        activity: Arc<dyn ActivityRecorder>,
    ) -> Self {
        Self {
            registry,
            validator,
            parser,
            procedures,
            versions,
            activity,
            leases: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn lease(&self, procedure_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.leases
            .lock()
            .entry(procedure_id)
            .or_default()
            .clone()
    }

    fn issue_from(&self, err: &SprocketError) -> ValidationIssue {
        let raw = match err {
            SprocketError::Engine(parsed) => parsed.message.clone(),
            other => other.to_string(),
        };
        self.parser.parse(&raw).into_issue()
    }

    async fn record_failure(
        &self,
        actor_id: &str,
        procedure: &Procedure,
        stage: &str,
        issues: &[ValidationIssue],
    ) {
        let detail = issues
            .first()
            .map(|i| i.message.clone())
            .unwrap_or_default();
        self.activity
            .record(
                actor_id,
                "procedure.publish_failed",
                &format!("publish of '{}' failed at {stage}", procedure.name),
                procedure.tenant_id,
                serde_json::json!({
                    "procedure_id": procedure.id,
                    "stage": stage,
                    "detail": detail,
                }),
            )
            .await;
    }
}

#[async_trait]
impl Publisher for ProcedurePublisher {
    #[tracing::instrument(skip(self), fields(procedure_id = %procedure_id, tenant_id = %tenant_id))]
    async fn publish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<PublishReport> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;
        if procedure.sql_draft.trim().is_empty() {
            return Err(SprocketError::Conflict(
                "cannot publish: draft SQL is empty".to_string(),
            ));
        }

        let lease = self.lease(procedure_id);
        let _guard = lease.try_lock().map_err(|_| {
            SprocketError::Conflict(format!(
                "a publish for procedure '{}' is already in progress",
                procedure.name
            ))
        })?;

        let mut report = PublishReport {
            success: false,
            failed_stage: None,
            precheck: None,
            deploy: None,
            verify: None,
            version: None,
            published_at: None,
        };

        // Stage 1: precheck via temp-compile validation.
        let started = Instant::now();
        let issues = self
            .validator
            .validate(tenant_id, &procedure.sql_draft)
            .await?;
        let can_proceed = !issues.iter().any(ValidationIssue::is_error);
        if !can_proceed {
            self.record_failure(actor_id, &procedure, "precheck", &issues)
                .await;
        }
        report.precheck = Some(PrecheckResult {
            success: can_proceed,
            can_proceed,
            issues,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        if !can_proceed {
            report.failed_stage = Some("precheck".to_string());
            tracing::info!(stage = "precheck", "publish aborted");
            return Ok(report);
        }

        // Stage 2: deploy the canonical SQL.
        let canonical = canonicalize(&procedure.sql_draft, &procedure.name);
        let conn = self.registry.get(tenant_id).await?;

        let started = Instant::now();
        match conn.batch(&canonical.sql).await {
            Ok(()) => {
                report.deploy = Some(DeployResult {
                    success: true,
                    deployed_name: Some(canonical.deployed_name.clone()),
                    issues: Vec::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(err) => {
                let issue = self.issue_from(&err);
                report.deploy = Some(DeployResult {
                    success: false,
                    deployed_name: None,
                    issues: vec![issue.clone()],
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                report.failed_stage = Some("deploy".to_string());
                self.record_failure(actor_id, &procedure, "deploy", &[issue])
                    .await;
                tracing::info!(stage = "deploy", "publish aborted");
                return Ok(report);
            }
        }

        // Stage 3: verify via the routine catalog.
        let started = Instant::now();
        let verify = match conn.as_catalog() {
            None => VerifyResult {
                success: false,
                verified: false,
                object_definition: None,
                issues: vec![ValidationIssue::error(
                    "driver does not support catalog introspection",
                )],
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Some(catalog) => match catalog.routine_exists(&canonical.deployed_name).await {
                Ok(true) => {
                    let definition = catalog
                        .routine_definition(&canonical.deployed_name)
                        .await
                        .unwrap_or(None);
                    VerifyResult {
                        success: true,
                        verified: true,
                        object_definition: definition,
                        issues: Vec::new(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Ok(false) => VerifyResult {
                    success: false,
                    verified: false,
                    object_definition: None,
                    issues: vec![ValidationIssue::error(format!(
                        "procedure {} was not found in the catalog after deploy",
                        canonical.deployed_name
                    ))],
                    duration_ms: started.elapsed().as_millis() as u64,
                },
                Err(err) => VerifyResult {
                    success: false,
                    verified: false,
                    object_definition: None,
                    issues: vec![self.issue_from(&err)],
                    duration_ms: started.elapsed().as_millis() as u64,
                },
            },
        };
        let verify_ok = verify.success;
        let verify_issues = verify.issues.clone();
        report.verify = Some(verify);
        if !verify_ok {
            report.failed_stage = Some("verify".to_string());
            self.record_failure(actor_id, &procedure, "verify", &verify_issues)
                .await;
            tracing::info!(stage = "verify", "publish aborted");
            return Ok(report);
        }

        // All stages passed: persist and snapshot. A storage failure
        // here leaves the engine-side object ahead of the record; that
        // divergence is logged and surfaced rather than rolled back.
        let published_at = Utc::now();
        self.procedures
            .mark_published(procedure_id, tenant_id, &procedure.sql_draft, published_at)
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    "deployed to tenant engine but metadata write failed"
                );
            })?;

        let version = self.versions.create_version(
            procedure_id,
            tenant_id,
            &procedure.name,
            &procedure.sql_draft,
            VersionSource::Published,
            actor_id,
        )?;

        self.activity
            .record(
                actor_id,
                "procedure.published",
                &format!("published '{}' as version {}", procedure.name, version.version),
                tenant_id,
                serde_json::json!({
                    "procedure_id": procedure_id,
                    "version": version.version,
                    "deployed_name": canonical.deployed_name,
                }),
            )
            .await;

        report.success = true;
        report.version = Some(version.version);
        report.published_at = Some(published_at);
        tracing::info!(version = version.version, "publish succeeded");
        Ok(report)
    }

    #[tracing::instrument(skip(self), fields(procedure_id = %procedure_id, tenant_id = %tenant_id))]
    async fn unpublish(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<UnpublishReport> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;
        if !procedure.is_published() {
            return Err(SprocketError::Conflict(format!(
                "procedure '{}' is not published",
                procedure.name
            )));
        }

        let sql_published = procedure.sql_published.clone().unwrap_or_default();
        let canonical = canonicalize(&sql_published, &procedure.name);
        let conn = self.registry.get(tenant_id).await?;

        let started = Instant::now();
        let fail = |issues: Vec<ValidationIssue>, started: Instant| UnpublishReport {
            success: false,
            dropped: false,
            issues,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let catalog = match conn.as_catalog() {
            Some(catalog) => catalog,
            None => {
                return Ok(fail(
                    vec![ValidationIssue::error(
                        "driver does not support catalog introspection",
                    )],
                    started,
                ));
            }
        };

        // Idempotent: skip the drop when the object is already gone.
        let dropped = match catalog.routine_exists(&canonical.deployed_name).await {
            Ok(false) => false,
            Ok(true) => {
                let drop_sql = format!("DROP PROCEDURE {};", canonical.deployed_name);
                if let Err(err) = conn.batch(&drop_sql).await {
                    let issue = self.issue_from(&err);
                    self.record_failure(actor_id, &procedure, "unpublish", &[issue.clone()])
                        .await;
                    return Ok(fail(vec![issue], started));
                }
                true
            }
            Err(err) => {
                let issue = self.issue_from(&err);
                self.record_failure(actor_id, &procedure, "unpublish", &[issue.clone()])
                    .await;
                return Ok(fail(vec![issue], started));
            }
        };

        self.procedures.mark_unpublished(procedure_id, tenant_id)?;

        self.activity
            .record(
                actor_id,
                "procedure.unpublished",
                &format!("unpublished '{}'", procedure.name),
                tenant_id,
                serde_json::json!({
                    "procedure_id": procedure_id,
                    "dropped": dropped,
                }),
            )
            .await;

        tracing::info!(dropped, "unpublish succeeded");
        Ok(UnpublishReport {
            success: true,
            dropped,
            issues: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
