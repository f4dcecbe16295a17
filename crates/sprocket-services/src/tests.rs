//! Service-level tests, including the end-to-end draft/publish/execute
//! scenario

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sprocket_connection::{RegistryConfig, TenantRegistry};
use sprocket_core::{
    ActivityRecorder, CatalogIntrospection, Connection, Connector, ParsedEngineError,
    ProcedureStatus, QueryResult, Result, Row, SprocketError, TenantConfigProvider,
    TenantConnectionConfig, Value,
};
use sprocket_execute::{ExecutionEngine, ExecutionRequest};
use sprocket_publish::ProcedurePublisher;
use sprocket_store::{MetadataStorage, ProcedureStore, VersionStore};
use sprocket_validate::{MssqlErrorParser, TempCompileValidator};
use uuid::Uuid;

use crate::connection_service::ConnectionService;
use crate::procedure_service::ProcedureService;

/// Engine double for full-stack service tests.
///
/// Batches containing the marker `BROKEN` fail the way a syntax error
/// would; `EXEC` queries return a single row.
struct FakeEngine {
    batches: Mutex<Vec<String>>,
    routine_present: AtomicBool,
}

impl FakeEngine {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            routine_present: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for FakeEngine {
    fn driver_name(&self) -> &str {
        "fake"
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        if sql.contains("EXEC") {
            let columns = vec!["result".to_string()];
            return Ok(QueryResult {
                columns: Vec::new(),
                rows: vec![Row::new(columns, vec![Value::Int32(1)])],
                affected_rows: 0,
                execution_time_ms: 1,
            });
        }
        Ok(QueryResult::empty())
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn batch(&self, sql: &str) -> Result<()> {
        self.batches.lock().push(sql.to_string());
        if sql.contains("BROKEN") {
            return Err(SprocketError::Engine(ParsedEngineError::message_only(
                "Msg 102, Level 15, State 1, Line 1: Incorrect syntax near 'BROKEN'.",
            )));
        }
        if sql.contains("CREATE") {
            self.routine_present.store(true, Ordering::SeqCst);
        }
        if sql.contains("DROP PROCEDURE") {
            self.routine_present.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn as_catalog(&self) -> Option<&dyn CatalogIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl CatalogIntrospection for FakeEngine {
    async fn routine_exists(&self, _name: &str) -> Result<bool> {
        Ok(self.routine_present.load(Ordering::SeqCst))
    }

    async fn routine_definition(&self, name: &str) -> Result<Option<String>> {
        Ok(Some(format!("CREATE PROCEDURE {name} AS SELECT 1")))
    }
}

struct FixedConnector(Arc<FakeEngine>);

#[async_trait]
impl Connector for FixedConnector {
    async fn connect(
        &self,
        _tenant_id: Uuid,
        _config: &TenantConnectionConfig,
    ) -> Result<Arc<dyn Connection>> {
        Ok(self.0.clone())
    }
}

struct AnyTenantProvider;

#[async_trait]
impl TenantConfigProvider for AnyTenantProvider {
    async fn fetch(&self, _tenant_id: Uuid) -> Result<TenantConnectionConfig> {
        Ok(TenantConnectionConfig::new("localhost", 1433, "db", "u", "p"))
    }
}

#[derive(Default)]
struct NullRecorder;

#[async_trait]
impl ActivityRecorder for NullRecorder {
    async fn record(
        &self,
        _actor_id: &str,
        _event_type: &str,
        _message: &str,
        _tenant_id: Uuid,
        _metadata: serde_json::Value,
    ) {
    }
}

struct Harness {
    service: ProcedureService,
    connections: ConnectionService,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(MetadataStorage::new(dir.path().join("meta.db")).expect("storage"));
    let procedures = ProcedureStore::new(storage.clone());
    let versions = VersionStore::new(storage);

    let engine_double = Arc::new(FakeEngine::new());
    let registry = Arc::new(TenantRegistry::new(
        RegistryConfig::new(4),
        Arc::new(AnyTenantProvider),
        Arc::new(FixedConnector(engine_double)),
    ));

    let parser = Arc::new(MssqlErrorParser::new());
    let validator = Arc::new(TempCompileValidator::new(registry.clone(), parser.clone()));
    let activity = Arc::new(NullRecorder);

    let publisher = Arc::new(ProcedurePublisher::new(
        registry.clone(),
        validator.clone(),
        parser.clone(),
        procedures.clone(),
        versions.clone(),
        activity.clone(),
    ));

    let engine = Arc::new(ExecutionEngine::new(
        registry.clone(),
        procedures.clone(),
        parser,
        activity.clone(),
    ));

    let service = ProcedureService::new(
        procedures,
        versions,
        validator,
        publisher,
        engine,
        activity,
    );
    let connections = ConnectionService::new(registry);

    Harness {
        service,
        connections,
        _dir: dir,
    }
}

const GOOD_SQL: &str = "CREATE PROCEDURE P AS BEGIN SELECT 1 END";
const BROKEN_SQL: &str = "CREATE PROCEDURE P AS BEGIN SELECT BROKEN END";

#[tokio::test]
async fn draft_publish_edit_fail_execute_scenario() {
    let h = harness();
    let tenant = Uuid::new_v4();

    // Author a draft and publish it.
    let proc = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("create");
    let report = h
        .service
        .publish(proc.id, tenant, "alice")
        .await
        .expect("publish");
    assert!(report.success);
    assert_eq!(report.version, Some(1));

    // Edit the draft to something broken; publishing must fail at
    // precheck and leave the published copy alone.
    h.service
        .update_draft(proc.id, tenant, BROKEN_SQL)
        .await
        .expect("edit");
    let failed = h
        .service
        .publish(proc.id, tenant, "alice")
        .await
        .expect("publish call");
    assert!(!failed.success);
    assert_eq!(failed.failed_stage.as_deref(), Some("precheck"));

    let loaded = h.service.get_procedure(proc.id, tenant).expect("get");
    assert_eq!(loaded.status, ProcedureStatus::Published);
    assert_eq!(loaded.sql_published.as_deref(), Some(GOOD_SQL));
    assert_eq!(
        h.service.list_versions(proc.id, tenant).expect("versions").len(),
        1
    );

    // The published copy still executes.
    let outcome = h
        .service
        .execute(
            proc.id,
            tenant,
            "alice",
            ExecutionRequest::new().with_timeout_seconds(5),
        )
        .await
        .expect("execute");
    assert!(outcome.success);
    assert_eq!(outcome.row_count, 1);
}

#[tokio::test]
async fn rollback_restores_draft_only() {
    let h = harness();
    let tenant = Uuid::new_v4();

    let proc = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("create");
    h.service
        .publish(proc.id, tenant, "alice")
        .await
        .expect("v1");

    let v2_sql = "CREATE PROCEDURE P AS BEGIN SELECT 2 END";
    h.service
        .update_draft(proc.id, tenant, v2_sql)
        .await
        .expect("edit");
    h.service
        .publish(proc.id, tenant, "alice")
        .await
        .expect("v2");

    let rolled = h
        .service
        .rollback_to_version(proc.id, tenant, 1, "alice")
        .await
        .expect("rollback");

    assert_eq!(rolled.status, ProcedureStatus::Draft);
    assert_eq!(rolled.sql_draft, GOOD_SQL);
    // The live published copy is untouched by rollback.
    assert_eq!(rolled.sql_published.as_deref(), Some(v2_sql));
}

#[tokio::test]
async fn rollback_to_missing_version_is_not_found() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let proc = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("create");

    let err = h
        .service
        .rollback_to_version(proc.id, tenant, 9, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, SprocketError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_names_conflict_per_tenant() {
    let h = harness();
    let tenant = Uuid::new_v4();

    h.service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("first");
    let err = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, SprocketError::Conflict(_)));

    // Another tenant can reuse the name.
    h.service
        .create_procedure(Uuid::new_v4(), "P", GOOD_SQL, "alice")
        .await
        .expect("other tenant");
}

#[tokio::test]
async fn validate_content_rejects_headerless_sql() {
    let h = harness();
    let issues = h
        .service
        .validate_content(Uuid::new_v4(), "SELECT 1")
        .await
        .expect("validate");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].is_error());
}

#[tokio::test]
async fn validate_draft_surfaces_parsed_engine_issues() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let proc = h
        .service
        .create_procedure(tenant, "P", BROKEN_SQL, "alice")
        .await
        .expect("create");

    let issues = h
        .service
        .validate_draft(proc.id, tenant)
        .await
        .expect("validate");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].code, Some(102));
    assert_eq!(issues[0].near.as_deref(), Some("BROKEN"));
}

#[tokio::test]
async fn snapshot_draft_is_internal_only() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let proc = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("create");

    let snapshot = h
        .service
        .snapshot_draft(proc.id, tenant, "alice")
        .await
        .expect("snapshot");
    assert_eq!(snapshot.version, 1);

    // Draft snapshots never show up in the published listing, but are
    // fetchable (and rollback-able) by exact number.
    assert!(h.service.list_versions(proc.id, tenant).expect("list").is_empty());
    let fetched = h
        .service
        .get_version(proc.id, tenant, 1)
        .expect("get version");
    assert_eq!(fetched.sql_text, GOOD_SQL);
}

#[tokio::test]
async fn unpublish_round_trip() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let proc = h
        .service
        .create_procedure(tenant, "P", GOOD_SQL, "alice")
        .await
        .expect("create");
    h.service
        .publish(proc.id, tenant, "alice")
        .await
        .expect("publish");

    let report = h
        .service
        .unpublish(proc.id, tenant, "alice")
        .await
        .expect("unpublish");
    assert!(report.success);

    let loaded = h.service.get_procedure(proc.id, tenant).expect("get");
    assert_eq!(loaded.status, ProcedureStatus::Draft);
    assert!(!h.service.can_execute(proc.id, tenant, "alice").expect("can"));
}

#[tokio::test]
async fn connection_diagnostics() {
    let h = harness();
    let tenant = Uuid::new_v4();

    let report = h
        .connections
        .test_connection(
            tenant,
            &TenantConnectionConfig::new("localhost", 1433, "db", "u", "p"),
        )
        .await;
    assert!(report.success);
    assert!(report.latency_ms.is_some());

    // Testing never populates the registry.
    assert_eq!(h.connections.connection_stats().total, 0);
}
