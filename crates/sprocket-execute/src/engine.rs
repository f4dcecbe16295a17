//! The execution engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use sprocket_connection::TenantRegistry;
use sprocket_core::{
    ActivityRecorder, EngineErrorParser, ParsedEngineError, Result, Row, SprocketError, Value,
};
use sprocket_store::ProcedureStore;
use sprocket_validate::{bracket_quote, parse_header};
use uuid::Uuid;

use crate::redact::redact_parameters;
use crate::shape::{ColumnInfo, shape};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ROW_CAP: usize = 1000;

/// Caller-supplied execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Named parameters in call order
    pub parameters: Vec<(String, Value)>,
    /// Requested timeout in seconds; clamped to [1, 60], default 30
    pub timeout_seconds: Option<u64>,
}

impl ExecutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named parameter
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    /// Request a timeout in seconds
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Structured result of one execution attempt.
///
/// Engine failures and timeouts land here as `error` rather than
/// bubbling out as exceptions; only infrastructure problems (missing
/// procedure, unreachable tenant database) are `Err` at the call site.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// Rows beyond the cap were dropped
    pub truncated: bool,
    pub execution_time_ms: u64,
    pub error: Option<ParsedEngineError>,
}

/// Executes published procedures on their tenant's pooled connection.
pub struct ExecutionEngine {
    registry: Arc<TenantRegistry>,
    procedures: ProcedureStore,
    parser: Arc<dyn EngineErrorParser>,
    activity: Arc<dyn ActivityRecorder>,
    row_cap: usize,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<TenantRegistry>,
        procedures: ProcedureStore,
        parser: Arc<dyn EngineErrorParser>,
        activity: Arc<dyn ActivityRecorder>,
    ) -> Self {
        Self {
            registry,
            procedures,
            parser,
            activity,
            row_cap: DEFAULT_ROW_CAP,
        }
    }

    /// Override the result row cap
    pub fn with_row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = row_cap;
        self
    }

    /// Run a published procedure.
    ///
    /// The invocation declares one engine-side variable per parameter,
    /// assigns it from a bound placeholder, and EXECs positionally, so
    /// parameter values never appear in SQL text. The call races a
    /// clamped timeout; on expiry the wait is abandoned but the
    /// engine-side statement is not guaranteed to stop.
    #[tracing::instrument(skip(self, request), fields(procedure_id = %procedure_id, tenant_id = %tenant_id))]
    pub async fn execute(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let procedure = self.procedures.get(procedure_id, tenant_id)?;

        let sql_published = procedure
            .sql_published
            .as_deref()
            .filter(|sql| !sql.trim().is_empty());
        let sql_published = match (procedure.is_published(), sql_published) {
            (true, Some(sql)) => sql,
            _ => {
                self.activity
                    .record(
                        actor_id,
                        "procedure.execute_rejected",
                        &format!("rejected execution of draft procedure '{}'", procedure.name),
                        tenant_id,
                        serde_json::json!({ "procedure_id": procedure_id }),
                    )
                    .await;
                return Err(SprocketError::Conflict(format!(
                    "procedure '{}' is not published and cannot be executed",
                    procedure.name
                )));
            }
        };

        let timeout = clamp_timeout(request.timeout_seconds);
        let exec_name = match parse_header(sql_published) {
            Some(header) => header.name,
            None => bracket_quote(&procedure.name),
        };
        let (invocation, values) = build_invocation(&exec_name, &request.parameters);
        let redacted = redact_parameters(&request.parameters);

        let conn = self.registry.get(tenant_id).await?;
        let started = Instant::now();

        let raced = tokio::time::timeout(timeout, conn.query(&invocation, &values)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match raced {
            Ok(Ok(result)) => {
                let total_rows = result.rows.len();
                let shaped = shape(result, self.row_cap);
                if shaped.truncated {
                    tracing::warn!(
                        total_rows,
                        row_cap = self.row_cap,
                        "result truncated to row cap"
                    );
                }

                self.activity
                    .record(
                        actor_id,
                        "procedure.executed",
                        &format!(
                            "executed '{}' ({} rows, {} ms)",
                            procedure.name, shaped.row_count, elapsed_ms
                        ),
                        tenant_id,
                        serde_json::json!({
                            "procedure_id": procedure_id,
                            "row_count": shaped.row_count,
                            "execution_time_ms": elapsed_ms,
                            "parameters": redacted,
                        }),
                    )
                    .await;

                Ok(ExecutionOutcome {
                    success: true,
                    columns: shaped.columns,
                    row_count: shaped.row_count,
                    truncated: shaped.truncated,
                    rows: shaped.rows,
                    execution_time_ms: elapsed_ms,
                    error: None,
                })
            }
            Ok(Err(err)) => {
                let parsed = match &err {
                    SprocketError::Engine(parsed) => self.parser.parse(&parsed.message),
                    other => self.parser.parse(&other.to_string()),
                };
                self.record_failure(actor_id, tenant_id, procedure_id, &parsed.message, &redacted)
                    .await;
                Ok(ExecutionOutcome {
                    success: false,
                    columns: Vec::new(),
                    rows: Vec::new(),
                    row_count: 0,
                    truncated: false,
                    execution_time_ms: elapsed_ms,
                    error: Some(parsed),
                })
            }
            Err(_) => {
                // Timed out: the wait is abandoned, but the engine may
                // still be running the statement server-side.
                let message = format!(
                    "execution timed out after {} seconds; the statement may still be running",
                    timeout.as_secs()
                );
                tracing::warn!(timeout_secs = timeout.as_secs(), "execution timed out");
                self.record_failure(actor_id, tenant_id, procedure_id, &message, &redacted)
                    .await;
                Ok(ExecutionOutcome {
                    success: false,
                    columns: Vec::new(),
                    rows: Vec::new(),
                    row_count: 0,
                    truncated: false,
                    execution_time_ms: elapsed_ms,
                    error: Some(ParsedEngineError::message_only(message)),
                })
            }
        }
    }

    /// Read-only predicate: can this procedure be executed right now?
    ///
    /// Missing procedures answer `false` rather than erroring; this is a
    /// predicate, not a fetch.
    #[tracing::instrument(skip(self), fields(procedure_id = %procedure_id, tenant_id = %tenant_id, actor_id = %actor_id))]
    pub fn can_execute(
        &self,
        procedure_id: Uuid,
        tenant_id: Uuid,
        actor_id: &str,
    ) -> Result<bool> {
        match self.procedures.get(procedure_id, tenant_id) {
            Ok(procedure) => Ok(procedure.is_published()
                && procedure
                    .sql_published
                    .as_deref()
                    .is_some_and(|sql| !sql.trim().is_empty())),
            Err(SprocketError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn record_failure(
        &self,
        actor_id: &str,
        tenant_id: Uuid,
        procedure_id: Uuid,
        message: &str,
        redacted: &serde_json::Value,
    ) {
        self.activity
            .record(
                actor_id,
                "procedure.execute_failed",
                message,
                tenant_id,
                serde_json::json!({
                    "procedure_id": procedure_id,
                    "parameters": redacted,
                }),
            )
            .await;
    }
}

fn clamp_timeout(requested: Option<u64>) -> Duration {
    let secs = requested
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

// T-SQL declaration type for a bound value; the engine converts at the
// EXEC boundary when the procedure's own parameter type differs.
fn declare_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bit",
        Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => "bigint",
        Value::Float32(_) | Value::Float64(_) => "float",
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::DateTimeUtc(_) => "datetime2",
        Value::Uuid(_) => "uniqueidentifier",
        Value::Bytes(_) => "varbinary(max)",
        Value::Null | Value::Decimal(_) | Value::String(_) | Value::Json(_) => "nvarchar(max)",
    }
}

/// Build the invocation batch and its bound values.
///
/// One declared variable per parameter, assigned via `@Pn` placeholders,
/// then a positional `EXEC`. `exec_name` comes from the published SQL's
/// own header (already validated at publish time), never from the
/// request.
fn build_invocation(exec_name: &str, parameters: &[(String, Value)]) -> (String, Vec<Value>) {
    let mut sql = String::new();
    let mut values = Vec::with_capacity(parameters.len());
    let mut variables = Vec::with_capacity(parameters.len());

    for (idx, (_, value)) in parameters.iter().enumerate() {
        let var = format!("@v{idx}");
        sql.push_str(&format!(
            "DECLARE {var} {}; SET {var} = @P{};\n",
            declare_type(value),
            idx + 1
        ));
        values.push(value.clone());
        variables.push(var);
    }

    if variables.is_empty() {
        sql.push_str(&format!("EXEC {exec_name};"));
    } else {
        sql.push_str(&format!("EXEC {exec_name} {};", variables.join(", ")));
    }

    (sql, values)
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn timeout_clamping() {
        assert_eq!(clamp_timeout(None), Duration::from_secs(30));
        assert_eq!(clamp_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(clamp_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(clamp_timeout(Some(500)), Duration::from_secs(60));
    }

    #[test]
    fn invocation_declares_and_execs_positionally() {
        let (sql, values) = build_invocation(
            "[GetUsers]",
            &[
                ("MinAge".to_string(), Value::Int32(21)),
                ("Name".to_string(), Value::String("Ada".to_string())),
            ],
        );

        assert_eq!(
            sql,
            "DECLARE @v0 bigint; SET @v0 = @P1;\n\
             DECLARE @v1 nvarchar(max); SET @v1 = @P2;\n\
             EXEC [GetUsers] @v0, @v1;"
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn invocation_without_parameters() {
        let (sql, values) = build_invocation("[P]", &[]);
        assert_eq!(sql, "EXEC [P];");
        assert!(values.is_empty());
    }

    #[test]
    fn values_never_appear_in_sql_text() {
        let hostile = "x'; DROP TABLE Users; --";
        let (sql, values) = build_invocation(
            "[P]",
            &[("note".to_string(), Value::String(hostile.to_string()))],
        );
        assert!(!sql.contains(hostile));
        assert_eq!(values[0], Value::String(hostile.to_string()));
    }
}
