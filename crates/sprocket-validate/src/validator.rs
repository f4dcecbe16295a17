//! Temp-compile syntax validator

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sprocket_connection::TenantRegistry;
use sprocket_core::{EngineErrorParser, Result, SprocketError, ValidationIssue};
use uuid::Uuid;

use crate::rewrite::{parse_header, rewrite_name};

/// Validates procedure SQL for one tenant.
///
/// An empty issue list means the SQL is valid. A non-empty list carries
/// normalized engine findings; infrastructure failures (unknown tenant,
/// unreachable database, registry exhaustion) surface as errors instead.
#[async_trait]
pub trait SyntaxValidator: Send + Sync {
    async fn validate(&self, tenant_id: Uuid, sql: &str) -> Result<Vec<ValidationIssue>>;
}

/// Validator that compiles the SQL on the tenant's live engine under a
/// throwaway name, then drops it in the same batch.
///
/// This catches everything the real engine would reject while never
/// leaving a visible object behind and never colliding with a real
/// procedure name.
pub struct TempCompileValidator {
    registry: Arc<TenantRegistry>,
    parser: Arc<dyn EngineErrorParser>,
}

impl TempCompileValidator {
    pub fn new(registry: Arc<TenantRegistry>, parser: Arc<dyn EngineErrorParser>) -> Self {
        Self { registry, parser }
    }

    // Process-unique: wall-clock millis plus a random suffix.
    fn temp_name() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        format!("sprk_check_{}_{}", millis, &suffix[..8])
    }

    fn issue_from_error(&self, err: &SprocketError) -> ValidationIssue {
        let raw = match err {
            SprocketError::Engine(parsed) => parsed.message.clone(),
            other => other.to_string(),
        };
        self.parser.parse(&raw).into_issue()
    }
}

#[async_trait]
impl SyntaxValidator for TempCompileValidator {
    #[tracing::instrument(skip(self, sql), fields(tenant_id = %tenant_id, sql_len = sql.len()))]
    async fn validate(&self, tenant_id: Uuid, sql: &str) -> Result<Vec<ValidationIssue>> {
        if parse_header(sql).is_none() {
            return Ok(vec![ValidationIssue::error(
                "SQL must begin with CREATE [OR ALTER] PROCEDURE or ALTER PROCEDURE",
            )]);
        }

        let temp = Self::temp_name();
        let rewritten = match rewrite_name(sql, &temp) {
            Some(rewritten) => rewritten,
            None => {
                // parse_header succeeded above, so this cannot happen;
                // fail closed rather than deploying under the real name.
                return Ok(vec![ValidationIssue::error(
                    "could not rewrite procedure name for validation",
                )]);
            }
        };

        let conn = self.registry.get(tenant_id).await?;

        let batch = format!(
            "{};\nDROP PROCEDURE [{}];",
            rewritten.trim_end().trim_end_matches(';'),
            temp
        );

        match conn.batch(&batch).await {
            Ok(()) => {
                tracing::debug!("temp-compile succeeded");
                Ok(Vec::new())
            }
            Err(err) => {
                // Best-effort cleanup in case the create landed but the
                // drop never ran; its own errors are swallowed.
                let cleanup = format!("DROP PROCEDURE IF EXISTS [{}];", temp);
                if let Err(cleanup_err) = conn.batch(&cleanup).await {
                    tracing::debug!(error = %cleanup_err, "temp procedure cleanup failed");
                }

                let issue = self.issue_from_error(&err);
                tracing::debug!(message = %issue.message, line = ?issue.line, "temp-compile failed");
                Ok(vec![issue])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::MssqlErrorParser;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sprocket_connection::RegistryConfig;
    use sprocket_core::{
        Connection, Connector, ParsedEngineError, QueryResult, TenantConfigProvider,
        TenantConnectionConfig, Value,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Connection that records batches and can fail the first one
    struct ScriptedConnection {
        batches: Mutex<Vec<String>>,
        fail_first_batch: AtomicBool,
    }

    impl ScriptedConnection {
        fn new(fail_first_batch: bool) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail_first_batch: AtomicBool::new(fail_first_batch),
            }
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn driver_name(&self) -> &str {
            "scripted"
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }

        async fn batch(&self, sql: &str) -> Result<()> {
            self.batches.lock().push(sql.to_string());
            if self.fail_first_batch.swap(false, Ordering::SeqCst) {
                return Err(SprocketError::Engine(ParsedEngineError::message_only(
                    "Msg 102, Level 15, State 1, Line 4: Incorrect syntax near 'FORM'.",
                )));
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct ScriptedConnector {
        connection: Arc<ScriptedConnection>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            _tenant_id: Uuid,
            _config: &TenantConnectionConfig,
        ) -> Result<Arc<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.connection.clone())
        }
    }

    struct OneTenantProvider(Uuid);

    #[async_trait]
    impl TenantConfigProvider for OneTenantProvider {
        async fn fetch(&self, tenant_id: Uuid) -> Result<TenantConnectionConfig> {
            if tenant_id == self.0 {
                Ok(TenantConnectionConfig::new("localhost", 1433, "db", "u", "p"))
            } else {
                Err(SprocketError::NotFound("tenant".to_string()))
            }
        }
    }

    fn validator_with(
        tenant: Uuid,
        fail_first_batch: bool,
    ) -> (TempCompileValidator, Arc<ScriptedConnection>, Arc<ScriptedConnector>) {
        let connection = Arc::new(ScriptedConnection::new(fail_first_batch));
        let connector = Arc::new(ScriptedConnector {
            connection: connection.clone(),
            connects: AtomicUsize::new(0),
        });
        let registry = Arc::new(TenantRegistry::new(
            RegistryConfig::new(4),
            Arc::new(OneTenantProvider(tenant)),
            connector.clone(),
        ));
        let validator = TempCompileValidator::new(registry, Arc::new(MssqlErrorParser::new()));
        (validator, connection, connector)
    }

    const GOOD_SQL: &str = "CREATE PROCEDURE GetUsers\nAS\nBEGIN\n  SELECT 1\nEND";

    #[tokio::test]
    async fn valid_sql_returns_no_issues() {
        let tenant = Uuid::new_v4();
        let (validator, connection, _) = validator_with(tenant, false);

        let issues = validator.validate(tenant, GOOD_SQL).await.expect("validate");
        assert!(issues.is_empty());

        let batches = connection.batches.lock();
        assert_eq!(batches.len(), 1);
        // Create and drop run as one batch, against a temp name.
        assert!(batches[0].contains("CREATE PROCEDURE [sprk_check_"));
        assert!(batches[0].contains("DROP PROCEDURE [sprk_check_"));
        assert!(!batches[0].contains("GetUsers"));
    }

    #[tokio::test]
    async fn repeated_validation_uses_fresh_temp_names() {
        let tenant = Uuid::new_v4();
        let (validator, connection, _) = validator_with(tenant, false);

        validator.validate(tenant, GOOD_SQL).await.expect("first");
        validator.validate(tenant, GOOD_SQL).await.expect("second");

        let batches = connection.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_ne!(batches[0], batches[1]);
    }

    #[tokio::test]
    async fn missing_header_never_touches_the_connection() {
        let tenant = Uuid::new_v4();
        let (validator, connection, connector) = validator_with(tenant, false);

        let issues = validator
            .validate(tenant, "SELECT * FROM Users")
            .await
            .expect("validate");

        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
        assert!(connection.batches.lock().is_empty());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn engine_failure_becomes_one_parsed_issue_with_cleanup() {
        let tenant = Uuid::new_v4();
        let (validator, connection, _) = validator_with(tenant, true);

        let issues = validator.validate(tenant, GOOD_SQL).await.expect("validate");

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert!(issue.is_error());
        assert_eq!(issue.line, Some(4));
        assert_eq!(issue.code, Some(102));
        assert_eq!(issue.near.as_deref(), Some("FORM"));
        // Vendor prefix was stripped before the issue reached us.
        assert!(!issue.message.contains("Msg 102"));

        // Second batch is the best-effort cleanup drop.
        let batches = connection.batches.lock();
        assert_eq!(batches.len(), 2);
        assert!(batches[1].starts_with("DROP PROCEDURE IF EXISTS [sprk_check_"));
    }

    #[tokio::test]
    async fn unknown_tenant_is_an_error_not_an_issue() {
        let tenant = Uuid::new_v4();
        let (validator, _, _) = validator_with(tenant, false);

        let err = validator
            .validate(Uuid::new_v4(), GOOD_SQL)
            .await
            .unwrap_err();
        assert!(matches!(err, SprocketError::NotFound(_)));
    }

    #[test]
    fn temp_names_are_unique() {
        let a = TempCompileValidator::temp_name();
        let b = TempCompileValidator::temp_name();
        assert_ne!(a, b);
        assert!(a.starts_with("sprk_check_"));
    }
}
