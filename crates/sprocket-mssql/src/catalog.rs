//! Routine catalog introspection for SQL Server

use async_trait::async_trait;
use sprocket_core::{CatalogIntrospection, Result, Value};

use crate::connection::MssqlConnection;

/// Split a possibly schema-qualified routine name into (schema, name),
/// stripping `[...]` or `"..."` quoting from each part.
pub(crate) fn split_routine_name(name: &str) -> (Option<String>, String) {
    let parts: Vec<&str> = name.splitn(2, '.').collect();
    let unquote = |part: &str| {
        let part = part.trim();
        part.strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .or_else(|| part.strip_prefix('"').and_then(|p| p.strip_suffix('"')))
            .unwrap_or(part)
            .to_string()
    };
    match parts.as_slice() {
        [schema, bare] => (Some(unquote(schema)), unquote(bare)),
        _ => (None, unquote(name)),
    }
}

#[async_trait]
impl CatalogIntrospection for MssqlConnection {
    async fn routine_exists(&self, name: &str) -> Result<bool> {
        let (schema, bare) = split_routine_name(name);

        let result = match schema {
            Some(schema) => {
                self.run_query(
                    "SELECT COUNT(*) AS n
                     FROM sys.procedures p
                     INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
                     WHERE p.name = @P1 AND s.name = @P2",
                    &[Value::String(bare), Value::String(schema)],
                )
                .await?
            }
            None => {
                self.run_query(
                    "SELECT COUNT(*) AS n FROM sys.procedures WHERE name = @P1",
                    &[Value::String(bare)],
                )
                .await?
            }
        };

        let count = result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn routine_definition(&self, name: &str) -> Result<Option<String>> {
        let result = self
            .run_query(
                "SELECT OBJECT_DEFINITION(OBJECT_ID(@P1)) AS definition",
                &[Value::String(name.to_string())],
            )
            .await?;

        let definition = result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        Ok(definition)
    }
}
