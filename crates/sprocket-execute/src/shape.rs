//! Result shaping for execution responses

use serde::{Deserialize, Serialize};
use sprocket_core::{QueryResult, Row, Value};

/// Coarse column type inferred from the first row's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Null,
    Integer,
    Decimal,
    Boolean,
    Datetime,
    String,
    Unknown,
}

/// One column of a shaped result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

/// A result set shaped for the caller: capped rows, inferred columns
#[derive(Debug, Clone)]
pub struct ShapedResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Number of rows returned (after the cap)
    pub row_count: usize,
    /// Whether rows beyond the cap were dropped
    pub truncated: bool,
}

fn infer_kind(value: &Value) -> ColumnKind {
    match value {
        Value::Null => ColumnKind::Null,
        Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => ColumnKind::Integer,
        Value::Float32(_) | Value::Float64(_) | Value::Decimal(_) => ColumnKind::Decimal,
        Value::Bool(_) => ColumnKind::Boolean,
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::DateTimeUtc(_) => {
            ColumnKind::Datetime
        }
        Value::String(_) | Value::Uuid(_) => ColumnKind::String,
        Value::Bytes(_) | Value::Json(_) => ColumnKind::Unknown,
    }
}

/// Shape a raw query result: derive columns from the first row, infer
/// each column's kind from its first-row value, and cap the row count.
///
/// Truncation is silent toward the caller (the flag is informational);
/// the engine logs it.
pub fn shape(result: QueryResult, row_cap: usize) -> ShapedResult {
    let columns = match result.rows.first() {
        Some(first) => first
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| ColumnInfo {
                name: name.clone(),
                kind: first.get(idx).map(infer_kind).unwrap_or(ColumnKind::Unknown),
            })
            .collect(),
        None => Vec::new(),
    };

    let total = result.rows.len();
    let truncated = total > row_cap;
    let mut rows = result.rows;
    rows.truncate(row_cap);

    ShapedResult {
        columns,
        row_count: rows.len(),
        truncated,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_rows(rows: Vec<Vec<Value>>, columns: Vec<&str>) -> QueryResult {
        let names: Vec<String> = columns.into_iter().map(String::from).collect();
        QueryResult {
            columns: Vec::new(),
            rows: rows
                .into_iter()
                .map(|values| Row::new(names.clone(), values))
                .collect(),
            affected_rows: 0,
            execution_time_ms: 0,
        }
    }

    #[test]
    fn infers_kinds_from_first_row() {
        let result = result_with_rows(
            vec![vec![
                Value::Int64(1),
                Value::String("a".into()),
                Value::Bool(true),
                Value::Float64(1.5),
                Value::Null,
            ]],
            vec!["id", "name", "active", "score", "notes"],
        );

        let shaped = shape(result, 100);
        let kinds: Vec<ColumnKind> = shaped.columns.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Integer,
                ColumnKind::String,
                ColumnKind::Boolean,
                ColumnKind::Decimal,
                ColumnKind::Null,
            ]
        );
    }

    #[test]
    fn empty_result_has_no_columns() {
        let shaped = shape(result_with_rows(vec![], vec![]), 100);
        assert!(shaped.columns.is_empty());
        assert_eq!(shaped.row_count, 0);
        assert!(!shaped.truncated);
    }

    #[test]
    fn rows_are_capped() {
        let rows = (0..10).map(|i| vec![Value::Int32(i)]).collect();
        let shaped = shape(result_with_rows(rows, vec!["n"]), 3);
        assert_eq!(shaped.row_count, 3);
        assert_eq!(shaped.rows.len(), 3);
        assert!(shaped.truncated);
    }

    #[test]
    fn cap_equal_to_row_count_is_not_truncation() {
        let rows = (0..3).map(|i| vec![Value::Int32(i)]).collect();
        let shaped = shape(result_with_rows(rows, vec!["n"]), 3);
        assert_eq!(shaped.row_count, 3);
        assert!(!shaped.truncated);
    }
}
