//! Cached tabular results.
//!
//! Each stored result lives in its own physical table named from the result
//! id. Everything that turns caller data into SQL identifiers is in this
//! module so it can be checked without a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::domain::errors::{DomainError, DomainResult};

pub const RESULT_TABLE_PREFIX: &str = "tool_result_";

/// Hidden column that keeps rows in insertion order.
pub const ORDINAL_COLUMN: &str = "__row_ordinal";

/// Hidden column carrying the owning tenant, checked by the table's policy.
pub const TENANT_COLUMN: &str = "__tenant_id";

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

const MAX_RESULT_ID_BYTES: usize = MAX_IDENTIFIER_BYTES - RESULT_TABLE_PREFIX.len();

/// Per-column overhead used by the size estimate.
const COLUMN_OVERHEAD_BYTES: i64 = 20;

/// Tabular payload in one of the two shapes execution backends produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TabularData {
    /// One JSON object per row
    Records(Vec<Map<String, Value>>),
    /// One JSON array per row
    Rows(Vec<Vec<Value>>),
}

impl TabularData {
    pub fn row_count(&self) -> usize {
        match self {
            Self::Records(rows) => rows.len(),
            Self::Rows(rows) => rows.len(),
        }
    }

    /// Column names, in the order the table will be created with.
    ///
    /// Records yield the sorted union of their keys. Arrays yield
    /// `col1..colN` where N is the length of the longest row.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Records(rows) => rows
                .iter()
                .flat_map(|row| row.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Self::Rows(rows) => {
                let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                (1..=width).map(|i| format!("col{i}")).collect()
            }
        }
    }

    /// Row values rendered as text and aligned with `columns`.
    /// Missing cells and JSON nulls become `None`.
    pub fn text_rows(&self, columns: &[String]) -> Vec<Vec<Option<String>>> {
        match self {
            Self::Records(rows) => rows
                .iter()
                .map(|row| columns.iter().map(|c| row.get(c).and_then(render_value)).collect())
                .collect(),
            Self::Rows(rows) => rows
                .iter()
                .map(|row| {
                    (0..columns.len())
                        .map(|i| row.get(i).and_then(render_value))
                        .collect()
                })
                .collect(),
        }
    }
}

impl TryFrom<Value> for TabularData {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Array(items) = value else {
            return Err(DomainError::Validation(
                "tabular data must be a JSON array of rows".to_string(),
            ));
        };

        if items.iter().all(Value::is_object) {
            let rows = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            return Ok(Self::Records(rows));
        }

        if items.iter().all(Value::is_array) {
            let rows = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Array(cells) => Some(cells),
                    _ => None,
                })
                .collect();
            return Ok(Self::Rows(rows));
        }

        Err(DomainError::Validation(
            "rows must be all objects or all arrays".to_string(),
        ))
    }
}

/// Metadata row describing one stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub id: String,
    pub user_id: String,
    pub table_name: String,
    pub row_count: i64,
    pub column_count: i32,
    pub columns: Vec<String>,
    pub stored_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub size_bytes: i64,
}

/// Full contents of a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.clone().map_or(Value::Null, Value::String)))
                    .collect()
            })
            .collect()
    }
}

/// Render a JSON value as the text stored in a result table.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Check a result id and derive its physical table name.
pub fn result_table_name(result_id: &str) -> DomainResult<String> {
    validate_result_id(result_id)?;
    Ok(format!("{RESULT_TABLE_PREFIX}{result_id}"))
}

pub fn validate_result_id(result_id: &str) -> DomainResult<()> {
    if result_id.is_empty() {
        return Err(DomainError::InvalidIdentifier("result id cannot be empty".to_string()));
    }
    if result_id.len() > MAX_RESULT_ID_BYTES {
        return Err(DomainError::InvalidIdentifier(format!(
            "result id exceeds {MAX_RESULT_ID_BYTES} bytes"
        )));
    }
    if !result_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DomainError::InvalidIdentifier(format!(
            "result id {result_id:?} may only contain ASCII letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Column names are quoted, so only the cases quoting cannot fix are rejected.
pub fn validate_column_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::InvalidIdentifier("column name cannot be empty".to_string()));
    }
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(DomainError::InvalidIdentifier(format!(
            "column name {name:?} exceeds {MAX_IDENTIFIER_BYTES} bytes"
        )));
    }
    if name.contains('\0') {
        return Err(DomainError::InvalidIdentifier(
            "column name contains a NUL byte".to_string(),
        ));
    }
    if name == ORDINAL_COLUMN || name == TENANT_COLUMN {
        return Err(DomainError::InvalidIdentifier(format!(
            "column name {name} is reserved"
        )));
    }
    Ok(())
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rough storage footprint of a result: per-column overhead plus value bytes.
pub fn estimate_size(columns: &[String], rows: &[Vec<Option<String>>]) -> i64 {
    let overhead = i64::try_from(columns.len()).unwrap_or(i64::MAX).saturating_mul(COLUMN_OVERHEAD_BYTES);
    rows.iter()
        .flatten()
        .flatten()
        .fold(overhead, |acc, v| acc.saturating_add(i64::try_from(v.len()).unwrap_or(i64::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn records(value: Value) -> TabularData {
        TabularData::try_from(value).unwrap()
    }

    #[test]
    fn test_record_columns_are_sorted_union() {
        let data = records(json!([{"name": "alpha", "id": 1}, {"id": 2, "extra": true}]));
        assert_eq!(data.columns(), vec!["extra", "id", "name"]);
    }

    #[test]
    fn test_array_columns_use_longest_row() {
        let data = records(json!([[1, 2], [3, 4, 5]]));
        assert_eq!(data.columns(), vec!["col1", "col2", "col3"]);
        let rows = data.text_rows(&data.columns());
        assert_eq!(rows[0], vec![Some("1".into()), Some("2".into()), None]);
    }

    #[test]
    fn test_text_rows_preserve_nulls() {
        let data = records(json!([{"id": 1, "name": null}, {"id": 2}]));
        let columns = data.columns();
        let rows = data.text_rows(&columns);
        assert_eq!(rows, vec![vec![Some("1".into()), None], vec![Some("2".into()), None]]);
    }

    #[test]
    fn test_render_nested_values_as_json() {
        assert_eq!(render_value(&json!({"a": [1]})), Some(r#"{"a":[1]}"#.to_string()));
        assert_eq!(render_value(&json!("plain")), Some("plain".to_string()));
        assert_eq!(render_value(&json!(false)), Some("false".to_string()));
        assert_eq!(render_value(&Value::Null), None);
    }

    #[test]
    fn test_mixed_shapes_rejected() {
        let err = TabularData::try_from(json!([{"a": 1}, [1]])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(TabularData::try_from(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_empty_array_is_empty_records() {
        let data = records(json!([]));
        assert_eq!(data.row_count(), 0);
        assert!(data.columns().is_empty());
    }

    #[test]
    fn test_table_name_rejects_injection() {
        assert_eq!(result_table_name("R1").unwrap(), "tool_result_R1");
        for bad in ["", "r1; DROP TABLE sessions", "r\"1", "r'1", "r-1", "résumé"] {
            assert!(
                matches!(result_table_name(bad), Err(DomainError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(result_table_name(&"a".repeat(51)).is_ok());
        assert!(result_table_name(&"a".repeat(52)).is_err());
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_column_validation() {
        assert!(validate_column_name("first name").is_ok());
        assert!(validate_column_name("").is_err());
        assert!(validate_column_name(ORDINAL_COLUMN).is_err());
        assert!(validate_column_name(TENANT_COLUMN).is_err());
        assert!(validate_column_name(&"c".repeat(64)).is_err());
    }

    #[test]
    fn test_estimate_size() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![vec![Some("1".to_string()), Some("alpha".to_string())], vec![None, None]];
        assert_eq!(estimate_size(&columns, &rows), 40 + 6);
    }

    #[test]
    fn test_query_result_to_records() {
        let result = QueryResult {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![Some("1".into()), None]],
        };
        assert_eq!(result.to_records()[0], json!({"id": "1", "name": null}).as_object().unwrap().clone());
    }

    proptest! {
        #[test]
        fn prop_accepted_ids_produce_safe_table_names(id in ".{0,80}") {
            if let Ok(table) = result_table_name(&id) {
                prop_assert!(table.len() <= MAX_IDENTIFIER_BYTES);
                prop_assert!(table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            }
        }

        #[test]
        fn prop_quoted_ident_has_no_unpaired_quote(name in ".{1,40}") {
            let quoted = quote_ident(&name);
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert!(!inner.replace("\"\"", "").contains('"'));
        }

        #[test]
        fn prop_record_columns_are_sorted_and_unique(keys in proptest::collection::vec("[a-z]{1,8}", 0..12)) {
            let row: Map<String, Value> = keys.iter().map(|k| (k.clone(), Value::Null)).collect();
            let columns = TabularData::Records(vec![row]).columns();
            let mut expected = columns.clone();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(columns, expected);
        }
    }
}
