//! Time-marker substitution, execution, and result-shape normalization for
//! cached placeholder SQL (§4.8 Phase 4, §4.9).

use std::sync::Arc;

use crate::collaborators::{ConnectorError, DataSourceConnector, QueryResult};
use crate::tools::time_window::resolve_window;

/// Sentinel rendered into the document when a placeholder's ETL failed and
/// the execution still proceeds under tolerance (§4.8 Phase 5).
pub const DATA_UNAVAILABLE_SENTINEL: &str = "【placeholder: data unavailable】";

/// Outcome of running ETL for one placeholder.
#[derive(Debug, Clone)]
pub enum EtlOutcome {
    Success(serde_json::Value),
    Failed(String),
}

/// Substitutes `{{start_date}}`/`{{end_date}}` (and any other `{{name}}`
/// marker present in `window`) into `sql`, executes it, and normalizes the
/// result according to its row/column shape.
pub struct ETLRunner {
    data_source: Arc<dyn DataSourceConnector>,
}

impl ETLRunner {
    #[must_use]
    pub fn new(data_source: Arc<dyn DataSourceConnector>) -> Self {
        Self { data_source }
    }

    /// Substitute time markers from a resolved `{granularity, offset}`
    /// window, then execute and normalize.
    pub async fn run(
        &self,
        sql: &str,
        granularity: &str,
        offset: i64,
        timeout: std::time::Duration,
    ) -> EtlOutcome {
        let Some((start, end, _label)) = resolve_window(granularity, chrono::Utc::now(), offset) else {
            return EtlOutcome::Failed(format!("could not resolve time window for granularity '{granularity}'"));
        };
        let substituted = substitute_markers(sql, &start, &end);
        self.run_substituted(&substituted, timeout).await
    }

    /// Execute already-substituted SQL and normalize the result.
    pub async fn run_substituted(&self, sql: &str, timeout: std::time::Duration) -> EtlOutcome {
        match self.data_source.execute(sql, &[], timeout).await {
            Ok(result) => EtlOutcome::Success(normalize(&result)),
            Err(e) => EtlOutcome::Failed(describe_connector_error(&e)),
        }
    }
}

fn describe_connector_error(e: &ConnectorError) -> String {
    e.to_string()
}

/// Replace `{{start_date}}`, `{{end_date}}` and their `{{start}}`/`{{end}}`
/// aliases with resolved date strings.
#[must_use]
pub fn substitute_markers(sql: &str, start: &str, end: &str) -> String {
    sql.replace("{{start_date}}", start)
        .replace("{{end_date}}", end)
        .replace("{{start}}", start)
        .replace("{{end}}", end)
}

/// Reduce a raw query result to a typed value per §4.9's shape table:
/// 1x1 → scalar, 1xN → record, MxN → table (list of records).
#[must_use]
pub fn normalize(result: &QueryResult) -> serde_json::Value {
    match (result.rows.len(), result.columns.len()) {
        (1, 1) => first_cell(&result.rows[0]).unwrap_or(serde_json::Value::Null),
        (1, _) => row_to_record(&result.rows[0], &result.columns),
        _ => serde_json::Value::Array(
            result
                .rows
                .iter()
                .map(|row| row_to_record(row, &result.columns))
                .collect(),
        ),
    }
}

fn first_cell(row: &serde_json::Value) -> Option<serde_json::Value> {
    match row {
        serde_json::Value::Array(cells) => cells.first().cloned(),
        serde_json::Value::Object(map) => map.values().next().cloned(),
        other => Some(other.clone()),
    }
}

fn row_to_record(
    row: &serde_json::Value,
    columns: &[crate::collaborators::ColumnInfo],
) -> serde_json::Value {
    match row {
        serde_json::Value::Object(_) => row.clone(),
        serde_json::Value::Array(cells) => {
            let mut map = serde_json::Map::new();
            for (idx, column) in columns.iter().enumerate() {
                map.insert(
                    column.name.clone(),
                    cells.get(idx).cloned().unwrap_or(serde_json::Value::Null),
                );
            }
            serde_json::Value::Object(map)
        }
        other => {
            let mut map = serde_json::Map::new();
            if let Some(column) = columns.first() {
                map.insert(column.name.clone(), other.clone());
            }
            serde_json::Value::Object(map)
        }
    }
}

/// Build the `render_map` entry for a failed placeholder under tolerance
/// (§4.8 Phase 5).
#[must_use]
pub fn sentinel_value() -> serde_json::Value {
    serde_json::Value::String(DATA_UNAVAILABLE_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ColumnInfo;

    #[test]
    fn substitutes_both_date_markers() {
        let sql = "SELECT * FROM orders WHERE created_at BETWEEN '{{start_date}}' AND '{{end_date}}'";
        let substituted = substitute_markers(sql, "2026-06-01", "2026-06-30");
        assert_eq!(
            substituted,
            "SELECT * FROM orders WHERE created_at BETWEEN '2026-06-01' AND '2026-06-30'"
        );
    }

    #[test]
    fn normalizes_single_row_single_column_to_scalar() {
        let result = QueryResult {
            rows: vec![serde_json::json!([42])],
            columns: vec![ColumnInfo { name: "total".into(), type_name: "int8".into() }],
            row_count: 1,
            elapsed_ms: 1,
        };
        assert_eq!(normalize(&result), serde_json::json!(42));
    }

    #[test]
    fn normalizes_single_row_multi_column_to_record() {
        let result = QueryResult {
            rows: vec![serde_json::json!([1, "east"])],
            columns: vec![
                ColumnInfo { name: "id".into(), type_name: "int8".into() },
                ColumnInfo { name: "region".into(), type_name: "text".into() },
            ],
            row_count: 1,
            elapsed_ms: 1,
        };
        let normalized = normalize(&result);
        assert_eq!(normalized["id"], serde_json::json!(1));
        assert_eq!(normalized["region"], serde_json::json!("east"));
    }

    #[test]
    fn normalizes_multi_row_to_table() {
        let result = QueryResult {
            rows: vec![serde_json::json!([1]), serde_json::json!([2])],
            columns: vec![ColumnInfo { name: "id".into(), type_name: "int8".into() }],
            row_count: 2,
            elapsed_ms: 1,
        };
        let normalized = normalize(&result);
        assert!(normalized.is_array());
        assert_eq!(normalized.as_array().unwrap().len(), 2);
    }

    #[test]
    fn null_cells_are_preserved() {
        let result = QueryResult {
            rows: vec![serde_json::json!([serde_json::Value::Null])],
            columns: vec![ColumnInfo { name: "total".into(), type_name: "int8".into() }],
            row_count: 1,
            elapsed_ms: 1,
        };
        assert_eq!(normalize(&result), serde_json::Value::Null);
    }
}
