//! `sql.execute`: runs SQL through the configured [`DataSourceConnector`],
//! accepting either positional-tuple or keyed-record row shapes and always
//! exposing `primary_value` as the first cell of the first row.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolInput, ToolObservation};
use crate::collaborators::QueryResult;

/// Extract the first cell of the first row regardless of whether rows are
/// JSON arrays (positional) or JSON objects (keyed).
#[must_use]
pub fn primary_value(result: &QueryResult) -> Option<Value> {
    let first_row = result.rows.first()?;
    match first_row {
        Value::Array(cells) => cells.first().cloned(),
        Value::Object(map) => {
            if let Some(first_column) = result.columns.first() {
                if let Some(v) = map.get(&first_column.name) {
                    return Some(v.clone());
                }
            }
            map.values().next().cloned()
        }
        other => Some(other.clone()),
    }
}

/// `sql.execute` tool.
#[derive(Debug)]
pub struct SqlExecuteTool;

#[async_trait]
impl Tool for SqlExecuteTool {
    fn name(&self) -> &'static str {
        "sql.execute"
    }

    fn description(&self) -> &'static str {
        "Execute a SQL statement against the data source and return its rows."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"sql": {"type": "string"}, "parameters": {"type": "array"}},
            "required": ["sql"],
        })
    }

    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolObservation {
        let ToolInput::SqlExecute { sql, parameters } = input else {
            return ToolObservation::failed("unexpected input for sql.execute");
        };
        match ctx
            .data_source
            .execute(&sql, &parameters, ctx.config.sql_execute_timeout)
            .await
        {
            Ok(result) => {
                let primary = primary_value(&result);
                ToolObservation::ok(json!({
                    "rows": result.rows,
                    "row_count": result.row_count,
                    "elapsed_ms": result.elapsed_ms,
                    "primary_value": primary,
                }))
            }
            Err(e) => ToolObservation::failed(e.to_string()),
        }
    }
}
