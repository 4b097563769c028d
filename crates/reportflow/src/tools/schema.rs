//! `schema.list_tables` and `schema.get_columns`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolInput, ToolObservation};
use crate::resource_pool::ResourceValue;

/// Lists tables visible on the configured data source.
#[derive(Debug)]
pub struct ListTablesTool;

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &'static str {
        "schema.list_tables"
    }

    fn description(&self) -> &'static str {
        "List the tables available on the current data source."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolObservation {
        if !matches!(input, ToolInput::SchemaListTables {}) {
            return ToolObservation::failed("unexpected input for schema.list_tables");
        }
        match ctx.data_source.list_tables().await {
            Ok(tables) => ToolObservation::ok(json!({"tables": tables})),
            Err(e) => ToolObservation::failed(e.to_string()),
        }
    }
}

/// Fetches column metadata for a set of tables, caching each under
/// `schema:<table>` in the resource pool.
#[derive(Debug)]
pub struct GetColumnsTool;

#[async_trait]
impl Tool for GetColumnsTool {
    fn name(&self) -> &'static str {
        "schema.get_columns"
    }

    fn description(&self) -> &'static str {
        "Fetch column name, type, nullability and comment for the given tables."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"tables": {"type": "array", "items": {"type": "string"}}},
            "required": ["tables"],
        })
    }

    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolObservation {
        let ToolInput::SchemaGetColumns { tables } = input else {
            return ToolObservation::failed("unexpected input for schema.get_columns");
        };
        match ctx.data_source.get_columns(&tables).await {
            Ok(by_table) => {
                for (table, columns) in &by_table {
                    ctx.pool.put(
                        format!("schema:{table}"),
                        ResourceValue::SchemaSnapshot(serde_json::to_value(columns).unwrap_or(Value::Null)),
                    );
                }
                ToolObservation::ok(serde_json::to_value(&by_table).unwrap_or(Value::Null))
            }
            Err(e) => ToolObservation::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ColumnMeta, ConnectorError, DataSourceConnector, QueryResult};
    use crate::config::PipelineConfig;
    use crate::ids::DataSourceId;
    use crate::resource_pool::ResourcePool;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct StubConnector;

    #[async_trait]
    impl DataSourceConnector for StubConnector {
        async fn list_tables(&self) -> Result<Vec<String>, ConnectorError> {
            Ok(vec!["orders".to_string()])
        }

        async fn get_columns(
            &self,
            tables: &[String],
        ) -> Result<HashMap<String, Vec<ColumnMeta>>, ConnectorError> {
            let mut map = HashMap::new();
            for table in tables {
                map.insert(
                    table.clone(),
                    vec![ColumnMeta {
                        column: "id".into(),
                        type_name: "bigint".into(),
                        nullable: false,
                        comment: None,
                    }],
                );
            }
            Ok(map)
        }

        async fn execute(
            &self,
            _sql: &str,
            _parameters: &[Value],
            _timeout: std::time::Duration,
        ) -> Result<QueryResult, ConnectorError> {
            unimplemented!("not exercised by schema tool tests")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            pool: Arc::new(ResourcePool::new()),
            data_source: Arc::new(StubConnector),
            data_source_id: DataSourceId::new(),
            config: Arc::new(PipelineConfig::for_tests()),
        }
    }

    #[tokio::test]
    async fn list_tables_delegates_to_connector() {
        let tool = ListTablesTool;
        let obs = tool.execute(ToolInput::SchemaListTables {}, &ctx()).await;
        assert!(obs.success);
        assert_eq!(obs.result["tables"], json!(["orders"]));
    }

    #[tokio::test]
    async fn get_columns_caches_snapshot_in_pool() {
        let tool = GetColumnsTool;
        let context = ctx();
        let obs = tool
            .execute(
                ToolInput::SchemaGetColumns {
                    tables: vec!["orders".to_string()],
                },
                &context,
            )
            .await;
        assert!(obs.success);
        assert!(context.pool.get("schema:orders").is_some());
    }
}
