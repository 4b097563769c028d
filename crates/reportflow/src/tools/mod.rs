//! Tool registry: the PTAV loop's only means of touching the outside world.
//!
//! Follows the teacher's `Tool` trait shape (name/description/input_schema/
//! execute) but resolves the planner's `serde_json::Map` into a typed
//! [`ToolInput`] variant up front, so every handler's `execute` body works
//! with concrete fields rather than re-parsing JSON (§9 "Tool registry with
//! heterogeneous inputs").

pub mod chart_spec;
pub mod registry;
pub mod schema;
pub mod sql_execute;
pub mod sql_refine;
pub mod sql_validate;
pub mod time_window;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::collaborators::DataSourceConnector;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::ids::DataSourceId;
use crate::resource_pool::ResourcePool;

/// Services and scratch state visible to a tool while it executes.
pub struct ToolContext {
    pub pool: Arc<ResourcePool>,
    pub data_source: Arc<dyn DataSourceConnector>,
    pub data_source_id: DataSourceId,
    pub config: Arc<PipelineConfig>,
}

/// Typed input for one of the required tools, resolved from the planner's
/// JSON map at the registry boundary (the one place dynamic-map matching
/// happens).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolInput {
    #[serde(rename = "schema.list_tables")]
    SchemaListTables {},
    #[serde(rename = "schema.get_columns")]
    SchemaGetColumns { tables: Vec<String> },
    #[serde(rename = "time.window")]
    TimeWindow {
        granularity: String,
        now: Option<String>,
        offset: Option<i64>,
    },
    #[serde(rename = "sql.validate")]
    SqlValidate {
        sql: String,
        #[serde(default)]
        schema_snapshot: Value,
    },
    #[serde(rename = "sql.execute")]
    SqlExecute {
        sql: String,
        #[serde(default)]
        parameters: Vec<Value>,
    },
    #[serde(rename = "sql.refine")]
    SqlRefine {
        sql: String,
        #[serde(default)]
        issues: Vec<String>,
        #[serde(default)]
        schema: Value,
    },
    #[serde(rename = "chart.spec")]
    ChartSpec {
        rows: Value,
        placeholder_description: String,
    },
}

impl ToolInput {
    /// Parse a planner-provided `{tool, input}` pair into a typed variant.
    pub fn from_call(tool: &str, mut input: serde_json::Map<String, Value>) -> Result<Self> {
        input.insert("tool".to_string(), Value::String(tool.to_string()));
        serde_json::from_value(Value::Object(input))
            .map_err(|e| Error::ToolExecution {
                tool: tool.to_string(),
                message: format!("invalid input shape: {e}"),
            })
    }

    /// The registered tool name this input was built for.
    #[must_use]
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolInput::SchemaListTables {} => "schema.list_tables",
            ToolInput::SchemaGetColumns { .. } => "schema.get_columns",
            ToolInput::TimeWindow { .. } => "time.window",
            ToolInput::SqlValidate { .. } => "sql.validate",
            ToolInput::SqlExecute { .. } => "sql.execute",
            ToolInput::SqlRefine { .. } => "sql.refine",
            ToolInput::ChartSpec { .. } => "chart.spec",
        }
    }
}

/// Outcome of one tool call, convertible into a [`crate::model::Observation`].
#[derive(Debug, Clone)]
pub struct ToolObservation {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl ToolObservation {
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A tool callable from the PTAV loop.
#[async_trait]
pub trait Tool: std::fmt::Debug + Send + Sync {
    /// Stable name the planner refers to it by.
    fn name(&self) -> &'static str;
    /// One-line description included in the planner prompt.
    fn description(&self) -> &'static str;
    /// JSON Schema describing accepted input fields, for the planner prompt.
    fn input_schema(&self) -> Value;
    /// Run the tool against a pre-validated, typed input.
    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolObservation;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_call_parses_known_tool() {
        let mut input = serde_json::Map::new();
        input.insert("tables".to_string(), serde_json::json!(["orders"]));
        let parsed = ToolInput::from_call("schema.get_columns", input).unwrap();
        assert_eq!(parsed.tool_name(), "schema.get_columns");
    }

    #[test]
    fn from_call_rejects_unknown_tool() {
        let input = serde_json::Map::new();
        let err = ToolInput::from_call("not.a.tool", input).unwrap_err();
        assert!(matches!(err, Error::ToolExecution { .. }));
    }
}
