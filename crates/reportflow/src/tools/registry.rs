//! Immutable-after-startup tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    chart_spec::ChartSpecTool, schema::GetColumnsTool, schema::ListTablesTool,
    sql_execute::SqlExecuteTool, sql_refine::SqlRefineTool, sql_validate::SqlValidateTool,
    time_window::TimeWindowTool, Tool,
};
use crate::error::{Error, Result};

/// Holds the required tools keyed by name; lookups after startup never
/// insert, matching "immutable after pipeline startup" from the component
/// design.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build a registry containing every required tool (§4.1).
    #[must_use]
    pub fn with_default_tools() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register(Arc::new(ListTablesTool));
        registry.register(Arc::new(GetColumnsTool));
        registry.register(Arc::new(TimeWindowTool));
        registry.register(Arc::new(SqlValidateTool));
        registry.register(Arc::new(SqlExecuteTool));
        registry.register(Arc::new(SqlRefineTool));
        registry.register(Arc::new(ChartSpecTool));
        registry
    }

    /// Register a tool, keyed by its own `name()`.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Look up a tool by name; a miss is fatal to the current step, never retried.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// One-line `(name, description)` pairs for building the planner prompt.
    #[must_use]
    pub fn descriptors(&self) -> Vec<(&'static str, &'static str)> {
        let mut entries: Vec<_> = self
            .tools
            .values()
            .map(|t| (t.name(), t.description()))
            .collect();
        entries.sort_unstable();
        entries
    }
}
