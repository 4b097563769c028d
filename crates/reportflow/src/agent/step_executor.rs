//! Executes a [`Plan`]'s steps in order, resolving `$obs.<id>.<path>`
//! references against observation history before dispatching to a tool.

use std::sync::Arc;

use crate::ids::PlaceholderId;
use crate::model::{Observation, Plan};
use crate::progress::ProgressRecorder;
use crate::resource_pool::{ResourcePool, ResourceValue};
use crate::tools::registry::ToolRegistry;
use crate::tools::{ToolContext, ToolInput};
use crate::collaborators::DataSourceConnector;
use crate::config::PipelineConfig;
use crate::ids::{DataSourceId, ExecutionId};

/// What a step list produced: either every step ran, or the list was
/// aborted partway through.
#[derive(Debug)]
pub struct PartialResult {
    pub observations: Vec<Observation>,
    pub aborted: bool,
}

/// Runs plans against a [`ToolRegistry`], threading observation history
/// through `$obs.<id>.<path>` reference resolution.
pub struct StepExecutor {
    tools: Arc<ToolRegistry>,
    data_source: Arc<dyn DataSourceConnector>,
    data_source_id: DataSourceId,
    config: Arc<PipelineConfig>,
    progress: ProgressRecorder,
    /// The enclosing execution's percent-complete at the moment this
    /// executor's phase began; stamped on every tool-call event so they
    /// never report a progress regression (§8 Testable Property 1).
    phase_progress: f64,
}

impl StepExecutor {
    #[must_use]
    pub fn new(
        tools: Arc<ToolRegistry>,
        data_source: Arc<dyn DataSourceConnector>,
        data_source_id: DataSourceId,
        config: Arc<PipelineConfig>,
        progress: ProgressRecorder,
        phase_progress: f64,
    ) -> Self {
        Self {
            tools,
            data_source,
            data_source_id,
            config,
            progress,
            phase_progress,
        }
    }

    /// Execute every step in `plan` against `pool`, appending observations to
    /// `history` as they complete. Stops and reports `aborted=true` on the
    /// first failing step.
    pub async fn execute(
        &self,
        plan: &Plan,
        pool: &Arc<ResourcePool>,
        history: &mut Vec<Observation>,
        execution_id: ExecutionId,
        placeholder_id: PlaceholderId,
    ) -> PartialResult {
        let mut produced = Vec::new();
        let ctx = ToolContext {
            pool: Arc::clone(pool),
            data_source: Arc::clone(&self.data_source),
            data_source_id: self.data_source_id,
            config: Arc::clone(&self.config),
        };

        for (idx, step) in plan.steps.iter().enumerate() {
            let resolved_input = resolve_references(&step.input, pool);
            let started = std::time::Instant::now();

            let input = match ToolInput::from_call(&step.tool, resolved_input) {
                Ok(input) => input,
                Err(e) => {
                    let obs = Observation {
                        tool_name: step.tool.clone(),
                        success: false,
                        result: serde_json::Value::Null,
                        error: Some(e.to_string()),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    record_observation(pool, history, &mut produced, idx, obs);
                    return PartialResult {
                        observations: produced,
                        aborted: true,
                    };
                }
            };

            let tool = match self.tools.get(&step.tool) {
                Ok(tool) => tool,
                Err(e) => {
                    let obs = Observation {
                        tool_name: step.tool.clone(),
                        success: false,
                        result: serde_json::Value::Null,
                        error: Some(e.to_string()),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    record_observation(pool, history, &mut produced, idx, obs);
                    return PartialResult {
                        observations: produced,
                        aborted: true,
                    };
                }
            };

            let observation = tool.execute(input, &ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let obs = Observation {
                tool_name: step.tool.clone(),
                success: observation.success,
                result: observation.result,
                error: observation.error.clone(),
                elapsed_ms,
            };

            self.progress.emit(
                execution_id,
                crate::model::ExecutionStatus::Analyzing,
                self.phase_progress,
                format!(
                    "placeholder {placeholder_id}: {} {}",
                    step.tool,
                    if obs.success { "ok" } else { "failed" }
                ),
                None,
                obs.error.clone(),
            );

            let failed = !obs.success;
            record_observation(pool, history, &mut produced, idx, obs);
            if failed {
                return PartialResult {
                    observations: produced,
                    aborted: true,
                };
            }
        }

        PartialResult {
            observations: produced,
            aborted: false,
        }
    }
}

/// Appends `obs` to both the caller's running `history` and `produced`, and
/// writes it into the pool under a stable per-step key (`$obs.<idx>.<path>`
/// references resolve against this) as well as the rolling `observations:history`
/// snapshot the pool is required to carry.
fn record_observation(
    pool: &ResourcePool,
    history: &mut Vec<Observation>,
    produced: &mut Vec<Observation>,
    idx: usize,
    obs: Observation,
) {
    pool.put(idx.to_string(), ResourceValue::Observation(obs.clone()));
    produced.push(obs.clone());
    history.push(obs);
    let snapshot = serde_json::to_value(&*history).unwrap_or(serde_json::Value::Null);
    pool.put("observations:history", ResourceValue::Json(snapshot));
}

/// Resolve `$obs.<key>.<path>` string values against the pool, leaving every
/// other value untouched.
fn resolve_references(
    input: &serde_json::Map<String, serde_json::Value>,
    pool: &ResourcePool,
) -> serde_json::Map<String, serde_json::Value> {
    let mut resolved = input.clone();
    for value in resolved.values_mut() {
        resolve_value(value, pool);
    }
    resolved
}

fn resolve_value(value: &mut serde_json::Value, pool: &ResourcePool) {
    match value {
        serde_json::Value::String(s) if s.starts_with("$obs.") => {
            let rest = &s[5..];
            if let Some((key, path)) = rest.split_once('.') {
                if let Some(resolved) = pool.resolve_reference(key, path) {
                    *value = resolved;
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_value(item, pool);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values_mut() {
                resolve_value(v, pool);
            }
        }
        _ => {}
    }
}
