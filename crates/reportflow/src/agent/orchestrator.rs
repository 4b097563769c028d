//! The bounded Plan-Tool-Active-Validate loop: both the full generation mode
//! and the fast validate-only repair mode, plus the thrash-detecting pattern
//! detector that lets either mode exit before the iteration ceiling.

use std::sync::Arc;

use crate::collaborators::LLMClient;
use crate::config::PipelineConfig;
use crate::ids::{ExecutionId, PlaceholderId};
use crate::model::Observation;
use crate::progress::ProgressRecorder;
use crate::resource_pool::{ResourcePool, ResourceValue};
use crate::tools::registry::ToolRegistry;

use super::planner::Planner;
use super::step_executor::StepExecutor;
use super::validator::{ValidationGoal, Validator};

const PATTERN_WINDOW: usize = 3;

/// Outcome of running the PTAV loop to completion (success, iteration
/// exhaustion, or early pattern-detector exit).
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub success: bool,
    pub content: Option<String>,
    pub iterations: u32,
    pub reason: String,
}

/// After every iteration, looks for thrash signals in the last
/// [`PATTERN_WINDOW`] observations: repeated identical tool+input, repeated
/// identical error, or no change to `sql:current`.
pub struct PatternDetector;

impl PatternDetector {
    /// Whether the loop should stop early given the accumulated history and
    /// the sequence of `sql:current` snapshots taken after each iteration.
    #[must_use]
    pub fn should_exit(history: &[Observation], sql_snapshots: &[Option<String>]) -> bool {
        Self::same_tool_same_input_thrash(history)
            || Self::repeated_error(history)
            || Self::no_sql_change(sql_snapshots)
    }

    fn same_tool_same_input_thrash(history: &[Observation]) -> bool {
        if history.len() < PATTERN_WINDOW {
            return false;
        }
        let window = &history[history.len() - PATTERN_WINDOW..];
        window.windows(2).all(|pair| {
            pair[0].tool_name == pair[1].tool_name && pair[0].result == pair[1].result
        })
    }

    fn repeated_error(history: &[Observation]) -> bool {
        let errors: Vec<&str> = history
            .iter()
            .rev()
            .take(PATTERN_WINDOW)
            .filter_map(|o| o.error.as_deref())
            .collect();
        errors.len() == PATTERN_WINDOW && errors.windows(2).all(|pair| pair[0] == pair[1])
    }

    fn no_sql_change(sql_snapshots: &[Option<String>]) -> bool {
        if sql_snapshots.len() < PATTERN_WINDOW {
            return false;
        }
        let window = &sql_snapshots[sql_snapshots.len() - PATTERN_WINDOW..];
        window.windows(2).all(|pair| pair[0] == pair[1])
    }
}

/// Runs both PTAV modes for one placeholder.
pub struct PTAVOrchestrator {
    planner: Planner,
    executor: StepExecutor,
    llm: Arc<dyn LLMClient>,
    config: Arc<PipelineConfig>,
    progress: ProgressRecorder,
}

impl PTAVOrchestrator {
    /// `phase_progress` is the execution's percent-complete at the moment
    /// Phase 3 began; every tool-call event this orchestrator's loop emits
    /// is stamped with it so per-step events never regress progress below
    /// the phase's own floor (§8 Testable Property 1).
    #[must_use]
    pub fn new(
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LLMClient>,
        data_source: Arc<dyn crate::collaborators::DataSourceConnector>,
        data_source_id: crate::ids::DataSourceId,
        config: Arc<PipelineConfig>,
        progress: ProgressRecorder,
        phase_progress: f64,
    ) -> Self {
        let planner = Planner::new(Arc::clone(&llm), Arc::clone(&tools));
        let executor = StepExecutor::new(
            tools,
            data_source,
            data_source_id,
            Arc::clone(&config),
            progress.clone(),
            phase_progress,
        );
        Self {
            planner,
            executor,
            llm,
            config,
            progress,
        }
    }

    /// Full generation mode: plan, execute, validate, repeat up to
    /// `agent_max_iterations`, exiting early on a validated goal or a
    /// detected thrash pattern.
    pub async fn generate(
        &self,
        goal: &str,
        pool: &Arc<ResourcePool>,
        execution_id: ExecutionId,
        placeholder_id: PlaceholderId,
    ) -> AgentOutput {
        let mut history: Vec<Observation> = Vec::new();
        let mut sql_snapshots: Vec<Option<String>> = Vec::new();

        for iteration in 1..=self.config.agent_max_iterations {
            let plan = match self.planner.plan(goal, pool, &history).await {
                Ok(plan) => plan,
                Err(e) => {
                    return AgentOutput {
                        success: false,
                        content: current_sql(pool),
                        iterations: iteration,
                        reason: format!("planner failed: {e}"),
                    }
                }
            };

            let partial = self
                .executor
                .execute(&plan, pool, &mut history, execution_id, placeholder_id)
                .await;

            if let Some(sql) = extract_sql_draft(&partial.observations) {
                pool.put("sql:current", ResourceValue::SqlDraft(sql));
            }
            sql_snapshots.push(current_sql(pool));

            let outcome = Validator::check(ValidationGoal::Generate, pool, &history);
            if outcome.goal_achieved {
                return AgentOutput {
                    success: true,
                    content: current_sql(pool),
                    iterations: iteration,
                    reason: outcome.reason,
                };
            }

            if PatternDetector::should_exit(&history, &sql_snapshots) {
                return AgentOutput {
                    success: false,
                    content: current_sql(pool),
                    iterations: iteration,
                    reason: "pattern detector exited loop: no further progress expected".to_string(),
                };
            }
        }

        AgentOutput {
            success: false,
            content: current_sql(pool),
            iterations: self.config.agent_max_iterations,
            reason: "iteration_exhausted".to_string(),
        }
    }

    /// Validate-only repair mode (§4.6.2): skip the planner entirely, run
    /// `sql.validate` → (if invalid) one `sql.refine` → `sql.validate` again.
    pub async fn validate_only(
        &self,
        sql: &str,
        schema: &serde_json::Value,
        pool: &Arc<ResourcePool>,
    ) -> AgentOutput {
        pool.put("sql:current", ResourceValue::SqlDraft(sql.to_string()));

        let issues = crate::tools::sql_validate::validate(sql, schema);
        if issues.is_empty() {
            return AgentOutput {
                success: true,
                content: Some(sql.to_string()),
                iterations: 1,
                reason: "sql.validate passed on first attempt".to_string(),
            };
        }

        let (fixed, _notes) = crate::tools::sql_refine::deterministic_fixes(sql, schema);
        let repaired = match crate::tools::sql_refine::semantic_repair(
            self.llm.as_ref(),
            &fixed,
            &issues,
            schema,
        )
        .await
        {
            Ok(repaired) => repaired,
            Err(_) => fixed,
        };

        let second_issues = crate::tools::sql_validate::validate(&repaired, schema);
        pool.put("sql:current", ResourceValue::SqlDraft(repaired.clone()));

        if second_issues.is_empty() {
            AgentOutput {
                success: true,
                content: Some(repaired),
                iterations: 2,
                reason: "sql.refine repaired validation issues".to_string(),
            }
        } else {
            AgentOutput {
                success: false,
                content: Some(repaired),
                iterations: 2,
                reason: classify_unrepairable(&second_issues),
            }
        }
    }
}

/// Classify why validate-only repair could not recover, matching the
/// `{dialect_mismatch, lexical_error}` categories `AgentFacade` checks for
/// before falling through to full generation.
fn classify_unrepairable(issues: &[String]) -> String {
    if issues.iter().any(|i| i.contains("parentheses") || i.contains("forbidden")) {
        "lexical_error".to_string()
    } else if issues.iter().any(|i| i.contains("unknown identifier")) {
        "dialect_mismatch".to_string()
    } else {
        "unrepairable".to_string()
    }
}

fn current_sql(pool: &ResourcePool) -> Option<String> {
    match pool.get("sql:current") {
        Some(ResourceValue::SqlDraft(sql)) => Some(sql),
        _ => None,
    }
}

fn extract_sql_draft(observations: &[Observation]) -> Option<String> {
    observations
        .iter()
        .rev()
        .find(|o| o.tool_name == "sql.refine" && o.success)
        .and_then(|o| o.result.get("sql").and_then(|v| v.as_str()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(tool: &str, success: bool, result: serde_json::Value, error: Option<&str>) -> Observation {
        Observation {
            tool_name: tool.to_string(),
            success,
            result,
            error: error.map(str::to_string),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn thrash_detected_on_identical_repeated_calls() {
        let history = vec![
            obs("sql.validate", true, serde_json::json!({"valid": false}), None),
            obs("sql.validate", true, serde_json::json!({"valid": false}), None),
            obs("sql.validate", true, serde_json::json!({"valid": false}), None),
        ];
        assert!(PatternDetector::should_exit(&history, &[]));
    }

    #[test]
    fn repeated_identical_error_triggers_exit() {
        let history = vec![
            obs("sql.execute", false, serde_json::Value::Null, Some("timeout")),
            obs("sql.execute", false, serde_json::Value::Null, Some("timeout")),
            obs("sql.execute", false, serde_json::Value::Null, Some("timeout")),
        ];
        assert!(PatternDetector::should_exit(&history, &[]));
    }

    #[test]
    fn no_sql_change_across_three_iterations_triggers_exit() {
        let snapshots = vec![
            Some("SELECT 1".to_string()),
            Some("SELECT 1".to_string()),
            Some("SELECT 1".to_string()),
        ];
        assert!(PatternDetector::should_exit(&[], &snapshots));
    }

    #[test]
    fn progressing_state_does_not_trigger_exit() {
        let history = vec![
            obs("schema.list_tables", true, serde_json::json!({"tables": []}), None),
            obs("schema.get_columns", true, serde_json::json!({}), None),
            obs("sql.validate", true, serde_json::json!({"valid": true}), None),
        ];
        let snapshots = vec![None, Some("SELECT 1".to_string()), Some("SELECT 2".to_string())];
        assert!(!PatternDetector::should_exit(&history, &snapshots));
    }

    #[test]
    fn classify_unrepairable_maps_parenthesis_issue_to_lexical_error() {
        let issues = vec!["unbalanced parentheses: 1 open, 0 close".to_string()];
        assert_eq!(classify_unrepairable(&issues), "lexical_error");
    }
}
