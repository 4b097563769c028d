//! Per-placeholder entry point: tries validate-only repair on any SQL the
//! placeholder already carries, falling through to full PTAV generation when
//! there is nothing to repair or the repair is unrepairable.

use std::sync::Arc;

use crate::ids::{ExecutionId, PlaceholderId};
use crate::model::Placeholder;
use crate::resource_pool::ResourcePool;

use super::orchestrator::{AgentOutput, PTAVOrchestrator};

/// Reasons `validate_only` may fail for which falling through to full PTAV
/// generation would not help: a dialect mismatch or lexical error is not
/// something regenerating the SQL from scratch is expected to fix (§4.7 step 3).
const UNREPAIRABLE_BUT_TERMINAL: &[&str] = &["dialect_mismatch", "lexical_error"];

/// Candidate sources for a placeholder's "currently known" SQL, checked in
/// priority order; the first non-empty one wins (§4.7 step 1).
pub struct CurrentSqlSources<'a> {
    pub ai_current_sql: Option<&'a str>,
    pub context_current_sql: Option<&'a str>,
    pub task_driven_context_current_sql: Option<&'a str>,
    pub data_source_sql_to_test: Option<&'a str>,
}

impl<'a> CurrentSqlSources<'a> {
    /// Resolve the first non-empty candidate.
    #[must_use]
    pub fn resolve(&self) -> Option<&'a str> {
        [
            self.ai_current_sql,
            self.context_current_sql,
            self.task_driven_context_current_sql,
            self.data_source_sql_to_test,
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
    }
}

/// Result returned to the caller, carrying enough metadata to decide what to
/// persist on the [`Placeholder`].
#[derive(Debug, Clone)]
pub struct AgentFacadeResult {
    pub success: bool,
    pub sql: Option<String>,
    pub generation_method: &'static str,
    pub iterations: u32,
    pub fallback_reason: Option<String>,
}

/// Runs the full `execute_task_validation` decision procedure for one
/// placeholder.
pub struct AgentFacade {
    orchestrator: PTAVOrchestrator,
}

impl AgentFacade {
    #[must_use]
    pub fn new(orchestrator: PTAVOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run validate-only first when existing SQL is available, falling
    /// through to full generation when it is absent or unrepairable.
    pub async fn execute_task_validation(
        &self,
        placeholder: &Placeholder,
        sources: &CurrentSqlSources<'_>,
        schema: &serde_json::Value,
        pool: &Arc<ResourcePool>,
        execution_id: ExecutionId,
    ) -> AgentFacadeResult {
        if let Some(existing_sql) = sources.resolve() {
            let outcome = self
                .orchestrator
                .validate_only(existing_sql, schema, pool)
                .await;
            if outcome.success {
                return AgentFacadeResult {
                    success: true,
                    sql: outcome.content,
                    generation_method: "validate_only",
                    iterations: outcome.iterations,
                    fallback_reason: None,
                };
            }
            if UNREPAIRABLE_BUT_TERMINAL.contains(&outcome.reason.as_str()) {
                return AgentFacadeResult {
                    success: false,
                    sql: outcome.content,
                    generation_method: "validate_only",
                    iterations: outcome.iterations,
                    fallback_reason: Some(outcome.reason),
                };
            }
            let fallback_reason = outcome.reason.clone();
            let generated = self.run_generation(placeholder, pool, execution_id).await;
            return AgentFacadeResult {
                success: generated.success,
                sql: generated.content,
                generation_method: "ptav_fallback",
                iterations: generated.iterations,
                fallback_reason: Some(fallback_reason),
            };
        }

        let generated = self.run_generation(placeholder, pool, execution_id).await;
        AgentFacadeResult {
            success: generated.success,
            sql: generated.content,
            generation_method: "ptav_generation",
            iterations: generated.iterations,
            fallback_reason: Some("no_existing_sql".to_string()),
        }
    }

    async fn run_generation(
        &self,
        placeholder: &Placeholder,
        pool: &Arc<ResourcePool>,
        execution_id: ExecutionId,
    ) -> AgentOutput {
        let goal = format!(
            "Derive a SQL query for placeholder '{}': {}",
            placeholder.name, placeholder.description
        );
        self.orchestrator
            .generate(&goal, pool, execution_id, placeholder.id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_first_non_empty_candidate_in_priority_order() {
        let sources = CurrentSqlSources {
            ai_current_sql: None,
            context_current_sql: Some(""),
            task_driven_context_current_sql: Some("SELECT 1"),
            data_source_sql_to_test: Some("SELECT 2"),
        };
        assert_eq!(sources.resolve(), Some("SELECT 1"));
    }

    #[test]
    fn resolves_none_when_every_candidate_is_empty_or_absent() {
        let sources = CurrentSqlSources {
            ai_current_sql: None,
            context_current_sql: Some("  "),
            task_driven_context_current_sql: None,
            data_source_sql_to_test: None,
        };
        assert_eq!(sources.resolve(), None);
    }

    #[test]
    fn prefers_ai_current_sql_over_everything_else() {
        let sources = CurrentSqlSources {
            ai_current_sql: Some("SELECT ai"),
            context_current_sql: Some("SELECT ctx"),
            task_driven_context_current_sql: None,
            data_source_sql_to_test: None,
        };
        assert_eq!(sources.resolve(), Some("SELECT ai"));
    }
}
