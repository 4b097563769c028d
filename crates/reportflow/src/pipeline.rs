//! `PlaceholderPipeline`: the eight ordered phases a single [`TaskExecution`]
//! advances through (§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, instrument, warn};

use crate::agent::facade::{AgentFacade, AgentFacadeResult, CurrentSqlSources};
use crate::agent::orchestrator::PTAVOrchestrator;
use crate::collaborators::AssembleOptions;
use crate::context::PipelineContext;
use crate::error::{Error, Result};
use crate::etl::{sentinel_value, ETLRunner, EtlOutcome};
use crate::ids::{ExecutionId, TaskId};
use crate::model::{ExecutionStatus, Placeholder, ResultBlob, TaskExecution};
use crate::resource_pool::ResourcePool;

/// Runs one `TaskExecution` through init, schema preload, placeholder
/// analysis, ETL, tolerance check, assembly, upload, and finalize.
pub struct PlaceholderPipeline {
    ctx: Arc<PipelineContext>,
}

impl PlaceholderPipeline {
    #[must_use]
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Run the full pipeline for `task_id` under a caller-allocated execution
    /// id, returning the finished execution. Never returns `Err` for
    /// per-item failures; those are captured in the returned execution's
    /// `status`/`result`/`error`.
    #[instrument(name = "placeholder_pipeline_run", skip(self), fields(task_id = %task_id))]
    pub async fn run(
        &self,
        execution_id: ExecutionId,
        task_id: TaskId,
        trigger_id: String,
    ) -> Result<TaskExecution> {
        let mut execution = TaskExecution::start_with_id(execution_id, task_id, trigger_id);
        self.emit(&execution, "execution created");

        // Phase 1: Init
        let (task, template, data_source) = match self.init(task_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                return Ok(self.fail(execution, &e).await);
            }
        };
        execution.transition(ExecutionStatus::Scanning, 5.0);
        self.emit(&execution, &format!("loaded task, template and data source '{}'", data_source.name));

        // Phase 2: Schema Context (non-fatal on miss)
        let placeholders = match self
            .ctx
            .repositories
            .placeholders
            .list_for_template(template.id)
            .await
        {
            Ok(mut placeholders) => {
                placeholders.sort_by_key(|p| p.created_at);
                placeholders
            }
            Err(e) => {
                warn!(error = %e, "could not list placeholders, proceeding with none");
                Vec::new()
            }
        };
        let pool = Arc::new(ResourcePool::new());
        self.preload_schema(&placeholders, &pool).await;
        execution.transition(ExecutionStatus::Analyzing, 15.0);
        self.emit(&execution, "schema context preloaded");

        // Phase 3: Placeholder Analysis
        let analyzed = self
            .analyze_placeholders(&placeholders, &pool, execution.id, task.data_source_id, execution.progress)
            .await;
        execution.transition(ExecutionStatus::Analyzing, 65.0);
        self.emit(&execution, "placeholder analysis complete");

        // Phase 4: ETL
        let etl_results = self.run_etl(&analyzed).await;
        execution.progress = execution.progress.max(85.0);
        self.emit(&execution, "etl complete");

        // Phase 5: Tolerance Check. A template with no placeholders has
        // nothing to tolerate and proceeds with an empty render map rather
        // than tripping the `success_count == 0` gate below.
        let failed_count = etl_results.values().filter(|r| matches!(r, EtlOutcome::Failed(_))).count();
        let success_count = etl_results.len() - failed_count;
        if !etl_results.is_empty()
            && (failed_count > self.ctx.config.max_failed_placeholders_for_doc as usize || success_count == 0)
        {
            let mut result = ResultBlob::default();
            result.failed_placeholders = etl_results
                .iter()
                .filter(|(_, r)| matches!(r, EtlOutcome::Failed(_)))
                .map(|(id, _)| *id)
                .collect();
            let (fallback_reasons, last_sql_attempts) = collect_fallback_diagnostics(&analyzed);
            result.fallback_reasons = fallback_reasons;
            result.last_sql_attempts = last_sql_attempts;
            execution.result = result;
            execution.error = Some("tolerance_exceeded: too many placeholders failed ETL".to_string());
            execution.transition(ExecutionStatus::Failed, 85.0);
            self.emit(&execution, "tolerance exceeded, execution failed");
            self.ctx.repositories.executions.upsert(execution.clone()).await?;
            return Ok(execution);
        }

        let render_map = self.build_render_map(&placeholders, &etl_results);

        // Phase 6: Document Assembly
        execution.transition(ExecutionStatus::Assembling, 85.0);
        let document = match self.assemble_with_retry(&template.source_ref, &render_map).await {
            Ok(document) => document,
            Err(e) => return Ok(self.fail(execution, &e).await),
        };
        execution.progress = execution.progress.max(92.0);
        self.emit(&execution, "document assembled");

        // Phase 7: Storage Upload. The key is derived from the task's
        // identity and the artifact's own content, not the execution or
        // artifact id, so re-running the same logical report on the same day
        // produces the same key (§8 Testable Property 4).
        let artifact_id = crate::ids::ArtifactId::new();
        let task_slug = slugify(&task.name);
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let object_key = self
            .ctx
            .config
            .render_object_key(&task.owner_id, &task_slug, &date, &document.friendly_name);
        let put_outcome = match self
            .ctx
            .storage
            .put(&object_key, &document.bytes, "application/vnd.openxmlformats-officedocument.wordprocessingml.document")
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Ok(self.fail(execution, &e).await),
        };
        execution.progress = execution.progress.max(95.0);
        self.emit(&execution, "artifact uploaded");

        // Phase 8: Finalize
        let artifact = crate::model::ReportArtifact {
            id: artifact_id,
            execution_id: execution.id,
            object_key: put_outcome.key,
            size: put_outcome.size,
            backend: match put_outcome.backend {
                crate::storage::Backend::Primary => crate::model::BackendTag::Primary,
                crate::storage::Backend::Fallback => crate::model::BackendTag::Fallback,
            },
            friendly_name: document.friendly_name,
            created_at: chrono::Utc::now(),
        };
        self.ctx.repositories.artifacts.put(artifact).await?;

        let mut result = ResultBlob::default();
        result.failed_placeholders = etl_results
            .iter()
            .filter(|(_, r)| matches!(r, EtlOutcome::Failed(_)))
            .map(|(id, _)| *id)
            .collect();
        let (fallback_reasons, last_sql_attempts) = collect_fallback_diagnostics(&analyzed);
        result.fallback_reasons = fallback_reasons;
        result.last_sql_attempts = last_sql_attempts;
        execution.result = result;
        execution.transition(ExecutionStatus::Completed, 100.0);
        self.emit(&execution, "execution completed");
        self.ctx.repositories.executions.upsert(execution.clone()).await?;

        if let Err(e) = self.ctx.notifications.notify(&execution, &task.recipients).await {
            warn!(error = %e, "notification delivery failed, best-effort only");
        }

        Ok(execution)
    }

    async fn init(
        &self,
        task_id: TaskId,
    ) -> Result<(crate::model::Task, crate::repositories::Template, crate::repositories::DataSourceRecord)> {
        let task = self.ctx.repositories.tasks.get(task_id).await?;
        let template = self.ctx.repositories.templates.get(task.template_id).await?;
        let data_source = self.ctx.repositories.data_sources.get(task.data_source_id).await?;
        Ok((task, template, data_source))
    }

    async fn preload_schema(&self, placeholders: &[Placeholder], pool: &Arc<ResourcePool>) {
        let mut tables = Vec::new();
        for placeholder in placeholders {
            if let Some(sql) = &placeholder.generated_sql {
                tables.extend(extract_table_hints(sql));
            }
        }
        tables.sort();
        tables.dedup();
        if tables.is_empty() {
            return;
        }
        match self.ctx.data_source.get_columns(&tables).await {
            Ok(by_table) => {
                for (table, columns) in by_table {
                    pool.put(
                        format!("schema:{table}"),
                        crate::resource_pool::ResourceValue::SchemaSnapshot(
                            serde_json::to_value(columns).unwrap_or(serde_json::Value::Null),
                        ),
                    );
                }
            }
            Err(e) => warn!(error = %e, "schema preload failed, will discover on demand"),
        }
    }

    async fn analyze_placeholders(
        &self,
        placeholders: &[Placeholder],
        pool: &Arc<ResourcePool>,
        execution_id: ExecutionId,
        data_source_id: crate::ids::DataSourceId,
        phase_progress: f64,
    ) -> Vec<Placeholder> {
        let concurrency = self.ctx.config.agent_concurrency.max(1);
        let mut results = Vec::with_capacity(placeholders.len());
        let mut in_flight = FuturesUnordered::new();
        let mut iter = placeholders.iter().cloned();

        for _ in 0..concurrency {
            if let Some(placeholder) = iter.next() {
                in_flight.push(self.analyze_one(placeholder, Arc::clone(pool), execution_id, data_source_id, phase_progress));
            }
        }

        while let Some(analyzed) = in_flight.next().await {
            results.push(analyzed);
            if let Some(placeholder) = iter.next() {
                in_flight.push(self.analyze_one(placeholder, Arc::clone(pool), execution_id, data_source_id, phase_progress));
            }
        }

        results
    }

    async fn analyze_one(
        &self,
        mut placeholder: Placeholder,
        pool: Arc<ResourcePool>,
        execution_id: ExecutionId,
        data_source_id: crate::ids::DataSourceId,
        phase_progress: f64,
    ) -> Placeholder {
        let orchestrator = PTAVOrchestrator::new(
            Arc::clone(&self.ctx.tools),
            Arc::clone(&self.ctx.llm),
            Arc::clone(&self.ctx.data_source),
            data_source_id,
            Arc::clone(&self.ctx.config),
            self.ctx.progress.clone(),
            phase_progress,
        );
        let facade = AgentFacade::new(orchestrator);
        let sources = CurrentSqlSources {
            ai_current_sql: placeholder.generated_sql.as_deref(),
            context_current_sql: None,
            task_driven_context_current_sql: None,
            data_source_sql_to_test: None,
        };
        let schema = serde_json::Value::Null;
        let AgentFacadeResult {
            success,
            sql,
            generation_method,
            iterations,
            fallback_reason,
        } = facade
            .execute_task_validation(&placeholder, &sources, &schema, &pool, execution_id)
            .await;

        let test_result = if success {
            crate::model::TestResult::ok("sql validated")
        } else {
            crate::model::TestResult::failed("agent could not produce validated sql")
        };
        placeholder.record_analysis(
            sql.unwrap_or_default(),
            success,
            test_result,
            generation_method,
            iterations,
            fallback_reason,
        );
        let _ = self.ctx.repositories.placeholders.upsert(placeholder.clone()).await;
        placeholder
    }

    async fn run_etl(
        &self,
        placeholders: &[Placeholder],
    ) -> HashMap<crate::ids::PlaceholderId, EtlOutcome> {
        let runner = ETLRunner::new(Arc::clone(&self.ctx.data_source));
        let mut results = HashMap::new();
        for placeholder in placeholders {
            let Some(sql) = placeholder.generated_sql.as_deref().filter(|s| !s.is_empty()) else {
                results.insert(placeholder.id, EtlOutcome::Failed("no cached sql".to_string()));
                continue;
            };
            if !placeholder.sql_validated {
                results.insert(placeholder.id, EtlOutcome::Failed("sql never validated".to_string()));
                continue;
            }
            let outcome = runner
                .run(sql, "monthly", -1, self.ctx.config.sql_execute_timeout)
                .await;
            results.insert(placeholder.id, outcome);
        }
        results
    }

    fn build_render_map(
        &self,
        placeholders: &[Placeholder],
        etl_results: &HashMap<crate::ids::PlaceholderId, EtlOutcome>,
    ) -> HashMap<String, serde_json::Value> {
        let mut render_map = HashMap::new();
        for placeholder in placeholders {
            let value = match etl_results.get(&placeholder.id) {
                Some(EtlOutcome::Success(value)) => value.clone(),
                Some(EtlOutcome::Failed(_)) | None => sentinel_value(),
            };
            render_map.insert(placeholder.name.clone(), value);
        }
        render_map
    }

    async fn assemble_with_retry(
        &self,
        template_ref: &str,
        render_map: &HashMap<String, serde_json::Value>,
    ) -> Result<crate::collaborators::AssembledDocument> {
        let options = AssembleOptions::default();
        match self.ctx.assembler.assemble(template_ref, render_map, &options).await {
            Ok(document) => Ok(document),
            Err(first_error) => {
                warn!(error = %first_error, "document assembly failed, retrying once");
                self.ctx
                    .assembler
                    .assemble(template_ref, render_map, &options)
                    .await
                    .map_err(|e| Error::Assembly(e.to_string()))
            }
        }
    }

    async fn fail(&self, mut execution: TaskExecution, error: &Error) -> TaskExecution {
        execution.error = Some(format!("{}: {error}", error.code()));
        execution.transition(ExecutionStatus::Failed, execution.progress);
        self.emit(&execution, "execution failed");
        let _ = self.ctx.repositories.executions.upsert(execution.clone()).await;
        execution
    }

    fn emit(&self, execution: &TaskExecution, message: &str) {
        self.ctx.progress.emit(
            execution.id,
            execution.status,
            execution.progress,
            message.to_string(),
            None,
            execution.error.clone(),
        );
        info!(execution_id = %execution.id, status = ?execution.status, progress = execution.progress, message);
    }
}

/// Best-effort scan for `FROM`/`JOIN table` hints in cached SQL, used only to
/// decide which tables to preload in Phase 2; the agent loop still discovers
/// schema on demand if this misses anything.
fn extract_table_hints(sql: &str) -> Vec<String> {
    let words: Vec<&str> = sql.split_whitespace().collect();
    let mut tables = Vec::new();
    for (idx, word) in words.iter().enumerate() {
        if (word.eq_ignore_ascii_case("from") || word.eq_ignore_ascii_case("join")) && idx + 1 < words.len() {
            let candidate = words[idx + 1].trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
            if !candidate.is_empty() {
                tables.push(candidate.to_string());
            }
        }
    }
    tables
}

/// Lowercases `name` and collapses runs of non-alphanumeric characters into a
/// single `-`, used to build the task-slug segment of an object key.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Pull the agent's fallback reasons and last-attempted SQL out of the
/// analyzed placeholders for `ResultBlob` (§7 user-visible failure behavior):
/// `fallback_reasons` is every distinct reason a placeholder fell through to
/// PTAV generation, `last_sql_attempts` is the most recent generated SQL for
/// every placeholder whose analysis never validated.
fn collect_fallback_diagnostics(
    analyzed: &[Placeholder],
) -> (Vec<String>, HashMap<crate::ids::PlaceholderId, String>) {
    let mut fallback_reasons = Vec::new();
    let mut last_sql_attempts = HashMap::new();
    for placeholder in analyzed {
        if let Some(reason) = placeholder
            .agent_config_blob
            .get("fallback_reason")
            .and_then(|v| v.as_str())
        {
            if !fallback_reasons.iter().any(|r: &String| r == reason) {
                fallback_reasons.push(reason.to_string());
            }
        }
        if !placeholder.sql_validated {
            if let Some(sql) = &placeholder.generated_sql {
                last_sql_attempts.insert(placeholder.id, sql.clone());
            }
        }
    }
    (fallback_reasons, last_sql_attempts)
}
