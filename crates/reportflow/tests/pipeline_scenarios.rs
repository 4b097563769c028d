//! End-to-end scenarios for `PlaceholderPipeline::run`, exercised against
//! `reportflow-testing`'s fakes and a pair of local `StorageBackend` doubles.
//!
//! These scenarios route every placeholder through `AgentFacade`'s
//! validate-only path rather than full PTAV generation: a placeholder that
//! already carries SQL satisfying `sql.validate` (non-empty, no forbidden
//! verb, a `SELECT`, balanced parentheses) passes on the first attempt
//! without ever calling the LLM, since `analyze_one` always validates
//! against a null schema snapshot. That keeps these tests independent of the
//! planner's JSON contract while still exercising every other phase.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use reportflow::collaborators::NoopNotificationSink;
use reportflow::config::PipelineConfig;
use reportflow::context::PipelineContext;
use reportflow::ids::{DataSourceId, TemplateId};
use reportflow::model::{ExecutionStatus, Placeholder, SemanticType, Task};
use reportflow::pipeline::PlaceholderPipeline;
use reportflow::progress::ProgressRecorder;
use reportflow::repositories::{DataSourceRecord, DataSourceRepository, Repositories, Template};
use reportflow::storage::{BackendError, HybridStorage, StorageBackend};
use reportflow::tools::registry::ToolRegistry;

use reportflow_testing::{FakeDataSourceConnector, FakeLlmClient, TemplateScanningAssembler};

/// `DataSourceRepository` has no seeding/upsert method on its trait (the
/// pipeline only ever reads it); this fixed-record double stands in for it
/// so a test can hand a `DataSourceRecord` straight to the pipeline.
struct FixedDataSourceRepository(DataSourceRecord);

#[async_trait]
impl DataSourceRepository for FixedDataSourceRepository {
    async fn get(&self, id: DataSourceId) -> reportflow::error::Result<DataSourceRecord> {
        if id == self.0.id {
            Ok(self.0.clone())
        } else {
            Err(reportflow::error::Error::NotFound {
                entity: "data_source",
                id: id.to_string(),
            })
        }
    }
}

/// In-memory `StorageBackend`, used as the fallback in every scenario and as
/// a working primary when a test doesn't care about failover.
#[derive(Default)]
struct InMemoryBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<u64, BackendError> {
        let len = bytes.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
        Ok(len)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn presigned_url(&self, key: &str, _ttl: Duration) -> Result<String, BackendError> {
        Ok(format!("memory://{key}"))
    }
}

impl InMemoryBackend {
    fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// The bytes of the single stored object; panics if there isn't exactly one.
    fn only_value(&self) -> Vec<u8> {
        let objects = self.objects.lock().unwrap();
        assert_eq!(objects.len(), 1, "expected exactly one stored object");
        objects.values().next().unwrap().clone()
    }
}

/// A `StorageBackend` that always errors, used to force failover to fallback.
/// Counts `put` attempts so a test can confirm failover actually happened
/// rather than the primary simply never being consulted.
#[derive(Default)]
struct AlwaysFailsBackend {
    put_attempts: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl StorageBackend for AlwaysFailsBackend {
    async fn put(&self, _key: &str, _bytes: &[u8], _content_type: &str) -> Result<u64, BackendError> {
        self.put_attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(BackendError::Unreachable("primary is down".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unreachable("primary is down".to_string()))
    }

    async fn presigned_url(&self, _key: &str, _ttl: Duration) -> Result<String, BackendError> {
        Err(BackendError::Unreachable("primary is down".to_string()))
    }
}

/// Harness bundling everything a scenario needs, with sane in-memory
/// defaults a test can override before calling `run`.
struct Harness {
    config: PipelineConfig,
    repositories: Repositories,
    llm: FakeLlmClient,
    data_source: FakeDataSourceConnector,
    assembler: TemplateScanningAssembler,
    storage: HybridStorage,
    progress: ProgressRecorder,
}

impl Harness {
    fn new() -> Self {
        Self {
            config: PipelineConfig::for_tests(),
            repositories: Repositories::in_memory(),
            llm: FakeLlmClient::new(),
            data_source: FakeDataSourceConnector::new(),
            assembler: TemplateScanningAssembler::new(),
            storage: HybridStorage::new(Some(Box::new(InMemoryBackend::default())), Box::new(InMemoryBackend::default())),
            progress: ProgressRecorder::new(),
        }
    }

    async fn run(self, task: &Task) -> reportflow::model::TaskExecution {
        let progress = self.progress.clone();
        let ctx = PipelineContext::new(
            Arc::new(self.config),
            Arc::new(self.repositories),
            progress,
            Arc::new(ToolRegistry::with_default_tools()),
            Arc::new(self.llm),
            Arc::new(self.data_source),
            Arc::new(self.assembler),
            Arc::new(self.storage),
            Arc::new(NoopNotificationSink),
        );
        let pipeline = PlaceholderPipeline::new(Arc::new(ctx));
        pipeline
            .run(reportflow::ids::ExecutionId::new(), task.id, "trigger-1".to_string())
            .await
            .expect("pipeline run never returns Err for per-item failures")
    }
}

/// Seeds a task with one template and the given `(name, sql)` placeholders,
/// wiring a fixed data source record into `harness.repositories`, and
/// returns the seeded `Task`.
async fn seed_task_with_placeholders(harness: &mut Harness, sql_per_placeholder: &[(&str, &str)]) -> Task {
    let placeholders = sql_per_placeholder
        .iter()
        .map(|(name, sql)| (*name, Some((*sql).to_string())))
        .collect::<Vec<_>>();
    seed_task_with_placeholder_specs(harness, &placeholders).await
}

/// Like [`seed_task_with_placeholders`] but allows a placeholder to start
/// with no cached SQL at all, so `AgentFacade` falls straight through to full
/// PTAV generation instead of validate-only repair.
async fn seed_task_with_placeholder_specs(harness: &mut Harness, specs: &[(&str, Option<String>)]) -> Task {
    let template_id = TemplateId::new();
    let data_source_id = DataSourceId::new();

    harness
        .repositories
        .templates
        .upsert(Template {
            id: template_id,
            name: "Monthly Report".to_string(),
            source_ref: specs
                .iter()
                .map(|(name, _)| format!("{{{{{name}}}}}"))
                .collect::<Vec<_>>()
                .join(" "),
        })
        .await
        .unwrap();

    harness.repositories.data_sources = Arc::new(FixedDataSourceRepository(DataSourceRecord {
        id: data_source_id,
        name: "warehouse".to_string(),
        connection_uri: "postgres://localhost/warehouse".to_string(),
    }));

    for (name, sql) in specs {
        let mut placeholder = Placeholder::new(template_id, *name, format!("value for {name}"), SemanticType::ScalarStat);
        placeholder.generated_sql = sql.clone();
        harness.repositories.placeholders.upsert(placeholder).await.unwrap();
    }

    let task = Task::new("owner-1", "Monthly Sales Report", template_id, data_source_id);
    harness.repositories.tasks.upsert(task.clone()).await.unwrap();
    task
}

#[tokio::test]
async fn happy_path_single_scalar_validates_without_calling_the_llm() {
    let harness = Harness::new();
    let llm = harness.llm.clone();
    let data_source = harness
        .data_source
        .clone()
        .with_query_handler(|_sql, _params| {
            Ok(reportflow::collaborators::QueryResult {
                rows: vec![serde_json::json!([42])],
                columns: vec![reportflow::collaborators::ColumnInfo {
                    name: "total_sales".to_string(),
                    type_name: "int8".to_string(),
                }],
                row_count: 1,
                elapsed_ms: 1,
            })
        });
    let assembler = harness.assembler.clone();
    let mut harness = Harness {
        data_source,
        ..harness
    };

    let task = seed_task_with_placeholders(&mut harness, &[("total_sales", "SELECT SUM(amount) AS total_sales FROM orders")]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress, 100.0);
    assert!(execution.result.failed_placeholders.is_empty());
    assert_eq!(llm.call_count(), 0, "validated cached SQL should never reach the planner/LLM");
    assert_eq!(assembler.call_count(), 1);

    let (_, render_map) = &assembler.calls()[0];
    assert_eq!(render_map["total_sales"], serde_json::json!(42));
}

#[tokio::test]
async fn partial_failure_within_tolerance_renders_sentinel_and_still_completes() {
    let harness = Harness::new();
    let data_source = harness.data_source.clone().with_query_handler(|sql, _params| {
        if sql.contains("orders") {
            Ok(reportflow::collaborators::QueryResult {
                rows: vec![serde_json::json!([100])],
                columns: vec![reportflow::collaborators::ColumnInfo {
                    name: "total_sales".to_string(),
                    type_name: "int8".to_string(),
                }],
                row_count: 1,
                elapsed_ms: 1,
            })
        } else {
            Err(reportflow::collaborators::ConnectorError::Connection("refunds table is offline".to_string()))
        }
    });
    let assembler = harness.assembler.clone();
    let mut harness = Harness {
        config: PipelineConfig {
            max_failed_placeholders_for_doc: 1,
            ..PipelineConfig::for_tests()
        },
        data_source,
        ..harness
    };

    let task = seed_task_with_placeholders(
        &mut harness,
        &[
            ("total_sales", "SELECT SUM(amount) AS total_sales FROM orders"),
            ("total_refunds", "SELECT SUM(amount) AS total_refunds FROM refunds"),
        ],
    )
    .await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.result.failed_placeholders.len(), 1);

    let (_, render_map) = &assembler.calls()[0];
    assert_eq!(render_map["total_sales"], serde_json::json!(100));
    assert_eq!(
        render_map["total_refunds"],
        serde_json::json!(reportflow::etl::DATA_UNAVAILABLE_SENTINEL)
    );
}

#[tokio::test]
async fn too_many_failures_exceeds_tolerance_and_fails_before_assembly() {
    let harness = Harness::new();
    let data_source = harness
        .data_source
        .clone()
        .with_query_handler(|_sql, _params| Err(reportflow::collaborators::ConnectorError::Timeout));
    let assembler = harness.assembler.clone();
    let mut harness = Harness {
        data_source,
        ..harness
    };

    let task = seed_task_with_placeholders(&mut harness, &[("total_sales", "SELECT SUM(amount) AS total_sales FROM orders")]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("tolerance_exceeded"));
    assert_eq!(assembler.call_count(), 0, "assembly must not run once tolerance is exceeded");
}

#[tokio::test]
async fn storage_failover_serves_from_fallback_and_round_trips() {
    let harness = Harness::new();
    let fallback = Arc::new(InMemoryBackend::default());
    let primary = Arc::new(AlwaysFailsBackend::default());
    let mut harness = Harness {
        storage: HybridStorage::new(
            Some(Box::new(CloneablePrimary(Arc::clone(&primary)))),
            Box::new(CloneableBackend(Arc::clone(&fallback))),
        ),
        data_source: harness.data_source.clone().with_query_handler(|_sql, _params| {
            Ok(reportflow::collaborators::QueryResult {
                rows: vec![serde_json::json!([7])],
                columns: vec![reportflow::collaborators::ColumnInfo {
                    name: "total_sales".to_string(),
                    type_name: "int8".to_string(),
                }],
                row_count: 1,
                elapsed_ms: 1,
            })
        }),
        ..harness
    };

    let task = seed_task_with_placeholders(&mut harness, &[("total_sales", "SELECT SUM(amount) AS total_sales FROM orders")]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        primary.put_attempts.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "the primary must be tried before falling back"
    );
    assert_eq!(fallback.object_count(), 1, "the artifact must have landed on the fallback backend");
    assert_eq!(fallback.only_value(), b"7".to_vec());
}

/// Thin `Arc`-sharing wrapper so the same `InMemoryBackend` instance can be
/// asserted on after being moved into a `Box<dyn StorageBackend>`.
struct CloneableBackend(Arc<InMemoryBackend>);

#[async_trait]
impl StorageBackend for CloneableBackend {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<u64, BackendError> {
        self.0.put(key, bytes, content_type).await
    }
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.0.get(key).await
    }
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, BackendError> {
        self.0.presigned_url(key, ttl).await
    }
}

/// Same `Arc`-sharing wrapper for `AlwaysFailsBackend`, so the test can read
/// its `put_attempts` counter after it's been moved into the `HybridStorage`.
struct CloneablePrimary(Arc<AlwaysFailsBackend>);

#[async_trait]
impl StorageBackend for CloneablePrimary {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<u64, BackendError> {
        self.0.put(key, bytes, content_type).await
    }
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.0.get(key).await
    }
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, BackendError> {
        self.0.presigned_url(key, ttl).await
    }
}

#[tokio::test]
async fn zero_placeholders_still_completes_with_an_empty_render_map() {
    let mut harness = Harness::new();
    let assembler = harness.assembler.clone();
    let task = seed_task_with_placeholders(&mut harness, &[]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.result.failed_placeholders.is_empty());
    let (_, render_map) = &assembler.calls()[0];
    assert!(render_map.is_empty());
}

#[tokio::test]
async fn progress_events_are_monotonic_and_respect_phase_order() {
    let mut harness = Harness::new();
    let progress = harness.progress.clone();
    let task = seed_task_with_placeholders(&mut harness, &[("total_sales", "SELECT SUM(amount) AS total_sales FROM orders")]).await;
    let execution = harness.run(&task).await;

    let history = progress.history(execution.id);
    assert!(!history.is_empty());

    let mut last_seq = None;
    let mut last_rank = 0u8;
    let mut last_progress = -1.0f64;
    for event in &history {
        if let Some(prev) = last_seq {
            assert!(event.seq > prev, "seq must strictly increase");
        }
        last_seq = Some(event.seq);

        let rank = event.status.order_rank();
        assert!(rank >= last_rank, "phase order must never regress");
        last_rank = rank;

        assert!(event.progress >= last_progress, "progress must never decrease");
        last_progress = event.progress;
    }
    assert_eq!(history.last().unwrap().status, ExecutionStatus::Completed);
}

/// A fixed planner response driving `PTAVOrchestrator::generate` to a goal
/// achieved on its very first iteration: refine, validate, then execute the
/// same SQL, which is exactly what `Validator::check` requires for
/// `ValidationGoal::Generate`.
const SINGLE_ITERATION_PLAN: &str = r#"{
    "reasoning": "derive sql for the placeholder",
    "steps": [
        {"tool": "sql.refine", "input": {"sql": "SELECT total FROM orders", "issues": [], "schema": {}}},
        {"tool": "sql.validate", "input": {"sql": "SELECT total FROM orders", "schema_snapshot": {}}},
        {"tool": "sql.execute", "input": {"sql": "SELECT total FROM orders", "parameters": []}}
    ]
}"#;

fn succeeding_query_handler(
) -> impl Fn(&str, &[serde_json::Value]) -> Result<reportflow::collaborators::QueryResult, reportflow::collaborators::ConnectorError> {
    |_sql, _params| {
        Ok(reportflow::collaborators::QueryResult {
            rows: vec![serde_json::json!([100])],
            columns: vec![reportflow::collaborators::ColumnInfo {
                name: "total".to_string(),
                type_name: "int8".to_string(),
            }],
            row_count: 1,
            elapsed_ms: 1,
        })
    }
}

#[tokio::test]
async fn ptav_generation_runs_when_no_cached_sql_exists() {
    let harness = Harness::new();
    let llm = harness.llm.clone().with_response(SINGLE_ITERATION_PLAN);
    let data_source = harness.data_source.clone().with_query_handler(succeeding_query_handler());
    let llm_handle = llm.clone();
    let assembler = harness.assembler.clone();
    let mut harness = Harness {
        llm,
        data_source,
        ..harness
    };

    let task = seed_task_with_placeholder_specs(&mut harness, &[("total_sales", None)]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.result.failed_placeholders.is_empty());
    assert_eq!(llm_handle.call_count(), 1, "goal is achieved on the planner's first plan");

    let (_, render_map) = &assembler.calls()[0];
    assert_eq!(render_map["total_sales"], serde_json::json!(100));
}

/// Scripts the LLM to distinguish the `sql.refine` semantic-repair prompt
/// (invoked by `PTAVOrchestrator::validate_only`) from the planner's prompt
/// (invoked by `PTAVOrchestrator::generate`), so one harness drives both
/// halves of `AgentFacade::execute_task_validation`'s fallback path.
fn fallback_then_generate_handler(
    messages: &[reportflow::collaborators::ChatMessage],
) -> Result<String, reportflow::collaborators::LlmError> {
    let content = &messages[0].content;
    if content.contains("The following SQL failed validation") {
        // Semantic repair fails to recover: still no SELECT in the result.
        Ok("orders total".to_string())
    } else if content.contains("Respond with a single JSON object") {
        Ok(SINGLE_ITERATION_PLAN.to_string())
    } else {
        Ok("{}".to_string())
    }
}

#[tokio::test]
async fn ptav_fallback_after_unrepairable_validate_only_failure() {
    let harness = Harness::new();
    let llm = harness.llm.clone().with_handler(fallback_then_generate_handler);
    let data_source = harness.data_source.clone().with_query_handler(succeeding_query_handler());
    let llm_handle = llm.clone();
    let assembler = harness.assembler.clone();
    let mut harness = Harness {
        llm,
        data_source,
        ..harness
    };

    // "orders total" has no SELECT and trips no forbidden-verb/parenthesis
    // issue, so `classify_unrepairable` reports "unrepairable" rather than a
    // terminal reason, and `AgentFacade` falls through to full generation.
    let task = seed_task_with_placeholders(&mut harness, &[("total_sales", "orders total")]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.result.failed_placeholders.is_empty());
    assert_eq!(
        llm_handle.call_count(),
        2,
        "one semantic-repair attempt, then one planner call that succeeds"
    );

    let (_, render_map) = &assembler.calls()[0];
    assert_eq!(render_map["total_sales"], serde_json::json!(100));
}

#[tokio::test]
async fn ptav_iteration_exhaustion_fails_tolerance_after_max_attempts() {
    let harness = Harness::new();
    let iteration = std::sync::atomic::AtomicUsize::new(0);
    let llm = harness.llm.clone().with_handler(move |messages| {
        let content = &messages[0].content;
        if !content.contains("Respond with a single JSON object") {
            return Ok("{}".to_string());
        }
        let n = iteration.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        // Validates but never executes, so `Validator::check` can never
        // report the generate goal achieved; the distinct SQL per iteration
        // keeps `PatternDetector` from exiting early on a "no progress" read.
        Ok(format!(
            r#"{{"reasoning": "iteration {n}", "steps": [
                {{"tool": "sql.refine", "input": {{"sql": "SELECT col_{n} FROM orders", "issues": [], "schema": {{}}}}}},
                {{"tool": "sql.validate", "input": {{"sql": "SELECT col_{n} FROM orders", "schema_snapshot": {{}}}}}}
            ]}}"#
        ))
    });
    let llm_handle = llm.clone();
    let mut harness = Harness { llm, ..harness };

    let task = seed_task_with_placeholder_specs(&mut harness, &[("total_sales", None)]).await;
    let execution = harness.run(&task).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("tolerance_exceeded"));
    assert_eq!(
        llm_handle.call_count(),
        15,
        "the loop must run every configured iteration before giving up"
    );
}
