//! Entities described in the data model: `Task`, `Placeholder`, `TaskExecution`,
//! `ExecutionEvent`, `ReportArtifact`, and the transient `Plan`/`Observation`
//! types exchanged within a single PTAV iteration.

use crate::ids::{ArtifactId, DataSourceId, ExecutionId, PlaceholderId, TaskId, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Semantic role a placeholder plays in the rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SemanticType {
    /// A single aggregate number (e.g. "total sales last month").
    ScalarStat,
    /// A top-N ranking.
    Ranking,
    /// A named time period rendered as text.
    Period,
    /// A period-over-period comparison.
    Compare,
    /// A value rendered as a chart image.
    Chart,
}

/// Result of the most recent `sql.validate`/`sql.execute` check run against a
/// placeholder's cached SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the check passed.
    pub success: bool,
    /// Human-readable detail (issues found, or a success note).
    pub message: String,
}

impl TestResult {
    /// Build a passing result.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Build a failing result.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A named slot inside a template whose value is produced by executing a SQL
/// query derived from its natural-language description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
    /// Stable id, independent of name.
    pub id: PlaceholderId,
    /// The template this placeholder belongs to.
    pub template_id: TemplateId,
    /// Unique (per template) token name, e.g. `total_sales`.
    pub name: String,
    /// Free-text description used to derive SQL.
    pub description: String,
    /// Semantic role.
    pub semantic_type: SemanticType,
    /// Optional top-N bound for ranking placeholders.
    pub top_n: Option<u32>,
    /// Cached generated SQL, if any analysis has run.
    pub generated_sql: Option<String>,
    /// Result of the last validation/test run against `generated_sql`.
    pub last_test_result: Option<TestResult>,
    /// Whether an analysis has ever completed for this placeholder.
    pub agent_analyzed: bool,
    /// Whether `generated_sql` has passed validation.
    pub sql_validated: bool,
    /// Confidence score in `[0.0, 1.0]` reported by the agent.
    pub confidence: f64,
    /// Schemaless forward-compatible agent metadata (see §3 and §6).
    pub agent_config_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Placeholder {
    /// Construct a fresh, unanalyzed placeholder.
    #[must_use]
    pub fn new(
        template_id: TemplateId,
        name: impl Into<String>,
        description: impl Into<String>,
        semantic_type: SemanticType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PlaceholderId::new(),
            template_id,
            name: name.into(),
            description: description.into(),
            semantic_type,
            top_n: None,
            generated_sql: None,
            last_test_result: None,
            agent_analyzed: false,
            sql_validated: false,
            confidence: 0.0,
            agent_config_blob: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant from §3: `agent_analyzed` implies `generated_sql` is non-empty.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let analyzed_implies_sql = !self.agent_analyzed || self.generated_sql.as_deref().is_some_and(|s| !s.is_empty());
        let validated_implies_success = !self.sql_validated
            || self
                .last_test_result
                .as_ref()
                .is_some_and(|r| r.success);
        analyzed_implies_sql && validated_implies_success
    }

    /// Record the outcome of an analysis. Persists the SQL and test result
    /// even on failure (§4.8 Phase 3: "failed SQL is still cached to avoid
    /// re-generation thrash"), and carries forward the agent's own metadata
    /// (`generation_method`, `iterations`, `fallback_reason`) into the
    /// schemaless `agent_config_blob` alongside the test result.
    pub fn record_analysis(
        &mut self,
        sql: String,
        validated: bool,
        result: TestResult,
        generation_method: &str,
        iterations: u32,
        fallback_reason: Option<String>,
    ) {
        self.generated_sql = Some(sql);
        self.agent_analyzed = true;
        self.sql_validated = validated;
        self.agent_config_blob = serde_json::json!({
            "generation_method": generation_method,
            "iterations": iterations,
            "fallback_reason": fallback_reason,
            "last_test_result": result,
        });
        self.last_test_result = Some(result);
        self.updated_at = Utc::now();
    }
}

/// Persistent unit of scheduled or manually triggered work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: String,
    pub name: String,
    pub template_id: TemplateId,
    pub data_source_id: DataSourceId,
    /// Cron schedule; `None` means manual-trigger only.
    pub schedule: Option<String>,
    pub recipients: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a new, active task with no schedule.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        template_id: TemplateId,
        data_source_id: DataSourceId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            template_id,
            data_source_id,
            schedule: None,
            recipients: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a [`TaskExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Scanning,
    Analyzing,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal — no further events may be emitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// The total order phases are expected to progress through (§4.8, §8 property 2).
    #[must_use]
    pub fn order_rank(self) -> u8 {
        match self {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Scanning => 1,
            ExecutionStatus::Analyzing => 2,
            ExecutionStatus::Assembling => 3,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => 4,
        }
    }
}

/// Structured detail persisted in `task_executions.result_blob` on completion
/// or failure (§7 "user-visible failure behavior").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultBlob {
    pub failed_placeholders: Vec<PlaceholderId>,
    pub fallback_reasons: Vec<String>,
    pub last_sql_attempts: HashMap<PlaceholderId, String>,
}

/// A single run of a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub result: ResultBlob,
    /// Short code plus one human-readable sentence, per §7.
    pub error: Option<String>,
    /// The trigger id used for idempotency (§6 outbound contract).
    pub trigger_id: String,
}

impl TaskExecution {
    /// Start a new, pending execution for `task_id`, generating a fresh id.
    #[must_use]
    pub fn start(task_id: TaskId, trigger_id: impl Into<String>) -> Self {
        Self::start_with_id(ExecutionId::new(), task_id, trigger_id)
    }

    /// Start a new, pending execution under a caller-chosen id. Used by the
    /// scheduler, which allocates the id up front so its per-task lock can
    /// name the execution it is guarding before the pipeline itself runs.
    #[must_use]
    pub fn start_with_id(id: ExecutionId, task_id: TaskId, trigger_id: impl Into<String>) -> Self {
        Self {
            id,
            task_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            progress: 0.0,
            result: ResultBlob::default(),
            error: None,
            trigger_id: trigger_id.into(),
        }
    }

    /// Advance to a new non-terminal status, asserting forward progress.
    pub fn transition(&mut self, status: ExecutionStatus, progress: f64) {
        debug_assert!(
            !self.status.is_terminal(),
            "attempted to transition a terminal execution"
        );
        self.status = status;
        self.progress = self.progress.max(progress);
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// Structured progress record, append-only and ordered by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: ExecutionId,
    pub seq: u64,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Which backend ultimately served a [`ReportArtifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTag {
    Primary,
    Fallback,
}

impl BackendTag {
    /// Render as the string used in persisted state and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendTag::Primary => "primary",
            BackendTag::Fallback => "fallback",
        }
    }
}

/// The delivered DOCX, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub id: ArtifactId,
    pub execution_id: ExecutionId,
    pub object_key: String,
    pub size: u64,
    pub backend: BackendTag,
    pub friendly_name: String,
    pub created_at: DateTime<Utc>,
}

/// A single step within a [`Plan`]: a tool name plus its input map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool: String,
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// The agent's next step, as returned by the [`crate::agent::planner::Planner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
}

/// The outcome of executing one tool call, appended to the iteration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tool_name: String,
    pub success: bool,
    pub result: serde_json::Value,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}
