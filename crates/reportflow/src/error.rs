//! Error taxonomy for the report execution pipeline.
//!
//! Variants are grouped to mirror the kinds described in the error handling
//! design: configuration, analysis, ETL, assembly, storage, cancellation and
//! wall-clock timeout. Collaborator crates (`reportflow-sql`,
//! `reportflow-storage`, `reportflow-llm-openai`) define their own
//! `#[non_exhaustive]` error enums and convert into the relevant variant here
//! at the boundary where the result starts driving pipeline control flow.

use crate::ids::{ExecutionId, PlaceholderId, TaskId};
use thiserror::Error;

/// Result alias used throughout the pipeline crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the report execution pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A task, template or data source reference could not be loaded (Phase 1).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The scheduler could not parse a cron expression.
    #[error("invalid cron schedule '{schedule}': {reason}")]
    InvalidSchedule {
        /// The offending schedule string.
        schedule: String,
        /// Why the parser rejected it.
        reason: String,
    },

    /// A tool name had no registered implementation.
    #[error("no tool registered under name '{0}'")]
    ToolNotFound(String),

    /// A tool's `execute` call failed in a way that aborts the current step list.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Which tool failed.
        tool: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// The planner's LLM response was not parseable JSON even after the
    /// one-shot repair attempt.
    #[error("planner could not parse a plan from the model response: {0}")]
    PlanParse(String),

    /// The PTAV loop exhausted `AGENT_MAX_ITERATIONS` without validating.
    #[error("iteration budget exhausted after {iterations} iterations")]
    IterationExhausted {
        /// How many iterations ran.
        iterations: u32,
    },

    /// ETL could not execute a placeholder's SQL against the data source.
    #[error("ETL failed for placeholder {placeholder}: {message}")]
    Etl {
        /// Which placeholder failed.
        placeholder: PlaceholderId,
        /// Human-readable failure detail.
        message: String,
    },

    /// More placeholders failed ETL than the tolerance threshold allows,
    /// or every placeholder failed.
    #[error("tolerance exceeded: {failed} of {total} placeholders failed")]
    ToleranceExceeded {
        /// Count of failed placeholders.
        failed: usize,
        /// Total placeholder count.
        total: usize,
    },

    /// `DocumentAssembler::assemble` failed twice (the one retry included).
    #[error("document assembly failed after retry: {0}")]
    Assembly(String),

    /// Both the primary and fallback storage backends failed.
    #[error("storage failed on both backends for key '{key}': {message}")]
    Storage {
        /// The object key being written or read.
        key: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// Neither storage backend holds the requested key.
    #[error("object not found: {0}")]
    StorageNotFound(String),

    /// The execution's wall-clock budget elapsed before completion.
    #[error("execution {0} exceeded its wall-clock budget")]
    WallClockTimeout(ExecutionId),

    /// The execution was cancelled by request; not a failure.
    #[error("execution {0} was cancelled")]
    Cancelled(ExecutionId),

    /// The per-task execution lock could not be acquired (another execution holds it).
    #[error("task {task} is already executing (lock held until {expires_at})")]
    TaskLocked {
        /// Which task is locked.
        task: TaskId,
        /// When the current holder's lease expires.
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    /// A repository lookup failed to find the requested row.
    #[error("{entity} {id} not found")]
    NotFound {
        /// The kind of entity that was looked up (e.g. "task", "placeholder").
        entity: &'static str,
        /// The id that was not found, rendered as a string.
        id: String,
    },

    /// An underlying repository or storage I/O error.
    #[error("repository error: {0}")]
    Repository(String),
}

impl Error {
    /// Short machine-readable code for `task_executions.error`, per §7's
    /// "short code plus one human-readable sentence" contract.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::InvalidSchedule { .. } => "invalid_schedule",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolExecution { .. } => "tool_execution_failed",
            Error::PlanParse(_) => "plan_parse_error",
            Error::IterationExhausted { .. } => "iteration_exhausted",
            Error::Etl { .. } => "etl_error",
            Error::ToleranceExceeded { .. } => "tolerance_exceeded",
            Error::Assembly(_) => "assembly_error",
            Error::Storage { .. } => "storage_error",
            Error::StorageNotFound(_) => "storage_not_found",
            Error::WallClockTimeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
            Error::TaskLocked { .. } => "task_locked",
            Error::NotFound { .. } => "not_found",
            Error::Repository(_) => "repository_error",
        }
    }

    /// Whether this error kind is fatal to the whole execution (terminal
    /// `failed`) as opposed to isolated to a single placeholder/item.
    #[must_use]
    pub fn is_fatal_to_execution(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidSchedule { .. }
                | Error::ToleranceExceeded { .. }
                | Error::Assembly(_)
                | Error::Storage { .. }
                | Error::WallClockTimeout(_)
                | Error::TaskLocked { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_short_strings() {
        let err = Error::IterationExhausted { iterations: 15 };
        assert_eq!(err.code(), "iteration_exhausted");
    }

    #[test]
    fn etl_errors_are_not_fatal_to_execution() {
        let err = Error::Etl {
            placeholder: PlaceholderId::new(),
            message: "permission denied".into(),
        };
        assert!(!err.is_fatal_to_execution());
    }

    #[test]
    fn tolerance_exceeded_is_fatal() {
        let err = Error::ToleranceExceeded { failed: 3, total: 3 };
        assert!(err.is_fatal_to_execution());
    }
}
