//! Core execution pipeline for generating Word reports from an LLM-agent-derived
//! SQL layer.
//!
//! A [`crate::model::Task`] names a template, a data source and a schedule.
//! Running it scans the template's placeholders, derives or repairs the SQL
//! behind each one through a bounded plan-tool-act-validate agent loop
//! ([`agent`]), executes that SQL against the data source ([`etl`]), renders
//! the result into the template ([`collaborators::DocumentAssembler`]), and
//! uploads the finished document to hybrid object storage ([`storage`]).
//!
//! The pipeline itself never depends on a concrete LLM SDK, database driver
//! or Word renderer — only the traits in [`collaborators`]. Reference
//! implementations live in the sibling `reportflow-sql`, `reportflow-storage`,
//! `reportflow-llm-openai` and `reportflow-testing` crates.

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod etl;
pub mod ids;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod repositories;
pub mod resource_pool;
pub mod scheduler;
pub mod storage;
pub mod tools;

pub use context::PipelineContext;
pub use error::{Error, Result};
pub use pipeline::PlaceholderPipeline;
pub use scheduler::TaskScheduler;

/// Re-exports for the types most call sites need, mirroring the teacher's
/// `prelude` convention for its own downstream crates.
pub mod prelude {
    pub use crate::collaborators::{
        AssembleOptions, AssembledDocument, ChatMessage, ColumnInfo, ColumnMeta, CompletionOptions,
        ConnectorError, DataSourceConnector, DocumentAssembler, LLMClient, LlmError, NotificationSink,
        QueryResult,
    };
    pub use crate::config::PipelineConfig;
    pub use crate::context::PipelineContext;
    pub use crate::error::{Error, Result};
    pub use crate::ids::{ArtifactId, DataSourceId, ExecutionId, PlaceholderId, TaskId, TemplateId};
    pub use crate::model::{
        ExecutionEvent, ExecutionStatus, Placeholder, ReportArtifact, SemanticType, Task, TaskExecution,
    };
    pub use crate::pipeline::PlaceholderPipeline;
    pub use crate::progress::ProgressRecorder;
    pub use crate::repositories::Repositories;
    pub use crate::scheduler::TaskScheduler;
    pub use crate::storage::HybridStorage;
}
