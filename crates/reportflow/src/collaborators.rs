//! External collaborator interfaces.
//!
//! The core pipeline never depends on an LLM SDK, database driver, or Word
//! renderer directly; it depends on these traits. Reference implementations
//! live in `reportflow-llm-openai`, `reportflow-sql` and `reportflow-testing`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TaskExecution;

/// Errors an [`LLMClient`] may return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM provider rate-limited the request")]
    RateLimit,
    #[error("LLM response was not valid JSON: {0}")]
    InvalidJson(String),
    #[error("LLM provider error: {0}")]
    ProviderError(String),
}

/// A single chat message sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Knobs for one [`LLMClient::complete`] call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub json_object: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: std::time::Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            json_object: true,
            temperature: 0.0,
            max_tokens: 2048,
            timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Token accounting returned alongside a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of one model call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// Interface to whatever LLM provider is configured. The pipeline depends
/// only on `complete`; no streaming or provider-specific tool-calling.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;
}

/// Errors a [`DataSourceConnector`] may return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectorError {
    #[error("could not connect to data source: {0}")]
    Connection(String),
    #[error("SQL syntax error: {0}")]
    Syntax(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("query timed out")]
    Timeout,
}

/// A column descriptor in a [`QueryResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

/// Normalized result of executing a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

/// A table's column metadata, as returned by schema introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub column: String,
    pub type_name: String,
    pub nullable: bool,
    pub comment: Option<String>,
}

/// Interface to the database backing a data source. Callers are responsible
/// for substituting any `{{name}}` time markers before calling `execute`.
#[async_trait]
pub trait DataSourceConnector: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, ConnectorError>;
    async fn get_columns(&self, tables: &[String]) -> Result<std::collections::HashMap<String, Vec<ColumnMeta>>, ConnectorError>;
    async fn execute(
        &self,
        sql: &str,
        parameters: &[serde_json::Value],
        timeout: std::time::Duration,
    ) -> Result<QueryResult, ConnectorError>;
}

/// Options controlling a [`DocumentAssembler::assemble`] call.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub use_chart_enhancement: bool,
    pub use_content_optimization: bool,
}

/// Rendered document bytes plus a suggested file name.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    pub friendly_name: String,
}

/// Interface to the Word-document renderer. The core does not prescribe
/// DOCX internals; it only requires `{{name}}` text-run substitution,
/// table/chart insertion and formatting preservation on every exit path.
#[async_trait]
pub trait DocumentAssembler: Send + Sync {
    async fn assemble(
        &self,
        template_ref: &str,
        render_map: &std::collections::HashMap<String, serde_json::Value>,
        options: &AssembleOptions,
    ) -> Result<AssembledDocument, crate::error::Error>;
}

/// Best-effort delivery of a completed (or failed) execution to its recipients.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, execution: &TaskExecution, recipients: &[String]) -> Result<(), crate::error::Error>;
}

/// The only `NotificationSink` implementation carried in this crate; email
/// delivery itself is out of scope.
#[derive(Debug, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, execution: &TaskExecution, recipients: &[String]) -> Result<(), crate::error::Error> {
        tracing::debug!(
            execution_id = %execution.id,
            recipients = recipients.len(),
            "noop notification sink: dropping notification"
        );
        Ok(())
    }
}
