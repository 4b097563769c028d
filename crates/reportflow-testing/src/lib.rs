//! Scriptable fakes of the `reportflow` collaborator traits.
//!
//! Each fake follows the same shape: a fixed response or handler closure,
//! an `Arc<Mutex<_>>` call history, a `call_count`, and a one-shot
//! `fail_next` latch that clears itself after firing once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reportflow::collaborators::{
    AssembleOptions, AssembledDocument, ChatMessage, ColumnInfo, ColumnMeta, Completion,
    CompletionOptions, ConnectorError, DataSourceConnector, DocumentAssembler, LLMClient, LlmError,
    QueryResult, Usage,
};
use reportflow::error::Error;

type LlmHandler = Arc<dyn Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync>;

/// A configurable [`LLMClient`] for testing callers that depend on model output.
#[derive(Clone)]
pub struct FakeLlmClient {
    handler: Option<LlmHandler>,
    fixed_response: String,
    call_history: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    call_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<Option<LlmError>>>,
}

impl Default for FakeLlmClient {
    fn default() -> Self {
        Self {
            handler: None,
            fixed_response: "{}".to_string(),
            call_history: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(None)),
        }
    }
}

impl FakeLlmClient {
    /// Create a client that always returns `"{}"` until configured otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `content` verbatim for every call (unless a handler is set).
    #[must_use]
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.fixed_response = content.into();
        self
    }

    /// Compute the response from the sent messages.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Fail the next `complete` call with `error`, then resume succeeding.
    pub fn fail_next(&self, error: LlmError) {
        *self.should_fail.lock().unwrap() = Some(error);
    }

    /// Number of times `complete` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// The message slices passed to each `complete` call, in order.
    #[must_use]
    pub fn call_history(&self) -> Vec<Vec<ChatMessage>> {
        self.call_history.lock().unwrap().clone()
    }

    /// Clear call count, history and any pending failure.
    pub fn reset(&self) {
        *self.call_count.lock().unwrap() = 0;
        self.call_history.lock().unwrap().clear();
        *self.should_fail.lock().unwrap() = None;
    }
}

#[async_trait]
impl LLMClient for FakeLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        *self.call_count.lock().unwrap() += 1;

        if let Some(err) = self.should_fail.lock().unwrap().take() {
            return Err(err);
        }

        self.call_history.lock().unwrap().push(messages.to_vec());

        let content = if let Some(handler) = &self.handler {
            handler(messages)?
        } else {
            self.fixed_response.clone()
        };

        Ok(Completion {
            content,
            usage: Usage {
                prompt_tokens: messages.iter().map(|m| m.content.len() as u32).sum(),
                completion_tokens: 0,
            },
        })
    }
}

type QueryHandler =
    Arc<dyn Fn(&str, &[serde_json::Value]) -> Result<QueryResult, ConnectorError> + Send + Sync>;

/// A configurable [`DataSourceConnector`] for testing ETL and schema introspection.
#[derive(Clone)]
pub struct FakeDataSourceConnector {
    tables: Vec<String>,
    columns: HashMap<String, Vec<ColumnMeta>>,
    handler: Option<QueryHandler>,
    executed: Arc<Mutex<Vec<(String, Vec<serde_json::Value>)>>>,
    should_fail: Arc<Mutex<Option<ConnectorError>>>,
}

impl Default for FakeDataSourceConnector {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            columns: HashMap::new(),
            handler: None,
            executed: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(None)),
        }
    }
}

impl FakeDataSourceConnector {
    /// Create a connector with no tables and an empty-rows `execute` response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tables returned by `list_tables`.
    #[must_use]
    pub fn with_tables(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Set the column metadata returned by `get_columns` for `table`.
    #[must_use]
    pub fn with_columns(mut self, table: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        self.columns.insert(table.into(), columns);
        self
    }

    /// Compute `execute`'s result from the SQL text and bound parameters.
    #[must_use]
    pub fn with_query_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[serde_json::Value]) -> Result<QueryResult, ConnectorError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Fail the next `execute` call with `error`, then resume succeeding.
    pub fn fail_next(&self, error: ConnectorError) {
        *self.should_fail.lock().unwrap() = Some(error);
    }

    /// `(sql, parameters)` pairs passed to `execute`, in call order.
    #[must_use]
    pub fn executed_queries(&self) -> Vec<(String, Vec<serde_json::Value>)> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSourceConnector for FakeDataSourceConnector {
    async fn list_tables(&self) -> Result<Vec<String>, ConnectorError> {
        if let Some(err) = self.should_fail.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.tables.clone())
    }

    async fn get_columns(
        &self,
        tables: &[String],
    ) -> Result<HashMap<String, Vec<ColumnMeta>>, ConnectorError> {
        if let Some(err) = self.should_fail.lock().unwrap().take() {
            return Err(err);
        }
        Ok(tables
            .iter()
            .filter_map(|t| self.columns.get(t).map(|c| (t.clone(), c.clone())))
            .collect())
    }

    async fn execute(
        &self,
        sql: &str,
        parameters: &[serde_json::Value],
        _timeout: Duration,
    ) -> Result<QueryResult, ConnectorError> {
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), parameters.to_vec()));

        if let Some(err) = self.should_fail.lock().unwrap().take() {
            return Err(err);
        }

        if let Some(handler) = &self.handler {
            return handler(sql, parameters);
        }

        Ok(QueryResult {
            rows: Vec::new(),
            columns: Vec::<ColumnInfo>::new(),
            row_count: 0,
            elapsed_ms: 0,
        })
    }
}

/// A [`DocumentAssembler`] that treats `template_ref` as the template body
/// itself, substituting `{{name}}` text runs from `render_map` with no
/// surrounding Word document structure.
///
/// Suitable for exercising placeholder substitution, retry-on-failure and
/// artifact naming without a real `.docx` renderer.
#[derive(Clone, Default)]
pub struct TemplateScanningAssembler {
    call_count: Arc<Mutex<usize>>,
    calls: Arc<Mutex<Vec<(String, HashMap<String, serde_json::Value>)>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl TemplateScanningAssembler {
    /// Create an assembler that substitutes `{{name}}` tokens verbatim.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `assemble` call, then resume succeeding.
    pub fn fail_next(&self) {
        *self.should_fail.lock().unwrap() = true;
    }

    /// Number of times `assemble` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// `(template_ref, render_map)` pairs passed to `assemble`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, HashMap<String, serde_json::Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentAssembler for TemplateScanningAssembler {
    async fn assemble(
        &self,
        template_ref: &str,
        render_map: &HashMap<String, serde_json::Value>,
        _options: &AssembleOptions,
    ) -> Result<AssembledDocument, Error> {
        *self.call_count.lock().unwrap() += 1;
        self.calls
            .lock()
            .unwrap()
            .push((template_ref.to_string(), render_map.clone()));

        {
            let mut should_fail = self.should_fail.lock().unwrap();
            if *should_fail {
                *should_fail = false;
                return Err(Error::Assembly("fake assembler configured to fail".to_string()));
            }
        }

        let mut rendered = template_ref.to_string();
        for (name, value) in render_map {
            let token = format!("{{{{{name}}}}}");
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&token, &replacement);
        }

        Ok(AssembledDocument {
            bytes: rendered.into_bytes(),
            friendly_name: format!("{template_ref}.docx"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_llm_returns_fixed_response() {
        let client = FakeLlmClient::new().with_response("hello");
        let completion = client
            .complete(
                &[ChatMessage {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                }],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn fake_llm_fail_next_fires_once() {
        let client = FakeLlmClient::new().with_response("ok");
        client.fail_next(LlmError::RateLimit);

        let messages = [ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        }];
        let first = client.complete(&messages, &CompletionOptions::default()).await;
        let second = client.complete(&messages, &CompletionOptions::default()).await;

        assert!(matches!(first, Err(LlmError::RateLimit)));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn fake_llm_handler_sees_messages() {
        let client = FakeLlmClient::new().with_handler(|messages| {
            Ok(format!("saw {} messages", messages.len()))
        });
        let completion = client
            .complete(
                &[
                    ChatMessage { role: "system".to_string(), content: "s".to_string() },
                    ChatMessage { role: "user".to_string(), content: "u".to_string() },
                ],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(completion.content, "saw 2 messages");
    }

    #[tokio::test]
    async fn fake_connector_lists_configured_tables() {
        let connector = FakeDataSourceConnector::new().with_tables(["orders", "customers"]);
        let tables = connector.list_tables().await.unwrap();
        assert_eq!(tables, vec!["orders".to_string(), "customers".to_string()]);
    }

    #[tokio::test]
    async fn fake_connector_records_executed_queries() {
        let connector = FakeDataSourceConnector::new();
        connector
            .execute("SELECT 1", &[serde_json::json!(42)], Duration::from_secs(1))
            .await
            .unwrap();

        let executed = connector.executed_queries();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "SELECT 1");
        assert_eq!(executed[0].1, vec![serde_json::json!(42)]);
    }

    #[tokio::test]
    async fn fake_connector_fail_next_fires_once() {
        let connector = FakeDataSourceConnector::new();
        connector.fail_next(ConnectorError::Timeout);

        let first = connector.execute("SELECT 1", &[], Duration::from_secs(1)).await;
        let second = connector.execute("SELECT 1", &[], Duration::from_secs(1)).await;

        assert!(matches!(first, Err(ConnectorError::Timeout)));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn assembler_substitutes_render_map_tokens() {
        let assembler = TemplateScanningAssembler::new();
        let mut render_map = HashMap::new();
        render_map.insert("customer_name".to_string(), serde_json::json!("Acme Corp"));

        let doc = assembler
            .assemble(
                "Dear {{customer_name}},",
                &render_map,
                &AssembleOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(String::from_utf8(doc.bytes).unwrap(), "Dear Acme Corp,");
        assert_eq!(doc.friendly_name, "Dear {{customer_name}},.docx");
    }

    #[tokio::test]
    async fn assembler_fail_next_returns_assembly_error() {
        let assembler = TemplateScanningAssembler::new();
        assembler.fail_next();

        let result = assembler
            .assemble("template", &HashMap::new(), &AssembleOptions::default())
            .await;

        assert!(matches!(result, Err(Error::Assembly(_))));
        assert_eq!(assembler.call_count(), 1);
    }
}
