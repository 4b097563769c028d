//! Single constructed-once aggregate of every service the pipeline depends
//! on, passed down the call stack instead of reaching for a global locator.

use std::sync::Arc;

use crate::collaborators::{DataSourceConnector, DocumentAssembler, LLMClient, NotificationSink};
use crate::config::PipelineConfig;
use crate::progress::ProgressRecorder;
use crate::repositories::Repositories;
use crate::storage::HybridStorage;
use crate::tools::registry::ToolRegistry;

/// Everything `PlaceholderPipeline`, `TaskScheduler` and the agent modules
/// need, built once at startup. A single `DataSourceConnector` is assumed
/// per process, matching the one reference implementation this crate carries;
/// routing per-task connections to distinct databases is future work.
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub repositories: Arc<Repositories>,
    pub progress: ProgressRecorder,
    pub tools: Arc<ToolRegistry>,
    pub llm: Arc<dyn LLMClient>,
    pub data_source: Arc<dyn DataSourceConnector>,
    pub assembler: Arc<dyn DocumentAssembler>,
    pub storage: Arc<HybridStorage>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl PipelineContext {
    /// Construct a context from every already-built service. Kept as a
    /// plain constructor rather than a separate builder type since every
    /// field is required — there is no meaningful partially-built state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        repositories: Arc<Repositories>,
        progress: ProgressRecorder,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LLMClient>,
        data_source: Arc<dyn DataSourceConnector>,
        assembler: Arc<dyn DocumentAssembler>,
        storage: Arc<HybridStorage>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            repositories,
            progress,
            tools,
            llm,
            data_source,
            assembler,
            storage,
            notifications,
        }
    }
}
