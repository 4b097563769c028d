//! Persistence traits and in-memory reference implementations.
//!
//! Every repository is an async trait so a `sqlx`-backed implementation can
//! sit behind the same interface the pipeline and tests use; the in-memory
//! versions here back every test in this crate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::ids::{ArtifactId, DataSourceId, ExecutionId, PlaceholderId, TaskId, TemplateId};
use crate::model::{Placeholder, ReportArtifact, Task, TaskExecution};

/// A template's placeholder-bearing source text and its scanned placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub source_ref: String,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, id: TaskId) -> Result<Task>;
    async fn list_active(&self) -> Result<Vec<Task>>;
    async fn upsert(&self, task: Task) -> Result<()>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get(&self, id: TemplateId) -> Result<Template>;
    async fn upsert(&self, template: Template) -> Result<()>;
}

#[async_trait]
pub trait PlaceholderRepository: Send + Sync {
    async fn get(&self, id: PlaceholderId) -> Result<Placeholder>;
    async fn list_for_template(&self, template_id: TemplateId) -> Result<Vec<Placeholder>>;
    async fn upsert(&self, placeholder: Placeholder) -> Result<()>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn get(&self, id: ExecutionId) -> Result<TaskExecution>;
    async fn upsert(&self, execution: TaskExecution) -> Result<()>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn get(&self, id: ArtifactId) -> Result<ReportArtifact>;
    async fn put(&self, artifact: ReportArtifact) -> Result<()>;
}

/// A data source's connection identity, kept separate from `DataSourceConnector`
/// so the repository layer never holds live connection state.
#[derive(Debug, Clone)]
pub struct DataSourceRecord {
    pub id: DataSourceId,
    pub name: String,
    pub connection_uri: String,
}

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    async fn get(&self, id: DataSourceId) -> Result<DataSourceRecord>;
}

macro_rules! in_memory_repo {
    ($name:ident, $id:ty, $entity:ty, $not_found:literal) => {
        #[derive(Default)]
        pub struct $name {
            rows: RwLock<HashMap<$id, $entity>>,
        }

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }
        }
    };
}

in_memory_repo!(InMemoryTaskRepository, TaskId, Task, "task");
in_memory_repo!(InMemoryTemplateRepository, TemplateId, Template, "template");
in_memory_repo!(InMemoryPlaceholderRepository, PlaceholderId, Placeholder, "placeholder");
in_memory_repo!(InMemoryExecutionRepository, ExecutionId, TaskExecution, "execution");
in_memory_repo!(InMemoryArtifactRepository, ArtifactId, ReportArtifact, "artifact");
in_memory_repo!(InMemoryDataSourceRepository, DataSourceId, DataSourceRecord, "data_source");

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get(&self, id: TaskId) -> Result<Task> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "task", id: id.to_string() })
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        Ok(self.rows.read().await.values().filter(|t| t.is_active).cloned().collect())
    }

    async fn upsert(&self, task: Task) -> Result<()> {
        self.rows.write().await.insert(task.id, task);
        Ok(())
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get(&self, id: TemplateId) -> Result<Template> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "template", id: id.to_string() })
    }

    async fn upsert(&self, template: Template) -> Result<()> {
        self.rows.write().await.insert(template.id, template);
        Ok(())
    }
}

#[async_trait]
impl PlaceholderRepository for InMemoryPlaceholderRepository {
    async fn get(&self, id: PlaceholderId) -> Result<Placeholder> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "placeholder", id: id.to_string() })
    }

    async fn list_for_template(&self, template_id: TemplateId) -> Result<Vec<Placeholder>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|p| p.template_id == template_id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, placeholder: Placeholder) -> Result<()> {
        self.rows.write().await.insert(placeholder.id, placeholder);
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get(&self, id: ExecutionId) -> Result<TaskExecution> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "execution", id: id.to_string() })
    }

    async fn upsert(&self, execution: TaskExecution) -> Result<()> {
        self.rows.write().await.insert(execution.id, execution);
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn get(&self, id: ArtifactId) -> Result<ReportArtifact> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "artifact", id: id.to_string() })
    }

    async fn put(&self, artifact: ReportArtifact) -> Result<()> {
        self.rows.write().await.insert(artifact.id, artifact);
        Ok(())
    }
}

#[async_trait]
impl DataSourceRepository for InMemoryDataSourceRepository {
    async fn get(&self, id: DataSourceId) -> Result<DataSourceRecord> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound { entity: "data_source", id: id.to_string() })
    }
}

/// Bundle of every repository the pipeline depends on, constructed once and
/// passed down via [`crate::context::PipelineContext`].
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub placeholders: Arc<dyn PlaceholderRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub data_sources: Arc<dyn DataSourceRepository>,
}

impl Repositories {
    /// All-in-memory bundle, used by every test that does not need a real database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            templates: Arc::new(InMemoryTemplateRepository::new()),
            placeholders: Arc::new(InMemoryPlaceholderRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            artifacts: Arc::new(InMemoryArtifactRepository::new()),
            data_sources: Arc::new(InMemoryDataSourceRepository::new()),
        }
    }
}
