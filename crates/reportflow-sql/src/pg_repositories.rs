//! Postgres-backed [`ExecutionRepository`] and [`ArtifactRepository`].
//!
//! Expected DDL (migrations themselves are out of scope, see `reportflow`'s
//! configuration docs):
//!
//! ```sql
//! CREATE TABLE task_executions (
//!     id              UUID PRIMARY KEY,
//!     task_id         UUID NOT NULL,
//!     status          TEXT NOT NULL,
//!     started_at      TIMESTAMPTZ NOT NULL,
//!     finished_at     TIMESTAMPTZ,
//!     progress        DOUBLE PRECISION NOT NULL,
//!     result_blob     JSONB NOT NULL,
//!     error           TEXT,
//!     trigger_id      TEXT NOT NULL
//! );
//!
//! CREATE TABLE report_artifacts (
//!     id              UUID PRIMARY KEY,
//!     execution_id    UUID NOT NULL,
//!     object_key      TEXT NOT NULL,
//!     size            BIGINT NOT NULL,
//!     backend         TEXT NOT NULL,
//!     friendly_name   TEXT NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use reportflow::error::{Error, Result};
use reportflow::ids::{ArtifactId, ExecutionId};
use reportflow::model::{BackendTag, ExecutionStatus, ReportArtifact, ResultBlob, TaskExecution};
use reportflow::repositories::{ArtifactRepository, ExecutionRepository};
use sqlx::{PgPool, Row};

fn status_to_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Scanning => "scanning",
        ExecutionStatus::Analyzing => "analyzing",
        ExecutionStatus::Assembling => "assembling",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(raw: &str) -> Result<ExecutionStatus> {
    Ok(match raw {
        "pending" => ExecutionStatus::Pending,
        "scanning" => ExecutionStatus::Scanning,
        "analyzing" => ExecutionStatus::Analyzing,
        "assembling" => ExecutionStatus::Assembling,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        other => return Err(Error::Repository(format!("unknown execution status '{other}'"))),
    })
}

fn backend_from_str(raw: &str) -> Result<BackendTag> {
    match raw {
        "primary" => Ok(BackendTag::Primary),
        "fallback" => Ok(BackendTag::Fallback),
        other => Err(Error::Repository(format!("unknown backend tag '{other}'"))),
    }
}

/// `ExecutionRepository` backed by a `task_executions` table.
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    /// Wrap an existing pool, typically shared with [`crate::PgConnector`].
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn get(&self, id: ExecutionId) -> Result<TaskExecution> {
        let row = sqlx::query(
            "SELECT id, task_id, status, started_at, finished_at, progress, result_blob, error, trigger_id \
             FROM task_executions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Repository(e.to_string()))?
        .ok_or_else(|| Error::NotFound { entity: "execution", id: id.to_string() })?;

        let result_blob: serde_json::Value = row.try_get("result_blob").map_err(|e| Error::Repository(e.to_string()))?;
        let result: ResultBlob = serde_json::from_value(result_blob).map_err(|e| Error::Repository(e.to_string()))?;

        Ok(TaskExecution {
            id: ExecutionId::from_uuid(row.try_get("id").map_err(|e| Error::Repository(e.to_string()))?),
            task_id: reportflow::ids::TaskId::from_uuid(
                row.try_get("task_id").map_err(|e| Error::Repository(e.to_string()))?,
            ),
            status: status_from_str(row.try_get::<String, _>("status").map_err(|e| Error::Repository(e.to_string()))?.as_str())?,
            started_at: row.try_get("started_at").map_err(|e| Error::Repository(e.to_string()))?,
            finished_at: row.try_get("finished_at").map_err(|e| Error::Repository(e.to_string()))?,
            progress: row.try_get("progress").map_err(|e| Error::Repository(e.to_string()))?,
            result,
            error: row.try_get("error").map_err(|e| Error::Repository(e.to_string()))?,
            trigger_id: row.try_get("trigger_id").map_err(|e| Error::Repository(e.to_string()))?,
        })
    }

    async fn upsert(&self, execution: TaskExecution) -> Result<()> {
        let result_blob = serde_json::to_value(&execution.result).map_err(|e| Error::Repository(e.to_string()))?;
        sqlx::query(
            "INSERT INTO task_executions (id, task_id, status, started_at, finished_at, progress, result_blob, error, trigger_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
             status = EXCLUDED.status, finished_at = EXCLUDED.finished_at, progress = EXCLUDED.progress, \
             result_blob = EXCLUDED.result_blob, error = EXCLUDED.error",
        )
        .bind(execution.id.as_uuid())
        .bind(execution.task_id.as_uuid())
        .bind(status_to_str(execution.status))
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(execution.progress)
        .bind(result_blob)
        .bind(execution.error)
        .bind(execution.trigger_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Repository(e.to_string()))?;
        Ok(())
    }
}

/// `ArtifactRepository` backed by a `report_artifacts` table.
pub struct PgArtifactRepository {
    pool: PgPool,
}

impl PgArtifactRepository {
    /// Wrap an existing pool, typically shared with [`crate::PgConnector`].
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
    async fn get(&self, id: ArtifactId) -> Result<ReportArtifact> {
        let row = sqlx::query(
            "SELECT id, execution_id, object_key, size, backend, friendly_name, created_at \
             FROM report_artifacts WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Repository(e.to_string()))?
        .ok_or_else(|| Error::NotFound { entity: "artifact", id: id.to_string() })?;

        Ok(ReportArtifact {
            id: ArtifactId::from_uuid(row.try_get("id").map_err(|e| Error::Repository(e.to_string()))?),
            execution_id: ExecutionId::from_uuid(
                row.try_get("execution_id").map_err(|e| Error::Repository(e.to_string()))?,
            ),
            object_key: row.try_get("object_key").map_err(|e| Error::Repository(e.to_string()))?,
            size: {
                let raw: i64 = row.try_get("size").map_err(|e| Error::Repository(e.to_string()))?;
                raw as u64
            },
            backend: backend_from_str(row.try_get::<String, _>("backend").map_err(|e| Error::Repository(e.to_string()))?.as_str())?,
            friendly_name: row.try_get("friendly_name").map_err(|e| Error::Repository(e.to_string()))?,
            created_at: row.try_get("created_at").map_err(|e| Error::Repository(e.to_string()))?,
        })
    }

    async fn put(&self, artifact: ReportArtifact) -> Result<()> {
        sqlx::query(
            "INSERT INTO report_artifacts (id, execution_id, object_key, size, backend, friendly_name, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.execution_id.as_uuid())
        .bind(artifact.object_key)
        .bind(artifact.size as i64)
        .bind(artifact.backend.as_str())
        .bind(artifact.friendly_name)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Repository(e.to_string()))?;
        Ok(())
    }
}
