//! `TaskScheduler`: cron-driven and manually-triggered execution of the
//! [`crate::pipeline::PlaceholderPipeline`], serialized per task (§4.12).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, instrument, warn};

use crate::context::PipelineContext;
use crate::error::{Error, Result};
use crate::ids::TaskId;
use crate::model::TaskExecution;
use crate::pipeline::PlaceholderPipeline;

/// Floor on a task's lock lease; real executions rarely finish in under this,
/// and a short lease risks two triggers racing on a fast-but-not-instant job.
const MIN_LOCK_LEASE: Duration = Duration::from_secs(600);

struct TaskLock {
    holder_execution_id: crate::ids::ExecutionId,
    expires_at: chrono::DateTime<Utc>,
}

/// Registers every active [`crate::model::Task`]'s cron schedule, runs its
/// pipeline on each tick or on a manual trigger, and refuses to start a
/// second concurrent execution for the same task until its lock lease
/// expires or the prior execution finishes.
pub struct TaskScheduler {
    ctx: Arc<PipelineContext>,
    locks: Arc<DashMap<TaskId, TaskLock>>,
    inner: JobScheduler,
}

impl TaskScheduler {
    /// Build an empty scheduler. Call [`TaskScheduler::register_active_tasks`]
    /// then [`TaskScheduler::start`] to begin dispatching.
    pub async fn new(ctx: Arc<PipelineContext>) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| Error::Configuration(format!("could not create job scheduler: {e}")))?;
        Ok(Self {
            ctx,
            locks: Arc::new(DashMap::new()),
            inner,
        })
    }

    /// Register a cron job for every active task that carries a schedule.
    /// Tasks with `schedule: None` are manual-trigger only and are skipped.
    #[instrument(name = "register_active_tasks", skip(self))]
    pub async fn register_active_tasks(&mut self) -> Result<usize> {
        let tasks = self.ctx.repositories.tasks.list_active().await?;
        let mut registered = 0;
        for task in tasks {
            let Some(schedule) = task.schedule.clone() else {
                continue;
            };
            self.register_task(task.id, &schedule).await?;
            registered += 1;
        }
        Ok(registered)
    }

    /// Register (or re-register) one task's cron job.
    pub async fn register_task(&mut self, task_id: TaskId, schedule: &str) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let locks = Arc::clone(&self.locks);

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let ctx = Arc::clone(&ctx);
            let locks = Arc::clone(&locks);
            Box::pin(async move {
                match run_locked(&ctx, &locks, task_id, format!("cron:{}", Utc::now().timestamp())).await {
                    Ok(execution) => {
                        info!(task_id = %task_id, execution_id = %execution.id, status = ?execution.status, "scheduled execution finished");
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "scheduled execution did not run");
                    }
                }
            })
        })
        .map_err(|e| Error::InvalidSchedule {
            schedule: schedule.to_string(),
            reason: e.to_string(),
        })?;

        self.inner
            .add(job)
            .await
            .map_err(|e| Error::Configuration(format!("could not register job: {e}")))?;
        info!(task_id = %task_id, schedule, "registered task schedule");
        Ok(())
    }

    /// Start dispatching registered cron jobs. Does not block; pair with a
    /// shutdown signal (see `reportflow-daemon`'s `ctrl_c` wiring).
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .map_err(|e| Error::Configuration(format!("could not start job scheduler: {e}")))
    }

    /// Gracefully stop dispatching; in-flight executions are not cancelled.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::Configuration(format!("could not shut down job scheduler: {e}")))
    }

    /// Trigger a task immediately, bypassing its cron schedule. Subject to
    /// the same per-task lock as a scheduled run.
    pub async fn trigger_now(&self, task_id: TaskId, trigger_id: String) -> Result<TaskExecution> {
        run_locked(&self.ctx, &self.locks, task_id, trigger_id).await
    }

    /// Sweep locks whose lease has expired without the holder completing
    /// (e.g. the process crashed mid-execution), marking the orphaned
    /// execution as failed. Intended to run on a short interval alongside
    /// the scheduler.
    #[instrument(name = "task_lock_janitor", skip(self))]
    pub async fn run_janitor_pass(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(TaskId, crate::ids::ExecutionId)> = self
            .locks
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| (*entry.key(), entry.holder_execution_id))
            .collect();

        for (task_id, execution_id) in &expired {
            self.locks.remove(task_id);
            if let Ok(mut execution) = self.ctx.repositories.executions.get(*execution_id).await {
                if !execution.status.is_terminal() {
                    execution.error = Some("task_locked: execution lock expired before completion".to_string());
                    execution.transition(crate::model::ExecutionStatus::Failed, execution.progress);
                    let _ = self.ctx.repositories.executions.upsert(execution.clone()).await;
                    self.ctx.progress.emit(
                        execution.id,
                        execution.status,
                        execution.progress,
                        "execution lock expired, marked failed by janitor",
                        None,
                        execution.error.clone(),
                    );
                    warn!(task_id = %task_id, execution_id = %execution_id, "janitor failed an orphaned execution");
                }
            }
        }

        expired.len()
    }
}

async fn run_locked(
    ctx: &Arc<PipelineContext>,
    locks: &Arc<DashMap<TaskId, TaskLock>>,
    task_id: TaskId,
    trigger_id: String,
) -> Result<TaskExecution> {
    let lease = ctx.config.execution_wall_clock.max(MIN_LOCK_LEASE);
    let now = Utc::now();

    {
        if let Some(existing) = locks.get(&task_id) {
            if existing.expires_at > now {
                return Err(Error::TaskLocked {
                    task: task_id,
                    expires_at: existing.expires_at,
                });
            }
        }
    }

    let execution_id = crate::ids::ExecutionId::new();
    locks.insert(
        task_id,
        TaskLock {
            holder_execution_id: execution_id,
            expires_at: now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(600)),
        },
    );

    let pipeline = PlaceholderPipeline::new(Arc::clone(ctx));
    let result = tokio::time::timeout(lease, pipeline.run(execution_id, task_id, trigger_id)).await;

    locks.remove(&task_id);

    match result {
        Ok(run_result) => run_result,
        Err(_) => Err(Error::WallClockTimeout(execution_id)),
    }
}
