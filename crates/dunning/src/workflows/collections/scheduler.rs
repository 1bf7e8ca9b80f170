use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::domain::{Execution, ExecutionId};
use super::executor::{ExecutorError, StepExecutor, StepOutcome};
use super::ledger;
use super::repository::{CollectionsRepository, RepositoryError};

/// Limits applied to every poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLimits {
    pub max_batch: usize,
    pub concurrency: usize,
    pub deadline: Duration,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            max_batch: 50,
            concurrency: 8,
            deadline: Duration::from_secs(60),
        }
    }
}

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Due rows left pending because the batch deadline passed first.
    pub deferred: usize,
    pub errors: Vec<String>,
}

enum TaskResult {
    NotClaimed,
    Deferred,
    Finished(Result<StepOutcome, ExecutorError>),
}

/// Entry point of the engine: claims due executions and hands them to the executor.
pub struct Scheduler<R> {
    store: Arc<R>,
    executor: Arc<StepExecutor<R>>,
    limits: PollLimits,
}

impl<R> Scheduler<R>
where
    R: CollectionsRepository + 'static,
{
    pub fn new(store: Arc<R>, executor: Arc<StepExecutor<R>>, limits: PollLimits) -> Self {
        Self {
            store,
            executor,
            limits,
        }
    }

    /// Runs one bounded batch. Safe to call repeatedly and concurrently.
    pub async fn poll(
        &self,
        now: DateTime<Utc>,
        batch_limit: usize,
    ) -> Result<PollSummary, RepositoryError> {
        let limit = batch_limit.min(self.limits.max_batch);
        let mut summary = PollSummary::default();
        if limit == 0 {
            return Ok(summary);
        }

        let due = self.store.due_executions(now, limit)?;
        if due.is_empty() {
            debug!("no executions due");
            return Ok(summary);
        }

        let deadline = Instant::now() + self.limits.deadline;
        let permits = Arc::new(Semaphore::new(self.limits.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for execution in due {
            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let execution_id = execution.id.clone();
                let result = run_one(store, executor, permits, execution, now, deadline).await;
                (execution_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((execution_id, result)) => tally(&mut summary, &execution_id, result),
                Err(join_error) => {
                    error!(%join_error, "execution task aborted");
                    summary
                        .errors
                        .push(format!("execution task aborted: {join_error}"));
                }
            }
        }

        info!(
            executed = summary.executed,
            skipped = summary.skipped,
            failed = summary.failed,
            deferred = summary.deferred,
            "poll cycle finished"
        );
        Ok(summary)
    }
}

async fn run_one<R>(
    store: Arc<R>,
    executor: Arc<StepExecutor<R>>,
    permits: Arc<Semaphore>,
    execution: Execution,
    now: DateTime<Utc>,
    deadline: Instant,
) -> TaskResult
where
    R: CollectionsRepository + 'static,
{
    let _permit = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        _ => return TaskResult::Deferred,
    };
    if Instant::now() >= deadline {
        return TaskResult::Deferred;
    }

    let claimed = match ledger::claim(&*store, &execution, now) {
        Ok(Some(claimed)) => claimed,
        Ok(None) => return TaskResult::NotClaimed,
        Err(error) => return TaskResult::Finished(Err(error.into())),
    };

    TaskResult::Finished(executor.execute(claimed, now).await)
}

fn tally(summary: &mut PollSummary, execution_id: &ExecutionId, result: TaskResult) {
    match result {
        TaskResult::NotClaimed => {
            debug!(%execution_id, "execution claimed by another worker");
        }
        TaskResult::Deferred => summary.deferred += 1,
        TaskResult::Finished(Ok(StepOutcome::Completed { .. })) => summary.executed += 1,
        TaskResult::Finished(Ok(StepOutcome::Skipped(_))) => summary.skipped += 1,
        TaskResult::Finished(Ok(StepOutcome::Failed { error, retry_at })) => {
            summary.failed += 1;
            let message = match retry_at {
                Some(at) => format!("execution {execution_id}: {error} (retry at {at})"),
                None => format!("execution {execution_id}: {error}"),
            };
            summary.errors.push(message);
        }
        TaskResult::Finished(Err(error)) => {
            error!(%execution_id, %error, "execution could not be processed");
            summary.failed += 1;
            summary.errors.push(format!("execution {execution_id}: {error}"));
        }
    }
}
