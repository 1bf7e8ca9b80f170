//! Append-only execution history. Rows are inserted pending and only ever move forward
//! through conditional transitions; nothing is deleted.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::domain::{
    CommunicationId, Enrollment, EnrollmentId, Execution, ExecutionStatus,
};
use super::repository::{ExecutionStore, RepositoryError};

/// Inserts the next pending row for an enrollment.
pub fn schedule<S>(
    store: &S,
    enrollment: &Enrollment,
    step_number: u32,
    attempt: u32,
    at: DateTime<Utc>,
) -> Result<Execution, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let execution = Execution::pending(enrollment, step_number, attempt, at);
    let stored = store.insert_execution(execution)?;
    debug!(
        enrollment_id = %enrollment.id,
        execution_id = %stored.id,
        step_number,
        attempt,
        scheduled_at = %at,
        "execution scheduled"
    );
    Ok(stored)
}

/// Atomically moves a pending row to executing. `false` means another worker owns it.
pub fn claim<S>(
    store: &S,
    execution: &Execution,
    now: DateTime<Utc>,
) -> Result<Option<Execution>, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let mut claimed = execution.clone();
    claimed.status = ExecutionStatus::Executing;
    claimed.executed_at = Some(now);
    if store.transition_execution(ExecutionStatus::Pending, &claimed)? {
        Ok(Some(claimed))
    } else {
        Ok(None)
    }
}

pub fn complete<S>(
    store: &S,
    execution: &Execution,
    now: DateTime<Utc>,
    communication_id: Option<CommunicationId>,
) -> Result<bool, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let mut finished = execution.clone();
    finished.status = ExecutionStatus::Completed;
    finished.executed_at = Some(now);
    finished.communication_id = communication_id;
    store.transition_execution(ExecutionStatus::Executing, &finished)
}

pub fn fail<S>(
    store: &S,
    execution: &Execution,
    now: DateTime<Utc>,
    error: &str,
    communication_id: Option<CommunicationId>,
) -> Result<bool, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let mut failed = execution.clone();
    failed.status = ExecutionStatus::Failed;
    failed.executed_at = Some(now);
    failed.error_message = Some(error.to_string());
    failed.communication_id = communication_id;
    store.transition_execution(ExecutionStatus::Executing, &failed)
}

/// Marks a claimed row skipped.
pub fn skip<S>(
    store: &S,
    execution: &Execution,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<bool, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let mut skipped = execution.clone();
    skipped.status = ExecutionStatus::Skipped;
    skipped.executed_at = Some(now);
    skipped.error_message = Some(reason.to_string());
    store.transition_execution(ExecutionStatus::Executing, &skipped)
}

/// Skips every pending or executing row of an enrollment. Returns how many moved.
pub fn cancel_open<S>(
    store: &S,
    enrollment_id: &EnrollmentId,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<usize, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    let mut cancelled = 0;
    for execution in store.executions_for(enrollment_id)? {
        if execution.status.is_terminal() {
            continue;
        }
        let expected = execution.status;
        let mut skipped = execution;
        skipped.status = ExecutionStatus::Skipped;
        skipped.executed_at = Some(now);
        skipped.error_message = Some(reason.to_string());
        if store.transition_execution(expected, &skipped)? {
            cancelled += 1;
        }
    }
    Ok(cancelled)
}

/// Ordered history for UI timelines and audits.
pub fn timeline<S>(store: &S, enrollment_id: &EnrollmentId) -> Result<Vec<Execution>, RepositoryError>
where
    S: ExecutionStore + ?Sized,
{
    store.executions_for(enrollment_id)
}
