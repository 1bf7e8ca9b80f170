use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    DebtorId, Enrollment, EnrollmentId, EnrollmentStatus, Execution, ExecutionStatus, TenantId,
    WorkflowDefinition, WorkflowId,
};
use super::ledger;
use super::repository::{CollectionsRepository, RepositoryError};

/// Error raised by enrollment lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("debtor {0} already has an active enrollment")]
    AlreadyEnrolled(DebtorId),
    #[error("debtor {0} not found")]
    DebtorNotFound(DebtorId),
    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),
    #[error("workflow {0} is not active")]
    WorkflowInactive(WorkflowId),
    #[error("workflow {0} belongs to another tenant")]
    WorkflowTenantMismatch(WorkflowId),
    #[error("workflow {0} has no steps")]
    EmptyWorkflow(WorkflowId),
    #[error("tenant has no default workflow")]
    NoDefaultWorkflow,
    #[error("enrollment {0} not found")]
    EnrollmentNotFound(EnrollmentId),
    #[error("debtor {0} has no failed step awaiting retry")]
    NothingToRetry(DebtorId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What happened to an enrollment after a step finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Scheduled(Execution),
    Completed,
    /// The enrollment was stopped or completed concurrently.
    Inactive,
}

/// State machine governing an enrollment's status and scheduling.
pub struct EnrollmentLifecycle<R> {
    store: Arc<R>,
}

impl<R> EnrollmentLifecycle<R>
where
    R: CollectionsRepository + 'static,
{
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    /// Enrolls a debtor and queues the first step for immediate execution.
    pub fn start(
        &self,
        debtor_id: &DebtorId,
        workflow_id: Option<&WorkflowId>,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, LifecycleError> {
        let debtor = self
            .store
            .debtor(debtor_id)?
            .ok_or_else(|| LifecycleError::DebtorNotFound(debtor_id.clone()))?;

        if self.store.active_enrollment(debtor_id)?.is_some() {
            return Err(LifecycleError::AlreadyEnrolled(debtor_id.clone()));
        }

        let workflow = self.resolve_workflow(&debtor.tenant_id, workflow_id)?;
        let first_step = workflow
            .first_step()
            .ok_or_else(|| LifecycleError::EmptyWorkflow(workflow.id.clone()))?;

        let enrollment = Enrollment {
            id: EnrollmentId::generate(),
            debtor_id: debtor.id.clone(),
            tenant_id: debtor.tenant_id.clone(),
            workflow_id: workflow.id.clone(),
            status: EnrollmentStatus::Active,
            current_step_number: 0,
            next_action_at: Some(now),
            started_at: now,
            completed_at: None,
            note: None,
        };

        let enrollment = match self.store.insert_enrollment(enrollment) {
            Ok(enrollment) => enrollment,
            Err(RepositoryError::Conflict) => {
                return Err(LifecycleError::AlreadyEnrolled(debtor_id.clone()))
            }
            Err(other) => return Err(other.into()),
        };

        // step 1 always runs immediately, whatever its configured delay
        ledger::schedule(&*self.store, &enrollment, first_step.step_number, 1, now)?;

        info!(
            enrollment_id = %enrollment.id,
            debtor_id = %enrollment.debtor_id,
            workflow_id = %enrollment.workflow_id,
            "enrollment started"
        );
        Ok(enrollment)
    }

    fn resolve_workflow(
        &self,
        tenant_id: &TenantId,
        workflow_id: Option<&WorkflowId>,
    ) -> Result<WorkflowDefinition, LifecycleError> {
        let workflow = match workflow_id {
            Some(id) => self
                .store
                .workflow(id)?
                .ok_or_else(|| LifecycleError::WorkflowNotFound(id.clone()))?,
            None => self
                .store
                .default_workflow(tenant_id)?
                .ok_or(LifecycleError::NoDefaultWorkflow)?,
        };

        if &workflow.tenant_id != tenant_id {
            return Err(LifecycleError::WorkflowTenantMismatch(workflow.id));
        }
        if !workflow.is_active {
            return Err(LifecycleError::WorkflowInactive(workflow.id));
        }
        Ok(workflow)
    }

    /// Stops the debtor's active enrollment. Absent or already-finished enrollments are a no-op.
    pub fn stop(
        &self,
        debtor_id: &DebtorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, LifecycleError> {
        match self.store.active_enrollment(debtor_id)? {
            Some(enrollment) => self.stop_enrollment(enrollment, reason, now).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn stop_enrollment(
        &self,
        mut enrollment: Enrollment,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, LifecycleError> {
        if enrollment.is_active() {
            let mut stopped = enrollment.clone();
            stopped.status = EnrollmentStatus::Stopped;
            stopped.completed_at = Some(now);
            stopped.next_action_at = None;
            stopped.note = Some(reason.to_string());
            enrollment = if self.save_active(&stopped)? {
                stopped
            } else {
                // finished concurrently; report the stored row
                self.load(&enrollment.id)?
            };
        }

        let cancelled = ledger::cancel_open(&*self.store, &enrollment.id, now, reason)?;
        info!(
            enrollment_id = %enrollment.id,
            cancelled,
            reason,
            "enrollment stopped"
        );
        Ok(enrollment)
    }

    /// Records a finished step and schedules the following one, or completes the run.
    pub fn advance(
        &self,
        enrollment_id: &EnrollmentId,
        completed_step_number: u32,
        executed_at: DateTime<Utc>,
    ) -> Result<Advance, LifecycleError> {
        let mut enrollment = self.load(enrollment_id)?;
        if !enrollment.is_active() {
            return Ok(Advance::Inactive);
        }

        enrollment.current_step_number = enrollment.current_step_number.max(completed_step_number);

        let next_step = self
            .store
            .workflow(&enrollment.workflow_id)?
            .and_then(|workflow| workflow.step(completed_step_number + 1).cloned());

        match next_step {
            Some(step) => {
                let at = executed_at + step.delay();
                enrollment.next_action_at = Some(at);
                if !self.save_active(&enrollment)? {
                    return Ok(Advance::Inactive);
                }
                let execution =
                    ledger::schedule(&*self.store, &enrollment, step.step_number, 1, at)?;
                Ok(Advance::Scheduled(execution))
            }
            None => {
                enrollment.status = EnrollmentStatus::Completed;
                enrollment.completed_at = Some(executed_at);
                enrollment.next_action_at = None;
                if !self.save_active(&enrollment)? {
                    return Ok(Advance::Inactive);
                }
                info!(enrollment_id = %enrollment.id, "enrollment completed");
                Ok(Advance::Completed)
            }
        }
    }

    /// Completes an enrollment whose workflow no longer has any steps.
    pub(crate) fn force_complete(
        &self,
        enrollment_id: &EnrollmentId,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let mut enrollment = self.load(enrollment_id)?;
        if !enrollment.is_active() {
            return Ok(());
        }
        enrollment.status = EnrollmentStatus::Completed;
        enrollment.completed_at = Some(now);
        enrollment.next_action_at = None;
        enrollment.note = Some(note.to_string());
        if self.save_active(&enrollment)? {
            warn!(enrollment_id = %enrollment.id, note, "enrollment force-completed");
        }
        Ok(())
    }

    /// Rewinds to the start of the workflow and queues its first step at `now`.
    pub(crate) fn restart(
        &self,
        enrollment_id: &EnrollmentId,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, LifecycleError> {
        let mut enrollment = self.load(enrollment_id)?;
        if !enrollment.is_active() {
            return Ok(None);
        }
        let Some(first_step) = self
            .store
            .workflow(&enrollment.workflow_id)?
            .and_then(|workflow| workflow.first_step().map(|step| step.step_number))
        else {
            self.force_complete(enrollment_id, note, now)?;
            return Ok(None);
        };

        enrollment.current_step_number = 0;
        enrollment.next_action_at = Some(now);
        enrollment.note = Some(note.to_string());
        if !self.save_active(&enrollment)? {
            return Ok(None);
        }
        let execution = ledger::schedule(&*self.store, &enrollment, first_step, 1, now)?;
        warn!(enrollment_id = %enrollment.id, note, "enrollment restarted from first step");
        Ok(Some(execution))
    }

    /// Queues another attempt of a failed step.
    pub(crate) fn schedule_retry(
        &self,
        enrollment_id: &EnrollmentId,
        step_number: u32,
        attempt: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Execution>, LifecycleError> {
        let mut enrollment = self.load(enrollment_id)?;
        if !enrollment.is_active() {
            return Ok(None);
        }
        enrollment.next_action_at = Some(at);
        if !self.save_active(&enrollment)? {
            return Ok(None);
        }
        let execution = ledger::schedule(&*self.store, &enrollment, step_number, attempt, at)?;
        Ok(Some(execution))
    }

    /// Leaves the enrollment active but unscheduled after a permanent failure.
    pub(crate) fn halt(&self, enrollment_id: &EnrollmentId) -> Result<(), LifecycleError> {
        let mut enrollment = self.load(enrollment_id)?;
        if enrollment.is_active() && enrollment.next_action_at.is_some() {
            enrollment.next_action_at = None;
            self.save_active(&enrollment)?;
        }
        Ok(())
    }

    /// Manually re-queues the failed step of a halted enrollment.
    pub fn retry(
        &self,
        debtor_id: &DebtorId,
        now: DateTime<Utc>,
    ) -> Result<Execution, LifecycleError> {
        let enrollment = self
            .store
            .active_enrollment(debtor_id)?
            .ok_or_else(|| LifecycleError::NothingToRetry(debtor_id.clone()))?;

        let history = self.store.executions_for(&enrollment.id)?;
        let last = history
            .last()
            .filter(|execution| execution.status == ExecutionStatus::Failed)
            .ok_or_else(|| LifecycleError::NothingToRetry(debtor_id.clone()))?;

        self.schedule_retry(&enrollment.id, last.step_number, last.attempt + 1, now)?
            .ok_or_else(|| LifecycleError::NothingToRetry(debtor_id.clone()))
    }

    /// Latest enrollment for a debtor and its execution history.
    pub fn timeline(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Option<(Enrollment, Vec<Execution>)>, LifecycleError> {
        match self.store.latest_enrollment(debtor_id)? {
            Some(enrollment) => {
                let executions = ledger::timeline(&*self.store, &enrollment.id)?;
                Ok(Some((enrollment, executions)))
            }
            None => Ok(None),
        }
    }

    /// Writes `enrollment` only while the stored row is still active, so a concurrent stop
    /// or completion is never overwritten.
    fn save_active(&self, enrollment: &Enrollment) -> Result<bool, LifecycleError> {
        Ok(self
            .store
            .transition_enrollment(EnrollmentStatus::Active, enrollment)?)
    }

    fn load(&self, enrollment_id: &EnrollmentId) -> Result<Enrollment, LifecycleError> {
        self.store
            .enrollment(enrollment_id)?
            .ok_or_else(|| LifecycleError::EnrollmentNotFound(enrollment_id.clone()))
    }
}
