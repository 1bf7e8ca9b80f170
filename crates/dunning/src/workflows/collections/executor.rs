use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::channels::{DispatchContext, DispatchError, DispatchOutcome, Dispatchers};
use super::domain::{CommunicationId, DebtorStatus, Execution, StepType};
use super::ledger;
use super::lifecycle::{Advance, EnrollmentLifecycle, LifecycleError};
use super::plan::{is_step_allowed, PLAN_SKIP_REASON};
use super::repository::{CollectionsRepository, RepositoryError};
use super::retry::RetryPolicy;

/// Why a claimed execution was skipped instead of run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EnrollmentInactive,
    DebtorResolved(DebtorStatus),
    NotOnPlan(StepType),
    WorkflowEmpty,
    StepMissing(u32),
}

/// Terminal classification of one claimed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { advance: Advance },
    Skipped(SkipReason),
    Failed {
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Runs one claimed execution: halt checks, plan gate, dispatch, and ledger bookkeeping.
pub struct StepExecutor<R> {
    store: Arc<R>,
    lifecycle: Arc<EnrollmentLifecycle<R>>,
    dispatchers: Dispatchers,
    retry: RetryPolicy,
}

impl<R> StepExecutor<R>
where
    R: CollectionsRepository + 'static,
{
    pub fn new(
        store: Arc<R>,
        lifecycle: Arc<EnrollmentLifecycle<R>>,
        dispatchers: Dispatchers,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            lifecycle,
            dispatchers,
            retry,
        }
    }

    /// `execution` must already be claimed (status executing). On error the claimed row is
    /// failed and the enrollment halted so it never stays executing.
    pub async fn execute(
        &self,
        execution: Execution,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        match self.run(execution.clone(), now).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.release(&execution, now, &error);
                Err(error)
            }
        }
    }

    /// Best effort: the store may be the thing that is failing.
    fn release(&self, execution: &Execution, now: DateTime<Utc>, error: &ExecutorError) {
        let message = error.to_string();
        match ledger::fail(&*self.store, execution, now, &message, None) {
            Ok(true) => {
                if let Err(halt_error) = self.lifecycle.halt(&execution.enrollment_id) {
                    warn!(
                        enrollment_id = %execution.enrollment_id,
                        error = %halt_error,
                        "enrollment could not be halted"
                    );
                }
            }
            Ok(false) => {}
            Err(save_error) => warn!(
                execution_id = %execution.id,
                error = %save_error,
                "claimed execution could not be released"
            ),
        }
    }

    async fn run(
        &self,
        execution: Execution,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ExecutorError> {
        let store = &*self.store;

        let enrollment = match store.enrollment(&execution.enrollment_id)? {
            Some(enrollment) if enrollment.is_active() => enrollment,
            _ => {
                ledger::skip(store, &execution, now, "enrollment not active")?;
                return Ok(StepOutcome::Skipped(SkipReason::EnrollmentInactive));
            }
        };

        let Some(debtor) = store.debtor(&enrollment.debtor_id)? else {
            return self.fail(&execution, now, "debtor not found".to_string(), None, false);
        };

        if debtor.status.halts_collections() {
            let reason = format!("debtor status is {}", debtor.status.label());
            info!(
                enrollment_id = %enrollment.id,
                execution_id = %execution.id,
                reason = %reason,
                "halting enrollment before dispatch"
            );
            // stopping skips this claimed row along with any other open ones
            self.lifecycle.stop_enrollment(enrollment, &reason, now)?;
            return Ok(StepOutcome::Skipped(SkipReason::DebtorResolved(
                debtor.status,
            )));
        }

        let workflow = match store.workflow(&enrollment.workflow_id)? {
            Some(workflow) if !workflow.steps.is_empty() => workflow,
            _ => {
                let note = "workflow has no steps; enrollment force-completed";
                ledger::skip(store, &execution, now, note)?;
                self.lifecycle.force_complete(&enrollment.id, note, now)?;
                return Ok(StepOutcome::Skipped(SkipReason::WorkflowEmpty));
            }
        };

        let Some(step) = workflow.step(execution.step_number).cloned() else {
            let note = format!(
                "step {} not found in workflow {}; restarting from first step",
                execution.step_number, workflow.id
            );
            ledger::skip(store, &execution, now, &note)?;
            self.lifecycle.restart(&enrollment.id, &note, now)?;
            return Ok(StepOutcome::Skipped(SkipReason::StepMissing(
                execution.step_number,
            )));
        };

        let Some(tenant) = store.tenant(&enrollment.tenant_id)? else {
            return self.fail(
                &execution,
                now,
                "tenant settings not found".to_string(),
                None,
                false,
            );
        };

        if !is_step_allowed(tenant.plan, step.step_type) {
            debug!(
                execution_id = %execution.id,
                step_type = step.step_type.label(),
                "step not available on plan; advancing"
            );
            if ledger::skip(store, &execution, now, PLAN_SKIP_REASON)? {
                self.lifecycle.advance(&enrollment.id, step.step_number, now)?;
            }
            return Ok(StepOutcome::Skipped(SkipReason::NotOnPlan(step.step_type)));
        }

        if step.step_type == StepType::Wait {
            return self.complete(&execution, now, None);
        }

        let template = match &step.template_id {
            None => {
                let error = DispatchError::MissingTemplate {
                    step_number: step.step_number,
                };
                return self.fail(&execution, now, error.to_string(), None, false);
            }
            Some(template_id) => match store.template(template_id)? {
                Some(template) => template,
                None => {
                    let error = DispatchError::TemplateNotFound(template_id.to_string());
                    return self.fail(&execution, now, error.to_string(), None, false);
                }
            },
        };

        let ctx = DispatchContext {
            debtor: &debtor,
            template: &template,
            tenant: &tenant,
            now,
        };

        match self.dispatchers.dispatch(step.step_type, store, ctx).await {
            DispatchOutcome::Sent { communication_id } => {
                self.complete(&execution, now, communication_id)
            }
            DispatchOutcome::Failed {
                communication_id,
                error,
            } => {
                let transient = error.is_transient();
                self.fail(
                    &execution,
                    now,
                    error.to_string(),
                    communication_id,
                    transient,
                )
            }
        }
    }

    fn complete(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
        communication_id: Option<CommunicationId>,
    ) -> Result<StepOutcome, ExecutorError> {
        if !ledger::complete(&*self.store, execution, now, communication_id)? {
            // the enrollment was stopped while the step was in flight
            return Ok(StepOutcome::Skipped(SkipReason::EnrollmentInactive));
        }
        let advance = self
            .lifecycle
            .advance(&execution.enrollment_id, execution.step_number, now)?;
        Ok(StepOutcome::Completed { advance })
    }

    fn fail(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
        error: String,
        communication_id: Option<CommunicationId>,
        transient: bool,
    ) -> Result<StepOutcome, ExecutorError> {
        if !ledger::fail(&*self.store, execution, now, &error, communication_id)? {
            return Ok(StepOutcome::Skipped(SkipReason::EnrollmentInactive));
        }

        let next_attempt = if transient {
            self.retry.next_attempt_at(execution.attempt, now)
        } else {
            None
        };

        let retry_at = match next_attempt {
            Some(at) => self
                .lifecycle
                .schedule_retry(
                    &execution.enrollment_id,
                    execution.step_number,
                    execution.attempt + 1,
                    at,
                )?
                .map(|retry| retry.scheduled_at),
            None => {
                self.lifecycle.halt(&execution.enrollment_id)?;
                None
            }
        };

        warn!(
            execution_id = %execution.id,
            enrollment_id = %execution.enrollment_id,
            step_number = execution.step_number,
            attempt = execution.attempt,
            retry_at = ?retry_at,
            error = %error,
            "step failed"
        );
        Ok(StepOutcome::Failed { error, retry_at })
    }
}
