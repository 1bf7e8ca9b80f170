use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::channels::{ChannelSenders, Dispatchers};
use super::delivery::{self, DeliveryBatchSummary, DeliveryEvent, DeliveryEventType, DeliveryUpdate};
use super::domain::{CommunicationRecord, DebtorId, Enrollment, Execution, WorkflowId};
use super::executor::StepExecutor;
use super::lifecycle::{EnrollmentLifecycle, LifecycleError};
use super::repository::{CollectionsRepository, RepositoryError};
use super::retry::RetryPolicy;
use super::scheduler::{PollLimits, PollSummary, Scheduler};
use crate::config::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum CollectionsError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("debtor {0} has never been enrolled")]
    NeverEnrolled(DebtorId),
}

/// A debtor's latest enrollment with its execution ledger and outbound communications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentTimeline {
    pub enrollment: Enrollment,
    pub executions: Vec<Execution>,
    pub communications: Vec<CommunicationRecord>,
}

/// Facade over the engine exposing the operations the API layer calls.
pub struct CollectionsService<R> {
    store: Arc<R>,
    lifecycle: Arc<EnrollmentLifecycle<R>>,
    scheduler: Scheduler<R>,
    batch_limit: usize,
}

impl<R> CollectionsService<R>
where
    R: CollectionsRepository + 'static,
{
    pub fn new(store: Arc<R>, senders: ChannelSenders, config: &EngineConfig) -> Self {
        let lifecycle = Arc::new(EnrollmentLifecycle::new(Arc::clone(&store)));
        let dispatchers = Dispatchers::new(
            senders,
            config.dispatch_timeout,
            &config.tracking_base_url,
        );
        let executor = Arc::new(StepExecutor::new(
            Arc::clone(&store),
            Arc::clone(&lifecycle),
            dispatchers,
            RetryPolicy::from(config.retry),
        ));
        let limits = PollLimits {
            max_batch: config.batch_limit,
            concurrency: config.concurrency,
            deadline: config.poll_deadline,
        };
        let scheduler = Scheduler::new(Arc::clone(&store), executor, limits);

        Self {
            store,
            lifecycle,
            scheduler,
            batch_limit: config.batch_limit,
        }
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    /// One bounded poll cycle. `limit` is clamped to the configured batch size.
    pub async fn execute_workflows(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<PollSummary, CollectionsError> {
        let limit = limit.unwrap_or(self.batch_limit);
        Ok(self.scheduler.poll(now, limit).await?)
    }

    pub fn start_workflow(
        &self,
        debtor_id: &DebtorId,
        workflow_id: Option<&WorkflowId>,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, CollectionsError> {
        Ok(self.lifecycle.start(debtor_id, workflow_id, now)?)
    }

    pub fn stop_workflow(
        &self,
        debtor_id: &DebtorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, CollectionsError> {
        Ok(self.lifecycle.stop(debtor_id, reason, now)?)
    }

    pub fn retry_workflow(
        &self,
        debtor_id: &DebtorId,
        now: DateTime<Utc>,
    ) -> Result<Execution, CollectionsError> {
        let execution = self.lifecycle.retry(debtor_id, now)?;
        info!(
            %debtor_id,
            execution_id = %execution.id,
            step_number = execution.step_number,
            attempt = execution.attempt,
            "manual retry queued"
        );
        Ok(execution)
    }

    pub fn enrollment_timeline(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<EnrollmentTimeline, CollectionsError> {
        let (enrollment, executions) = self
            .lifecycle
            .timeline(debtor_id)?
            .ok_or_else(|| CollectionsError::NeverEnrolled(debtor_id.clone()))?;
        let communications = self.store.communications_for(debtor_id)?;
        Ok(EnrollmentTimeline {
            enrollment,
            executions,
            communications,
        })
    }

    pub fn update_communication_status(
        &self,
        correlation_id: &str,
        event: DeliveryEventType,
        at: DateTime<Utc>,
    ) -> Result<DeliveryUpdate, CollectionsError> {
        Ok(delivery::update_communication_status(
            &*self.store,
            correlation_id,
            event,
            at,
        )?)
    }

    pub fn ingest_delivery_events(
        &self,
        events: &[DeliveryEvent],
    ) -> Result<DeliveryBatchSummary, CollectionsError> {
        let summary = delivery::apply_batch(&*self.store, events)?;
        info!(
            received = events.len(),
            applied = summary.applied,
            duplicates = summary.duplicates,
            unmatched = summary.unmatched,
            "delivery events processed"
        );
        Ok(summary)
    }

    pub fn record_open(
        &self,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, CollectionsError> {
        Ok(delivery::record_open(&*self.store, correlation_id, at)?)
    }
}
