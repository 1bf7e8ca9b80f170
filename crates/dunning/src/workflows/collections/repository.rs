use chrono::{DateTime, Utc};

use super::domain::{
    CommunicationRecord, Debtor, DebtorId, Enrollment, EnrollmentId, EnrollmentStatus, Execution,
    ExecutionId, ExecutionStatus, Template, TemplateId, TenantId, TenantSettings,
    WorkflowDefinition, WorkflowId,
};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Workflow definitions and templates, maintained by the authoring side.
pub trait WorkflowCatalog: Send + Sync {
    fn workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, RepositoryError>;
    fn default_workflow(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;
    fn template(&self, id: &TemplateId) -> Result<Option<Template>, RepositoryError>;
}

/// Debtor and tenant records the engine only reads.
pub trait AccountDirectory: Send + Sync {
    fn debtor(&self, id: &DebtorId) -> Result<Option<Debtor>, RepositoryError>;
    fn tenant(&self, id: &TenantId) -> Result<Option<TenantSettings>, RepositoryError>;
}

pub trait EnrollmentStore: Send + Sync {
    /// Fails with `Conflict` when the debtor already has an active enrollment.
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError>;
    /// Replaces the stored row only if its current status equals `expected`.
    /// Returns whether a row changed.
    fn transition_enrollment(
        &self,
        expected: EnrollmentStatus,
        enrollment: &Enrollment,
    ) -> Result<bool, RepositoryError>;
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError>;
    fn active_enrollment(&self, debtor_id: &DebtorId)
        -> Result<Option<Enrollment>, RepositoryError>;
    /// Most recently started enrollment regardless of status.
    fn latest_enrollment(&self, debtor_id: &DebtorId)
        -> Result<Option<Enrollment>, RepositoryError>;
}

/// Row access for the execution ledger.
pub trait ExecutionStore: Send + Sync {
    /// Fails with `Conflict` when the enrollment already has a pending or executing row.
    fn insert_execution(&self, execution: Execution) -> Result<Execution, RepositoryError>;
    /// Replaces the stored row only if its current status equals `expected`.
    /// Returns whether a row changed.
    fn transition_execution(
        &self,
        expected: ExecutionStatus,
        execution: &Execution,
    ) -> Result<bool, RepositoryError>;
    fn execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError>;
    /// Pending rows with `scheduled_at <= now`, oldest first.
    fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError>;
    /// All rows for an enrollment in creation order.
    fn executions_for(&self, enrollment_id: &EnrollmentId)
        -> Result<Vec<Execution>, RepositoryError>;
}

pub trait CommunicationStore: Send + Sync {
    fn insert_communication(
        &self,
        record: CommunicationRecord,
    ) -> Result<CommunicationRecord, RepositoryError>;
    fn update_communication(&self, record: CommunicationRecord) -> Result<(), RepositoryError>;
    fn communication_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CommunicationRecord>, RepositoryError>;
    fn communications_for(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Vec<CommunicationRecord>, RepositoryError>;
}

/// Everything the engine needs from the relational store.
pub trait CollectionsRepository:
    WorkflowCatalog + AccountDirectory + EnrollmentStore + ExecutionStore + CommunicationStore
{
}

impl<T> CollectionsRepository for T where
    T: WorkflowCatalog + AccountDirectory + EnrollmentStore + ExecutionStore + CommunicationStore
{
}
