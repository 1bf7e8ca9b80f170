//! Mutex-backed store used by the API service and the test suites.
//!
//! Every trait operation takes the single lock, so conditional transitions are atomic
//! in the same way a single-row `UPDATE ... WHERE status = ?` is.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::domain::{
    CommunicationRecord, Debtor, DebtorId, DebtorStatus, Enrollment, EnrollmentId,
    EnrollmentStatus, Execution, ExecutionId, ExecutionStatus, Template, TemplateId, TenantId,
    TenantSettings, WorkflowDefinition, WorkflowId,
};
use super::repository::{
    AccountDirectory, CommunicationStore, EnrollmentStore, ExecutionStore, RepositoryError,
    WorkflowCatalog,
};

#[derive(Debug, Default)]
struct MemoryState {
    workflows: HashMap<WorkflowId, WorkflowDefinition>,
    templates: HashMap<TemplateId, Template>,
    debtors: HashMap<DebtorId, Debtor>,
    tenants: HashMap<TenantId, TenantSettings>,
    enrollments: Vec<Enrollment>,
    executions: Vec<Execution>,
    communications: Vec<CommunicationRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryCollectionsStore {
    state: Mutex<MemoryState>,
}

impl InMemoryCollectionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    // Seeding and inspection helpers stand in for the surrounding application and
    // recover from poisoning rather than fail.
    fn seed(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_workflow(&self, workflow: WorkflowDefinition) {
        self.seed().workflows.insert(workflow.id.clone(), workflow);
    }

    pub fn put_template(&self, template: Template) {
        self.seed().templates.insert(template.id.clone(), template);
    }

    pub fn put_debtor(&self, debtor: Debtor) {
        self.seed().debtors.insert(debtor.id.clone(), debtor);
    }

    pub fn put_tenant(&self, tenant: TenantSettings) {
        self.seed().tenants.insert(tenant.tenant_id.clone(), tenant);
    }

    /// Mirrors a payment or escalation recorded elsewhere in the application.
    pub fn set_debtor_status(&self, debtor_id: &DebtorId, status: DebtorStatus) -> bool {
        match self.seed().debtors.get_mut(debtor_id) {
            Some(debtor) => {
                debtor.status = status;
                true
            }
            None => false,
        }
    }

    pub fn debtors(&self) -> Vec<Debtor> {
        let mut debtors: Vec<Debtor> = self.seed().debtors.values().cloned().collect();
        debtors.sort_by(|a, b| a.id.cmp(&b.id));
        debtors
    }

    pub fn communications(&self) -> Vec<CommunicationRecord> {
        self.seed().communications.clone()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.seed().executions.clone()
    }

    pub fn enrollments(&self) -> Vec<Enrollment> {
        self.seed().enrollments.clone()
    }
}

impl WorkflowCatalog for InMemoryCollectionsStore {
    fn workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.state()?.workflows.get(id).cloned())
    }

    fn default_workflow(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .state()?
            .workflows
            .values()
            .find(|wf| &wf.tenant_id == tenant_id && wf.is_default && wf.is_active)
            .cloned())
    }

    fn template(&self, id: &TemplateId) -> Result<Option<Template>, RepositoryError> {
        Ok(self.state()?.templates.get(id).cloned())
    }
}

impl AccountDirectory for InMemoryCollectionsStore {
    fn debtor(&self, id: &DebtorId) -> Result<Option<Debtor>, RepositoryError> {
        Ok(self.state()?.debtors.get(id).cloned())
    }

    fn tenant(&self, id: &TenantId) -> Result<Option<TenantSettings>, RepositoryError> {
        Ok(self.state()?.tenants.get(id).cloned())
    }
}

impl EnrollmentStore for InMemoryCollectionsStore {
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        let mut guard = self.state()?;
        let duplicate = guard.enrollments.iter().any(|existing| {
            existing.id == enrollment.id
                || (existing.debtor_id == enrollment.debtor_id
                    && existing.status == EnrollmentStatus::Active
                    && enrollment.status == EnrollmentStatus::Active)
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        guard.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    fn transition_enrollment(
        &self,
        expected: EnrollmentStatus,
        enrollment: &Enrollment,
    ) -> Result<bool, RepositoryError> {
        let mut guard = self.state()?;
        match guard
            .enrollments
            .iter_mut()
            .find(|existing| existing.id == enrollment.id)
        {
            Some(existing) if existing.status == expected => {
                *existing = enrollment.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self
            .state()?
            .enrollments
            .iter()
            .find(|enrollment| &enrollment.id == id)
            .cloned())
    }

    fn active_enrollment(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self
            .state()?
            .enrollments
            .iter()
            .find(|enrollment| &enrollment.debtor_id == debtor_id && enrollment.is_active())
            .cloned())
    }

    fn latest_enrollment(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self
            .state()?
            .enrollments
            .iter()
            .rev()
            .find(|enrollment| &enrollment.debtor_id == debtor_id)
            .cloned())
    }
}

impl ExecutionStore for InMemoryCollectionsStore {
    fn insert_execution(&self, execution: Execution) -> Result<Execution, RepositoryError> {
        let mut guard = self.state()?;
        let open_exists = guard.executions.iter().any(|existing| {
            existing.id == execution.id
                || (existing.enrollment_id == execution.enrollment_id
                    && !existing.status.is_terminal())
        });
        if open_exists {
            return Err(RepositoryError::Conflict);
        }
        guard.executions.push(execution.clone());
        Ok(execution)
    }

    fn transition_execution(
        &self,
        expected: ExecutionStatus,
        execution: &Execution,
    ) -> Result<bool, RepositoryError> {
        let mut guard = self.state()?;
        match guard
            .executions
            .iter_mut()
            .find(|existing| existing.id == execution.id)
        {
            Some(existing) if existing.status == expected => {
                *existing = execution.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .find(|execution| &execution.id == id)
            .cloned())
    }

    fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let guard = self.state()?;
        let mut due: Vec<Execution> = guard
            .executions
            .iter()
            .filter(|execution| {
                execution.status == ExecutionStatus::Pending && execution.scheduled_at <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|execution| execution.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    fn executions_for(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<Execution>, RepositoryError> {
        Ok(self
            .state()?
            .executions
            .iter()
            .filter(|execution| &execution.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }
}

impl CommunicationStore for InMemoryCollectionsStore {
    fn insert_communication(
        &self,
        record: CommunicationRecord,
    ) -> Result<CommunicationRecord, RepositoryError> {
        let mut guard = self.state()?;
        if guard.communications.iter().any(|existing| {
            existing.id == record.id || existing.correlation_id == record.correlation_id
        }) {
            return Err(RepositoryError::Conflict);
        }
        guard.communications.push(record.clone());
        Ok(record)
    }

    fn update_communication(&self, record: CommunicationRecord) -> Result<(), RepositoryError> {
        let mut guard = self.state()?;
        let slot = guard
            .communications
            .iter_mut()
            .find(|existing| existing.id == record.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = record;
        Ok(())
    }

    fn communication_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CommunicationRecord>, RepositoryError> {
        Ok(self
            .state()?
            .communications
            .iter()
            .find(|record| record.correlation_id == correlation_id)
            .cloned())
    }

    fn communications_for(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Vec<CommunicationRecord>, RepositoryError> {
        Ok(self
            .state()?
            .communications
            .iter()
            .filter(|record| &record.debtor_id == debtor_id)
            .cloned()
            .collect())
    }
}
