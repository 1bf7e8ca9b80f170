use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::config::{EngineConfig, RetryPolicyConfig};
use crate::workflows::collections::channels::{
    ChannelSenders, EmailSender, LetterReceipt, MailSender, OutboundEmail, OutboundLetter,
    OutboundSms, SendReceipt, SenderError, SmsSender,
};
use crate::workflows::collections::domain::{
    Channel, CommunicationRecord, Debtor, DebtorId, DebtorStatus, Enrollment, EnrollmentId,
    EnrollmentStatus, Execution, ExecutionId, ExecutionStatus, PostalAddress, StepType, Template,
    TemplateId, TenantId, TenantPlan, TenantSettings, WorkflowDefinition, WorkflowId, WorkflowStep,
};
use crate::workflows::collections::memory::InMemoryCollectionsStore;
use crate::workflows::collections::repository::{
    AccountDirectory, CommunicationStore, EnrollmentStore, ExecutionStore, RepositoryError,
    WorkflowCatalog,
};
use crate::workflows::collections::service::CollectionsService;

pub(super) const TENANT: &str = "acme";
pub(super) const WORKFLOW: &str = "wf-main";

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn tenant_id() -> TenantId {
    TenantId::new(TENANT)
}

pub(super) fn workflow_id() -> WorkflowId {
    WorkflowId::new(WORKFLOW)
}

pub(super) fn tenant(plan: TenantPlan) -> TenantSettings {
    TenantSettings {
        tenant_id: tenant_id(),
        plan,
        company_name: "Acme Recovery".to_string(),
        company_address: "1 Main St, Ames, IA 50010".to_string(),
        company_phone: "515-555-0199".to_string(),
        company_email: "billing@acme.test".to_string(),
        legal_footer: "This is an attempt to collect a debt.".to_string(),
        disclaimer: "Ignore if already paid.".to_string(),
    }
}

pub(super) fn debtor(id: &str) -> Debtor {
    Debtor {
        id: DebtorId::new(id),
        tenant_id: tenant_id(),
        account_number: format!("ACC-{id}"),
        name: "Jane Doe".to_string(),
        email: Some(format!("{id}@example.com")),
        phone: Some("+15155550100".to_string()),
        address: Some(PostalAddress {
            street: "12 Elm St".to_string(),
            street2: None,
            city: "Des Moines".to_string(),
            state: "IA".to_string(),
            postal_code: "50309".to_string(),
        }),
        balance_cents: 12_550,
        status: DebtorStatus::Active,
    }
}

pub(super) fn templates() -> Vec<Template> {
    vec![
        Template {
            id: TemplateId::new("tpl-email"),
            tenant_id: tenant_id(),
            name: "Notice".to_string(),
            channel: Channel::Email,
            subject: Some("Balance due for {{name}}".to_string()),
            body: "<html><body>Hi {{first_name}}, you owe {{balance}}.</body></html>".to_string(),
        },
        Template {
            id: TemplateId::new("tpl-sms"),
            tenant_id: tenant_id(),
            name: "Reminder".to_string(),
            channel: Channel::Sms,
            subject: None,
            body: "{{company_name}}: {{balance}} is past due".to_string(),
        },
        Template {
            id: TemplateId::new("tpl-letter"),
            tenant_id: tenant_id(),
            name: "Letter".to_string(),
            channel: Channel::Physical,
            subject: None,
            body: "Dear {{name}}, please pay {{balance}}.".to_string(),
        },
    ]
}

fn step(step_number: u32, step_type: StepType, delay_days: u32) -> WorkflowStep {
    let template_id = match step_type {
        StepType::Email => Some(TemplateId::new("tpl-email")),
        StepType::Sms => Some(TemplateId::new("tpl-sms")),
        StepType::Physical => Some(TemplateId::new("tpl-letter")),
        StepType::Wait => None,
    };
    WorkflowStep {
        step_number,
        step_type,
        delay_days,
        delay_hours: 0,
        template_id,
    }
}

pub(super) fn email(step_number: u32, delay_days: u32) -> WorkflowStep {
    step(step_number, StepType::Email, delay_days)
}

pub(super) fn sms(step_number: u32, delay_days: u32) -> WorkflowStep {
    step(step_number, StepType::Sms, delay_days)
}

pub(super) fn wait(step_number: u32, delay_days: u32) -> WorkflowStep {
    step(step_number, StepType::Wait, delay_days)
}

pub(super) fn letter(step_number: u32, delay_days: u32) -> WorkflowStep {
    step(step_number, StepType::Physical, delay_days)
}

pub(super) fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: workflow_id(),
        tenant_id: tenant_id(),
        name: "Main sequence".to_string(),
        steps,
        is_default: true,
        is_active: true,
    }
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicyConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(3_600),
        },
        tracking_base_url: "https://track.test".to_string(),
        ..EngineConfig::default()
    }
}

fn seed(store: &InMemoryCollectionsStore, plan: TenantPlan, steps: Vec<WorkflowStep>) {
    store.put_tenant(tenant(plan));
    store.put_workflow(workflow(steps));
    for template in templates() {
        store.put_template(template);
    }
}

pub(super) struct Harness {
    pub(super) store: Arc<InMemoryCollectionsStore>,
    pub(super) channels: Arc<FakeChannels>,
    pub(super) service: Arc<CollectionsService<InMemoryCollectionsStore>>,
}

impl Harness {
    pub(super) fn new(plan: TenantPlan, steps: Vec<WorkflowStep>) -> Self {
        Self::with_config(plan, steps, engine_config())
    }

    pub(super) fn with_config(
        plan: TenantPlan,
        steps: Vec<WorkflowStep>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(InMemoryCollectionsStore::new());
        seed(&store, plan, steps);

        let channels = Arc::new(FakeChannels::default());
        let service = Arc::new(CollectionsService::new(
            Arc::clone(&store),
            channels.senders(),
            &config,
        ));

        Self {
            store,
            channels,
            service,
        }
    }

    pub(super) fn enroll(&self, debtor_id: &str, at: DateTime<Utc>) -> Enrollment {
        self.store.put_debtor(debtor(debtor_id));
        self.service
            .start_workflow(&DebtorId::new(debtor_id), None, at)
            .expect("debtor enrolls")
    }

    pub(super) fn enrollment(&self, debtor_id: &str) -> Enrollment {
        self.store
            .enrollments()
            .into_iter()
            .rev()
            .find(|enrollment| enrollment.debtor_id.as_str() == debtor_id)
            .expect("enrollment exists")
    }

    pub(super) fn executions(&self, enrollment: &Enrollment) -> Vec<Execution> {
        self.store
            .executions()
            .into_iter()
            .filter(|execution| execution.enrollment_id == enrollment.id)
            .collect()
    }

    pub(super) fn pending(&self, enrollment: &Enrollment) -> Vec<Execution> {
        self.executions(enrollment)
            .into_iter()
            .filter(|execution| execution.status == ExecutionStatus::Pending)
            .collect()
    }
}

/// Records every outbound message and replays scripted failures and delays.
#[derive(Default)]
pub(super) struct FakeChannels {
    emails: Mutex<Vec<OutboundEmail>>,
    texts: Mutex<Vec<OutboundSms>>,
    letters: Mutex<Vec<OutboundLetter>>,
    failures: Mutex<VecDeque<SenderError>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeChannels {
    pub(super) fn senders(self: &Arc<Self>) -> ChannelSenders {
        ChannelSenders {
            email: Arc::clone(self) as Arc<dyn EmailSender>,
            sms: Arc::clone(self) as Arc<dyn SmsSender>,
            mail: Arc::clone(self) as Arc<dyn MailSender>,
        }
    }

    pub(super) fn fail_next(&self, error: SenderError) {
        self.failures.lock().expect("failures lock").push_back(error);
    }

    pub(super) fn delay_sends(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub(super) fn emails(&self) -> Vec<OutboundEmail> {
        self.emails.lock().expect("emails lock").clone()
    }

    pub(super) fn texts(&self) -> Vec<OutboundSms> {
        self.texts.lock().expect("texts lock").clone()
    }

    pub(super) fn letters(&self) -> Vec<OutboundLetter> {
        self.letters.lock().expect("letters lock").clone()
    }

    async fn gate(&self) -> Result<(), SenderError> {
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmailSender for FakeChannels {
    async fn send_email(&self, message: OutboundEmail) -> Result<SendReceipt, SenderError> {
        self.gate().await?;
        self.emails.lock().expect("emails lock").push(message);
        Ok(SendReceipt {
            provider_message_id: Some("msg-1".to_string()),
        })
    }
}

#[async_trait]
impl SmsSender for FakeChannels {
    async fn send_sms(&self, message: OutboundSms) -> Result<SendReceipt, SenderError> {
        self.gate().await?;
        self.texts.lock().expect("texts lock").push(message);
        Ok(SendReceipt::default())
    }
}

#[async_trait]
impl MailSender for FakeChannels {
    async fn send_letter(&self, letter: OutboundLetter) -> Result<LetterReceipt, SenderError> {
        self.gate().await?;
        self.letters.lock().expect("letters lock").push(letter);
        Ok(LetterReceipt {
            external_reference: "ltr-1".to_string(),
            estimated_delivery: NaiveDate::from_ymd_opt(2026, 3, 9),
        })
    }
}

type EnrollmentWriteHook = Box<dyn FnOnce(&Arc<InMemoryCollectionsStore>) + Send>;

/// Wraps the in-memory store with scripted read/write failures and an interleaving hook.
#[derive(Default)]
pub(super) struct FaultyStore {
    inner: Arc<InMemoryCollectionsStore>,
    workflow_read_failures: AtomicUsize,
    due_read_failures: AtomicUsize,
    communication_update_failures: AtomicUsize,
    before_enrollment_write: Mutex<Option<EnrollmentWriteHook>>,
}

impl FaultyStore {
    pub(super) fn new(plan: TenantPlan, steps: Vec<WorkflowStep>) -> Self {
        let store = Self::default();
        seed(&store.inner, plan, steps);
        store
    }

    pub(super) fn inner(&self) -> &Arc<InMemoryCollectionsStore> {
        &self.inner
    }

    pub(super) fn fail_workflow_reads(&self, times: usize) {
        self.workflow_read_failures.store(times, Ordering::SeqCst);
    }

    pub(super) fn fail_due_reads(&self, times: usize) {
        self.due_read_failures.store(times, Ordering::SeqCst);
    }

    pub(super) fn fail_communication_updates(&self, times: usize) {
        self.communication_update_failures
            .store(times, Ordering::SeqCst);
    }

    /// Runs `hook` against the wrapped store right before the next enrollment write.
    pub(super) fn before_enrollment_write(
        &self,
        hook: impl FnOnce(&Arc<InMemoryCollectionsStore>) + Send + 'static,
    ) {
        *self.before_enrollment_write.lock().expect("hook lock") = Some(Box::new(hook));
    }

    fn trip(counter: &AtomicUsize) -> Result<(), RepositoryError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            Err(RepositoryError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }
}

impl WorkflowCatalog for FaultyStore {
    fn workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Self::trip(&self.workflow_read_failures)?;
        self.inner.workflow(id)
    }

    fn default_workflow(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        self.inner.default_workflow(tenant_id)
    }

    fn template(&self, id: &TemplateId) -> Result<Option<Template>, RepositoryError> {
        self.inner.template(id)
    }
}

impl AccountDirectory for FaultyStore {
    fn debtor(&self, id: &DebtorId) -> Result<Option<Debtor>, RepositoryError> {
        self.inner.debtor(id)
    }

    fn tenant(&self, id: &TenantId) -> Result<Option<TenantSettings>, RepositoryError> {
        self.inner.tenant(id)
    }
}

impl EnrollmentStore for FaultyStore {
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        self.inner.insert_enrollment(enrollment)
    }

    fn transition_enrollment(
        &self,
        expected: EnrollmentStatus,
        enrollment: &Enrollment,
    ) -> Result<bool, RepositoryError> {
        let hook = self.before_enrollment_write.lock().expect("hook lock").take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.transition_enrollment(expected, enrollment)
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError> {
        self.inner.enrollment(id)
    }

    fn active_enrollment(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        self.inner.active_enrollment(debtor_id)
    }

    fn latest_enrollment(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        self.inner.latest_enrollment(debtor_id)
    }
}

impl ExecutionStore for FaultyStore {
    fn insert_execution(&self, execution: Execution) -> Result<Execution, RepositoryError> {
        self.inner.insert_execution(execution)
    }

    fn transition_execution(
        &self,
        expected: ExecutionStatus,
        execution: &Execution,
    ) -> Result<bool, RepositoryError> {
        self.inner.transition_execution(expected, execution)
    }

    fn execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        self.inner.execution(id)
    }

    fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, RepositoryError> {
        Self::trip(&self.due_read_failures)?;
        self.inner.due_executions(now, limit)
    }

    fn executions_for(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<Execution>, RepositoryError> {
        self.inner.executions_for(enrollment_id)
    }
}

impl CommunicationStore for FaultyStore {
    fn insert_communication(
        &self,
        record: CommunicationRecord,
    ) -> Result<CommunicationRecord, RepositoryError> {
        self.inner.insert_communication(record)
    }

    fn update_communication(&self, record: CommunicationRecord) -> Result<(), RepositoryError> {
        Self::trip(&self.communication_update_failures)?;
        self.inner.update_communication(record)
    }

    fn communication_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CommunicationRecord>, RepositoryError> {
        self.inner.communication_by_correlation(correlation_id)
    }

    fn communications_for(
        &self,
        debtor_id: &DebtorId,
    ) -> Result<Vec<CommunicationRecord>, RepositoryError> {
        self.inner.communications_for(debtor_id)
    }
}

/// Engine wired over a [`FaultyStore`].
pub(super) struct FaultyHarness {
    pub(super) store: Arc<FaultyStore>,
    pub(super) channels: Arc<FakeChannels>,
    pub(super) service: Arc<CollectionsService<FaultyStore>>,
}

impl FaultyHarness {
    pub(super) fn new(plan: TenantPlan, steps: Vec<WorkflowStep>) -> Self {
        let store = Arc::new(FaultyStore::new(plan, steps));
        let channels = Arc::new(FakeChannels::default());
        let service = Arc::new(CollectionsService::new(
            Arc::clone(&store),
            channels.senders(),
            &engine_config(),
        ));
        Self {
            store,
            channels,
            service,
        }
    }

    pub(super) fn enroll(&self, debtor_id: &str, at: DateTime<Utc>) -> Enrollment {
        self.store.inner().put_debtor(debtor(debtor_id));
        self.service
            .start_workflow(&DebtorId::new(debtor_id), None, at)
            .expect("debtor enrolls")
    }

    pub(super) fn enrollment(&self) -> Enrollment {
        self.store
            .inner()
            .enrollments()
            .into_iter()
            .next()
            .expect("enrollment exists")
    }
}
