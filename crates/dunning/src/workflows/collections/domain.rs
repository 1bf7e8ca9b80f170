use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TenantId, "ten");
string_id!(DebtorId, "deb");
string_id!(WorkflowId, "wf");
string_id!(TemplateId, "tpl");
string_id!(
    /// Identifier of a debtor's run through a workflow.
    EnrollmentId,
    "enr"
);
string_id!(ExecutionId, "exe");
string_id!(CommunicationId, "com");

/// Subscription tier controlling which step types a tenant may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPlan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

/// Outbound delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Physical,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Physical => "physical",
        }
    }
}

/// The closed set of actions a workflow step can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Email,
    Sms,
    Physical,
    Wait,
}

impl StepType {
    pub const fn channel(self) -> Option<Channel> {
        match self {
            StepType::Email => Some(Channel::Email),
            StepType::Sms => Some(Channel::Sms),
            StepType::Physical => Some(Channel::Physical),
            StepType::Wait => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            StepType::Email => "email",
            StepType::Sms => "sms",
            StepType::Physical => "physical",
            StepType::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 1-based position, unique and contiguous within the workflow.
    pub step_number: u32,
    pub step_type: StepType,
    /// Offset from the previous step's completion. Ignored for the first step.
    pub delay_days: u32,
    pub delay_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,
}

impl WorkflowStep {
    pub fn delay(&self) -> Duration {
        Duration::days(i64::from(self.delay_days)) + Duration::hours(i64::from(self.delay_hours))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub tenant_id: TenantId,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub is_default: bool,
    pub is_active: bool,
}

impl WorkflowDefinition {
    pub fn step(&self, step_number: u32) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .find(|step| step.step_number == step_number)
    }

    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().min_by_key(|step| step.step_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Stopped,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Stopped => "stopped",
        }
    }
}

/// A debtor's single run through one workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub debtor_id: DebtorId,
    pub tenant_id: TenantId,
    pub workflow_id: WorkflowId,
    pub status: EnrollmentStatus,
    /// Last step that finished; 0 before the first execution.
    pub current_step_number: u32,
    /// `None` while awaiting scheduling or halted after a failure.
    pub next_action_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Audit annotation for stops, forced completions, and self-healing resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Skipped
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

/// One attempt to run a specific step for a specific enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub enrollment_id: EnrollmentId,
    pub workflow_id: WorkflowId,
    pub step_number: u32,
    pub status: ExecutionStatus,
    /// 1 for the first try of a step, incremented per retry.
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub communication_id: Option<CommunicationId>,
}

impl Execution {
    pub fn pending(
        enrollment: &Enrollment,
        step_number: u32,
        attempt: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::generate(),
            enrollment_id: enrollment.id.clone(),
            workflow_id: enrollment.workflow_id.clone(),
            step_number,
            status: ExecutionStatus::Pending,
            attempt,
            scheduled_at,
            executed_at: None,
            error_message: None,
            communication_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStatus {
    Draft,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Failed,
    Paid,
    Escalated,
}

impl CommunicationStatus {
    /// Terminal statuses are never overwritten by delivery events.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            CommunicationStatus::Bounced
                | CommunicationStatus::Failed
                | CommunicationStatus::Paid
                | CommunicationStatus::Escalated
        )
    }

    /// Engagement ordering for non-terminal statuses.
    pub(crate) const fn rank(self) -> u8 {
        match self {
            CommunicationStatus::Draft => 0,
            CommunicationStatus::Sent => 1,
            CommunicationStatus::Delivered => 2,
            CommunicationStatus::Opened => 3,
            CommunicationStatus::Clicked => 4,
            CommunicationStatus::Bounced
            | CommunicationStatus::Failed
            | CommunicationStatus::Paid
            | CommunicationStatus::Escalated => 5,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CommunicationStatus::Draft => "draft",
            CommunicationStatus::Sent => "sent",
            CommunicationStatus::Delivered => "delivered",
            CommunicationStatus::Opened => "opened",
            CommunicationStatus::Clicked => "clicked",
            CommunicationStatus::Bounced => "bounced",
            CommunicationStatus::Failed => "failed",
            CommunicationStatus::Paid => "paid",
            CommunicationStatus::Escalated => "escalated",
        }
    }
}

/// A single outbound letter, text, or email and its delivery history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub id: CommunicationId,
    pub tenant_id: TenantId,
    pub debtor_id: DebtorId,
    pub template_id: TemplateId,
    pub channel: Channel,
    pub status: CommunicationStatus,
    pub correlation_id: String,
    pub subject: Option<String>,
    pub body: String,
    pub external_reference: Option<String>,
    pub estimated_delivery: Option<NaiveDate>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub spam_reported_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl CommunicationRecord {
    pub fn draft(
        debtor: &Debtor,
        template: &Template,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CommunicationId::generate(),
            tenant_id: debtor.tenant_id.clone(),
            debtor_id: debtor.id.clone(),
            template_id: template.id.clone(),
            channel,
            status: CommunicationStatus::Draft,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            subject: None,
            body: String::new(),
            external_reference: None,
            estimated_delivery: None,
            error_message: None,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            failed_at: None,
            spam_reported_at: None,
            unsubscribed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl PostalAddress {
    /// Mail fulfillment needs street, city, state, and postal code.
    pub fn is_complete(&self) -> bool {
        [&self.street, &self.city, &self.state, &self.postal_code]
            .iter()
            .all(|part| !part.trim().is_empty())
    }

    pub fn single_line(&self) -> String {
        let mut line = self.street.trim().to_string();
        if let Some(street2) = self.street2.as_deref().filter(|s| !s.trim().is_empty()) {
            line.push_str(", ");
            line.push_str(street2.trim());
        }
        format!(
            "{line}, {}, {} {}",
            self.city.trim(),
            self.state.trim(),
            self.postal_code.trim()
        )
    }
}

/// External account status owned by the billing side of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtorStatus {
    Active,
    Paid,
    Escalated,
}

impl DebtorStatus {
    /// Paid and escalated accounts must not receive further automated contact.
    pub const fn halts_collections(self) -> bool {
        matches!(self, DebtorStatus::Paid | DebtorStatus::Escalated)
    }

    pub const fn label(self) -> &'static str {
        match self {
            DebtorStatus::Active => "active",
            DebtorStatus::Paid => "paid",
            DebtorStatus::Escalated => "escalated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debtor {
    pub id: DebtorId,
    pub tenant_id: TenantId,
    pub account_number: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<PostalAddress>,
    /// Outstanding balance in cents.
    pub balance_cents: i64,
    pub status: DebtorStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    pub channel: Channel,
    /// Email only.
    pub subject: Option<String>,
    pub body: String,
}

/// Read-only tenant branding and entitlement data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    pub plan: TenantPlan,
    pub company_name: String,
    pub company_address: String,
    pub company_phone: String,
    pub company_email: String,
    pub legal_footer: String,
    pub disclaimer: String,
}
