//! Collections workflow engine: enrollments, the execution ledger, and the poller that drives
//! debtors through multi-channel dunning sequences.

mod blueprint;
pub mod channels;
pub mod delivery;
pub mod domain;
pub mod executor;
pub mod import;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod plan;
pub mod repository;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod template;

#[cfg(test)]
mod tests;

pub use blueprint::CampaignBlueprint;
pub use channels::{
    ChannelSenders, DispatchError, EmailSender, LetterReceipt, MailSender, OutboundEmail,
    OutboundLetter, OutboundSms, SendReceipt, SenderError, SmsSender,
};
pub use delivery::{DeliveryBatchSummary, DeliveryEvent, DeliveryEventType, DeliveryUpdate};
pub use domain::{
    Channel, CommunicationId, CommunicationRecord, CommunicationStatus, Debtor, DebtorId,
    DebtorStatus, Enrollment, EnrollmentId, EnrollmentStatus, Execution, ExecutionId,
    ExecutionStatus, PostalAddress, StepType, Template, TemplateId, TenantId, TenantPlan,
    TenantSettings, WorkflowDefinition, WorkflowId, WorkflowStep,
};
pub use import::{DebtorImporter, ImportError};
pub use lifecycle::{Advance, EnrollmentLifecycle, LifecycleError};
pub use memory::InMemoryCollectionsStore;
pub use repository::{CollectionsRepository, RepositoryError};
pub use retry::RetryPolicy;
pub use router::collections_router;
pub use scheduler::{PollLimits, PollSummary, Scheduler};
pub use service::{CollectionsError, CollectionsService, EnrollmentTimeline};
pub use template::{render, TemplateVariables, VariableKey};
