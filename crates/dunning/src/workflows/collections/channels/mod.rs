//! Channel dispatchers and the pluggable transports they drive.
//!
//! Every dispatcher validates channel prerequisites, writes a draft communication record,
//! then calls its sender under a timeout and records the outcome on that record.

mod email;
mod physical;
mod sms;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Channel, CommunicationId, CommunicationRecord, CommunicationStatus, Debtor, PostalAddress,
    StepType, Template, TenantSettings,
};
use super::repository::{CommunicationStore, RepositoryError};

pub use email::EmailDispatcher;
pub use physical::PhysicalDispatcher;
pub use sms::SmsDispatcher;

/// Tracking switches passed to the email provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackingOptions {
    pub opens: bool,
    pub clicks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub from_name: String,
    pub reply_to: String,
    pub subject: String,
    pub html_body: String,
    pub correlation_id: String,
    pub tracking: TrackingOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundLetter {
    pub recipient_name: String,
    pub address: PostalAddress,
    pub return_address: String,
    pub body: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterReceipt {
    pub external_reference: String,
    pub estimated_delivery: Option<NaiveDate>,
}

/// Transport failure reported by an external sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SenderError {
    #[error("provider rejected the message: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, message: OutboundEmail) -> Result<SendReceipt, SenderError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, message: OutboundSms) -> Result<SendReceipt, SenderError>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_letter(&self, letter: OutboundLetter) -> Result<LetterReceipt, SenderError>;
}

/// The three transports the engine dispatches to.
#[derive(Clone)]
pub struct ChannelSenders {
    pub email: Arc<dyn EmailSender>,
    pub sms: Arc<dyn SmsSender>,
    pub mail: Arc<dyn MailSender>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("debtor has no email address")]
    MissingEmail,
    #[error("debtor has no phone number")]
    MissingPhone,
    #[error("debtor has no complete postal address")]
    IncompleteAddress,
    #[error("step {step_number} has no template")]
    MissingTemplate { step_number: u32 },
    #[error("template {0} not found")]
    TemplateNotFound(String),
    #[error("template {template_id} is for {actual} but the step sends {expected}")]
    TemplateChannelMismatch {
        template_id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Sender(#[from] SenderError),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl DispatchError {
    /// Transient failures are eligible for the retry policy; validation failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Sender(SenderError::Unavailable(_))
                | DispatchError::Timeout(_)
                | DispatchError::Repository(RepositoryError::Unavailable(_))
        )
    }
}

/// Result of one channel send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        communication_id: Option<CommunicationId>,
    },
    Failed {
        communication_id: Option<CommunicationId>,
        error: DispatchError,
    },
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }

    pub fn communication_id(&self) -> Option<&CommunicationId> {
        match self {
            DispatchOutcome::Sent { communication_id }
            | DispatchOutcome::Failed {
                communication_id, ..
            } => communication_id.as_ref(),
        }
    }

    fn rejected(error: DispatchError) -> Self {
        DispatchOutcome::Failed {
            communication_id: None,
            error,
        }
    }
}

/// Inputs shared by every channel.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub debtor: &'a Debtor,
    pub template: &'a Template,
    pub tenant: &'a TenantSettings,
    pub now: DateTime<Utc>,
}

/// Routes a step to its dispatcher. Wait steps succeed without side effects.
pub struct Dispatchers {
    email: EmailDispatcher,
    sms: SmsDispatcher,
    physical: PhysicalDispatcher,
}

impl Dispatchers {
    pub fn new(senders: ChannelSenders, timeout: Duration, tracking_base_url: &str) -> Self {
        Self {
            email: EmailDispatcher::new(senders.email, timeout, tracking_base_url),
            sms: SmsDispatcher::new(senders.sms, timeout),
            physical: PhysicalDispatcher::new(senders.mail, timeout),
        }
    }

    pub async fn dispatch<S>(
        &self,
        step_type: StepType,
        store: &S,
        ctx: DispatchContext<'_>,
    ) -> DispatchOutcome
    where
        S: CommunicationStore + ?Sized,
    {
        if let Some(expected) = step_type.channel() {
            if ctx.template.channel != expected {
                return DispatchOutcome::rejected(DispatchError::TemplateChannelMismatch {
                    template_id: ctx.template.id.to_string(),
                    expected: expected.label(),
                    actual: ctx.template.channel.label(),
                });
            }
        }

        match step_type {
            StepType::Email => self.email.send(store, ctx).await,
            StepType::Sms => self.sms.send(store, ctx).await,
            StepType::Physical => self.physical.send(store, ctx).await,
            StepType::Wait => DispatchOutcome::Sent {
                communication_id: None,
            },
        }
    }
}

/// Persists the draft before any external call so failures stay auditable.
fn store_draft<S>(
    store: &S,
    ctx: &DispatchContext<'_>,
    channel: Channel,
    subject: Option<String>,
    body: String,
) -> Result<CommunicationRecord, RepositoryError>
where
    S: CommunicationStore + ?Sized,
{
    let mut record = CommunicationRecord::draft(ctx.debtor, ctx.template, channel, ctx.now);
    record.subject = subject;
    record.body = body;
    store.insert_communication(record)
}

async fn send_with_timeout<F, T>(timeout: Duration, send: F) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, SenderError>>,
{
    match tokio::time::timeout(timeout, send).await {
        Ok(result) => result.map_err(DispatchError::from),
        Err(_) => Err(DispatchError::Timeout(timeout)),
    }
}

/// Writes the send result onto the record and converts it into an outcome.
fn finish<S>(
    store: &S,
    mut record: CommunicationRecord,
    result: Result<(), DispatchError>,
    now: DateTime<Utc>,
) -> DispatchOutcome
where
    S: CommunicationStore + ?Sized,
{
    let communication_id = Some(record.id.clone());
    match result {
        Ok(()) => {
            record.status = CommunicationStatus::Sent;
            record.sent_at = Some(now);
            if let Err(error) = store.update_communication(record.clone()) {
                // the provider accepted the message, so it must not be sent again;
                // the record stays draft until a delivery event matches it
                warn!(communication_id = %record.id, %error, "sent record could not be saved");
                return DispatchOutcome::Sent { communication_id };
            }
            info!(
                communication_id = %record.id,
                correlation_id = %record.correlation_id,
                channel = record.channel.label(),
                "communication sent"
            );
            DispatchOutcome::Sent { communication_id }
        }
        Err(error) => {
            record.status = CommunicationStatus::Failed;
            record.failed_at = Some(now);
            record.error_message = Some(error.to_string());
            if let Err(save_error) = store.update_communication(record.clone()) {
                warn!(communication_id = %record.id, error = %save_error, "failed record could not be saved");
            }
            warn!(
                communication_id = %record.id,
                channel = record.channel.label(),
                %error,
                "communication failed"
            );
            DispatchOutcome::Failed {
                communication_id,
                error,
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
