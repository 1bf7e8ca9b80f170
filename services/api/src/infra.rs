use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use dunning::workflows::collections::{
    CampaignBlueprint, ChannelSenders, Debtor, DebtorId, EmailSender, InMemoryCollectionsStore,
    LetterReceipt, MailSender, OutboundEmail, OutboundLetter, OutboundSms, SendReceipt,
    SenderError, SmsSender, TenantId, TenantPlan, TenantSettings,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) const DEMO_TENANT: &str = "demo-collections";
pub(crate) const SAMPLE_DEBTORS: &str = include_str!("../../../crates/dunning/data/sample_debtors.csv");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_message_id(prefix: &str) -> String {
    let id = MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

/// Stand-in transports that log every message instead of calling a provider.
#[derive(Debug, Default)]
pub(crate) struct LoggingSenders;

impl LoggingSenders {
    pub(crate) fn channel_senders() -> ChannelSenders {
        let senders = Arc::new(Self);
        ChannelSenders {
            email: Arc::clone(&senders) as Arc<dyn EmailSender>,
            sms: Arc::clone(&senders) as Arc<dyn SmsSender>,
            mail: senders as Arc<dyn MailSender>,
        }
    }
}

#[async_trait]
impl EmailSender for LoggingSenders {
    async fn send_email(&self, message: OutboundEmail) -> Result<SendReceipt, SenderError> {
        let provider_message_id = next_message_id("email");
        info!(
            to = %message.to,
            subject = %message.subject,
            correlation_id = %message.correlation_id,
            %provider_message_id,
            "email handed to provider"
        );
        Ok(SendReceipt {
            provider_message_id: Some(provider_message_id),
        })
    }
}

#[async_trait]
impl SmsSender for LoggingSenders {
    async fn send_sms(&self, message: OutboundSms) -> Result<SendReceipt, SenderError> {
        let provider_message_id = next_message_id("sms");
        info!(
            to = %message.to,
            correlation_id = %message.correlation_id,
            %provider_message_id,
            "sms handed to provider"
        );
        Ok(SendReceipt {
            provider_message_id: Some(provider_message_id),
        })
    }
}

#[async_trait]
impl MailSender for LoggingSenders {
    async fn send_letter(&self, letter: OutboundLetter) -> Result<LetterReceipt, SenderError> {
        let external_reference = next_message_id("letter");
        let estimated_delivery = Utc::now()
            .date_naive()
            .checked_add_days(Days::new(5));
        info!(
            recipient = %letter.recipient_name,
            address = %letter.address.single_line(),
            correlation_id = %letter.correlation_id,
            %external_reference,
            "letter queued for print and mail"
        );
        Ok(LetterReceipt {
            external_reference,
            estimated_delivery,
        })
    }
}

pub(crate) fn demo_tenant_id() -> TenantId {
    TenantId::new(DEMO_TENANT)
}

pub(crate) fn demo_tenant(plan: TenantPlan) -> TenantSettings {
    TenantSettings {
        tenant_id: demo_tenant_id(),
        plan,
        company_name: "Prairie Recovery Services".to_string(),
        company_address: "400 Locust St, Des Moines, IA 50309".to_string(),
        company_phone: "515-555-0142".to_string(),
        company_email: "accounts@prairie-recovery.test".to_string(),
        legal_footer: "This communication is from a debt collector. This is an attempt to collect a debt and any information obtained will be used for that purpose.".to_string(),
        disclaimer: "If you have already paid, please disregard this notice.".to_string(),
    }
}

/// Registers the demo tenant, the standard campaign, and the given roster.
pub(crate) fn seed_store(
    store: &InMemoryCollectionsStore,
    plan: TenantPlan,
    debtors: Vec<Debtor>,
) -> Vec<DebtorId> {
    store.put_tenant(demo_tenant(plan));
    let workflow_id = CampaignBlueprint::standard(&demo_tenant_id()).install(store);
    let ids: Vec<DebtorId> = debtors.iter().map(|debtor| debtor.id.clone()).collect();
    for debtor in debtors {
        store.put_debtor(debtor);
    }
    info!(%workflow_id, debtors = ids.len(), "in-memory store seeded");
    ids
}

pub(crate) fn parse_plan(raw: &str) -> Result<TenantPlan, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "free" => Ok(TenantPlan::Free),
        "starter" => Ok(TenantPlan::Starter),
        "pro" => Ok(TenantPlan::Pro),
        "enterprise" => Ok(TenantPlan::Enterprise),
        other => Err(format!(
            "unknown plan '{other}' (expected free, starter, pro, or enterprise)"
        )),
    }
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}
