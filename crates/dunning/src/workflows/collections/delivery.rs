//! Applies asynchronous provider events to communication records.
//!
//! Updates never touch enrollment state. Each (correlation id, event type) pair applies once;
//! repeats are reported as duplicates and leave the record unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{CommunicationRecord, CommunicationStatus};
use super::repository::{CommunicationStore, RepositoryError};

/// Transparent 1x1 GIF served by the open beacon.
pub const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEventType {
    Delivered,
    #[serde(alias = "opened")]
    Open,
    #[serde(alias = "clicked")]
    Click,
    #[serde(alias = "bounced", alias = "dropped")]
    Bounce,
    #[serde(alias = "spamreport", alias = "spam_report")]
    Spam,
    #[serde(alias = "unsubscribed")]
    Unsubscribe,
    #[serde(other)]
    Unknown,
}

/// One provider webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub correlation_id: String,
    pub event: DeliveryEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryUpdate {
    Applied,
    Duplicate,
    UnknownCorrelation,
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryBatchSummary {
    pub applied: usize,
    pub duplicates: usize,
    pub unmatched: usize,
    pub ignored: usize,
}

pub fn update_communication_status<S>(
    store: &S,
    correlation_id: &str,
    event: DeliveryEventType,
    at: DateTime<Utc>,
) -> Result<DeliveryUpdate, RepositoryError>
where
    S: CommunicationStore + ?Sized,
{
    if event == DeliveryEventType::Unknown {
        return Ok(DeliveryUpdate::Ignored);
    }
    let Some(mut record) = store.communication_by_correlation(correlation_id)? else {
        return Ok(DeliveryUpdate::UnknownCorrelation);
    };

    if !apply_event(&mut record, event, at) {
        return Ok(DeliveryUpdate::Duplicate);
    }

    debug!(
        communication_id = %record.id,
        correlation_id,
        status = record.status.label(),
        ?event,
        "delivery event applied"
    );
    store.update_communication(record)?;
    Ok(DeliveryUpdate::Applied)
}

pub fn apply_batch<S>(
    store: &S,
    events: &[DeliveryEvent],
) -> Result<DeliveryBatchSummary, RepositoryError>
where
    S: CommunicationStore + ?Sized,
{
    let mut summary = DeliveryBatchSummary::default();
    for event in events {
        match update_communication_status(store, &event.correlation_id, event.event, event.timestamp)?
        {
            DeliveryUpdate::Applied => summary.applied += 1,
            DeliveryUpdate::Duplicate => summary.duplicates += 1,
            DeliveryUpdate::UnknownCorrelation => summary.unmatched += 1,
            DeliveryUpdate::Ignored => summary.ignored += 1,
        }
    }
    Ok(summary)
}

/// Beacon hit: only a `sent` record becomes `opened`.
pub fn record_open<S>(
    store: &S,
    correlation_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError>
where
    S: CommunicationStore + ?Sized,
{
    let Some(mut record) = store.communication_by_correlation(correlation_id)? else {
        return Ok(false);
    };
    if record.status != CommunicationStatus::Sent {
        return Ok(false);
    }
    record.status = CommunicationStatus::Opened;
    record.opened_at.get_or_insert(at);
    store.update_communication(record)?;
    Ok(true)
}

/// Returns whether the record changed.
fn apply_event(record: &mut CommunicationRecord, event: DeliveryEventType, at: DateTime<Utc>) -> bool {
    let (slot, target) = match event {
        DeliveryEventType::Delivered => (&mut record.delivered_at, Some(CommunicationStatus::Delivered)),
        DeliveryEventType::Open => (&mut record.opened_at, Some(CommunicationStatus::Opened)),
        DeliveryEventType::Click => (&mut record.clicked_at, Some(CommunicationStatus::Clicked)),
        DeliveryEventType::Bounce => (&mut record.bounced_at, Some(CommunicationStatus::Bounced)),
        DeliveryEventType::Spam => (&mut record.spam_reported_at, None),
        DeliveryEventType::Unsubscribe => (&mut record.unsubscribed_at, None),
        DeliveryEventType::Unknown => return false,
    };

    if slot.is_some() {
        return false;
    }
    *slot = Some(at);

    if let Some(target) = target {
        let current = record.status;
        let upgrade = !current.is_terminal()
            && (target.is_terminal() || target.rank() > current.rank());
        if upgrade {
            record.status = target;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::collections::domain::{
        Channel, CommunicationId, DebtorId, TemplateId, TenantId,
    };
    use crate::workflows::collections::memory::InMemoryCollectionsStore;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn record(status: CommunicationStatus) -> CommunicationRecord {
        CommunicationRecord {
            id: CommunicationId::new("com-1"),
            tenant_id: TenantId::new("acme"),
            debtor_id: DebtorId::new("deb-1"),
            template_id: TemplateId::new("tpl-1"),
            channel: Channel::Email,
            status,
            correlation_id: "corr-1".to_string(),
            subject: None,
            body: "hello".to_string(),
            external_reference: None,
            estimated_delivery: None,
            error_message: None,
            created_at: at(8),
            sent_at: Some(at(8)),
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            failed_at: None,
            spam_reported_at: None,
            unsubscribed_at: None,
        }
    }

    fn store_with(status: CommunicationStatus) -> InMemoryCollectionsStore {
        let store = InMemoryCollectionsStore::new();
        store
            .insert_communication(record(status))
            .expect("insert record");
        store
    }

    #[test]
    fn repeated_event_is_a_duplicate() {
        let store = store_with(CommunicationStatus::Sent);

        let first = update_communication_status(&store, "corr-1", DeliveryEventType::Delivered, at(9))
            .expect("update");
        let second =
            update_communication_status(&store, "corr-1", DeliveryEventType::Delivered, at(10))
                .expect("update");

        assert_eq!(first, DeliveryUpdate::Applied);
        assert_eq!(second, DeliveryUpdate::Duplicate);
        let stored = store.communications().remove(0);
        assert_eq!(stored.status, CommunicationStatus::Delivered);
        assert_eq!(stored.delivered_at, Some(at(9)));
    }

    #[test]
    fn late_delivery_does_not_regress_a_click() {
        let store = store_with(CommunicationStatus::Sent);
        update_communication_status(&store, "corr-1", DeliveryEventType::Click, at(9))
            .expect("update");
        update_communication_status(&store, "corr-1", DeliveryEventType::Delivered, at(10))
            .expect("update");

        let stored = store.communications().remove(0);
        assert_eq!(stored.status, CommunicationStatus::Clicked);
        assert_eq!(stored.delivered_at, Some(at(10)));
    }

    #[test]
    fn terminal_status_is_never_overwritten() {
        let store = store_with(CommunicationStatus::Paid);
        update_communication_status(&store, "corr-1", DeliveryEventType::Bounce, at(9))
            .expect("update");
        update_communication_status(&store, "corr-1", DeliveryEventType::Spam, at(9))
            .expect("update");

        let stored = store.communications().remove(0);
        assert_eq!(stored.status, CommunicationStatus::Paid);
        assert_eq!(stored.bounced_at, Some(at(9)));
        assert_eq!(stored.spam_reported_at, Some(at(9)));
    }

    #[test]
    fn unknown_correlation_and_event_types_are_reported() {
        let store = store_with(CommunicationStatus::Sent);
        let events = vec![
            DeliveryEvent {
                event_id: Some("ev-1".to_string()),
                correlation_id: "missing".to_string(),
                event: DeliveryEventType::Open,
                timestamp: at(9),
            },
            DeliveryEvent {
                event_id: None,
                correlation_id: "corr-1".to_string(),
                event: DeliveryEventType::Unknown,
                timestamp: at(9),
            },
            DeliveryEvent {
                event_id: Some("ev-3".to_string()),
                correlation_id: "corr-1".to_string(),
                event: DeliveryEventType::Open,
                timestamp: at(9),
            },
        ];

        let summary = apply_batch(&store, &events).expect("batch applies");
        assert_eq!(
            summary,
            DeliveryBatchSummary {
                applied: 1,
                duplicates: 0,
                unmatched: 1,
                ignored: 1,
            }
        );
    }

    #[test]
    fn beacon_only_opens_sent_records() {
        let sent = store_with(CommunicationStatus::Sent);
        assert!(record_open(&sent, "corr-1", at(9)).expect("lookup"));
        assert!(!record_open(&sent, "corr-1", at(10)).expect("lookup"));
        assert_eq!(sent.communications()[0].opened_at, Some(at(9)));

        let bounced = store_with(CommunicationStatus::Bounced);
        assert!(!record_open(&bounced, "corr-1", at(9)).expect("lookup"));
        assert_eq!(bounced.communications()[0].status, CommunicationStatus::Bounced);

        assert!(!record_open(&sent, "nope", at(9)).expect("lookup"));
    }

    #[test]
    fn provider_event_names_deserialize() {
        let event: DeliveryEvent = serde_json::from_str(
            r#"{"correlation_id":"c","event":"opened","timestamp":"2026-05-01T09:00:00Z"}"#,
        )
        .expect("event parses");
        assert_eq!(event.event, DeliveryEventType::Open);

        let other: DeliveryEvent = serde_json::from_str(
            r#"{"correlation_id":"c","event":"processed","timestamp":"2026-05-01T09:00:00Z"}"#,
        )
        .expect("event parses");
        assert_eq!(other.event, DeliveryEventType::Unknown);
    }
}
