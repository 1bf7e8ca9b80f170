use std::sync::Arc;
use std::time::Duration;

use super::{
    finish, non_empty, send_with_timeout, store_draft, DispatchContext, DispatchError,
    DispatchOutcome, EmailSender, OutboundEmail, TrackingOptions,
};
use crate::workflows::collections::domain::Channel;
use crate::workflows::collections::repository::CommunicationStore;
use crate::workflows::collections::template::{render, TemplateVariables};

pub struct EmailDispatcher {
    sender: Arc<dyn EmailSender>,
    timeout: Duration,
    tracking_base_url: String,
}

impl EmailDispatcher {
    pub fn new(sender: Arc<dyn EmailSender>, timeout: Duration, tracking_base_url: &str) -> Self {
        Self {
            sender,
            timeout,
            tracking_base_url: tracking_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn send<S>(&self, store: &S, ctx: DispatchContext<'_>) -> DispatchOutcome
    where
        S: CommunicationStore + ?Sized,
    {
        let Some(to) = non_empty(ctx.debtor.email.as_deref()) else {
            return DispatchOutcome::rejected(DispatchError::MissingEmail);
        };

        let vars = TemplateVariables::for_debtor(ctx.debtor, ctx.tenant, ctx.now.date_naive());
        let subject = render(ctx.template.subject.as_deref().unwrap_or_default(), &vars);
        let body = render(&ctx.template.body, &vars);

        let mut record = match store_draft(
            store,
            &ctx,
            Channel::Email,
            Some(subject.clone()),
            body.clone(),
        ) {
            Ok(record) => record,
            Err(error) => return DispatchOutcome::rejected(error.into()),
        };

        let message = OutboundEmail {
            to: to.to_string(),
            from_name: ctx.tenant.company_name.clone(),
            reply_to: ctx.tenant.company_email.clone(),
            subject,
            html_body: with_open_beacon(&body, &self.tracking_base_url, &record.correlation_id),
            correlation_id: record.correlation_id.clone(),
            tracking: TrackingOptions {
                opens: true,
                clicks: true,
            },
        };

        let result = send_with_timeout(self.timeout, self.sender.send_email(message))
            .await
            .map(|receipt| record.external_reference = receipt.provider_message_id);
        finish(store, record, result, ctx.now)
    }
}

/// Appends the 1x1 open beacon, inside `</body>` when the body is a full document.
pub(crate) fn with_open_beacon(body: &str, base_url: &str, correlation_id: &str) -> String {
    let beacon = format!(
        r#"<img src="{base_url}/open?id={correlation_id}" width="1" height="1" alt="" style="display:none" />"#
    );
    match body.rfind("</body>") {
        Some(idx) => format!("{}{}{}", &body[..idx], beacon, &body[idx..]),
        None => format!("{body}{beacon}"),
    }
}
