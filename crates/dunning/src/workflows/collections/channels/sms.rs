use std::sync::Arc;
use std::time::Duration;

use super::{
    finish, non_empty, send_with_timeout, store_draft, DispatchContext, DispatchError,
    DispatchOutcome, OutboundSms, SmsSender,
};
use crate::workflows::collections::domain::Channel;
use crate::workflows::collections::repository::CommunicationStore;
use crate::workflows::collections::template::{render, TemplateVariables};

pub struct SmsDispatcher {
    sender: Arc<dyn SmsSender>,
    timeout: Duration,
}

impl SmsDispatcher {
    pub fn new(sender: Arc<dyn SmsSender>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub async fn send<S>(&self, store: &S, ctx: DispatchContext<'_>) -> DispatchOutcome
    where
        S: CommunicationStore + ?Sized,
    {
        let Some(to) = non_empty(ctx.debtor.phone.as_deref()) else {
            return DispatchOutcome::rejected(DispatchError::MissingPhone);
        };

        let vars = TemplateVariables::for_debtor(ctx.debtor, ctx.tenant, ctx.now.date_naive());
        let body = render(&ctx.template.body, &vars);

        let mut record = match store_draft(store, &ctx, Channel::Sms, None, body.clone()) {
            Ok(record) => record,
            Err(error) => return DispatchOutcome::rejected(error.into()),
        };

        let message = OutboundSms {
            to: to.to_string(),
            body,
            correlation_id: record.correlation_id.clone(),
        };

        let result = send_with_timeout(self.timeout, self.sender.send_sms(message))
            .await
            .map(|receipt| record.external_reference = receipt.provider_message_id);
        finish(store, record, result, ctx.now)
    }
}
