use std::sync::Arc;
use std::time::Duration;

use super::{
    finish, send_with_timeout, store_draft, DispatchContext, DispatchError, DispatchOutcome,
    MailSender, OutboundLetter,
};
use crate::workflows::collections::domain::Channel;
use crate::workflows::collections::repository::CommunicationStore;
use crate::workflows::collections::template::{render, TemplateVariables};

pub struct PhysicalDispatcher {
    sender: Arc<dyn MailSender>,
    timeout: Duration,
}

impl PhysicalDispatcher {
    pub fn new(sender: Arc<dyn MailSender>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub async fn send<S>(&self, store: &S, ctx: DispatchContext<'_>) -> DispatchOutcome
    where
        S: CommunicationStore + ?Sized,
    {
        let address = match &ctx.debtor.address {
            Some(address) if address.is_complete() => address.clone(),
            _ => return DispatchOutcome::rejected(DispatchError::IncompleteAddress),
        };

        let vars = TemplateVariables::for_debtor(ctx.debtor, ctx.tenant, ctx.now.date_naive());
        let body = render(&ctx.template.body, &vars);

        let mut record = match store_draft(store, &ctx, Channel::Physical, None, body.clone()) {
            Ok(record) => record,
            Err(error) => return DispatchOutcome::rejected(error.into()),
        };

        let letter = OutboundLetter {
            recipient_name: ctx.debtor.name.clone(),
            address,
            return_address: ctx.tenant.company_address.clone(),
            body,
            correlation_id: record.correlation_id.clone(),
        };

        let result = send_with_timeout(self.timeout, self.sender.send_letter(letter))
            .await
            .map(|receipt| {
                record.external_reference = Some(receipt.external_reference);
                record.estimated_delivery = receipt.estimated_delivery;
            });
        finish(store, record, result, ctx.now)
    }
}
